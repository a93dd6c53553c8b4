//! Outline writing: persist mapped entries as the PDF's bookmark tree.
//!
//! pdfium-render can read bookmarks but not create them, so this stage
//! edits the document with lopdf. The flat `(level, title, page)` list is
//! turned into the `/Outlines` tree with a level stack: each entry becomes a
//! child of the nearest preceding entry with a smaller level. Level jumps
//! (1 → 3) are tolerated; the deeper entry simply nests one step down.
//!
//! Writing replaces any outline the document already had. The result is
//! saved through a temp file in the destination directory and renamed into
//! place, so a failed save never leaves a truncated PDF behind.

use crate::error::TocError;
use crate::pipeline::mapper::OutlineEntry;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Persists outline entries into a document.
pub trait OutlineWriter {
    /// Number of pages in the target document.
    fn page_count(&self) -> usize;

    /// Replace the document outline with `outline`; returns items written.
    ///
    /// Every `page` must already lie in `[1, page_count]`.
    fn write_outline(&mut self, outline: &[OutlineEntry]) -> Result<usize, TocError>;
}

/// [`OutlineWriter`] that edits a PDF in memory with lopdf.
#[derive(Debug)]
pub struct LopdfOutlineWriter {
    doc: Document,
    source: PathBuf,
    page_ids: Vec<ObjectId>,
}

impl LopdfOutlineWriter {
    /// Load `path`, decrypting with `password` when the file is encrypted.
    pub fn open(path: impl AsRef<Path>, password: Option<&str>) -> Result<Self, TocError> {
        let path = path.as_ref();
        let mut doc = Document::load(path).map_err(|e| TocError::CorruptPdf {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        if doc.is_encrypted() {
            let Some(pwd) = password else {
                return Err(TocError::PasswordRequired {
                    path: path.to_path_buf(),
                });
            };
            doc.decrypt(pwd).map_err(|_| TocError::WrongPassword {
                path: path.to_path_buf(),
            })?;
        }

        Ok(Self::from_document(doc, path))
    }

    /// Wrap an already-loaded document.
    pub fn from_document(doc: Document, source: impl Into<PathBuf>) -> Self {
        let page_ids = doc.get_pages().into_values().collect();
        Self {
            doc,
            source: source.into(),
            page_ids,
        }
    }

    /// Write the document to `output` atomically.
    pub fn save(&mut self, output: impl AsRef<Path>) -> Result<(), TocError> {
        let output = output.as_ref();
        let write_failed = |source: std::io::Error| TocError::OutputWriteFailed {
            path: output.to_path_buf(),
            source,
        };

        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(write_failed)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_failed)?;
        self.doc
            .save_to(tmp.as_file_mut())
            .map_err(|e| TocError::OutlineWriteFailed {
                path: output.to_path_buf(),
                detail: e.to_string(),
            })?;
        tmp.persist(output).map_err(|e| write_failed(e.error))?;

        info!("Wrote {}", output.display());
        Ok(())
    }

    /// Read back the document's current outline in display order.
    ///
    /// Items whose destination cannot be resolved to a page get `page = 0`.
    pub fn outline(&self) -> Result<Vec<OutlineEntry>, TocError> {
        let catalog = self.catalog()?;
        let Ok(root) = catalog.get(b"Outlines").and_then(Object::as_reference) else {
            return Ok(Vec::new());
        };
        let root = self.doc.get_dictionary(root).map_err(|e| self.lopdf_error(e))?;

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<(ObjectId, u32)> = Vec::new();
        if let Ok(first) = root.get(b"First").and_then(Object::as_reference) {
            stack.push((first, 1));
        }

        while let Some((id, level)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let item = self.doc.get_dictionary(id).map_err(|e| self.lopdf_error(e))?;
            out.push(OutlineEntry {
                level,
                title: item.get(b"Title").map(decode_text_string).unwrap_or_default(),
                page: self.dest_page(item).unwrap_or(0),
            });
            // Sibling below child on the stack: depth-first, document order.
            if let Ok(next) = item.get(b"Next").and_then(Object::as_reference) {
                stack.push((next, level));
            }
            if let Ok(child) = item.get(b"First").and_then(Object::as_reference) {
                stack.push((child, level + 1));
            }
        }
        Ok(out)
    }

    fn dest_page(&self, item: &Dictionary) -> Option<usize> {
        let dest = item.get(b"Dest").and_then(Object::as_array).ok()?;
        let page_ref = dest.first()?.as_reference().ok()?;
        self.page_ids.iter().position(|&id| id == page_ref).map(|i| i + 1)
    }

    fn catalog_id(&self) -> Result<ObjectId, TocError> {
        self.doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|e| self.lopdf_error(e))
    }

    fn catalog(&self) -> Result<&Dictionary, TocError> {
        let id = self.catalog_id()?;
        self.doc.get_dictionary(id).map_err(|e| self.lopdf_error(e))
    }

    fn catalog_mut(&mut self) -> Result<&mut Dictionary, TocError> {
        let id = self.catalog_id()?;
        let source = self.source.clone();
        self.doc
            .get_object_mut(id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| TocError::OutlineWriteFailed {
                path: source,
                detail: e.to_string(),
            })
    }

    fn lopdf_error(&self, e: lopdf::Error) -> TocError {
        TocError::OutlineWriteFailed {
            path: self.source.clone(),
            detail: e.to_string(),
        }
    }
}

impl OutlineWriter for LopdfOutlineWriter {
    fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn write_outline(&mut self, outline: &[OutlineEntry]) -> Result<usize, TocError> {
        if outline.is_empty() {
            self.catalog_mut()?.remove(b"Outlines");
            debug!("Removed outline (no entries)");
            return Ok(0);
        }
        if self.page_ids.is_empty() {
            return Err(TocError::OutlineWriteFailed {
                path: self.source.clone(),
                detail: "document has no pages".into(),
            });
        }

        let root_id = build_outline_tree(&mut self.doc, &self.page_ids, outline);
        let catalog = self.catalog_mut()?;
        catalog.set("Outlines", root_id);
        catalog.set("PageMode", "UseOutlines");

        info!("Outline set: {} items", outline.len());
        Ok(outline.len())
    }
}

/// Insert outline item objects for `entries` and return the root's id.
fn build_outline_tree(doc: &mut Document, page_ids: &[ObjectId], entries: &[OutlineEntry]) -> ObjectId {
    let ids: Vec<ObjectId> = entries.iter().map(|_| doc.new_object_id()).collect();

    let mut roots = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    let mut level_stack: Vec<(u32, usize)> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        while level_stack.last().is_some_and(|&(level, _)| level >= entry.level) {
            level_stack.pop();
        }
        match level_stack.last() {
            Some(&(_, parent)) => children[parent].push(i),
            None => roots.push(i),
        }
        level_stack.push((entry.level, i));
    }

    let root_id = doc.new_object_id();
    let groups = std::iter::once((root_id, &roots))
        .chain(children.iter().enumerate().map(|(i, kids)| (ids[i], kids)));

    for (parent_id, siblings) in groups {
        for (pos, &i) in siblings.iter().enumerate() {
            let entry = &entries[i];
            let page_id = page_ids[entry.page.clamp(1, page_ids.len()) - 1];
            let mut dict = dictionary! {
                "Title" => encode_text_string(&entry.title),
                "Parent" => parent_id,
                "Dest" => vec![Object::Reference(page_id), "Fit".into()],
            };
            if pos > 0 {
                dict.set("Prev", ids[siblings[pos - 1]]);
            }
            if pos + 1 < siblings.len() {
                dict.set("Next", ids[siblings[pos + 1]]);
            }
            let kids = &children[i];
            if let (Some(&first), Some(&last)) = (kids.first(), kids.last()) {
                dict.set("First", ids[first]);
                dict.set("Last", ids[last]);
                dict.set("Count", -(kids.len() as i64));
            }
            doc.objects.insert(ids[i], dict.into());
        }
    }

    doc.objects.insert(
        root_id,
        dictionary! {
            "Type" => "Outlines",
            "First" => ids[roots[0]],
            "Last" => ids[roots[roots.len() - 1]],
            "Count" => roots.len() as i64,
        }
        .into(),
    );
    root_id
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn encode_text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn decode_text_string(obj: &Object) -> String {
    let Object::String(bytes, _) = obj else {
        return String::new();
    };
    match bytes.strip_prefix(&[0xFE, 0xFF]) {
        Some(utf16) => {
            let units: Vec<u16> = utf16
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{content::Content, Stream};

    /// Minimal document with `pages` blank pages.
    pub(crate) fn blank_document(pages: usize) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            Content { operations: vec![] }.encode().unwrap(),
        ));
        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                    "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => pages as i64 }.into(),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn entry(level: u32, title: &str, page: usize) -> OutlineEntry {
        OutlineEntry {
            level,
            title: title.to_string(),
            page,
        }
    }

    #[test]
    fn nested_outline_round_trips_in_order() {
        let mut writer = LopdfOutlineWriter::from_document(blank_document(20), "mem.pdf");
        let outline = vec![
            entry(1, "Preface", 2),
            entry(1, "Chapter 1", 5),
            entry(2, "1.1 Basics", 6),
            entry(3, "1.1.1 Detail", 7),
            entry(2, "1.2 More", 9),
            entry(1, "Chapter 2", 12),
        ];
        assert_eq!(writer.write_outline(&outline).unwrap(), 6);
        assert_eq!(writer.outline().unwrap(), outline);
    }

    #[test]
    fn level_jump_nests_under_previous() {
        let mut writer = LopdfOutlineWriter::from_document(blank_document(5), "mem.pdf");
        writer
            .write_outline(&[entry(1, "A", 1), entry(3, "deep", 2), entry(1, "B", 3)])
            .unwrap();
        let read = writer.outline().unwrap();
        assert_eq!(read[1], entry(2, "deep", 2));
        assert_eq!(read[2], entry(1, "B", 3));
    }

    #[test]
    fn leading_deep_entry_becomes_root() {
        let mut writer = LopdfOutlineWriter::from_document(blank_document(5), "mem.pdf");
        writer.write_outline(&[entry(2, "Orphan", 1), entry(1, "Top", 2)]).unwrap();
        let levels: Vec<u32> = writer.outline().unwrap().iter().map(|e| e.level).collect();
        assert_eq!(levels, [1, 1]);
    }

    #[test]
    fn rewriting_replaces_previous_outline() {
        let mut writer = LopdfOutlineWriter::from_document(blank_document(5), "mem.pdf");
        writer.write_outline(&[entry(1, "Old", 1)]).unwrap();
        writer.write_outline(&[entry(1, "New", 2)]).unwrap();
        assert_eq!(writer.outline().unwrap(), vec![entry(1, "New", 2)]);

        writer.write_outline(&[]).unwrap();
        assert!(writer.outline().unwrap().is_empty());
    }

    #[test]
    fn non_ascii_titles_survive() {
        let mut writer = LopdfOutlineWriter::from_document(blank_document(3), "mem.pdf");
        writer.write_outline(&[entry(1, "第一章 绪论", 1), entry(1, "Résumé", 2)]).unwrap();
        let titles: Vec<String> = writer.outline().unwrap().into_iter().map(|e| e.title).collect();
        assert_eq!(titles, ["第一章 绪论", "Résumé"]);
    }

    #[test]
    fn empty_document_is_rejected() {
        let mut writer = LopdfOutlineWriter::from_document(blank_document(0), "mem.pdf");
        assert_eq!(writer.page_count(), 0);
        let err = writer.write_outline(&[entry(1, "A", 1)]).unwrap_err();
        assert!(err.to_string().contains("no pages"));
    }

    #[test]
    fn save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/out.pdf");
        let mut writer = LopdfOutlineWriter::from_document(blank_document(4), "mem.pdf");
        writer.write_outline(&[entry(1, "Intro", 3)]).unwrap();
        writer.save(&out).unwrap();

        let reopened = LopdfOutlineWriter::open(&out, None).unwrap();
        assert_eq!(reopened.page_count(), 4);
        assert_eq!(reopened.outline().unwrap(), vec![entry(1, "Intro", 3)]);
    }

    #[test]
    fn open_missing_file_is_corrupt_pdf_error() {
        let err = LopdfOutlineWriter::open("/definitely/not/here.pdf", None).unwrap_err();
        assert!(matches!(err, TocError::CorruptPdf { .. }));
    }
}
