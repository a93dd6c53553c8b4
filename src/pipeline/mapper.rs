//! Page mapping: printed page numbers → physical PDF pages.
//!
//! Entries reach this stage as loose JSON, possibly hand-edited, so each one
//! is coerced on its own by [`coerce_entry`] and silently dropped when a
//! field is unusable. The surviving entries are shifted by the offset and
//! clamped into the document.
//!
//! ## Offset convention
//!
//! `offset = pdf_page - printed_page`, measured at any page where both are
//! known. If printed page 1 sits on the 10th page of the file the offset is
//! 9, and `target = printed_page + offset`. Targets before the first page or
//! past the last are pinned to the nearest end: a slightly wrong destination
//! is still a usable bookmark.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// One validated TOC row, still carrying the printed page number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub level: u32,
    pub title: String,
    pub page: i64,
}

/// One outline item ready for the writer: `page` is a 1-based PDF page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub level: u32,
    pub title: String,
    pub page: usize,
}

/// Result of mapping a batch, with counts for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingReport {
    pub entries: Vec<OutlineEntry>,
    /// Rows dropped because a field could not be coerced.
    pub dropped: usize,
    /// Rows whose target fell outside the document and was pinned.
    pub clamped: usize,
}

/// Coerce a loose JSON row into a [`TocEntry`].
///
/// Accepts integers, integral-looking strings (`"12"`) and finite floats
/// (truncated) for `level` and `page`; strings and numbers for `title`.
/// Returns `None` when a field is missing or unusable, when `level < 1`,
/// or when the title is blank.
pub fn coerce_entry(raw: &Value) -> Option<TocEntry> {
    let level = coerce_int(raw.get("level")?)?;
    let page = coerce_int(raw.get("page")?)?;
    let title = coerce_text(raw.get("title")?)?;

    let level = u32::try_from(level).ok().filter(|&l| l >= 1)?;
    Some(TocEntry { level, title, page })
}

fn coerce_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_text(v: &Value) -> Option<String> {
    let text = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Physical page for a printed page, pinned into `[1, page_count]`.
///
/// With `page_count == 0` every target is 1.
pub fn target_page(printed_page: i64, offset: i64, page_count: usize) -> usize {
    let last = i64::try_from(page_count).unwrap_or(i64::MAX);
    printed_page.saturating_add(offset).min(last).max(1) as usize
}

/// Map rows to outline entries, keeping input order.
pub fn map_entries(entries: &[Value], offset: i64, page_count: usize) -> Vec<OutlineEntry> {
    map_entries_with_report(entries, offset, page_count).entries
}

/// Like [`map_entries`], also counting dropped and clamped rows.
pub fn map_entries_with_report(entries: &[Value], offset: i64, page_count: usize) -> MappingReport {
    let mut report = MappingReport::default();

    for (i, raw) in entries.iter().enumerate() {
        let Some(entry) = coerce_entry(raw) else {
            debug!("Dropping TOC row {}: unusable fields in {}", i + 1, raw);
            report.dropped += 1;
            continue;
        };

        let unclamped = entry.page.saturating_add(offset);
        let page = target_page(entry.page, offset, page_count);
        if i64::try_from(page).ok() != Some(unclamped) {
            warn!(
                "'{}': printed page {} + offset {} = {} is outside 1..={}, pinned to {}",
                entry.title, entry.page, offset, unclamped, page_count, page
            );
            report.clamped += 1;
        }

        report.entries.push(OutlineEntry {
            level: entry.level,
            title: entry.title,
            page,
        });
    }

    if report.dropped > 0 {
        warn!("Dropped {} of {} TOC rows with unusable fields", report.dropped, entries.len());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outline(level: u32, title: &str, page: usize) -> OutlineEntry {
        OutlineEntry {
            level,
            title: title.to_string(),
            page,
        }
    }

    #[test]
    fn offset_is_added() {
        let mapped = map_entries(&[json!({"level": 1, "title": "Ch1", "page": 1})], 9, 200);
        assert_eq!(mapped, vec![outline(1, "Ch1", 10)]);
    }

    #[test]
    fn past_the_end_is_clamped_to_last_page() {
        let report = map_entries_with_report(&[json!({"level": 1, "title": "Index", "page": 1000})], 0, 50);
        assert_eq!(report.entries, vec![outline(1, "Index", 50)]);
        assert_eq!(report.clamped, 1);
    }

    #[test]
    fn before_the_start_is_clamped_to_first_page() {
        let mapped = map_entries(&[json!({"level": 1, "title": "Cover", "page": 1})], -5, 50);
        assert_eq!(mapped[0].page, 1);
    }

    #[test]
    fn empty_document_clamps_to_one() {
        let mapped = map_entries(&[json!({"level": 1, "title": "A", "page": 30})], 2, 0);
        assert_eq!(mapped[0].page, 1);
    }

    #[test]
    fn non_numeric_page_is_dropped_rest_kept() {
        let rows = [
            json!({"level": 1, "title": "Preface", "page": "xii"}),
            json!({"level": 1, "title": "Ch1", "page": 1}),
            json!({"level": 2, "title": "1.1", "page": "3"}),
        ];
        let report = map_entries_with_report(&rows, 4, 100);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.entries, vec![outline(1, "Ch1", 5), outline(2, "1.1", 7)]);
    }

    #[test]
    fn remapping_mapped_output_is_a_fixed_point() {
        let rows = [
            json!({"level": 1, "title": "Ch1", "page": 1}),
            json!({"level": 2, "title": "Sec", "page": 40}),
            json!({"level": 1, "title": "Late", "page": 999}),
        ];
        let first = map_entries(&rows, 9, 120);
        let as_rows: Vec<Value> = first.iter().map(|e| serde_json::to_value(e).unwrap()).collect();
        let second = map_entries(&as_rows, 0, 120);
        assert_eq!(first, second);
    }

    #[test]
    fn order_is_preserved() {
        let rows = [
            json!({"level": 1, "title": "B", "page": 50}),
            json!({"level": 1, "title": "A", "page": 2}),
        ];
        let titles: Vec<_> = map_entries(&rows, 0, 100).into_iter().map(|e| e.title).collect();
        assert_eq!(titles, ["B", "A"]);
    }

    #[test]
    fn coercion_rules() {
        assert_eq!(
            coerce_entry(&json!({"level": "2", "title": " Methods ", "page": 14.0})),
            Some(TocEntry { level: 2, title: "Methods".into(), page: 14 })
        );
        assert_eq!(
            coerce_entry(&json!({"level": 1, "title": 1984, "page": 3})).map(|e| e.title),
            Some("1984".into())
        );
        assert_eq!(coerce_entry(&json!({"level": 1.9, "title": "T", "page": 7.6})).map(|e| (e.level, e.page)), Some((1, 7)));
        assert!(coerce_entry(&json!({"level": 0, "title": "T", "page": 1})).is_none());
        assert!(coerce_entry(&json!({"level": -1, "title": "T", "page": 1})).is_none());
        assert!(coerce_entry(&json!({"level": 1, "title": "   ", "page": 1})).is_none());
        assert!(coerce_entry(&json!({"level": 1, "title": null, "page": 1})).is_none());
        assert!(coerce_entry(&json!({"level": 1, "page": 1})).is_none());
        assert!(coerce_entry(&json!({"level": true, "title": "T", "page": 1})).is_none());
        assert!(coerce_entry(&json!("Chapter 1 ....... 1")).is_none());
    }

    #[test]
    fn target_page_saturates() {
        assert_eq!(target_page(i64::MAX, i64::MAX, 10), 10);
        assert_eq!(target_page(i64::MIN, -1, 10), 1);
    }
}
