//! Instruction text for VLM-based TOC extraction.
//!
//! Kept in one place so the extraction contract can be inspected by tests
//! and changed without touching the request or parsing code. Callers can
//! override it via [`crate::config::ExtractionConfig::instruction`].

/// Default instruction sent ahead of the TOC page images.
///
/// The reply contract here is what [`crate::pipeline::parse`] expects:
/// a JSON object with a `toc` list of `{level, title, page}` objects.
pub const TOC_EXTRACTION_PROMPT: &str = r#"Extract the table of contents from these images.

Return ONLY a JSON object with a single key "toc" whose value is an ordered list of items, in the order they appear across the images.
Each item must have:
  - "level": integer, 1 for main chapters, 2 for sections, 3 for subsections, and so on
  - "title": string, the entry title exactly as printed (without the dotted leader or page number)
  - "page": integer, the page number shown next to the entry in the image

Do not include any prose, markdown formatting or code fences. Output the raw JSON only."#;

/// Instruction for a run, honouring a caller override.
pub fn instruction_for(custom: Option<&str>) -> &str {
    custom
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(TOC_EXTRACTION_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_states_reply_contract() {
        for key in ["\"toc\"", "\"level\"", "\"title\"", "\"page\""] {
            assert!(TOC_EXTRACTION_PROMPT.contains(key), "missing {key}");
        }
        assert!(TOC_EXTRACTION_PROMPT.contains("code fences"));
    }

    #[test]
    fn blank_override_falls_back_to_default() {
        assert_eq!(instruction_for(None), TOC_EXTRACTION_PROMPT);
        assert_eq!(instruction_for(Some("  ")), TOC_EXTRACTION_PROMPT);
        assert_eq!(instruction_for(Some("custom")), "custom");
    }
}
