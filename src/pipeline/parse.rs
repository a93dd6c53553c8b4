//! Reply parsing: recover the `toc` list from whatever the endpoint sent.
//!
//! The endpoint is an untrusted black box. Behind a gateway it may answer
//! with the documented envelope, with the bare content object, with the
//! envelope serialised into a string, with a fenced JSON block, or with an
//! HTML landing page. [`parse_reply`] resolves the [`RawReply`] variant once,
//! funnels every path into the single [`parse_content`] step, and never
//! panics or returns an error: failures become an empty
//! [`ExtractionResult`] carrying an [`ExtractionFailure`].
//!
//! Entries are passed through unvalidated. Coercion and dropping happen in
//! [`crate::pipeline::mapper`], after a human had the chance to fix rows.

use crate::error::ExtractionFailure;
use crate::pipeline::llm::RawReply;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// How many times a content string may decode to yet another JSON string.
const MAX_STRING_NESTING: usize = 2;

/// Characters of offending content kept in a diagnosis.
const DIAGNOSTIC_CHARS: usize = 2000;

/// Outcome of parsing one reply.
///
/// `failure.is_some()` implies `entries.is_empty()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub entries: Vec<Value>,
    pub failure: Option<ExtractionFailure>,
}

impl ExtractionResult {
    fn found(entries: Vec<Value>) -> Self {
        Self {
            entries,
            failure: None,
        }
    }

    fn failed(failure: ExtractionFailure) -> Self {
        warn!("{}", failure);
        Self {
            entries: Vec::new(),
            failure: Some(failure),
        }
    }

    /// True when the reply parsed, even if it listed no entries.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Parse a raw reply into TOC entries or a diagnosed failure.
pub fn parse_reply(reply: &RawReply) -> ExtractionResult {
    let content = match reply {
        RawReply::StructuredObject(v) => structured_content(v),
        RawReply::PlainString(text) => plain_string_content(text),
        RawReply::Unrecognized(v) => Err(malformed("reply is neither an object nor text", &v.to_string())),
    };

    match content {
        Ok(content) => parse_content(content),
        Err(failure) => ExtractionResult::failed(failure),
    }
}

// ── Reply shapes ─────────────────────────────────────────────────────────

/// Pull the message content out of a JSON object reply.
fn structured_content(reply: &Value) -> Result<Value, ExtractionFailure> {
    if let Some(err) = reply.get("error").filter(|e| !e.is_null()) {
        let message = err["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(ExtractionFailure::ProviderError { message });
    }

    match reply.pointer("/choices/0/message/content") {
        Some(Value::Null) | None => {}
        Some(Value::Array(blocks)) => return Ok(Value::String(join_text_blocks(blocks))),
        Some(content) => return Ok(content.clone()),
    }

    // Some gateways hand back the content object itself.
    if reply.get("toc").is_some() {
        debug!("Reply has no envelope; using it as content");
        return Ok(reply.clone());
    }

    Err(malformed(
        "reply has no choices[0].message.content",
        &reply.to_string(),
    ))
}

/// Interpret a text reply: HTML check, fence strip, then JSON.
fn plain_string_content(text: &str) -> Result<Value, ExtractionFailure> {
    if looks_like_html(text) {
        return Err(ExtractionFailure::RoutingMisconfiguration {
            snippet: truncate(text.trim(), 120),
        });
    }

    let cleaned = strip_code_fence(text);
    match serde_json::from_str::<Value>(cleaned) {
        Ok(v) if v.get("choices").is_some() => structured_content(&v),
        Ok(v) => Ok(v),
        Err(e) => Err(malformed(&format!("could not parse textual reply: {e}"), cleaned)),
    }
}

/// Concatenate `[{type: "text", text: ...}]` content blocks.
fn join_text_blocks(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter_map(|b| b.as_str().or_else(|| b["text"].as_str()))
        .collect()
}

// ── Content ──────────────────────────────────────────────────────────────

/// Turn message content (object or JSON text) into entries.
pub fn parse_content(content: Value) -> ExtractionResult {
    let mut content = content;
    for _ in 0..=MAX_STRING_NESTING {
        match content {
            Value::Object(map) => return toc_from_object(&map),
            Value::String(text) => {
                let cleaned = strip_code_fence(&text);
                match serde_json::from_str::<Value>(cleaned) {
                    Ok(v) => content = v,
                    Err(e) => {
                        return ExtractionResult::failed(malformed(
                            &format!("content is not JSON: {e}"),
                            cleaned,
                        ))
                    }
                }
            }
            other => {
                return ExtractionResult::failed(malformed(
                    "content is not a JSON object",
                    &other.to_string(),
                ))
            }
        }
    }
    ExtractionResult::failed(malformed(
        "content is nested in too many JSON strings",
        &content.to_string(),
    ))
}

fn toc_from_object(map: &Map<String, Value>) -> ExtractionResult {
    match map.get("toc") {
        None | Some(Value::Null) => {
            info!("Reply parsed but contains no 'toc' key");
            ExtractionResult::found(Vec::new())
        }
        Some(Value::Array(items)) => {
            debug!("Parsed {} TOC entries", items.len());
            ExtractionResult::found(items.clone())
        }
        Some(other) => ExtractionResult::failed(malformed(
            "'toc' is not a list",
            &other.to_string(),
        )),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

const HTML_MARKERS: [&str; 3] = ["<!doctype", "<html", "<body"];

/// True when text is an HTML document rather than an API answer.
///
/// Text that opens like JSON is never HTML, whatever its titles contain.
pub fn looks_like_html(text: &str) -> bool {
    let lower = text.trim_start_matches('\u{feff}').trim().to_lowercase();
    if HTML_MARKERS.iter().any(|tag| lower.starts_with(tag)) {
        return true;
    }
    if lower.starts_with(['{', '[', '"']) {
        return false;
    }
    HTML_MARKERS.iter().any(|tag| lower.contains(tag))
}

static RE_OPENING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*(?:\r?\n)?").unwrap());

/// Strip a leading fence (optionally language-tagged) and a trailing fence.
///
/// Either side may be missing; models sometimes stop before closing it.
pub fn strip_code_fence(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(m) = RE_OPENING_FENCE.find(s) {
        s = &s[m.end()..];
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

fn malformed(reason: &str, content: &str) -> ExtractionFailure {
    ExtractionFailure::MalformedReply {
        reason: reason.to_string(),
        content: truncate(content, DIAGNOSTIC_CHARS),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}…", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(content: Value) -> RawReply {
        RawReply::StructuredObject(json!({ "choices": [{ "message": { "content": content } }] }))
    }

    fn failure_kind(result: &ExtractionResult) -> &'static str {
        result.failure.as_ref().map(|f| f.kind()).unwrap_or("none")
    }

    #[test]
    fn well_formed_envelope() {
        let reply = RawReply::from_body(
            r#"{"choices":[{"message":{"content":"{\"toc\":[{\"level\":1,\"title\":\"Intro\",\"page\":1}]}"}}]}"#,
        );
        let result = parse_reply(&reply);
        assert!(result.is_success());
        assert_eq!(result.entries, vec![json!({"level": 1, "title": "Intro", "page": 1})]);
    }

    #[test]
    fn fenced_content_with_empty_toc() {
        let result = parse_reply(&envelope(json!("```json\n{\"toc\":[]}\n```")));
        assert!(result.is_success());
        assert!(result.entries.is_empty());
    }

    #[test]
    fn html_page_is_routing_misconfiguration() {
        let reply = RawReply::PlainString("<!DOCTYPE html>\n<html><body>Welcome</body></html>".into());
        let result = parse_reply(&reply);
        assert!(result.entries.is_empty());
        assert_eq!(failure_kind(&result), "routing_misconfiguration");
    }

    #[test]
    fn html_detected_after_leading_whitespace_and_mid_document() {
        assert!(looks_like_html("   <HTML lang=en>"));
        assert!(looks_like_html("Error\n<body>blocked by WAF</body>"));
        assert!(!looks_like_html(r#"{"toc": []}"#));
    }

    #[test]
    fn json_mentioning_html_tags_is_not_html() {
        let text = r#"{"toc":[{"level":1,"title":"The <body> element","page":4}]}"#;
        assert!(!looks_like_html(text));

        let reply = RawReply::PlainString(text.to_string());
        let result = parse_reply(&reply);
        assert!(result.is_success());
        assert_eq!(result.entries[0]["title"], "The <body> element");
    }

    #[test]
    fn garbage_text_is_malformed() {
        let result = parse_reply(&RawReply::PlainString("I could not read the images, sorry.".into()));
        assert!(result.entries.is_empty());
        assert_eq!(failure_kind(&result), "malformed_reply");
        match result.failure {
            Some(ExtractionFailure::MalformedReply { reason, content }) => {
                assert!(reason.contains("could not parse textual reply"));
                assert_eq!(content, "I could not read the images, sorry.");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn plain_string_envelope_is_unwrapped() {
        let text = r#"{"choices":[{"message":{"content":"{\"toc\":[{\"level\":2,\"title\":\"A\",\"page\":7}]}"}}]}"#;
        let result = parse_reply(&RawReply::PlainString(text.into()));
        assert_eq!(result.entries, vec![json!({"level": 2, "title": "A", "page": 7})]);
    }

    #[test]
    fn plain_string_fenced_content() {
        let text = "```json\n{\"toc\":[{\"level\":1,\"title\":\"Preface\",\"page\":\"v\"}]}\n```";
        let result = parse_reply(&RawReply::PlainString(text.into()));
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0]["page"], "v");
    }

    #[test]
    fn double_encoded_body() {
        let body = serde_json::to_string(&json!({"toc":[{"level":1,"title":"X","page":3}]}).to_string()).unwrap();
        let result = parse_reply(&RawReply::from_body(&body));
        assert_eq!(result.entries.len(), 1);
    }

    #[test]
    fn double_encoded_content() {
        let inner = json!({"toc":[{"level":1,"title":"X","page":3}]}).to_string();
        let content = serde_json::to_string(&inner).unwrap();
        let result = parse_reply(&envelope(Value::String(content)));
        assert_eq!(result.entries.len(), 1);
    }

    #[test]
    fn object_content_used_as_is() {
        let result = parse_reply(&envelope(json!({"toc":[{"level":1,"title":"Y","page":9}]})));
        assert_eq!(result.entries[0]["title"], "Y");
    }

    #[test]
    fn text_block_content_is_joined() {
        let result = parse_reply(&envelope(json!([
            {"type": "text", "text": "{\"toc\":[{\"level\":1,"},
            {"type": "text", "text": "\"title\":\"Z\",\"page\":2}]}"}
        ])));
        assert_eq!(result.entries[0]["title"], "Z");
    }

    #[test]
    fn missing_toc_key_is_empty_success() {
        let result = parse_reply(&envelope(json!("{\"chapters\": []}")));
        assert!(result.is_success());
        assert!(result.entries.is_empty());
    }

    #[test]
    fn toc_not_a_list_is_malformed() {
        let result = parse_reply(&envelope(json!("{\"toc\": \"none found\"}")));
        assert_eq!(failure_kind(&result), "malformed_reply");
    }

    #[test]
    fn unparseable_content_keeps_offending_text() {
        let result = parse_reply(&envelope(json!("{\"toc\": [ {\"level\": 1, ")));
        match result.failure {
            Some(ExtractionFailure::MalformedReply { content, .. }) => {
                assert!(content.starts_with("{\"toc\""));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(result.entries.is_empty());
    }

    #[test]
    fn error_envelope_is_provider_error() {
        let reply = RawReply::StructuredObject(json!({"error": {"message": "model not found"}}));
        let result = parse_reply(&reply);
        assert_eq!(
            result.failure,
            Some(ExtractionFailure::ProviderError {
                message: "model not found".into()
            })
        );
    }

    #[test]
    fn bare_content_object_without_envelope() {
        let reply = RawReply::StructuredObject(json!({"toc": [{"level": 1, "title": "T", "page": 1}]}));
        assert_eq!(parse_reply(&reply).entries.len(), 1);
    }

    #[test]
    fn envelope_without_content_is_malformed() {
        let reply = RawReply::StructuredObject(json!({"choices": []}));
        assert_eq!(failure_kind(&parse_reply(&reply)), "malformed_reply");
        let reply = envelope(Value::Null);
        assert_eq!(failure_kind(&parse_reply(&reply)), "malformed_reply");
    }

    #[test]
    fn unrecognized_shape_is_malformed() {
        let result = parse_reply(&RawReply::Unrecognized(json!(42)));
        assert_eq!(failure_kind(&result), "malformed_reply");
    }

    #[test]
    fn non_object_content_is_malformed() {
        let result = parse_reply(&envelope(json!("[1, 2, 3]")));
        assert_eq!(failure_kind(&result), "malformed_reply");
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json {\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\r\n{}\r\n```"), "{}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn long_content_is_truncated_in_diagnosis() {
        let text = "x".repeat(DIAGNOSTIC_CHARS + 50);
        match parse_reply(&RawReply::PlainString(text)).failure {
            Some(ExtractionFailure::MalformedReply { content, .. }) => {
                assert_eq!(content.chars().count(), DIAGNOSTIC_CHARS + 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
