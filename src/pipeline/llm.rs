//! VLM interaction: build the multimodal request and call the endpoint.
//!
//! Exactly one request is sent per extraction run: the instruction text
//! followed by every TOC page image in page order. The reply is returned raw
//! as a [`RawReply`]; making sense of it is the job of
//! [`crate::pipeline::parse`], because gateways in front of the model do not
//! reliably return the documented envelope.
//!
//! There is no retry loop here. Failures at the network boundary surface as
//! [`TocError`] variants that say whether retrying could help
//! ([`TocError::is_retryable`], [`TocError::is_payload_too_large`]).

use crate::config::ExtractionConfig;
use crate::error::TocError;
use crate::pipeline::encode::ImagePayload;
use crate::pipeline::parse::looks_like_html;
use crate::prompts::instruction_for;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ── Request payload ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessagePayload>,
    response_format: ResponseFormatPayload,
}

#[derive(Debug, Serialize)]
struct ChatMessagePayload {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormatPayload {
    JsonObject,
}

/// Build the request body: one user message, instruction first, then images.
fn build_request<'a>(
    model: &'a str,
    instruction: &str,
    images: &[ImagePayload],
) -> ChatCompletionRequest<'a> {
    let mut content = Vec::with_capacity(images.len() + 1);
    content.push(ContentPart::Text {
        text: instruction.to_string(),
    });
    content.extend(images.iter().map(|img| ContentPart::ImageUrl {
        image_url: ImageUrl { url: img.data_url() },
    }));

    ChatCompletionRequest {
        model,
        messages: vec![ChatMessagePayload {
            role: "user",
            content,
        }],
        response_format: ResponseFormatPayload::JsonObject,
    }
}

// ── Reply ────────────────────────────────────────────────────────────────

/// The endpoint's reply, classified by shape but otherwise untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReply {
    /// The body is a JSON object (normally the chat-completion envelope).
    StructuredObject(Value),
    /// The body is text: HTML, fenced JSON, prose, or a JSON-encoded string
    /// (already decoded one level).
    PlainString(String),
    /// The body is JSON but neither an object nor a string.
    Unrecognized(Value),
}

impl RawReply {
    /// Classify a response body.
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<Value>(body.trim()) {
            Ok(Value::Object(map)) => Self::StructuredObject(Value::Object(map)),
            Ok(Value::String(text)) => Self::PlainString(text),
            Ok(other) => Self::Unrecognized(other),
            Err(_) => Self::PlainString(body.to_string()),
        }
    }

    /// `(prompt_tokens, completion_tokens)` when the envelope reports usage.
    pub fn usage(&self) -> (u64, u64) {
        let Self::StructuredObject(v) = self else {
            return (0, 0);
        };
        let usage = &v["usage"];
        (
            usage["prompt_tokens"].as_u64().unwrap_or(0),
            usage["completion_tokens"].as_u64().unwrap_or(0),
        )
    }
}

/// A reply together with transport facts for stats and logging.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub raw: RawReply,
    pub status: u16,
    pub duration_ms: u64,
}

// ── Client ───────────────────────────────────────────────────────────────

/// Sends TOC page images to an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ExtractionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    instruction: String,
    timeout_secs: u64,
}

impl ExtractionClient {
    /// Build a client from the run configuration.
    pub fn new(config: &ExtractionConfig) -> Result<Self, TocError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| TocError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            instruction: instruction_for(config.instruction.as_deref()).to_string(),
            timeout_secs: config.api_timeout_secs,
        })
    }

    /// Endpoint URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one extraction request carrying every image, in order.
    ///
    /// # Errors
    /// Upstream failures only: network, timeout, 401/403, 413, 429 and other
    /// non-success statuses. A 2xx reply is always `Ok`, however odd its body.
    pub async fn extract(&self, images: &[ImagePayload]) -> Result<ModelReply, TocError> {
        if images.is_empty() {
            return Err(TocError::Internal("extract called with no images".into()));
        }

        let payload_bytes: usize = images.iter().map(|i| i.data.len()).sum();
        let request = build_request(&self.model, &self.instruction, images);
        info!(
            "Sending {} image(s), {} bytes base64, to {} (model {})",
            images.len(),
            payload_bytes,
            self.endpoint,
            self.model
        );

        let start = Instant::now();
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!("Reply: HTTP {} in {}ms, {} bytes", status, duration_ms, body.len());

        self.check_status(status, retry_after, &body, images.len(), payload_bytes)?;

        Ok(ModelReply {
            raw: RawReply::from_body(&body),
            status: status.as_u16(),
            duration_ms,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> TocError {
        if e.is_timeout() {
            TocError::ApiTimeout {
                secs: self.timeout_secs,
            }
        } else {
            TocError::Network {
                endpoint: self.endpoint.clone(),
                detail: e.to_string(),
            }
        }
    }

    /// Map a non-success status to the matching upstream error.
    ///
    /// HTML error pages on other 4xx statuses (404, 405) are let through so
    /// the parser can diagnose them as a routing problem. Server errors stay
    /// errors, so callers can retry them.
    fn check_status(
        &self,
        status: StatusCode,
        retry_after_secs: Option<u64>,
        body: &str,
        images: usize,
        payload_bytes: usize,
    ) -> Result<(), TocError> {
        if status.is_success() {
            return Ok(());
        }
        warn!("Model endpoint returned HTTP {}", status);

        match status {
            StatusCode::PAYLOAD_TOO_LARGE => Err(TocError::PayloadTooLarge {
                images,
                payload_bytes,
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TocError::AuthError {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                detail: error_detail(body),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(TocError::RateLimitExceeded {
                endpoint: self.endpoint.clone(),
                retry_after_secs,
            }),
            _ if body.contains("Request Entity Too Large") => Err(TocError::PayloadTooLarge {
                images,
                payload_bytes,
            }),
            _ if status.is_client_error() && looks_like_html(body) => Ok(()),
            _ => Err(TocError::LlmApiError {
                status: status.as_u16(),
                message: error_detail(body),
            }),
        }
    }
}

/// Best human-readable message from an error body.
fn error_detail(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = v["error"]["message"].as_str() {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        format!("{}…", trimmed.chars().take(200).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tag: &str) -> ImagePayload {
        ImagePayload {
            data: tag.to_string(),
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn request_layout_matches_wire_contract() {
        let req = build_request("gpt-4o", "read the toc", &[payload("AAA"), payload("BBB")]);
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["response_format"]["type"], "json_object");
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");

        let parts = messages[0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "read the toc");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,AAA");
        assert_eq!(parts[2]["image_url"]["url"], "data:image/jpeg;base64,BBB");
    }

    #[test]
    fn body_classification() {
        assert!(matches!(
            RawReply::from_body(r#"{"choices":[]}"#),
            RawReply::StructuredObject(_)
        ));
        assert_eq!(
            RawReply::from_body(r#""{\"toc\":[]}""#),
            RawReply::PlainString(r#"{"toc":[]}"#.to_string())
        );
        assert!(matches!(RawReply::from_body("[1,2]"), RawReply::Unrecognized(_)));
        assert_eq!(
            RawReply::from_body("<html>nope</html>"),
            RawReply::PlainString("<html>nope</html>".to_string())
        );
    }

    #[test]
    fn usage_is_read_from_envelope() {
        let reply = RawReply::from_body(
            r#"{"choices":[],"usage":{"prompt_tokens":1200,"completion_tokens":340}}"#,
        );
        assert_eq!(reply.usage(), (1200, 340));
        assert_eq!(RawReply::PlainString("x".into()).usage(), (0, 0));
    }

    #[test]
    fn error_detail_prefers_envelope_message() {
        assert_eq!(
            error_detail(r#"{"error":{"message":"Incorrect API key provided"}}"#),
            "Incorrect API key provided"
        );
        assert_eq!(error_detail("  plain  "), "plain");
        assert!(error_detail(&"x".repeat(500)).ends_with('…'));
    }

    #[test]
    fn connection_refused_is_a_network_error() {
        let config = ExtractionConfig::builder()
            .api_key("sk-test")
            .base_url("http://127.0.0.1:9/v1")
            .api_timeout_secs(5)
            .build()
            .unwrap();
        let client = ExtractionClient::new(&config).unwrap();
        let err = tokio_test::block_on(client.extract(&[payload("AAA")])).unwrap_err();
        assert!(err.is_upstream(), "got: {err}");
        assert!(!err.is_payload_too_large());
    }

    #[test]
    fn empty_image_list_is_rejected() {
        let config = ExtractionConfig::builder().api_key("sk-test").build().unwrap();
        let client = ExtractionClient::new(&config).unwrap();
        let err = tokio_test::block_on(client.extract(&[])).unwrap_err();
        assert!(matches!(err, TocError::Internal(_)));
    }
}
