// Generation Pipeline
// Gemini-shaped generation client: blocking single-shot generation
// with retry, plus the streaming path in stream.rs and the multi-file
// output parser in parser.rs.
//
// Default endpoint: https://generativelanguage.googleapis.com/v1beta

pub mod error;
pub mod parser;
pub mod stream;
pub mod usage;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::models::{AttachmentKind, GenerationRequest, TokenUsage};

pub use error::{GenerationError, GenerationResult};
pub use parser::{GeneratedOutput, OutputParser};
pub use stream::StreamOutcome;
pub use usage::TokenSink;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const MAX_RETRIES: u32 = 3;

/// Completed single-shot generation.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    pub usage: TokenUsage,
}

/// Seam for swapping the real client out in tests and offline runs.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<GenerationOutput>;

    /// Streamed generation: each delta is folded into an accumulator
    /// and the full accumulated text is handed to `on_progress`. A
    /// message on `cancel` stops the stream and returns the partial
    /// accumulation with `aborted = true`.
    async fn stream_generate(
        &self,
        request: &GenerationRequest,
        cancel: &mut mpsc::Receiver<()>,
        on_progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> GenerationResult<StreamOutcome>;
}

/// Gemini client
pub struct GeminiClient {
    pub(crate) client: Client,
    pub(crate) endpoint: String,
    pub(crate) api_key: String,
}

impl GeminiClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
        }
    }

    /// Build from `GEMINI_API_KEY` / `GEMINI_ENDPOINT`.
    pub fn from_env() -> GenerationResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| GenerationError::AuthFailed("GEMINI_API_KEY is not set".to_string()))?;
        let endpoint =
            std::env::var("GEMINI_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Ok(Self::new(endpoint, api_key))
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        let base = self.endpoint.trim_end_matches('/');
        format!("{}{}?key={}", base, path, self.api_key)
    }

    pub(crate) fn content_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    async fn generate_once(&self, request: &GenerationRequest) -> GenerationResult<GenerationOutput> {
        let url = self.api_url(&format!("/models/{}:generateContent", request.model));
        let wire = build_wire_request(request);

        let response = self
            .client
            .post(&url)
            .headers(self.content_headers())
            .json(&wire)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<WireResponse>(&body) {
                if let Some(error) = parsed.error {
                    let code = error.code.unwrap_or(status.as_u16() as u32);
                    let error_status = error.status.as_deref().unwrap_or("");
                    if code == 401 || code == 403 || error_status == "UNAUTHENTICATED" {
                        return Err(GenerationError::AuthFailed(error.message));
                    }
                    if error_status == "NOT_FOUND" {
                        return Err(GenerationError::ModelNotFound(request.model.clone()));
                    }
                    return Err(GenerationError::ApiError(error.message));
                }
            }
            return Err(GenerationError::ApiError(format!(
                "Gemini API error ({}): {}",
                status, body
            )));
        }

        let parsed: WireResponse = serde_json::from_str(&body)?;
        let usage = parsed
            .usage_metadata
            .as_ref()
            .map(usage_from)
            .unwrap_or_default();
        let text = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(GenerationOutput { text, usage })
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<GenerationOutput> {
        let mut retries = 0;
        loop {
            match self.generate_once(request).await {
                Ok(output) => return Ok(output),
                Err(err) if retries < MAX_RETRIES && is_retryable(&err) => {
                    retries += 1;
                    let delay = retry_delay(retries);
                    log::warn!(
                        "[generation] request failed ({}), retry {}/{} in {:?}",
                        err,
                        retries,
                        MAX_RETRIES,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn stream_generate(
        &self,
        request: &GenerationRequest,
        cancel: &mut mpsc::Receiver<()>,
        on_progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> GenerationResult<StreamOutcome> {
        stream::run_stream(self, request, cancel, on_progress).await
    }
}

/// Every failed request is retried, whether the failure was a network
/// error or a non-2xx status. Failures interpreting a successful
/// response (parse errors, empty candidates) are terminal.
fn is_retryable(err: &GenerationError) -> bool {
    !matches!(
        err,
        GenerationError::ParseError(_) | GenerationError::EmptyResponse
    )
}

/// Backoff for the n-th retry: 1s, 2s, 4s.
fn retry_delay(retry: u32) -> Duration {
    Duration::from_secs(1 << (retry - 1))
}

// Gemini wire types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    pub(crate) parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireInlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct WireSystemInstruction {
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireResponse {
    pub(crate) candidates: Option<Vec<WireCandidate>>,
    pub(crate) usage_metadata: Option<WireUsageMetadata>,
    pub(crate) error: Option<WireErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCandidate {
    pub(crate) content: WireContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireErrorDetail {
    code: Option<u32>,
    message: String,
    status: Option<String>,
}

/// Missing counts default to zero rather than failing the request.
pub(crate) fn usage_from(meta: &WireUsageMetadata) -> TokenUsage {
    TokenUsage {
        prompt_tokens: meta.prompt_token_count.unwrap_or(0),
        output_tokens: meta.candidates_token_count.unwrap_or(0),
        total_tokens: meta.total_token_count.unwrap_or(0),
    }
}

/// Assemble the request payload. Text attachments become labeled
/// context blocks appended to the prompt in attachment order; binary
/// attachments become inline-data parts with any data-URI prefix
/// stripped from the base64 payload.
pub(crate) fn build_wire_request(request: &GenerationRequest) -> WireRequest {
    let mut prompt = request.prompt.clone();
    let mut binary_parts: Vec<WirePart> = Vec::new();

    for attachment in &request.attachments {
        match attachment.kind {
            AttachmentKind::Text => {
                prompt.push_str("\n\n--- ATTACHED CONTEXT: ");
                prompt.push_str(&attachment.name);
                prompt.push_str(" ---\n");
                prompt.push_str(&attachment.content);
                prompt.push_str("\n--- END ATTACHED CONTEXT ---");
            }
            AttachmentKind::Binary => binary_parts.push(WirePart {
                text: None,
                inline_data: Some(WireInlineData {
                    mime_type: attachment
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    data: strip_data_uri(&attachment.content),
                }),
            }),
        }
    }

    let mut parts = vec![WirePart {
        text: Some(prompt),
        inline_data: None,
    }];
    parts.extend(binary_parts);

    let generation_config = if request.temperature.is_some() || request.max_output_tokens.is_some()
    {
        Some(WireGenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
        })
    } else {
        None
    };

    WireRequest {
        contents: vec![WireContent {
            role: Some("user".to_string()),
            parts,
        }],
        system_instruction: Some(WireSystemInstruction {
            parts: vec![WirePart {
                text: Some(request.system_instruction.clone()),
                inline_data: None,
            }],
        }),
        generation_config,
    }
}

/// `data:image/png;base64,AAAA` → `AAAA`; plain base64 passes through.
fn strip_data_uri(content: &str) -> String {
    if content.starts_with("data:") {
        if let Some(idx) = content.find(",") {
            return content[idx + 1..].to_string();
        }
    }
    content.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;

    fn base_request() -> GenerationRequest {
        GenerationRequest {
            prompt: "Build a landing page".to_string(),
            attachments: Vec::new(),
            system_instruction: "You generate websites".to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            max_output_tokens: None,
        }
    }

    #[test]
    fn test_api_url_carries_key() {
        let client = GeminiClient::new(DEFAULT_ENDPOINT.to_string(), "test-key".to_string());
        let url = client.api_url("/models/gemini-2.5-flash:generateContent");
        assert!(url.contains(":generateContent?key=test-key"));
    }

    #[test]
    fn test_text_attachments_become_labeled_blocks_in_order() {
        let mut request = base_request();
        request.attachments = vec![
            Attachment {
                name: "notes.md".to_string(),
                kind: AttachmentKind::Text,
                content: "brand: acme".to_string(),
                mime_type: None,
            },
            Attachment {
                name: "palette.txt".to_string(),
                kind: AttachmentKind::Text,
                content: "#ff0000".to_string(),
                mime_type: None,
            },
        ];
        let wire = build_wire_request(&request);
        let json = serde_json::to_string(&wire).unwrap();
        let notes = json.find("ATTACHED CONTEXT: notes.md").unwrap();
        let palette = json.find("ATTACHED CONTEXT: palette.txt").unwrap();
        assert!(notes < palette);
        assert!(json.contains("brand: acme"));
    }

    #[test]
    fn test_binary_attachment_strips_data_uri_prefix() {
        let mut request = base_request();
        request.attachments = vec![Attachment {
            name: "logo.png".to_string(),
            kind: AttachmentKind::Binary,
            content: "data:image/png;base64,aGVsbG8=".to_string(),
            mime_type: Some("image/png".to_string()),
        }];
        let wire = build_wire_request(&request);
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains("\"data\":\"aGVsbG8=\""));
        assert!(!json.contains("data:image/png"));
        assert!(json.contains("\"mimeType\":\"image/png\""));
    }

    #[test]
    fn test_generation_config_omitted_when_unset() {
        let wire = build_wire_request(&base_request());
        let json = serde_json::to_string(&wire).unwrap();
        assert!(!json.contains("generationConfig"));
        assert!(json.contains("systemInstruction"));
    }

    #[test]
    fn test_usage_defaults_missing_counts_to_zero() {
        let meta: WireUsageMetadata =
            serde_json::from_str("{\"totalTokenCount\": 42}").unwrap();
        let usage = usage_from(&meta);
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.output_tokens, 0);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&GenerationError::Timeout));
        assert!(is_retryable(&GenerationError::ApiError("500".to_string())));
        assert!(is_retryable(&GenerationError::ConnectionFailed(
            "refused".to_string()
        )));
        // Any non-2xx status is retried, auth failures included
        assert!(is_retryable(&GenerationError::AuthFailed(
            "bad key".to_string()
        )));
        assert!(is_retryable(&GenerationError::ModelNotFound(
            "gemini-x".to_string()
        )));
        // A 2xx body we cannot use is not going to improve on retry
        assert!(!is_retryable(&GenerationError::ParseError(
            "bad json".to_string()
        )));
        assert!(!is_retryable(&GenerationError::EmptyResponse));
    }

    #[test]
    fn test_retry_backoff_tiers() {
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(4));
    }
}
