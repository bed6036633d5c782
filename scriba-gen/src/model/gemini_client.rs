//! Gemini REST client
//!
//! Implements [`GenerativeModel`] over the `generateContent` endpoint of the
//! Generative Language API. Keyframe images are sent inline as base64 data;
//! the MIME type is sniffed from the file content.
//!
//! # Error mapping
//! - HTTP 429, 5xx, timeouts and connection failures: `ModelError::Unavailable`
//! - Other non-success status: `ModelError::Request`
//! - Undecodable body, blocked prompt or empty candidate: `ModelError::InvalidResponse`

use crate::model::{GenerativeModel, ModelError, ModelPart, ModelRequest};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use scriba_common::config::LlmConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Generative Language API base URL
const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Fallback when the image content is not recognised
const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    contents: Vec<WireContent>,
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WirePart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: WireBlob,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<WireContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ModelError::Request(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: GEMINI_API_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    /// Point the client at another endpoint (proxies, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn from_config(config: &LlmConfig, api_key: String) -> Result<Self, ModelError> {
        Self::new(api_key, Duration::from_secs(config.request_timeout_secs))
    }

    async fn build_body(&self, request: &ModelRequest) -> GenerateContentRequest {
        let mut parts = Vec::with_capacity(request.parts.len());
        for part in &request.parts {
            match part {
                ModelPart::Text(text) => parts.push(WirePart::Text { text: text.clone() }),
                ModelPart::Image(path) => match encode_image(path).await {
                    Ok(blob) => parts.push(WirePart::InlineData { inline_data: blob }),
                    Err(e) => {
                        tracing::warn!(image = %path.display(), error = %e, "Skipping unreadable image");
                    }
                },
            }
        }

        let profile = &request.profile;
        GenerateContentRequest {
            system_instruction: (!request.system_instruction.is_empty()).then(|| WireContent {
                role: None,
                parts: vec![WirePart::Text {
                    text: request.system_instruction.clone(),
                }],
            }),
            contents: vec![WireContent {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: WireGenerationConfig {
                temperature: profile.temperature,
                top_p: profile.top_p,
                top_k: profile.top_k,
                max_output_tokens: profile.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, request.profile.model_name
        );
        let body = self.build_body(request).await;

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(300).collect();
            return Err(classify_status(status, &detail));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Undecodable Gemini response: {}", e)))?;

        extract_text(parsed)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

fn classify_status(status: StatusCode, detail: &str) -> ModelError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ModelError::Unavailable(format!("Gemini returned {}: {}", status, detail))
    } else {
        ModelError::Request(format!("Gemini returned {}: {}", status, detail))
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, ModelError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ModelError::InvalidResponse(format!("prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::InvalidResponse("no candidates".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| match p {
            WirePart::Text { text } => Some(text),
            WirePart::InlineData { .. } => None,
        })
        .collect();

    if text.trim().is_empty() {
        return Err(ModelError::InvalidResponse(format!(
            "empty candidate (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }
    Ok(text)
}

async fn encode_image(path: &Path) -> std::io::Result<WireBlob> {
    let bytes = tokio::fs::read(path).await?;
    let mime_type = infer::get(&bytes)
        .map(|kind| kind.mime_type())
        .filter(|mime| mime.starts_with("image/"))
        .unwrap_or(DEFAULT_IMAGE_MIME)
        .to_string();

    Ok(WireBlob {
        mime_type,
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriba_common::config::Operation;
    use std::io::Write;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[tokio::test]
    async fn test_body_carries_profile_and_inline_images() {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(PNG_MAGIC).unwrap();

        let client = GeminiClient::new("key", Duration::from_secs(5)).unwrap();
        let request = ModelRequest {
            operation: Operation::Writer,
            system_instruction: "write notes".into(),
            parts: vec![
                ModelPart::Text("PART 1 of 1".into()),
                ModelPart::Image(image.path().to_path_buf()),
                ModelPart::Image("/nonexistent/frame.jpg".into()),
            ],
            profile: LlmConfig::default().profile(Operation::Writer),
        };

        let body = serde_json::to_value(client.build_body(&request).await).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "write notes");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 45_000);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2, "unreadable image is skipped");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"\\section{A}"},{"text":" body"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "\\section{A} body");
    }

    #[test]
    fn test_blocked_and_empty_responses_are_invalid() {
        let blocked: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert!(matches!(extract_text(blocked), Err(ModelError::InvalidResponse(_))));

        let empty: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[]},"finishReason":"MAX_TOKENS"}]}"#,
        )
        .unwrap();
        let err = extract_text(empty).unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_transient());
    }
}
