//! Generative image backends.
//!
//! The service depends on the `ImageBackend` trait so transports and tests
//! can substitute their own implementation. The real backend is the Gemini
//! `generateContent` REST API, called with an inline base64 image and a text
//! instruction.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Generation can take minutes on busy upstreams.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// One edit submission: a base64-encoded source image and an instruction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    #[serde(default)]
    pub image_data: String,
    #[serde(default)]
    pub prompt: String,
}

/// A generated image returned by a backend.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    /// Base64-encoded image bytes.
    pub image_data: String,
    pub mime_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("backend returned no image: {0}")]
    NoImage(String),
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
}

/// An opaque external generation operation with its own latency and failure
/// modes. Implementations must be safe to share behind an `Arc`.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn generate(&self, request: &EditRequest) -> Result<GeneratedImage, BackendError>;
}

// Wire types for the generateContent REST API.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

/// All harm categories disabled: the upstream moderates image output itself,
/// and edits of user photos trip these filters constantly.
fn unrestricted_safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: "BLOCK_NONE",
    })
    .collect()
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Gemini image-generation backend.
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiBackend {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key,
        }
    }

    /// Build from `GEMINI_API_KEY`, with optional `GEMINI_BASE_URL` and
    /// `GEMINI_MODEL` overrides.
    pub fn from_env() -> Result<Self, BackendError> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| BackendError::MissingApiKey)?;
        let mut backend = Self::new(api_key);
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            backend.base_url = base_url;
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            backend.model = model;
        }
        Ok(backend)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl ImageBackend for GeminiBackend {
    async fn generate(&self, request: &EditRequest) -> Result<GeneratedImage, BackendError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        inline_data: Some(InlineData {
                            mime_type: Some("image/jpeg".to_string()),
                            data: request.image_data.clone(),
                        }),
                        text: None,
                    },
                    Part {
                        inline_data: None,
                        text: Some(request.prompt.clone()),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE", "TEXT"],
            },
            safety_settings: unrestricted_safety_settings(),
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "generation request rejected");
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let response: GenerateContentResponse = response.json().await?;

        let mut text = String::new();
        let parts = response
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts);
        for part in parts {
            if let Some(inline) = part.inline_data {
                return Ok(GeneratedImage {
                    image_data: inline.data,
                    mime_type: inline
                        .mime_type
                        .unwrap_or_else(|| "image/png".to_string()),
                });
            }
            if let Some(chunk) = part.text {
                text.push_str(&chunk);
            }
        }

        if text.is_empty() {
            text.push_str("empty response");
        }
        Err(BackendError::NoImage(text))
    }
}
