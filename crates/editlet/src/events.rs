//! Generation event delivery to an operator webhook.
//!
//! Each finished generation (success or failure) is posted to a Discord-style
//! webhook as an embed with the source and result images attached. Delivery
//! is fire-and-forget: the send runs in a background task, failures are
//! logged at `warn`, and the edit flow is never blocked or failed by it.
//! Without a configured URL the logger is a total no-op.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;

use crate::version::EDITLET_VERSION;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Discord embed field limits.
const PROMPT_LIMIT: usize = 1000;
const ERROR_LIMIT: usize = 500;

const COLOR_SUCCESS: u32 = 0x57F287;
const COLOR_FAILURE: u32 = 0xED4245;

/// Outcome of one generation, as reported to the webhook.
#[derive(Debug, Clone)]
pub struct GenerationEvent {
    pub prompt: String,
    pub success: bool,
    /// Base64-encoded source image, if the submission carried one.
    pub original_image: Option<String>,
    /// Base64-encoded result image, on success.
    pub generated_image: Option<String>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid image payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Fire-and-forget webhook client for generation events.
#[derive(Clone)]
pub struct EventLogger {
    url: Option<String>,
    client: reqwest::Client,
}

impl EventLogger {
    pub fn new(url: Option<String>) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        let user_agent = format!("editlet/{}", EDITLET_VERSION);
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&user_agent) {
            headers.insert(reqwest::header::USER_AGENT, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self { url, client }
    }

    /// Build from `DISCORD_WEBHOOK_URL`; disabled when unset.
    pub fn from_env() -> Self {
        Self::new(std::env::var("DISCORD_WEBHOOK_URL").ok())
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Deliver in the background. Returns immediately; never blocks or fails
    /// the caller.
    pub fn log_generation(&self, event: GenerationEvent) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(e) = deliver(client, url, event).await {
                tracing::warn!(error = %e, "generation event delivery failed");
            }
        });
    }
}

async fn deliver(
    client: reqwest::Client,
    url: String,
    event: GenerationEvent,
) -> Result<(), DeliveryError> {
    let mut embed = json!({
        "title": if event.success { "Image generated" } else { "Generation failed" },
        "fields": [
            {
                "name": "Prompt",
                "value": truncate(&event.prompt, PROMPT_LIMIT),
                "inline": false,
            },
            {
                "name": "Processing time",
                "value": format!("{}s", event.elapsed.as_secs()),
                "inline": true,
            },
        ],
        "color": if event.success { COLOR_SUCCESS } else { COLOR_FAILURE },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "footer": { "text": "editlet" },
    });

    if !event.success
        && let Some(ref error) = event.error
        && let Some(fields) = embed["fields"].as_array_mut()
    {
        fields.push(json!({
            "name": "Error",
            "value": truncate(error, ERROR_LIMIT),
            "inline": false,
        }));
    }

    let mut attachments: Vec<(&String, &str)> = Vec::new();
    if let Some(ref data) = event.original_image {
        attachments.push((data, "original.jpg"));
    }
    if event.success
        && let Some(ref data) = event.generated_image
    {
        attachments.push((data, "generated.jpg"));
    }

    // Source image as thumbnail, result as the main image when both exist.
    if attachments.len() >= 2 {
        embed["thumbnail"] = json!({ "url": "attachment://original.jpg" });
        embed["image"] = json!({ "url": "attachment://generated.jpg" });
    } else if let Some((_, filename)) = attachments.first() {
        embed["image"] = json!({ "url": format!("attachment://{filename}") });
    }

    let mut form = reqwest::multipart::Form::new();
    for (index, (data, filename)) in attachments.iter().enumerate() {
        let bytes = BASE64.decode(data.as_bytes())?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("image/jpeg")?;
        form = form.part(format!("file{index}"), part);
    }
    form = form.text("payload_json", json!({ "embeds": [embed] }).to_string());

    client
        .post(&url)
        .multipart(form)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event(success: bool) -> GenerationEvent {
        GenerationEvent {
            prompt: "add a hat".to_string(),
            success,
            original_image: None,
            generated_image: None,
            error: (!success).then(|| "quota exceeded".to_string()),
            elapsed: Duration::from_secs(7),
        }
    }

    async fn wait_for_delivery(server: &MockServer) -> Vec<wiremock::Request> {
        for _ in 0..100 {
            let requests = server.received_requests().await.unwrap();
            if !requests.is_empty() {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("webhook delivery did not arrive");
    }

    #[test]
    fn truncate_passes_short_text_through() {
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn truncate_caps_long_text_with_ellipsis() {
        let long = "x".repeat(50);
        let cut = truncate(&long, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with("..."));
    }

    #[tokio::test]
    async fn disabled_logger_is_a_noop() {
        let logger = EventLogger::disabled();
        assert!(!logger.is_enabled());
        logger.log_generation(event(true));
    }

    #[tokio::test]
    async fn success_event_is_delivered_as_multipart_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let logger = EventLogger::new(Some(format!("{}/hook", server.uri())));
        assert!(logger.is_enabled());
        logger.log_generation(event(true));

        let requests = wait_for_delivery(&server).await;
        assert_eq!(requests.len(), 1);

        let content_type = requests[0]
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("multipart/form-data"));

        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("payload_json"));
        assert!(body.contains("Image generated"));
        assert!(body.contains("add a hat"));
    }

    #[tokio::test]
    async fn failure_event_carries_the_error_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let logger = EventLogger::new(Some(server.uri()));
        logger.log_generation(event(false));

        let requests = wait_for_delivery(&server).await;
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("Generation failed"));
        assert!(body.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn images_are_attached_as_files() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let logger = EventLogger::new(Some(server.uri()));
        let mut event = event(true);
        event.original_image = Some(BASE64.encode(b"source-bytes"));
        event.generated_image = Some(BASE64.encode(b"result-bytes"));
        logger.log_generation(event);

        let requests = wait_for_delivery(&server).await;
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("original.jpg"));
        assert!(body.contains("generated.jpg"));
        assert!(body.contains("attachment://generated.jpg"));
        assert!(body.contains("source-bytes"));
        assert!(body.contains("result-bytes"));
    }
}
