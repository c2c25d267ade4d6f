//! HTTP transport to the assistant server
//!
//! `ChatTransport` is the seam between the chat session and the network; the
//! session only sees a byte stream or a complete JSON reply.

use crate::protocol::{
    markers, paths, ChatRequest, FallbackResponse, FeedbackReply, FeedbackRequest,
};
use crate::{AssistantConfig, AssistantError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, info};

/// Maximum characters of a server error body kept in an error
const ERROR_DETAIL_LIMIT: usize = 500;

/// Raw chunks of a streamed response body
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// How the server answered a chat request
pub enum ChatReply {
    /// Streamed frames, to be decoded incrementally
    Stream(ByteStream),
    /// The server does not stream: the whole answer at once
    Complete(FallbackResponse),
}

impl std::fmt::Debug for ChatReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatReply::Stream(_) => write!(f, "ChatReply::Stream"),
            ChatReply::Complete(response) => {
                f.debug_tuple("ChatReply::Complete").field(response).finish()
            }
        }
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a chat message. A non-2xx status is an error.
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply>;

    /// Send answer feedback. `Err` only when the server could not be reached.
    async fn send_feedback(&self, request: &FeedbackRequest) -> Result<FeedbackReply>;
}

/// `ChatTransport` over reqwest. Cookies persist across requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    stream: bool,
}

impl HttpTransport {
    pub fn new(config: &AssistantConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("resident-assistant/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .build()
            .map_err(map_reqwest_error)?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            stream: config.stream,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        if self.stream {
            format!("{}{}?{}", self.base_url, paths::CHAT, paths::CHAT_STREAM_QUERY)
        } else {
            format!("{}{}", self.base_url, paths::CHAT)
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let url = self.chat_url();
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, format!("{}, application/json", markers::EVENT_STREAM))
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_response_status(response).await?;

        let streaming = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(markers::EVENT_STREAM));

        if streaming {
            info!("Chat reply is streamed");
            let bytes = response
                .bytes_stream()
                .map(|chunk| {
                    chunk
                        .map(|b| b.to_vec())
                        .map_err(|e| AssistantError::Transport(format!("stream error: {e}")))
                })
                .boxed();
            return Ok(ChatReply::Stream(bytes));
        }

        info!("Chat reply is not streamed, reading JSON body");
        let body: serde_json::Value = response.json().await.map_err(map_reqwest_error)?;
        Ok(ChatReply::Complete(FallbackResponse::from_json(&body)))
    }

    async fn send_feedback(&self, request: &FeedbackRequest) -> Result<FeedbackReply> {
        let url = format!("{}{}", self.base_url, paths::QA_FEEDBACK);
        debug!("POST {} ({})", url, request.feedback_type);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let accepted = response.status().is_success();
        let body = response.text().await.unwrap_or_default();
        let json = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
        if !accepted {
            debug!("Feedback rejected: {}", extract_error_detail(&body));
        }
        Ok(FeedbackReply::from_json(accepted, &json))
    }
}

async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = truncate_error_detail(&extract_error_detail(&body), ERROR_DETAIL_LIMIT);
    Err(AssistantError::Status {
        status: status.as_u16(),
        detail,
    })
}

/// Pull a readable message out of an error body
fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["error", "detail", "message"] {
            match value.get(key) {
                Some(serde_json::Value::String(msg)) => return msg.clone(),
                Some(nested) => {
                    if let Some(msg) = nested.get("message").and_then(|m| m.as_str()) {
                        return msg.to_string();
                    }
                }
                None => {}
            }
        }
    }

    trimmed.to_string()
}

fn truncate_error_detail(detail: &str, max_chars: usize) -> String {
    if detail.chars().count() <= max_chars {
        return detail.to_string();
    }

    let mut truncated = detail.chars().take(max_chars).collect::<String>();
    truncated.push_str("... [truncated]");
    truncated
}

fn map_reqwest_error(e: reqwest::Error) -> AssistantError {
    if e.is_timeout() {
        AssistantError::Transport(format!("timeout: {e}"))
    } else if e.is_connect() {
        AssistantError::Transport(format!("network: {e}"))
    } else {
        AssistantError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_detail() {
        assert_eq!(extract_error_detail(""), "");
        assert_eq!(extract_error_detail(r#"{"error": "Missing message"}"#), "Missing message");
        assert_eq!(
            extract_error_detail(r#"{"error": {"message": "quota"}}"#),
            "quota"
        );
        assert_eq!(extract_error_detail(r#"{"detail": "Not Found"}"#), "Not Found");
        assert_eq!(extract_error_detail("  Bad Gateway \n"), "Bad Gateway");
    }

    #[test]
    fn test_truncate_error_detail() {
        assert_eq!(truncate_error_detail("short", 10), "short");
        assert_eq!(truncate_error_detail("ứng dụng", 3), "ứng... [truncated]");
    }

    #[test]
    fn test_chat_url_follows_stream_setting() {
        let config = AssistantConfig::new("http://localhost:5000/");
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.chat_url(), "http://localhost:5000/chat?stream=true");

        let transport = HttpTransport::new(&config.with_stream(false)).unwrap();
        assert_eq!(transport.chat_url(), "http://localhost:5000/chat");
    }
}
