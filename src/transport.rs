//! HTTP transport: posts a chat request and hands back the framed response
//! body for [`StreamConsumer`](crate::StreamConsumer).

use std::collections::BTreeMap;
use std::time::Duration;

use agent_provider::{Attachment, Role};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::session::StreamRequest;

pub const DEFAULT_USER_AGENT: &str = concat!("chat_stream/", env!("CARGO_PKG_VERSION"));

/// Response body chunks as they arrive.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub endpoint: String,
    /// Connect timeout; the streamed body itself is not time-limited.
    pub connect_timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub extra_headers: BTreeMap<String, String>,
}

impl HttpTransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: None,
            user_agent: None,
            extra_headers: BTreeMap::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequestMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
}

/// JSON body of one model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatRequestMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl From<&StreamRequest> for ChatRequest {
    fn from(request: &StreamRequest) -> Self {
        Self {
            thread_id: request.thread.durable().map(ToString::to_string),
            model: request.model.clone(),
            messages: request
                .history
                .iter()
                .map(|message| ChatRequestMessage {
                    id: message.id.as_str().to_string(),
                    role: message.role,
                    content: message.content.clone(),
                })
                .collect(),
            attachments: request.attachments.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    endpoint: Url,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let endpoint = Url::parse(config.endpoint.trim())
            .map_err(|error| TransportError::InvalidConfig(format!("invalid endpoint '{}': {error}", config.endpoint)))?;
        let headers = build_headers(&config)?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            endpoint,
            headers,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Posts `request`; on success returns the framed body as a byte stream.
    pub async fn send(&self, request: &ChatRequest) -> Result<ByteStream, TransportError> {
        debug!(endpoint = %self.endpoint, messages = request.messages.len(), "sending chat request");
        let response = self
            .http
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = parse_error_message(status, &body);
            warn!(status = status.as_u16(), error = %message, "chat request rejected");
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from))
            .boxed())
    }
}

fn build_headers(config: &HttpTransportConfig) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent)
            .map_err(|_| TransportError::InvalidConfig("invalid user agent".to_string()))?,
    );

    for (key, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| TransportError::InvalidConfig(format!("invalid header key: {key}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| TransportError::InvalidConfig(format!("invalid header value for {key}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn parse_error_message(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: serde_json::Value,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        match parsed.error {
            serde_json::Value::String(message) if !message.trim().is_empty() => return message,
            serde_json::Value::Object(object) => {
                if let Some(message) = object.get("message").and_then(serde_json::Value::as_str) {
                    return message.to_string();
                }
            }
            _ => {}
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        trimmed.to_string()
    }
}
