use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{
    CacheStats, ChatRequest, ErrorDetail, Message, ServerMessage, SessionCreateResponse,
    SessionMessagesResponse, SessionSummary,
};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client as HttpClient;
use tracing::debug;

/// Raw body fragments of a streaming response, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<Vec<u8>>>;

/// The remote chat service.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>>;

    async fn create_session(&self) -> Result<SessionCreateResponse>;

    async fn session_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;

    async fn clear_session(&self, session_id: &str) -> Result<ServerMessage>;

    /// Open the answer stream for one question. The returned stream ends when
    /// the server closes the connection.
    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream>;

    async fn cache_stats(&self) -> Result<CacheStats>;

    async fn clear_cache(&self) -> Result<ServerMessage>;
}

#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    http: HttpClient,
}

impl ChatClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            base_url: normalize_base_url(&config.base_url),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn json_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ChatApi for ChatClient {
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let response = self.http.get(self.url("/chat/sessions")).send().await?;
        self.json_response(response).await
    }

    async fn create_session(&self) -> Result<SessionCreateResponse> {
        let response = self
            .http
            .post(self.url("/chat/sessions"))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        self.json_response(response).await
    }

    async fn session_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let response = self
            .http
            .get(self.url(&format!("/chat/sessions/{}/messages", session_id)))
            .send()
            .await?;
        let body: SessionMessagesResponse = self.json_response(response).await?;
        Ok(body.messages)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/chat/sessions/{}", session_id)))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn clear_session(&self, session_id: &str) -> Result<ServerMessage> {
        let response = self
            .http
            .post(self.url(&format!("/chat/sessions/{}/clear", session_id)))
            .send()
            .await?;
        self.json_response(response).await
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<FragmentStream> {
        debug!(session_id = %request.session_id, "opening answer stream");
        let response = self
            .http
            .post(self.url("/chat/stream"))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(response
            .bytes_stream()
            .map(|fragment| {
                fragment
                    .map(|bytes| bytes.to_vec())
                    .map_err(ClientError::from)
            })
            .boxed())
    }

    async fn cache_stats(&self) -> Result<CacheStats> {
        let response = self.http.get(self.url("/chat/cache/stats")).send().await?;
        self.json_response(response).await
    }

    async fn clear_cache(&self) -> Result<ServerMessage> {
        let response = self.http.post(self.url("/chat/cache/clear")).send().await?;
        self.json_response(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), body = %body, "request failed");
    Err(ClientError::api(status.as_u16(), error_message(status, &body)))
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorDetail>(body) {
        Ok(ErrorDetail {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorDetail { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => format!("HTTP {}", status.as_u16()),
        Err(_) => body.trim().to_string(),
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
