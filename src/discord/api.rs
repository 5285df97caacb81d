//! Discord REST API client
//!
//! Covers the subset used by the notifier: DM channels, messages,
//! interaction callbacks and attachment downloads.

use reqwest::{Client, Method, Response};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::events::{DiscordMessage, DmChannel};
use crate::error::{NotifierError, Result};

/// Rate limit headers of a REST response
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset_after: Option<f64>,
    pub bucket: Option<String>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        Self {
            remaining: headers
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
            reset_after: headers
                .get("x-ratelimit-reset-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
            bucket: headers
                .get("x-ratelimit-bucket")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        }
    }

    pub fn is_limited(&self) -> bool {
        self.remaining == Some(0)
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        self.reset_after.map(|s| (s * 1000.0) as u64)
    }
}

pub struct DiscordApiClient {
    http: Client,
    token: String,
    base_url: String,
}

impl DiscordApiClient {
    pub fn new(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotifierError::ChannelError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Authorized JSON request; non-2xx responses become `ChannelError`
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, path = %path, "Discord API request");

        let mut request = self
            .http
            .request(method, &url)
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await?;

        // Wait out an exhausted bucket so the next call does not 429
        let rate_limit = RateLimitInfo::from_headers(resp.headers());
        if rate_limit.is_limited() {
            let wait_ms = rate_limit.retry_after_ms().unwrap_or(1000);
            warn!(
                wait_ms = wait_ms,
                bucket = ?rate_limit.bucket,
                "Discord rate limit reached, waiting"
            );
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }

        let status = resp.status();
        if !status.is_success() {
            let err_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".into());
            return Err(NotifierError::ChannelError(format!(
                "Discord API returned {}: {}",
                status, err_body
            )));
        }

        Ok(resp)
    }

    /// Open (or fetch the existing) DM channel with a user
    pub async fn create_dm_channel(&self, recipient_id: &str) -> Result<String> {
        let body = json!({ "recipient_id": recipient_id });
        let channel: DmChannel = self
            .request(Method::POST, "/users/@me/channels", Some(&body))
            .await?
            .json()
            .await?;
        Ok(channel.id)
    }

    pub async fn create_message(&self, channel_id: &str, body: &Value) -> Result<DiscordMessage> {
        let path = format!("/channels/{}/messages", channel_id);
        let message = self
            .request(Method::POST, &path, Some(body))
            .await?
            .json()
            .await?;
        Ok(message)
    }

    pub async fn edit_message(&self, channel_id: &str, message_id: &str, body: &Value) -> Result<()> {
        let path = format!("/channels/{}/messages/{}", channel_id, message_id);
        self.request(Method::PATCH, &path, Some(body)).await?;
        Ok(())
    }

    pub async fn interaction_callback(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        body: &Value,
    ) -> Result<()> {
        let path = format!("/interactions/{}/{}/callback", interaction_id, interaction_token);
        self.request(Method::POST, &path, Some(body)).await?;
        Ok(())
    }

    pub async fn edit_original_response(
        &self,
        application_id: &str,
        interaction_token: &str,
        body: &Value,
    ) -> Result<()> {
        let path = format!(
            "/webhooks/{}/{}/messages/@original",
            application_id, interaction_token
        );
        self.request(Method::PATCH, &path, Some(body)).await?;
        Ok(())
    }

    /// Attachment URLs point at the CDN and take no authorization
    ///
    /// Bodies larger than `limit` bytes are refused.
    pub async fn download(&self, url: &str, limit: u64) -> Result<Vec<u8>> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifierError::ChannelError(format!(
                "attachment download returned {}",
                status
            )));
        }
        if let Some(length) = resp.content_length().filter(|len| *len > limit) {
            return Err(oversized(length, limit));
        }

        let body = resp.bytes().await?;
        if body.len() as u64 > limit {
            return Err(oversized(body.len() as u64, limit));
        }
        Ok(body.to_vec())
    }
}

pub(crate) fn oversized(size: u64, limit: u64) -> NotifierError {
    NotifierError::ChannelError(format!(
        "attachment is {} bytes, the limit is {} bytes",
        size, limit
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_base_url_trailing_slash() {
        let client = DiscordApiClient::new("t", "http://localhost:9999/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:9999");
    }

    #[test]
    fn test_rate_limit_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("x-ratelimit-reset-after", "1.5".parse().unwrap());

        let info = RateLimitInfo::from_headers(&headers);
        assert!(info.is_limited());
        assert_eq!(info.retry_after_ms(), Some(1500));
    }

    #[tokio::test]
    async fn test_create_dm_channel_sends_bot_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/@me/channels"))
            .and(header("Authorization", "Bot secret-token"))
            .and(body_json(json!({ "recipient_id": "42" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "dm-1", "type": 1 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DiscordApiClient::new("secret-token", server.uri()).unwrap();
        assert_eq!(client.create_dm_channel("42").await.unwrap(), "dm-1");
    }

    #[tokio::test]
    async fn test_error_status_becomes_channel_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/c1/messages"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Missing Access"))
            .mount(&server)
            .await;

        let client = DiscordApiClient::new("t", server.uri()).unwrap();
        let err = client
            .create_message("c1", &json!({ "content": "hi" }))
            .await
            .unwrap_err();

        assert!(matches!(err, NotifierError::ChannelError(_)));
        assert!(err.to_string().contains("Missing Access"));
    }

    #[tokio::test]
    async fn test_download_attachment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachments/credentials.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"installed\":{}}"))
            .mount(&server)
            .await;

        let client = DiscordApiClient::new("t", server.uri()).unwrap();
        let bytes = client
            .download(&format!("{}/attachments/credentials.json", server.uri()), 1024)
            .await
            .unwrap();
        assert_eq!(bytes, b"{\"installed\":{}}");
    }

    #[tokio::test]
    async fn test_download_refuses_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachments/huge.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 2048]))
            .mount(&server)
            .await;

        let client = DiscordApiClient::new("t", server.uri()).unwrap();
        let err = client
            .download(&format!("{}/attachments/huge.json", server.uri()), 1024)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("limit is 1024 bytes"));
    }
}
