use std::time::{Duration, SystemTime};

use hyper::header::{HeaderMap, RETRY_AFTER};
use thiserror::Error;

/// Type alias for Result with NotifierError
pub type Result<T> = std::result::Result<T, NotifierError>;

/// Seconds to wait when a 429 carries no usable `Retry-After`
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Error types for the Gmail notifier
#[derive(Error, Debug)]
pub enum NotifierError {
    /// Required configuration is missing or invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No credential source produced usable client credentials or tokens
    #[error("Credential acquisition failed: {0}")]
    CredentialAcquisition(String),

    /// Authenticator setup or a concurrent authorization request
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Google refused the stored refresh token (revoked or expired grant)
    #[error("User token rejected: {0}")]
    TokenRejected(String),

    /// The authorization code could not be exchanged for tokens
    #[error("Authorization code exchange failed: {0}")]
    AuthExchange(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// Listing or fetching mail failed; aborts the current cycle
    #[error("Mail provider query failed: {0}")]
    ProviderQuery(String),

    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// HTTP 429, with the delay the server asked for
    #[error("Rate limited by Gmail, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Connection failure or timeout
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// HTTP 401/403, usually a revoked grant or a missing scope
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// A Gmail message without the fields a notification needs
    #[error("Malformed message: {0}")]
    InvalidMessageFormat(String),

    /// Notification channel (Discord) errors
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Store error: {0}")]
    StoreError(#[from] rusqlite::Error),

    /// Local state could not be accessed (poisoned lock)
    #[error("State error: {0}")]
    StateError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl NotifierError {
    /// Whether a later attempt may succeed without any change on our side
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NotifierError::RateLimitExceeded { .. }
                | NotifierError::ServerError { .. }
                | NotifierError::NetworkError(_)
                | NotifierError::DeliveryFailed(_)
        )
    }

    /// Whether the error must abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NotifierError::ConfigError(_) | NotifierError::CredentialAcquisition(_)
        )
    }
}

/// Seconds requested by a `Retry-After` header, either delay-seconds or an HTTP date
fn retry_after_secs(headers: &HeaderMap) -> u64 {
    let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) else {
        return DEFAULT_RETRY_AFTER_SECS;
    };

    value
        .trim()
        .parse::<u64>()
        .ok()
        .or_else(|| {
            httpdate::parse_http_date(value)
                .ok()
                .map(|at| {
                    at.duration_since(SystemTime::now())
                        .unwrap_or(Duration::ZERO)
                })
                .map(|wait| wait.as_secs())
        })
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

impl From<google_gmail1::Error> for NotifierError {
    fn from(error: google_gmail1::Error) -> Self {
        use google_gmail1::Error as GmailError;

        let response = match error {
            GmailError::Failure(response) => response,
            GmailError::BadRequest(body) => return NotifierError::BadRequest(body.to_string()),
            GmailError::HttpError(e) => {
                return NotifierError::NetworkError(format!("Connection error: {}", e))
            }
            GmailError::Io(e) => return NotifierError::NetworkError(e.to_string()),
            other => return NotifierError::ApiError(other.to_string()),
        };

        let status = response.status();
        let message = format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        );

        match status.as_u16() {
            429 => NotifierError::RateLimitExceeded {
                retry_after: retry_after_secs(response.headers()),
            },
            404 => NotifierError::MessageNotFound(message),
            400 => NotifierError::BadRequest(message),
            401 | 403 => NotifierError::Forbidden(message),
            code @ 500..=599 => NotifierError::ServerError {
                status: code,
                message,
            },
            _ => NotifierError::ApiError(message),
        }
    }
}

impl From<reqwest::Error> for NotifierError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            NotifierError::NetworkError(error.to_string())
        } else if let Some(status) = error.status().filter(|s| s.is_server_error()) {
            NotifierError::ServerError {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else {
            NotifierError::ChannelError(error.to_string())
        }
    }
}
