//! OAuth2 plumbing for the Gmail API
//!
//! The authorization step is out-of-band: the user opens a consent URL,
//! Google shows them a code, and they hand it back through Discord. The code
//! is exchanged with a plain form POST; the resulting refresh token is then
//! turned into an authenticated Gmail hub.

use async_trait::async_trait;
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{NotifierError, Result};
use crate::gmail::GmailMailProvider;
use crate::mail::MailProvider;
use crate::models::{ClientCredentials, TokenResponse, UserToken};

/// Scopes needed to list unread mail and clear the unread marker
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.modify",
];

/// Redirect target that makes Google display the code instead of redirecting
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Authorization server operations needed by the bootstrap
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Consent URL requesting offline access for [`REQUIRED_SCOPES`]
    fn authorization_url(&self, credentials: &ClientCredentials) -> Result<String>;

    /// Exchange an authorization code; a response without refresh token fails
    async fn exchange_code(
        &self,
        credentials: &ClientCredentials,
        code: &str,
    ) -> Result<TokenResponse>;

    /// Build a mail provider authorized by the given user token
    async fn connect(&self, token: &UserToken) -> Result<Arc<dyn MailProvider>>;
}

/// Google's OAuth endpoints, as named in the client-secret document
pub struct GoogleOAuthProvider {
    http: reqwest::Client,
}

impl GoogleOAuthProvider {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotifierError::AuthError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuthProvider {
    fn authorization_url(&self, credentials: &ClientCredentials) -> Result<String> {
        let mut url = url::Url::parse(&credentials.auth_uri).map_err(|e| {
            NotifierError::AuthError(format!("Invalid auth_uri '{}': {}", credentials.auth_uri, e))
        })?;

        url.query_pairs_mut()
            .append_pair("client_id", &credentials.client_id)
            .append_pair("redirect_uri", OOB_REDIRECT_URI)
            .append_pair("response_type", "code")
            .append_pair("scope", &REQUIRED_SCOPES.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        credentials: &ClientCredentials,
        code: &str,
    ) -> Result<TokenResponse> {
        debug!("Exchanging authorization code at {}", credentials.token_uri);

        let response = self
            .http
            .post(&credentials.token_uri)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", OOB_REDIRECT_URI),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| NotifierError::AuthExchange(format!("token request failed: {}", e)))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NotifierError::AuthExchange(format!("unreadable token response: {}", e)))?;

        if !status.is_success() {
            let error = body
                .get("error_description")
                .or_else(|| body.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(NotifierError::AuthExchange(format!("{} ({})", error, status)));
        }

        let tokens: TokenResponse = serde_json::from_value(body)
            .map_err(|e| NotifierError::AuthExchange(format!("malformed token response: {}", e)))?;

        match tokens.refresh_token.as_deref() {
            Some(refresh) if !refresh.is_empty() => Ok(tokens),
            _ => Err(NotifierError::AuthExchange(
                "token response did not include a refresh token".to_string(),
            )),
        }
    }

    async fn connect(&self, token: &UserToken) -> Result<Arc<dyn MailProvider>> {
        let hub = initialize_gmail_hub(token).await?;
        Ok(Arc::new(GmailMailProvider::new(hub)))
    }
}

/// Build a Gmail hub authenticated by a stored refresh token
pub async fn initialize_gmail_hub(token: &UserToken) -> Result<GmailHub> {
    let secret: yup_oauth2::authorized_user::AuthorizedUserSecret =
        serde_json::from_str(&token.to_json()?)?;

    let auth = yup_oauth2::AuthorizedUserAuthenticator::builder(secret)
        .build()
        .await
        .map_err(|e| NotifierError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Fail here rather than on the first poll if the refresh token was revoked
    auth.token(REQUIRED_SCOPES).await.map_err(refresh_error)?;

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| NotifierError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    info!("Gmail API client authorized for client {}", token.client_id);
    Ok(Gmail::new(client, auth))
}

/// Only a refused grant calls for a new authorization; outages keep the token
fn refresh_error(error: yup_oauth2::Error) -> NotifierError {
    use yup_oauth2::error::AuthErrorCode;

    match &error {
        yup_oauth2::Error::AuthError(auth)
            if matches!(
                auth.error,
                AuthErrorCode::InvalidGrant
                    | AuthErrorCode::InvalidClient
                    | AuthErrorCode::UnauthorizedClient
            ) =>
        {
            NotifierError::TokenRejected(error.to_string())
        }
        _ => NotifierError::AuthError(format!("Failed to obtain token: {}", error)),
    }
}

/// Pull an authorization code out of whatever the user pasted
///
/// A pasted redirect URL yields its `code` query parameter. Anything else
/// is taken verbatim as long as it is a single whitespace-free token.
pub fn extract_auth_code(input: &str) -> Option<String> {
    let input = input.trim();

    if input.starts_with("http") {
        return url::Url::parse(input).ok().and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "code")
                .map(|(_, v)| v.into_owned())
                .filter(|code| !code.is_empty())
        });
    }

    if input.is_empty() || input.contains(char::is_whitespace) {
        None
    } else {
        Some(input.to_string())
    }
}
