use serde::{Deserialize, Serialize};

use crate::error::{NotifierError, Result};

/// Setting key holding the uploaded Google client-secret document
pub const CLIENT_CREDENTIALS_KEY: &str = "client_credentials";
/// Setting key holding the authorized-user token blob
pub const USER_TOKENS_KEY: &str = "user_tokens";

const GMAIL_WEB_LINK: &str = "https://mail.google.com/mail/u/0/#inbox/";

/// Read-only projection of a Gmail message, rebuilt on every fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailItem {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub snippet: String,
    pub link: String,
}

impl MailItem {
    /// Web link that opens the message in the Gmail UI
    pub fn web_link(id: &str) -> String {
        format!("{}{}", GMAIL_WEB_LINK, id)
    }
}

/// OAuth client credentials of a Google "installed" or "web" application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Credential document as downloaded from the Google Cloud console
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSecretFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<ClientCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<ClientCredentials>,
}

impl ClientCredentials {
    /// Parse a client-secret document, preferring the `installed` section
    pub fn from_json(content: &str) -> Result<Self> {
        let file: ClientSecretFile = serde_json::from_str(content)?;
        file.installed.or(file.web).ok_or_else(|| {
            NotifierError::InvalidMessageFormat(
                "credentials file has neither an 'installed' nor a 'web' section".to_string(),
            )
        })
    }

    /// Canonical document persisted in the credential store
    pub fn to_json(&self) -> Result<String> {
        let file = ClientSecretFile {
            installed: Some(self.clone()),
            web: None,
        };
        Ok(serde_json::to_string(&file)?)
    }
}

/// Long-lived user authorization, in Google's `authorized_user` format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserToken {
    #[serde(rename = "type", default = "default_token_type")]
    pub token_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

fn default_token_type() -> String {
    "authorized_user".to_string()
}

impl UserToken {
    pub fn new(credentials: &ClientCredentials, refresh_token: impl Into<String>) -> Self {
        Self {
            token_type: default_token_type(),
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            refresh_token: refresh_token.into(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let token: Self = serde_json::from_str(content)?;
        if token.refresh_token.is_empty() {
            return Err(NotifierError::InvalidMessageFormat(
                "token has an empty refresh_token".to_string(),
            ));
        }
        Ok(token)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Rebind the refresh token to the given client credentials
    pub fn bound_to(mut self, credentials: &ClientCredentials) -> Self {
        self.client_id = credentials.client_id.clone();
        self.client_secret = credentials.client_secret.clone();
        self
    }
}

/// Result of exchanging an authorization code
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}
