//! Gmail API implementation of [`MailProvider`]

use async_trait::async_trait;
use google_gmail1::api::{Message, ModifyMessageRequest};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{NotifierError, Result};
use crate::mail::MailProvider;
use crate::models::MailItem;

const UNREAD_QUERY: &str = "is:unread";
const UNREAD_LABEL: &str = "UNREAD";
const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

const NO_SUBJECT: &str = "(no subject)";
const UNKNOWN_SENDER: &str = "(unknown sender)";

/// Gmail client bound to a single authorized user
pub struct GmailMailProvider {
    hub: GmailHub,
    request_timeout: Duration,
}

impl GmailMailProvider {
    pub fn new(hub: GmailHub) -> Self {
        Self {
            hub,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bound a Gmail call so a stalled connection cannot hang a cycle
    async fn timed<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, google_gmail1::Error>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(NotifierError::from),
            Err(_) => {
                warn!("Gmail API {} call timed out after {:?}", operation, self.request_timeout);
                Err(NotifierError::NetworkError(format!(
                    "API call timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl MailProvider for GmailMailProvider {
    async fn list_unread(&self, max_results: u32) -> Result<Vec<String>> {
        let call = self
            .hub
            .users()
            .messages_list("me")
            .q(UNREAD_QUERY)
            .max_results(max_results)
            .add_scope(MODIFY_SCOPE)
            .doit();

        let (_, response) = self.timed("messages.list", call).await?;

        let ids: Vec<String> = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        debug!("Gmail returned {} unread message ids", ids.len());
        Ok(ids)
    }

    async fn get_details(&self, id: &str) -> Result<MailItem> {
        let call = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .add_scope(MODIFY_SCOPE)
            .doit();

        let (_, message) = self.timed("messages.get", call).await?;
        parse_mail_item(id, message)
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        let request = ModifyMessageRequest {
            add_label_ids: None,
            remove_label_ids: Some(vec![UNREAD_LABEL.to_string()]),
        };

        let call = self
            .hub
            .users()
            .messages_modify(request, "me", id)
            .add_scope(MODIFY_SCOPE)
            .doit();

        self.timed("messages.modify", call).await?;
        debug!(message_id = %id, "Removed UNREAD label");
        Ok(())
    }
}

/// Project a Gmail API message onto a [`MailItem`]
///
/// `requested_id` is used when the response omits the id. Missing subject
/// or sender headers fall back to placeholders rather than failing.
fn parse_mail_item(requested_id: &str, msg: Message) -> Result<MailItem> {
    let id = msg.id.unwrap_or_else(|| requested_id.to_string());
    if id.is_empty() {
        return Err(NotifierError::InvalidMessageFormat(
            "Missing message ID".to_string(),
        ));
    }

    let mut subject = None;
    let mut sender = None;

    let headers = msg
        .payload
        .as_ref()
        .and_then(|p| p.headers.as_ref())
        .map(|h| h.as_slice())
        .unwrap_or_default();

    for header in headers {
        if let (Some(name), Some(value)) = (&header.name, &header.value) {
            match name.to_lowercase().as_str() {
                "subject" if subject.is_none() => subject = Some(value.clone()),
                "from" if sender.is_none() => sender = Some(value.clone()),
                _ => {}
            }
        }
    }

    let link = MailItem::web_link(&id);
    Ok(MailItem {
        subject: subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| NO_SUBJECT.to_string()),
        sender: sender
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        snippet: msg.snippet.unwrap_or_default(),
        link,
        id,
    })
}
