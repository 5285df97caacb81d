//! Mail provider abstraction used by the delivery pipeline

use async_trait::async_trait;

use crate::error::Result;
use crate::models::MailItem;

/// Read and acknowledge operations against the user's mailbox
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Ids of unread messages, newest first, capped at `max_results`
    async fn list_unread(&self, max_results: u32) -> Result<Vec<String>>;

    /// Fetch subject, sender and snippet of one message
    async fn get_details(&self, id: &str) -> Result<MailItem>;

    /// Remove the unread marker from a message
    async fn mark_read(&self, id: &str) -> Result<()>;
}
