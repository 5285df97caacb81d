//! "Mark as read" button handling
//!
//! The recipient presses the button under a notification; the mail is marked
//! read at the provider and the button is swapped for a disabled one.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::formatter::{self, parse_mark_read_id};
use crate::mail::MailProvider;
use crate::notifier::{ChannelEvent, Interaction, Notifier};

/// Invoked with the mail id of an acknowledged notification
pub type OnAcknowledge = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Acknowledge callback that marks the mail read at the provider
pub fn mark_read_callback(mail: Arc<dyn MailProvider>) -> OnAcknowledge {
    Arc::new(move |id: String| {
        let mail = Arc::clone(&mail);
        Box::pin(async move { mail.mark_read(&id).await })
    })
}

pub struct AcknowledgeHandler {
    notifier: Arc<dyn Notifier>,
    recipient: String,
    on_acknowledge: OnAcknowledge,
}

impl AcknowledgeHandler {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        recipient: impl Into<String>,
        on_acknowledge: OnAcknowledge,
    ) -> Self {
        Self {
            notifier,
            recipient: recipient.into(),
            on_acknowledge,
        }
    }

    /// Handle button presses until `cancel` fires or the channel closes
    pub async fn run(&self, cancel: CancellationToken) {
        let mut events = self.notifier.subscribe();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(ChannelEvent::InteractionSubmitted(interaction)) => {
                    self.handle(&interaction).await;
                }
                Ok(ChannelEvent::MessageReceived(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Acknowledge handler lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Acknowledge handler stopped");
    }

    /// Process one interaction; returns whether it was a mark-read press
    pub async fn handle(&self, interaction: &Interaction) -> bool {
        let Some(action_id) = interaction.button_id() else {
            return false;
        };
        let Some(mail_id) = parse_mark_read_id(action_id) else {
            return false;
        };

        if interaction.user_id != self.recipient {
            debug!(user = %interaction.user_id, "Ignoring mark-read press from another user");
            if let Err(e) = self
                .notifier
                .reply(interaction, "Only the notified user can do that.")
                .await
            {
                warn!("Failed to answer interaction: {}", e);
            }
            return true;
        }

        if let Err(e) = self.notifier.defer_reply(interaction).await {
            error!(id = %mail_id, "Failed to acknowledge button press: {}", e);
            return true;
        }

        let outcome = self.acknowledge(interaction, action_id, mail_id).await;
        let text = match &outcome {
            Ok(()) => {
                info!(id = %mail_id, "Marked as read");
                "✅ Marked as read.".to_string()
            }
            Err(e) => {
                error!(id = %mail_id, "Failed to mark as read: {}", e);
                format!("❌ Could not mark as read: {}", e)
            }
        };

        if let Err(e) = self.notifier.edit_reply(interaction, &text).await {
            warn!("Failed to edit interaction reply: {}", e);
        }
        true
    }

    async fn acknowledge(
        &self,
        interaction: &Interaction,
        action_id: &str,
        mail_id: &str,
    ) -> Result<()> {
        (self.on_acknowledge)(mail_id.to_string()).await?;

        // The mail is already read; a stale button is only cosmetic
        if let Some(source) = &interaction.source {
            let actions = formatter::mark_acknowledged(&source.actions, action_id);
            if let Err(e) = self.notifier.update_actions(source, &actions).await {
                warn!(id = %mail_id, "Failed to disable the mark-read button: {}", e);
            }
        }
        Ok(())
    }
}
