//! Common test utilities and fixtures
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gmail_notifier::auth::OAuthProvider;
use gmail_notifier::error::{NotifierError, Result};
use gmail_notifier::mail::MailProvider;
use gmail_notifier::models::{ClientCredentials, MailItem, TokenResponse, UserToken};
use gmail_notifier::notifier::{
    Action, Attachment, ChannelEvent, IncomingMessage, Interaction, InteractionKind, MessagePayload,
    ModalForm, Notifier, SentMessage, SourceMessage,
};
use mockall::mock;
use tokio::sync::{broadcast, Notify};

pub const RECIPIENT: &str = "424242";
pub const STRANGER: &str = "777";
pub const CREDENTIALS_JSON: &str = r#"{"installed":{"client_id":"cid.apps.googleusercontent.com","client_secret":"shh","auth_uri":"https://accounts.google.com/o/oauth2/auth","token_uri":"https://oauth2.googleapis.com/token","redirect_uris":["urn:ietf:wg:oauth:2.0:oob"]}}"#;

pub fn client_credentials() -> ClientCredentials {
    ClientCredentials::from_json(CREDENTIALS_JSON).unwrap()
}

/// Create a test mail item with default snippet and link
pub fn create_test_mail(id: &str, sender: &str, subject: &str) -> MailItem {
    MailItem {
        id: id.to_string(),
        subject: subject.to_string(),
        sender: sender.to_string(),
        snippet: format!("Preview of {}", id),
        link: MailItem::web_link(id),
    }
}

pub fn upload_from(user_id: &str, url: &str) -> ChannelEvent {
    ChannelEvent::MessageReceived(IncomingMessage {
        user_id: user_id.to_string(),
        channel_id: "dm-channel".to_string(),
        is_direct: true,
        attachments: vec![Attachment {
            id: "att-1".to_string(),
            filename: "client_secret.json".to_string(),
            url: url.to_string(),
            size: 512,
        }],
    })
}

pub fn button_press(
    user_id: &str,
    action_id: &str,
    source: Option<SourceMessage>,
) -> ChannelEvent {
    ChannelEvent::InteractionSubmitted(Interaction {
        id: format!("press-{}", action_id),
        token: "interaction-token".to_string(),
        application_id: "app".to_string(),
        user_id: user_id.to_string(),
        kind: InteractionKind::Button {
            action_id: action_id.to_string(),
        },
        source,
    })
}

pub fn modal_submit(user_id: &str, form_id: &str, input_id: &str, value: &str) -> ChannelEvent {
    ChannelEvent::InteractionSubmitted(Interaction {
        id: format!("submit-{}", value),
        token: "interaction-token".to_string(),
        application_id: "app".to_string(),
        user_id: user_id.to_string(),
        kind: InteractionKind::ModalSubmit {
            form_id: form_id.to_string(),
            fields: HashMap::from([(input_id.to_string(), value.to_string())]),
        },
        source: None,
    })
}

/// Everything the code under test sent through the channel
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    DirectMessage {
        recipient: String,
        message_id: String,
        payload: MessagePayload,
    },
    Reply { interaction_id: String, text: String },
    Deferred { interaction_id: String },
    EditedReply { interaction_id: String, text: String },
    Modal { interaction_id: String, form_id: String },
    ActionsUpdated { message_id: String, actions: Vec<Action> },
}

/// In-memory chat channel driven by the test
///
/// Inbound events are pushed with [`FakeChannel::push`]; every outbound
/// call is recorded and can be awaited with [`FakeChannel::wait_for`].
pub struct FakeChannel {
    events: broadcast::Sender<ChannelEvent>,
    outbound: Mutex<Vec<Outbound>>,
    changed: Notify,
    attachments: Mutex<HashMap<String, Vec<u8>>>,
    failing_sends: AtomicUsize,
    message_counter: AtomicUsize,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            events,
            outbound: Mutex::new(Vec::new()),
            changed: Notify::new(),
            attachments: Mutex::new(HashMap::new()),
            failing_sends: AtomicUsize::new(0),
            message_counter: AtomicUsize::new(0),
        })
    }

    pub fn serve_attachment(&self, url: &str, content: &str) {
        self.attachments
            .lock()
            .unwrap()
            .insert(url.to_string(), content.as_bytes().to_vec());
    }

    /// Make the next `count` direct messages fail
    pub fn fail_next_sends(&self, count: usize) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub fn push(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    pub fn outbound(&self) -> Vec<Outbound> {
        self.outbound.lock().unwrap().clone()
    }

    pub fn direct_messages(&self) -> Vec<MessagePayload> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::DirectMessage { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }

    /// Wait until the recorded traffic satisfies `done`
    pub async fn wait_for(&self, what: &str, done: impl Fn(&[Outbound]) -> bool) {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if done(self.outbound.lock().unwrap().as_slice()) {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!("timed out waiting for {}: {:#?}", what, self.outbound());
        }
    }

    pub async fn wait_for_direct_messages(&self, count: usize) {
        self.wait_for(&format!("{} direct messages", count), |out| {
            out.iter()
                .filter(|o| matches!(o, Outbound::DirectMessage { .. }))
                .count()
                >= count
        })
        .await;
    }

    /// Wait until `count` listeners are subscribed to inbound events
    pub async fn wait_for_subscribers(&self, count: usize) {
        let wait = async {
            while self.events.receiver_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!("timed out waiting for {} subscribers", count);
        }
    }

    fn record(&self, entry: Outbound) {
        self.outbound.lock().unwrap().push(entry);
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl Notifier for FakeChannel {
    async fn send_direct_message(
        &self,
        recipient: &str,
        payload: &MessagePayload,
    ) -> Result<SentMessage> {
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NotifierError::DeliveryFailed(
                "Cannot send messages to this user".to_string(),
            ));
        }

        let message_id = format!("msg-{}", self.message_counter.fetch_add(1, Ordering::SeqCst));
        self.record(Outbound::DirectMessage {
            recipient: recipient.to_string(),
            message_id: message_id.clone(),
            payload: payload.clone(),
        });
        Ok(SentMessage {
            channel_id: "dm-channel".to_string(),
            message_id,
        })
    }

    async fn reply(&self, interaction: &Interaction, text: &str) -> Result<()> {
        self.record(Outbound::Reply {
            interaction_id: interaction.id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn defer_reply(&self, interaction: &Interaction) -> Result<()> {
        self.record(Outbound::Deferred {
            interaction_id: interaction.id.clone(),
        });
        Ok(())
    }

    async fn edit_reply(&self, interaction: &Interaction, text: &str) -> Result<()> {
        self.record(Outbound::EditedReply {
            interaction_id: interaction.id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn show_modal(&self, interaction: &Interaction, modal: &ModalForm) -> Result<()> {
        self.record(Outbound::Modal {
            interaction_id: interaction.id.clone(),
            form_id: modal.id.clone(),
        });
        Ok(())
    }

    async fn update_actions(&self, source: &SourceMessage, actions: &[Action]) -> Result<()> {
        self.record(Outbound::ActionsUpdated {
            message_id: source.message_id.clone(),
            actions: actions.to_vec(),
        });
        Ok(())
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        self.attachments
            .lock()
            .unwrap()
            .get(&attachment.url)
            .cloned()
            .ok_or_else(|| NotifierError::ChannelError(format!("404 for {}", attachment.url)))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

// Mock implementation of MailProvider for testing
mock! {
    pub MailProvider {}

    #[async_trait::async_trait]
    impl MailProvider for MailProvider {
        async fn list_unread(&self, max_results: u32) -> Result<Vec<String>>;
        async fn get_details(&self, id: &str) -> Result<MailItem>;
        async fn mark_read(&self, id: &str) -> Result<()>;
    }
}

// Mock implementation of OAuthProvider for testing
mock! {
    pub OAuthProvider {}

    #[async_trait::async_trait]
    impl OAuthProvider for OAuthProvider {
        fn authorization_url(&self, credentials: &ClientCredentials) -> Result<String>;
        async fn exchange_code(
            &self,
            credentials: &ClientCredentials,
            code: &str,
        ) -> Result<TokenResponse>;
        async fn connect(&self, token: &UserToken) -> Result<Arc<dyn MailProvider>>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_mail() {
        let mail = create_test_mail("m1", "alice@example.com", "Lunch?");
        assert_eq!(mail.id, "m1");
        assert_eq!(mail.link, "https://mail.google.com/mail/u/0/#inbox/m1");
    }

    #[test]
    fn test_fixture_credentials_parse() {
        let credentials = client_credentials();
        assert_eq!(credentials.client_id, "cid.apps.googleusercontent.com");
    }

    #[tokio::test]
    async fn test_fake_channel_failing_sends() {
        let channel = FakeChannel::new();
        channel.fail_next_sends(1);

        let payload = MessagePayload::text("hi");
        assert!(channel.send_direct_message(RECIPIENT, &payload).await.is_err());
        assert!(channel.send_direct_message(RECIPIENT, &payload).await.is_ok());
        assert_eq!(channel.direct_messages(), vec![payload]);
    }
}
