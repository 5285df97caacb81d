//! Chat channel abstraction: outbound messages and inbound events
//!
//! The types here carry no Discord specifics; the adapter in
//! [`crate::discord`] maps them onto embeds, components and interaction
//! callbacks.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

/// Clickable element attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Opens a URL, never produces an interaction
    Link { label: String, url: String },
    /// Produces an `InteractionKind::Button` with this id
    Button {
        id: String,
        label: String,
        style: ButtonStyle,
        disabled: bool,
    },
}

impl Action {
    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Action::Link {
            label: label.into(),
            url: url.into(),
        }
    }

    pub fn button(id: impl Into<String>, label: impl Into<String>, style: ButtonStyle) -> Self {
        Action::Button {
            id: id.into(),
            label: label.into(),
            style,
            disabled: false,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Action::Button { id, .. } => Some(id),
            Action::Link { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Rich message body; an empty title means a plain text message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePayload {
    pub content: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub color: Option<u32>,
    pub fields: Vec<Field>,
    pub footer: Option<String>,
    pub actions: Vec<Action>,
}

impl MessagePayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInput {
    pub id: String,
    pub label: String,
    pub placeholder: Option<String>,
    pub required: bool,
}

/// Short form shown in response to a button press
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalForm {
    pub id: String,
    pub title: String,
    pub inputs: Vec<TextInput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel_id: String,
    pub message_id: String,
}

/// Message an interaction originated from, with its current actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub channel_id: String,
    pub message_id: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionKind {
    Button { action_id: String },
    ModalSubmit {
        form_id: String,
        fields: HashMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub id: String,
    pub token: String,
    pub application_id: String,
    pub user_id: String,
    pub kind: InteractionKind,
    pub source: Option<SourceMessage>,
}

impl Interaction {
    pub fn button_id(&self) -> Option<&str> {
        match &self.kind {
            InteractionKind::Button { action_id } => Some(action_id),
            InteractionKind::ModalSubmit { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub user_id: String,
    pub channel_id: String,
    pub is_direct: bool,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    InteractionSubmitted(Interaction),
    MessageReceived(IncomingMessage),
}

/// Outbound operations on the chat channel plus a feed of inbound events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Open (or reuse) the DM channel with `recipient` and post a message
    async fn send_direct_message(
        &self,
        recipient: &str,
        payload: &MessagePayload,
    ) -> Result<SentMessage>;

    /// Answer an interaction with a message only the user can see
    async fn reply(&self, interaction: &Interaction, text: &str) -> Result<()>;

    /// Acknowledge an interaction now and answer later via `edit_reply`
    async fn defer_reply(&self, interaction: &Interaction) -> Result<()>;

    async fn edit_reply(&self, interaction: &Interaction, text: &str) -> Result<()>;

    async fn show_modal(&self, interaction: &Interaction, modal: &ModalForm) -> Result<()>;

    /// Replace the actions of an already posted message
    async fn update_actions(&self, source: &SourceMessage, actions: &[Action]) -> Result<()>;

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>>;

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
}
