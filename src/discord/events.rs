//! Discord Gateway payloads and the JSON shapes of embeds and components
//!
//! Inbound dispatch data is decoded into the channel-neutral types of
//! [`crate::notifier`]; outbound payloads are encoded from them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::notifier::{
    Action, Attachment, ButtonStyle, IncomingMessage, Interaction, InteractionKind,
    MessagePayload, ModalForm, SourceMessage,
};

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RESUME: u8 = 6;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

pub const INTENT_GUILDS: u32 = 1 << 0;
pub const INTENT_DIRECT_MESSAGES: u32 = 1 << 12;

const INTERACTION_MESSAGE_COMPONENT: u8 = 3;
const INTERACTION_MODAL_SUBMIT: u8 = 5;

const COMPONENT_ACTION_ROW: u8 = 1;
const COMPONENT_BUTTON: u8 = 2;
const COMPONENT_TEXT_INPUT: u8 = 4;

const BUTTON_STYLE_LINK: u8 = 5;
const BUTTONS_PER_ROW: usize = 5;

/// Interaction callback types
pub const CALLBACK_CHANNEL_MESSAGE: u8 = 4;
pub const CALLBACK_DEFERRED_CHANNEL_MESSAGE: u8 = 5;
pub const CALLBACK_MODAL: u8 = 9;

/// Message flag hiding a reply from everyone but the invoking user
pub const FLAG_EPHEMERAL: u64 = 1 << 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: Option<Value>,
    pub s: Option<u64>,
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn heartbeat(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT,
            d: if seq > 0 { Some(json!(seq)) } else { None },
            s: None,
            t: None,
        }
    }

    pub fn identify(token: &str, intents: u32) -> Self {
        Self {
            op: OP_IDENTIFY,
            d: Some(json!({
                "token": token,
                "intents": intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "gmail-notifier",
                    "device": "gmail-notifier",
                },
            })),
            s: None,
            t: None,
        }
    }

    pub fn resume(token: &str, session_id: &str, seq: u64) -> Self {
        Self {
            op: OP_RESUME,
            d: Some(json!({
                "token": token,
                "session_id": session_id,
                "seq": seq,
            })),
            s: None,
            t: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelloData {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyEvent {
    pub user: User,
    pub session_id: String,
    pub resume_gateway_url: Option<String>,
}

/// Message object as returned by the REST API
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DmChannel {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordAttachment {
    pub id: String,
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub channel_id: String,
    pub author: User,
    pub guild_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<DiscordAttachment>,
}

impl MessageCreate {
    /// `None` for messages posted by bots, including this one
    pub fn into_incoming(self) -> Option<IncomingMessage> {
        if self.author.bot {
            return None;
        }
        Some(IncomingMessage {
            user_id: self.author.id,
            channel_id: self.channel_id,
            is_direct: self.guild_id.is_none(),
            attachments: self
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    id: a.id,
                    filename: a.filename,
                    url: a.url,
                    size: a.size,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Member {
    user: User,
}

#[derive(Debug, Clone, Deserialize)]
struct InteractionMessage {
    id: String,
    channel_id: String,
    #[serde(default)]
    components: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct InteractionData {
    custom_id: Option<String>,
    #[serde(default)]
    components: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionCreate {
    id: String,
    token: String,
    application_id: String,
    #[serde(rename = "type")]
    kind: u8,
    data: Option<InteractionData>,
    user: Option<User>,
    member: Option<Member>,
    message: Option<InteractionMessage>,
}

impl InteractionCreate {
    /// Button presses and modal submissions; other interaction types yield `None`
    pub fn into_interaction(self) -> Option<Interaction> {
        // DMs carry `user`, guild interactions carry `member.user`
        let user_id = self
            .user
            .map(|u| u.id)
            .or_else(|| self.member.map(|m| m.user.id))?;
        let data = self.data?;

        let kind = match self.kind {
            INTERACTION_MESSAGE_COMPONENT => InteractionKind::Button {
                action_id: data.custom_id?,
            },
            INTERACTION_MODAL_SUBMIT => InteractionKind::ModalSubmit {
                form_id: data.custom_id?,
                fields: decode_modal_fields(&data.components),
            },
            _ => return None,
        };

        let source = self.message.map(|m| SourceMessage {
            actions: decode_actions(&m.components),
            channel_id: m.channel_id,
            message_id: m.id,
        });

        Some(Interaction {
            id: self.id,
            token: self.token,
            application_id: self.application_id,
            user_id,
            kind,
            source,
        })
    }
}

fn button_style_code(style: ButtonStyle) -> u8 {
    match style {
        ButtonStyle::Primary => 1,
        ButtonStyle::Secondary => 2,
        ButtonStyle::Success => 3,
        ButtonStyle::Danger => 4,
    }
}

fn button_style_from_code(code: u64) -> ButtonStyle {
    match code {
        2 => ButtonStyle::Secondary,
        3 => ButtonStyle::Success,
        4 => ButtonStyle::Danger,
        _ => ButtonStyle::Primary,
    }
}

/// Lay actions out as action rows of at most five buttons
pub fn encode_actions(actions: &[Action]) -> Value {
    let rows: Vec<Value> = actions
        .chunks(BUTTONS_PER_ROW)
        .map(|chunk| {
            let components: Vec<Value> = chunk
                .iter()
                .map(|action| match action {
                    Action::Link { label, url } => json!({
                        "type": COMPONENT_BUTTON,
                        "style": BUTTON_STYLE_LINK,
                        "label": label,
                        "url": url,
                    }),
                    Action::Button {
                        id,
                        label,
                        style,
                        disabled,
                    } => json!({
                        "type": COMPONENT_BUTTON,
                        "style": button_style_code(*style),
                        "label": label,
                        "custom_id": id,
                        "disabled": disabled,
                    }),
                })
                .collect();
            json!({ "type": COMPONENT_ACTION_ROW, "components": components })
        })
        .collect();
    Value::Array(rows)
}

/// Buttons found in a message's component rows, in display order
pub fn decode_actions(rows: &Value) -> Vec<Action> {
    let mut actions = Vec::new();
    for row in rows.as_array().into_iter().flatten() {
        for component in row["components"].as_array().into_iter().flatten() {
            if component["type"].as_u64() != Some(COMPONENT_BUTTON as u64) {
                continue;
            }
            let label = component["label"].as_str().unwrap_or_default().to_string();
            if let Some(url) = component["url"].as_str() {
                actions.push(Action::Link {
                    label,
                    url: url.to_string(),
                });
            } else if let Some(id) = component["custom_id"].as_str() {
                actions.push(Action::Button {
                    id: id.to_string(),
                    label,
                    style: button_style_from_code(component["style"].as_u64().unwrap_or(1)),
                    disabled: component["disabled"].as_bool().unwrap_or(false),
                });
            }
        }
    }
    actions
}

fn decode_modal_fields(rows: &Value) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for row in rows.as_array().into_iter().flatten() {
        for component in row["components"].as_array().into_iter().flatten() {
            if let (Some(id), Some(value)) =
                (component["custom_id"].as_str(), component["value"].as_str())
            {
                fields.insert(id.to_string(), value.to_string());
            }
        }
    }
    fields
}

/// Create-message body with an optional embed and component rows
pub fn encode_message(payload: &MessagePayload) -> Value {
    let mut body = serde_json::Map::new();

    if let Some(content) = &payload.content {
        body.insert("content".into(), json!(content));
    }

    if payload.title.is_some() || payload.description.is_some() || !payload.fields.is_empty() {
        let mut embed = serde_json::Map::new();
        if let Some(title) = &payload.title {
            embed.insert("title".into(), json!(title));
        }
        if let Some(url) = &payload.url {
            embed.insert("url".into(), json!(url));
        }
        if let Some(description) = &payload.description {
            embed.insert("description".into(), json!(description));
        }
        if let Some(color) = payload.color {
            embed.insert("color".into(), json!(color));
        }
        if !payload.fields.is_empty() {
            let fields: Vec<Value> = payload
                .fields
                .iter()
                .map(|f| json!({ "name": f.name, "value": f.value, "inline": f.inline }))
                .collect();
            embed.insert("fields".into(), Value::Array(fields));
        }
        if let Some(footer) = &payload.footer {
            embed.insert("footer".into(), json!({ "text": footer }));
        }
        embed.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
        body.insert("embeds".into(), json!([Value::Object(embed)]));
    }

    if !payload.actions.is_empty() {
        body.insert("components".into(), encode_actions(&payload.actions));
    }

    Value::Object(body)
}

pub fn encode_modal(modal: &ModalForm) -> Value {
    let rows: Vec<Value> = modal
        .inputs
        .iter()
        .map(|input| {
            let mut component = json!({
                "type": COMPONENT_TEXT_INPUT,
                "custom_id": input.id,
                "label": input.label,
                "style": 1,
                "required": input.required,
            });
            if let Some(placeholder) = &input.placeholder {
                component["placeholder"] = json!(placeholder);
            }
            json!({ "type": COMPONENT_ACTION_ROW, "components": [component] })
        })
        .collect();

    json!({
        "custom_id": modal.id,
        "title": modal.title,
        "components": rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::Field;

    #[test]
    fn test_intents() {
        assert_eq!(INTENT_GUILDS | INTENT_DIRECT_MESSAGES, 4097);
    }

    #[test]
    fn test_heartbeat_without_sequence() {
        assert!(GatewayPayload::heartbeat(0).d.is_none());
        assert_eq!(GatewayPayload::heartbeat(42).d, Some(json!(42)));
    }

    #[test]
    fn test_button_interaction_in_dm() {
        let raw = json!({
            "id": "int1",
            "token": "tok",
            "application_id": "app",
            "type": 3,
            "user": { "id": "42", "username": "alice" },
            "data": { "custom_id": "mark_read_abc", "component_type": 2 },
            "message": {
                "id": "m1",
                "channel_id": "c1",
                "components": [{
                    "type": 1,
                    "components": [
                        { "type": 2, "style": 5, "label": "Open", "url": "https://mail.google.com" },
                        { "type": 2, "style": 1, "label": "Mark as read", "custom_id": "mark_read_abc" }
                    ]
                }]
            }
        });

        let interaction = serde_json::from_value::<InteractionCreate>(raw)
            .unwrap()
            .into_interaction()
            .unwrap();

        assert_eq!(interaction.user_id, "42");
        assert_eq!(interaction.button_id(), Some("mark_read_abc"));
        let source = interaction.source.unwrap();
        assert_eq!(source.message_id, "m1");
        assert_eq!(source.actions.len(), 2);
        assert!(matches!(source.actions[0], Action::Link { .. }));
    }

    #[test]
    fn test_modal_submit_from_guild_member() {
        let raw = json!({
            "id": "int2",
            "token": "tok",
            "application_id": "app",
            "type": 5,
            "member": { "user": { "id": "7" } },
            "data": {
                "custom_id": "auth_modal",
                "components": [{
                    "type": 1,
                    "components": [{ "type": 4, "custom_id": "auth_code_input", "value": "4/0Example" }]
                }]
            }
        });

        let interaction = serde_json::from_value::<InteractionCreate>(raw)
            .unwrap()
            .into_interaction()
            .unwrap();

        assert_eq!(interaction.user_id, "7");
        match interaction.kind {
            InteractionKind::ModalSubmit { form_id, fields } => {
                assert_eq!(form_id, "auth_modal");
                assert_eq!(fields["auth_code_input"], "4/0Example");
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_ping_interaction_is_ignored() {
        let raw = json!({ "id": "i", "token": "t", "application_id": "a", "type": 1 });
        let parsed = serde_json::from_value::<InteractionCreate>(raw).unwrap();
        assert!(parsed.into_interaction().is_none());
    }

    #[test]
    fn test_message_create_from_bot_is_dropped() {
        let raw = json!({
            "id": "m",
            "channel_id": "c",
            "content": "",
            "author": { "id": "1", "username": "me", "bot": true }
        });
        let msg = serde_json::from_value::<MessageCreate>(raw).unwrap();
        assert!(msg.into_incoming().is_none());
    }

    #[test]
    fn test_dm_with_attachment() {
        let raw = json!({
            "id": "m",
            "channel_id": "dm1",
            "content": "",
            "author": { "id": "42", "username": "alice" },
            "attachments": [{
                "id": "a1",
                "filename": "credentials.json",
                "url": "https://cdn.discordapp.com/attachments/1/2/credentials.json",
                "size": 400
            }]
        });
        let msg = serde_json::from_value::<MessageCreate>(raw)
            .unwrap()
            .into_incoming()
            .unwrap();

        assert!(msg.is_direct);
        assert_eq!(msg.attachments[0].filename, "credentials.json");
    }

    #[test]
    fn test_actions_survive_encoding() {
        let actions = vec![
            Action::link("Open", "https://example.com"),
            Action::Button {
                id: "mark_read_x".to_string(),
                label: "Marked as read".to_string(),
                style: ButtonStyle::Success,
                disabled: true,
            },
        ];
        assert_eq!(decode_actions(&encode_actions(&actions)), actions);
    }

    #[test]
    fn test_actions_split_into_rows_of_five() {
        let actions: Vec<Action> = (0..7)
            .map(|i| Action::button(format!("b{}", i), "x", ButtonStyle::Secondary))
            .collect();
        let rows = encode_actions(&actions);
        assert_eq!(rows.as_array().unwrap().len(), 2);
        assert_eq!(rows[1]["components"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_encode_plain_text_message() {
        let body = encode_message(&MessagePayload::text("hello"));
        assert_eq!(body["content"], "hello");
        assert!(body.get("embeds").is_none());
        assert!(body.get("components").is_none());
    }

    #[test]
    fn test_encode_embed_message() {
        let payload = MessagePayload {
            title: Some("t".into()),
            color: Some(0xEA4335),
            fields: vec![Field {
                name: "n".into(),
                value: "v".into(),
                inline: false,
            }],
            footer: Some("f".into()),
            ..Default::default()
        };
        let body = encode_message(&payload);
        let embed = &body["embeds"][0];
        assert_eq!(embed["title"], "t");
        assert_eq!(embed["color"], 0xEA4335);
        assert_eq!(embed["fields"][0]["name"], "n");
        assert_eq!(embed["footer"]["text"], "f");
    }

    #[test]
    fn test_encode_modal() {
        let modal = crate::formatter::auth_code_modal();
        let body = encode_modal(&modal);
        assert_eq!(body["custom_id"], "auth_modal");
        assert_eq!(body["components"][0]["components"][0]["custom_id"], "auth_code_input");
        assert_eq!(body["components"][0]["components"][0]["type"], 4);
    }
}
