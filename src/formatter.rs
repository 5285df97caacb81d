//! Message layouts sent to the recipient

use crate::models::MailItem;
use crate::notifier::{Action, ButtonStyle, Field, MessagePayload, ModalForm, TextInput};

/// Button id prefix of the per-mail "mark as read" action
pub const MARK_READ_PREFIX: &str = "mark_read_";
pub const AUTH_MANUAL_INPUT_ID: &str = "auth_manual_input";
pub const AUTH_MODAL_ID: &str = "auth_modal";
pub const AUTH_CODE_INPUT_ID: &str = "auth_code_input";

pub const MARKED_READ_LABEL: &str = "Marked as read";

const GMAIL_RED: u32 = 0xEA4335;
const GOOGLE_BLUE: u32 = 0x4285F4;
const FOOTER: &str = "Gmail Notifier";

/// Discord rejects embed field values longer than this
const MAX_FIELD_LEN: usize = 1024;

pub fn mark_read_action_id(mail_id: &str) -> String {
    format!("{}{}", MARK_READ_PREFIX, mail_id)
}

/// Mail id carried by a "mark as read" button id
pub fn parse_mark_read_id(action_id: &str) -> Option<&str> {
    action_id
        .strip_prefix(MARK_READ_PREFIX)
        .filter(|id| !id.is_empty())
}

pub fn mail_notification(item: &MailItem) -> MessagePayload {
    let snippet = if item.snippet.trim().is_empty() {
        "(no preview)".to_string()
    } else {
        truncate(&item.snippet, MAX_FIELD_LEN)
    };

    MessagePayload {
        title: Some(truncate(&format!("📧 {}", item.subject), 256)),
        url: Some(item.link.clone()),
        description: Some("You have a new unread email.".to_string()),
        color: Some(GMAIL_RED),
        fields: vec![
            field("👤 From", &truncate(&item.sender, MAX_FIELD_LEN)),
            field("📑 Subject", &truncate(&item.subject, MAX_FIELD_LEN)),
            field("📝 Preview", &snippet),
        ],
        footer: Some(FOOTER.to_string()),
        actions: vec![
            Action::link("Reply on the web", &item.link),
            Action::button(
                mark_read_action_id(&item.id),
                "Mark as read",
                ButtonStyle::Primary,
            ),
        ],
        ..Default::default()
    }
}

pub fn upload_prompt() -> MessagePayload {
    MessagePayload {
        title: Some("📁 Google client credentials needed".to_string()),
        description: Some(
            "No OAuth client credentials are configured. Reply to this message with the \
             `credentials.json` file downloaded from the Google Cloud console."
                .to_string(),
        ),
        color: Some(GOOGLE_BLUE),
        footer: Some(FOOTER.to_string()),
        ..Default::default()
    }
}

pub fn auth_prompt(auth_url: &str) -> MessagePayload {
    MessagePayload {
        title: Some("🔐 Google authorization required".to_string()),
        description: Some(
            "Open the authorization page, grant access and copy the code Google shows you."
                .to_string(),
        ),
        color: Some(GOOGLE_BLUE),
        fields: vec![field(
            "Then",
            "Press **Enter code** and paste the code, or the full URL of the page you landed on.",
        )],
        footer: Some(FOOTER.to_string()),
        actions: vec![
            Action::link("Open authorization page", auth_url),
            Action::button(AUTH_MANUAL_INPUT_ID, "Enter code", ButtonStyle::Primary),
        ],
        ..Default::default()
    }
}

pub fn auth_code_modal() -> ModalForm {
    ModalForm {
        id: AUTH_MODAL_ID.to_string(),
        title: "Google authorization".to_string(),
        inputs: vec![TextInput {
            id: AUTH_CODE_INPUT_ID.to_string(),
            label: "Authorization code or URL".to_string(),
            placeholder: Some("4/0A... or http://localhost/?code=...".to_string()),
            required: true,
        }],
    }
}

/// Same actions with every button disabled
pub fn disable_all(actions: &[Action]) -> Vec<Action> {
    actions
        .iter()
        .cloned()
        .map(|action| match action {
            Action::Button {
                id, label, style, ..
            } => Action::Button {
                id,
                label,
                style,
                disabled: true,
            },
            link => link,
        })
        .collect()
}

/// Disable and relabel the button with `action_id`, leaving the rest as is
pub fn mark_acknowledged(actions: &[Action], action_id: &str) -> Vec<Action> {
    actions
        .iter()
        .cloned()
        .map(|action| match action {
            Action::Button { id, style, .. } if id == action_id => Action::Button {
                id,
                label: MARKED_READ_LABEL.to_string(),
                style,
                disabled: true,
            },
            other => other,
        })
        .collect()
}

fn field(name: &str, value: &str) -> Field {
    Field {
        name: name.to_string(),
        value: value.to_string(),
        inline: false,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> MailItem {
        MailItem {
            id: "18c2f".to_string(),
            subject: "Invoice".to_string(),
            sender: "billing@example.com".to_string(),
            snippet: "Your invoice is ready".to_string(),
            link: MailItem::web_link("18c2f"),
        }
    }

    #[test]
    fn test_mail_notification_layout() {
        let payload = mail_notification(&item());

        assert_eq!(payload.title.as_deref(), Some("📧 Invoice"));
        assert_eq!(payload.url.as_deref(), Some(item().link.as_str()));
        assert_eq!(payload.fields.len(), 3);
        assert_eq!(payload.fields[0].value, "billing@example.com");
        assert_eq!(payload.actions.len(), 2);
        assert_eq!(payload.actions[1].id(), Some("mark_read_18c2f"));
    }

    #[test]
    fn test_empty_snippet_placeholder() {
        let mut mail = item();
        mail.snippet = String::new();
        let payload = mail_notification(&mail);
        assert_eq!(payload.fields[2].value, "(no preview)");
    }

    #[test]
    fn test_long_snippet_is_truncated() {
        let mut mail = item();
        mail.snippet = "x".repeat(5000);
        let payload = mail_notification(&mail);
        assert_eq!(payload.fields[2].value.chars().count(), MAX_FIELD_LEN);
        assert!(payload.fields[2].value.ends_with('…'));
    }

    #[test]
    fn test_parse_mark_read_id() {
        assert_eq!(parse_mark_read_id("mark_read_abc"), Some("abc"));
        assert_eq!(parse_mark_read_id("mark_read_"), None);
        assert_eq!(parse_mark_read_id("auth_manual_input"), None);
    }

    #[test]
    fn test_auth_prompt_actions() {
        let payload = auth_prompt("https://accounts.google.com/o/oauth2/auth?x=1");
        assert!(matches!(&payload.actions[0], Action::Link { url, .. } if url.contains("x=1")));
        assert_eq!(payload.actions[1].id(), Some(AUTH_MANUAL_INPUT_ID));
    }

    #[test]
    fn test_disable_all_keeps_links() {
        let disabled = disable_all(&auth_prompt("https://example.com").actions);
        assert!(matches!(disabled[0], Action::Link { .. }));
        assert!(matches!(disabled[1], Action::Button { disabled: true, .. }));
    }

    #[test]
    fn test_mark_acknowledged_only_touches_target() {
        let mut actions = mail_notification(&item()).actions;
        actions.push(Action::button("other", "Other", ButtonStyle::Secondary));

        let updated = mark_acknowledged(&actions, "mark_read_18c2f");
        assert_eq!(
            updated[1],
            Action::Button {
                id: "mark_read_18c2f".to_string(),
                label: "Marked as read".to_string(),
                style: ButtonStyle::Primary,
                disabled: true,
            }
        );
        assert_eq!(updated[2], actions[2]);
    }
}
