//! [`DiscordNotifier`]: `Notifier` implementation for Discord
//!
//! Outbound calls go through the REST client. Inbound events come from a
//! Gateway WebSocket session run by [`DiscordNotifier::run_gateway`] and are
//! fanned out to every subscriber.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::api::{oversized, DiscordApiClient};
use super::events::{
    encode_actions, encode_message, encode_modal, GatewayPayload, HelloData, InteractionCreate,
    MessageCreate, ReadyEvent, CALLBACK_CHANNEL_MESSAGE, CALLBACK_DEFERRED_CHANNEL_MESSAGE,
    CALLBACK_MODAL, FLAG_EPHEMERAL, INTENT_DIRECT_MESSAGES, INTENT_GUILDS, OP_DISPATCH,
    OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO, OP_INVALID_SESSION, OP_RECONNECT,
};
use crate::config::DiscordConfig;
use crate::error::{NotifierError, Result};
use crate::notifier::{
    Action, Attachment, ChannelEvent, Interaction, MessagePayload, ModalForm, Notifier,
    SentMessage, SourceMessage,
};

/// Delay before reconnecting after a connection failure
const RECONNECT_DELAY_SECS: u64 = 5;

/// Heartbeat interval assumed when Hello never arrives
const FALLBACK_HEARTBEAT_MS: u64 = 41250;

const EVENT_BUFFER: usize = 64;

/// Credential uploads are small JSON documents
pub const MAX_ATTACHMENT_BYTES: u64 = 64 * 1024;

pub struct DiscordNotifier {
    api: DiscordApiClient,
    token: String,
    gateway_url: String,
    events: broadcast::Sender<ChannelEvent>,
    /// Recipient user id -> DM channel id
    dm_channels: RwLock<HashMap<String, String>>,
    sequence: AtomicU64,
    session_id: RwLock<Option<String>>,
    resume_url: RwLock<Option<String>>,
}

impl DiscordNotifier {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            api: DiscordApiClient::new(config.token.clone(), config.api_base.clone())?,
            token: config.token.clone(),
            gateway_url: config.gateway_url.clone(),
            events,
            dm_channels: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            session_id: RwLock::new(None),
            resume_url: RwLock::new(None),
        })
    }

    async fn dm_channel(&self, recipient: &str) -> Result<String> {
        if let Some(id) = self.dm_channels.read().await.get(recipient) {
            return Ok(id.clone());
        }
        let id = self.api.create_dm_channel(recipient).await?;
        self.dm_channels
            .write()
            .await
            .insert(recipient.to_string(), id.clone());
        Ok(id)
    }

    fn publish(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            debug!("No subscribers for channel event");
        }
    }

    /// Decode a dispatch event and publish it to subscribers
    pub(crate) async fn handle_dispatch(&self, event_name: &str, data: Value) {
        match event_name {
            "READY" => match serde_json::from_value::<ReadyEvent>(data) {
                Ok(ready) => {
                    info!(
                        bot_id = %ready.user.id,
                        bot_name = %ready.user.username,
                        "Discord bot authenticated"
                    );
                    *self.session_id.write().await = Some(ready.session_id);
                    *self.resume_url.write().await = ready.resume_gateway_url;
                }
                Err(e) => warn!(error = %e, "failed to parse READY"),
            },
            "RESUMED" => info!("Gateway session resumed"),
            "INTERACTION_CREATE" => match serde_json::from_value::<InteractionCreate>(data) {
                Ok(raw) => {
                    if let Some(interaction) = raw.into_interaction() {
                        debug!(user_id = %interaction.user_id, kind = ?interaction.kind, "interaction received");
                        self.publish(ChannelEvent::InteractionSubmitted(interaction));
                    }
                }
                Err(e) => warn!(error = %e, "failed to parse INTERACTION_CREATE"),
            },
            "MESSAGE_CREATE" => match serde_json::from_value::<MessageCreate>(data) {
                Ok(raw) => {
                    if let Some(message) = raw.into_incoming() {
                        self.publish(ChannelEvent::MessageReceived(message));
                    }
                }
                Err(e) => warn!(error = %e, "failed to parse MESSAGE_CREATE"),
            },
            other => debug!(event = %other, "unhandled dispatch event"),
        }
    }

    /// Keep a Gateway session alive until cancelled, reconnecting on failure
    pub async fn run_gateway(&self, cancel: CancellationToken) -> Result<()> {
        info!("Discord Gateway starting");

        loop {
            let gateway_url = match self.resume_url.read().await.as_deref() {
                Some(resume) => versioned_gateway_url(resume),
                None => self.gateway_url.clone(),
            };

            let ws_stream = match tokio_tungstenite::connect_async(gateway_url.as_str()).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!(error = %e, "failed to connect Discord Gateway");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => continue,
                    }
                }
            };

            info!("Discord Gateway connected");
            let (mut ws_write, mut ws_read) = ws_stream.split();

            // Hello (op 10) carries the heartbeat interval
            let heartbeat_interval = loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = ws_write.close().await;
                        return Ok(());
                    }
                    msg = ws_read.next() => match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(interval) = parse_hello(&text) {
                                break interval;
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error waiting for Hello");
                            break FALLBACK_HEARTBEAT_MS;
                        }
                        None => break FALLBACK_HEARTBEAT_MS,
                        _ => {}
                    }
                }
            };
            debug!(interval_ms = heartbeat_interval, "received Hello");

            let auth_payload = match self.session_id.read().await.as_deref() {
                Some(session_id) => {
                    let seq = self.sequence.load(Ordering::SeqCst);
                    info!(session_id = %session_id, seq = seq, "resuming Gateway session");
                    GatewayPayload::resume(&self.token, session_id, seq)
                }
                None => GatewayPayload::identify(&self.token, INTENT_GUILDS | INTENT_DIRECT_MESSAGES),
            };

            if let Err(e) = send_payload(&mut ws_write, &auth_payload).await {
                error!(error = %e, "failed to send Identify/Resume");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => continue,
                }
            }

            let mut heartbeat_timer = tokio::time::interval(Duration::from_millis(heartbeat_interval));
            // First tick is immediate
            heartbeat_timer.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Discord Gateway received cancellation");
                        let _ = ws_write.close().await;
                        return Ok(());
                    }
                    _ = heartbeat_timer.tick() => {
                        let seq = self.sequence.load(Ordering::SeqCst);
                        if let Err(e) = send_payload(&mut ws_write, &GatewayPayload::heartbeat(seq)).await {
                            warn!(error = %e, "failed to send heartbeat");
                            break;
                        }
                        debug!(seq = seq, "sent heartbeat");
                    }
                    msg = ws_read.next() => match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            let payload = match serde_json::from_str::<GatewayPayload>(&text) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!(error = %e, "failed to parse gateway payload");
                                    continue;
                                }
                            };
                            if let Some(s) = payload.s {
                                self.sequence.store(s, Ordering::SeqCst);
                            }
                            match payload.op {
                                OP_DISPATCH => {
                                    if let (Some(name), Some(data)) = (payload.t, payload.d) {
                                        self.handle_dispatch(&name, data).await;
                                    }
                                }
                                OP_HEARTBEAT_ACK => debug!("heartbeat acknowledged"),
                                OP_HEARTBEAT => {
                                    let seq = self.sequence.load(Ordering::SeqCst);
                                    let _ = send_payload(&mut ws_write, &GatewayPayload::heartbeat(seq)).await;
                                }
                                OP_RECONNECT => {
                                    info!("server requested reconnect");
                                    break;
                                }
                                OP_INVALID_SESSION => {
                                    let resumable = payload.d.as_ref().and_then(|v| v.as_bool()).unwrap_or(false);
                                    if !resumable {
                                        warn!("invalid session, clearing state for fresh Identify");
                                        *self.session_id.write().await = None;
                                        *self.resume_url.write().await = None;
                                        self.sequence.store(0, Ordering::SeqCst);
                                    } else {
                                        warn!("invalid session (resumable), retrying");
                                    }
                                    break;
                                }
                                op => debug!(op = op, "unhandled opcode"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            info!("Discord Gateway closed by server");
                            break;
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = ws_write.send(WsMessage::Pong(data)).await;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Discord Gateway WebSocket error");
                            break;
                        }
                        None => {
                            info!("Discord Gateway stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => {
                    info!("reconnecting Discord Gateway...");
                }
            }
        }

        info!("Discord Gateway stopped");
        Ok(())
    }
}

/// READY's `resume_gateway_url` comes without the version query
fn versioned_gateway_url(base: &str) -> String {
    if base.contains('?') {
        base.to_string()
    } else {
        format!("{}/?v=10&encoding=json", base.trim_end_matches('/'))
    }
}

fn parse_hello(text: &str) -> Option<u64> {
    let payload = serde_json::from_str::<GatewayPayload>(text).ok()?;
    if payload.op != OP_HELLO {
        return None;
    }
    serde_json::from_value::<HelloData>(payload.d?)
        .ok()
        .map(|hello| hello.heartbeat_interval)
}

async fn send_payload<S>(sink: &mut S, payload: &GatewayPayload) -> Result<()>
where
    S: futures::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(payload)?;
    sink.send(WsMessage::Text(json))
        .await
        .map_err(|e| NotifierError::ChannelError(e.to_string()))
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send_direct_message(
        &self,
        recipient: &str,
        payload: &MessagePayload,
    ) -> Result<SentMessage> {
        let deliver = async {
            let channel_id = self.dm_channel(recipient).await?;
            self.api
                .create_message(&channel_id, &encode_message(payload))
                .await
        };

        let message = deliver
            .await
            .map_err(|e| NotifierError::DeliveryFailed(e.to_string()))?;

        Ok(SentMessage {
            channel_id: message.channel_id,
            message_id: message.id,
        })
    }

    async fn reply(&self, interaction: &Interaction, text: &str) -> Result<()> {
        let body = json!({
            "type": CALLBACK_CHANNEL_MESSAGE,
            "data": { "content": text, "flags": FLAG_EPHEMERAL },
        });
        self.api
            .interaction_callback(&interaction.id, &interaction.token, &body)
            .await
    }

    async fn defer_reply(&self, interaction: &Interaction) -> Result<()> {
        let body = json!({
            "type": CALLBACK_DEFERRED_CHANNEL_MESSAGE,
            "data": { "flags": FLAG_EPHEMERAL },
        });
        self.api
            .interaction_callback(&interaction.id, &interaction.token, &body)
            .await
    }

    async fn edit_reply(&self, interaction: &Interaction, text: &str) -> Result<()> {
        self.api
            .edit_original_response(
                &interaction.application_id,
                &interaction.token,
                &json!({ "content": text }),
            )
            .await
    }

    async fn show_modal(&self, interaction: &Interaction, modal: &ModalForm) -> Result<()> {
        let body = json!({
            "type": CALLBACK_MODAL,
            "data": encode_modal(modal),
        });
        self.api
            .interaction_callback(&interaction.id, &interaction.token, &body)
            .await
    }

    async fn update_actions(&self, source: &SourceMessage, actions: &[Action]) -> Result<()> {
        let body = json!({ "components": encode_actions(actions) });
        self.api
            .edit_message(&source.channel_id, &source.message_id, &body)
            .await
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        if attachment.size > MAX_ATTACHMENT_BYTES {
            return Err(oversized(attachment.size, MAX_ATTACHMENT_BYTES));
        }
        debug!(filename = %attachment.filename, size = attachment.size, "downloading attachment");
        self.api.download(&attachment.url, MAX_ATTACHMENT_BYTES).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}
