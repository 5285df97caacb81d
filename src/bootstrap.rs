//! Credential bootstrap: client credentials, then a user token, then a session
//!
//! Each credential is resolved from the settings store, then from its legacy
//! file, and only then requested interactively from the recipient over the
//! chat channel. At most one interactive request is outstanding at a time.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{extract_auth_code, OAuthProvider};
use crate::credentials::CredentialStore;
use crate::error::{NotifierError, Result};
use crate::formatter::{self, AUTH_CODE_INPUT_ID, AUTH_MANUAL_INPUT_ID, AUTH_MODAL_ID};
use crate::mail::MailProvider;
use crate::models::{ClientCredentials, UserToken, CLIENT_CREDENTIALS_KEY, USER_TOKENS_KEY};
use crate::notifier::{
    ChannelEvent, IncomingMessage, Interaction, InteractionKind, MessagePayload, Notifier,
    SourceMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    NeedClientCredentials,
    NeedUserToken,
    Authenticated,
}

/// The single outstanding interactive request, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAuth {
    Idle,
    AwaitingUpload,
    AwaitingCode { transaction_id: Uuid },
}

/// Authenticated handle produced once by the bootstrap
#[derive(Clone)]
pub struct Session {
    pub mail: Arc<dyn MailProvider>,
    pub credentials: ClientCredentials,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.credentials.client_id)
            .finish_non_exhaustive()
    }
}

/// Resets the pending slot to `Idle` when the request ends, however it ends
struct PendingGuard<'a> {
    slot: &'a Mutex<PendingAuth>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.slot.lock() {
            *pending = PendingAuth::Idle;
        }
    }
}

pub struct Bootstrapper {
    store: CredentialStore,
    notifier: Arc<dyn Notifier>,
    oauth: Arc<dyn OAuthProvider>,
    recipient: String,
    legacy_credentials_path: PathBuf,
    legacy_token_path: PathBuf,
    prompt_timeout: Option<Duration>,
    pending: Mutex<PendingAuth>,
    phase: Mutex<AuthPhase>,
    session: OnceCell<Session>,
}

impl Bootstrapper {
    pub fn new(
        store: CredentialStore,
        notifier: Arc<dyn Notifier>,
        oauth: Arc<dyn OAuthProvider>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            oauth,
            recipient: recipient.into(),
            legacy_credentials_path: PathBuf::from("credentials.json"),
            legacy_token_path: PathBuf::from("token.json"),
            prompt_timeout: Some(Duration::from_secs(30 * 60)),
            pending: Mutex::new(PendingAuth::Idle),
            phase: Mutex::new(AuthPhase::NeedClientCredentials),
            session: OnceCell::new(),
        }
    }

    pub fn with_legacy_paths(mut self, credentials: PathBuf, token: PathBuf) -> Self {
        self.legacy_credentials_path = credentials;
        self.legacy_token_path = token;
        self
    }

    /// `None` waits for the recipient indefinitely
    pub fn with_prompt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase
            .lock()
            .map(|p| *p)
            .unwrap_or(AuthPhase::NeedClientCredentials)
    }

    pub fn pending(&self) -> PendingAuth {
        self.pending
            .lock()
            .map(|p| p.clone())
            .unwrap_or(PendingAuth::Idle)
    }

    fn set_phase(&self, phase: AuthPhase) {
        if let Ok(mut current) = self.phase.lock() {
            debug!(from = ?*current, to = ?phase, "auth phase transition");
            *current = phase;
        }
    }

    /// Authenticated session, running the bootstrap on first use only
    pub async fn get_client(&self) -> Result<Session> {
        self.session
            .get_or_try_init(|| self.authenticate())
            .await
            .cloned()
    }

    async fn authenticate(&self) -> Result<Session> {
        self.set_phase(AuthPhase::NeedClientCredentials);
        let credentials = self.acquire_client_credentials().await?;

        self.set_phase(AuthPhase::NeedUserToken);
        let token = self.acquire_user_token(&credentials).await?;

        let mail = match self.oauth.connect(&token).await {
            Ok(mail) => mail,
            Err(NotifierError::TokenRejected(reason)) => {
                // The stored token stays until a replacement is saved
                warn!("Stored user token was rejected ({}), requesting a new authorization", reason);
                let token = self.request_user_token(&credentials).await?;
                self.oauth.connect(&token).await.map_err(|e| {
                    NotifierError::CredentialAcquisition(format!(
                        "freshly authorized token was rejected: {}",
                        e
                    ))
                })?
            }
            Err(e) => {
                return Err(NotifierError::CredentialAcquisition(format!(
                    "could not connect to Gmail with the stored token: {}",
                    e
                )))
            }
        };

        self.set_phase(AuthPhase::Authenticated);
        info!("Gmail authorization complete");
        Ok(Session { mail, credentials })
    }

    /// Store, then legacy `credentials.json`, then an upload from the recipient
    pub async fn acquire_client_credentials(&self) -> Result<ClientCredentials> {
        if let Some(raw) = self
            .store
            .resolve(CLIENT_CREDENTIALS_KEY, &self.legacy_credentials_path)
            .await
        {
            match ClientCredentials::from_json(&raw) {
                Ok(credentials) => {
                    debug!(client_id = %credentials.client_id, "Using stored client credentials");
                    return Ok(credentials);
                }
                Err(e) => warn!("Stored client credentials are unusable: {}", e),
            }
        }

        info!("No client credentials found, asking the recipient to upload them");
        self.request_client_credentials().await
    }

    /// Store, then legacy `token.json`, then the interactive code flow
    pub async fn acquire_user_token(&self, credentials: &ClientCredentials) -> Result<UserToken> {
        if let Some(raw) = self
            .store
            .resolve(USER_TOKENS_KEY, &self.legacy_token_path)
            .await
        {
            match UserToken::from_json(&raw) {
                Ok(token) if token.client_id == credentials.client_id => return Ok(token),
                Ok(token) => {
                    info!("Rebinding stored user token to the current client credentials");
                    let token = token.bound_to(credentials);
                    self.store.set_setting(USER_TOKENS_KEY, &token.to_json()?);
                    return Ok(token);
                }
                Err(e) => warn!("Stored user token is unusable: {}", e),
            }
        }

        info!("No user token found, starting the authorization flow");
        self.request_user_token(credentials).await
    }

    fn begin(&self, request: PendingAuth) -> Result<PendingGuard<'_>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| NotifierError::StateError("pending auth mutex poisoned".to_string()))?;
        if *pending != PendingAuth::Idle {
            return Err(NotifierError::AuthError(
                "authorization already in progress".to_string(),
            ));
        }
        *pending = request;
        Ok(PendingGuard {
            slot: &self.pending,
        })
    }

    async fn with_prompt_timeout_applied<T>(
        &self,
        what: &str,
        wait: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.prompt_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                warn!("Gave up waiting for {} after {:?}", what, limit);
                NotifierError::CredentialAcquisition(format!(
                    "timed out after {:?} waiting for {}",
                    limit, what
                ))
            })?,
            None => wait.await,
        }
    }

    async fn send_prompt(&self, payload: &MessagePayload) -> Result<crate::notifier::SentMessage> {
        self.notifier
            .send_direct_message(&self.recipient, payload)
            .await
            .map_err(|e| {
                NotifierError::CredentialAcquisition(format!("could not reach the recipient: {}", e))
            })
    }

    /// Best-effort plain DM; failures are only logged
    async fn tell(&self, text: &str) {
        if let Err(e) = self
            .notifier
            .send_direct_message(&self.recipient, &MessagePayload::text(text))
            .await
        {
            warn!("Failed to message the recipient: {}", e);
        }
    }

    async fn request_client_credentials(&self) -> Result<ClientCredentials> {
        let _guard = self.begin(PendingAuth::AwaitingUpload)?;

        // Subscribe before prompting so a fast reply is not missed
        let mut events = self.notifier.subscribe();
        self.send_prompt(&formatter::upload_prompt()).await?;

        self.with_prompt_timeout_applied("a credentials upload", self.await_upload(&mut events))
            .await
    }

    async fn await_upload(
        &self,
        events: &mut broadcast::Receiver<ChannelEvent>,
    ) -> Result<ClientCredentials> {
        loop {
            let message = match next_event(events).await? {
                ChannelEvent::MessageReceived(message) if self.is_upload(&message) => message,
                _ => continue,
            };

            for attachment in &message.attachments {
                let content = match self.notifier.fetch_attachment(attachment).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        warn!(filename = %attachment.filename, "Failed to download attachment: {}", e);
                        self.tell("❌ Could not download that file, please try again.")
                            .await;
                        continue;
                    }
                };

                match ClientCredentials::from_json(&content) {
                    Ok(credentials) => {
                        self.store.set_setting(CLIENT_CREDENTIALS_KEY, &content);
                        info!(client_id = %credentials.client_id, "Client credentials received");
                        self.tell("✅ Credentials saved. Next, authorize Gmail access.")
                            .await;
                        return Ok(credentials);
                    }
                    Err(e) => {
                        warn!(filename = %attachment.filename, "Rejected credentials upload: {}", e);
                        self.tell(&format!(
                            "❌ `{}` is not a valid Google OAuth client file ({}). \
                             Upload the JSON downloaded from the Cloud console.",
                            attachment.filename, e
                        ))
                        .await;
                    }
                }
            }
        }
    }

    fn is_upload(&self, message: &IncomingMessage) -> bool {
        message.user_id == self.recipient && message.is_direct && !message.attachments.is_empty()
    }

    async fn request_user_token(&self, credentials: &ClientCredentials) -> Result<UserToken> {
        let transaction_id = Uuid::new_v4();
        let _guard = self.begin(PendingAuth::AwaitingCode { transaction_id })?;

        let auth_url = self.oauth.authorization_url(credentials)?;
        let prompt = formatter::auth_prompt(&auth_url);

        let mut events = self.notifier.subscribe();
        let sent = self.send_prompt(&prompt).await?;
        info!(transaction_id = %transaction_id, "Authorization link sent, waiting for a code");

        let prompt_message = SourceMessage {
            channel_id: sent.channel_id,
            message_id: sent.message_id,
            actions: prompt.actions,
        };

        self.with_prompt_timeout_applied(
            "an authorization code",
            self.await_code(credentials, &prompt_message, &mut events),
        )
        .await
    }

    async fn await_code(
        &self,
        credentials: &ClientCredentials,
        prompt: &SourceMessage,
        events: &mut broadcast::Receiver<ChannelEvent>,
    ) -> Result<UserToken> {
        loop {
            let interaction = match next_event(events).await? {
                ChannelEvent::InteractionSubmitted(interaction) => interaction,
                ChannelEvent::MessageReceived(_) => continue,
            };

            if interaction.user_id != self.recipient {
                debug!(user_id = %interaction.user_id, "Ignoring interaction from another user");
                continue;
            }

            match &interaction.kind {
                InteractionKind::Button { action_id } if action_id == AUTH_MANUAL_INPUT_ID => {
                    if let Err(e) = self
                        .notifier
                        .show_modal(&interaction, &formatter::auth_code_modal())
                        .await
                    {
                        warn!("Failed to open the code entry form: {}", e);
                    }
                }
                InteractionKind::ModalSubmit { form_id, fields } if form_id == AUTH_MODAL_ID => {
                    let input = fields
                        .get(AUTH_CODE_INPUT_ID)
                        .map(String::as_str)
                        .unwrap_or_default();
                    if let Some(token) = self
                        .submit_code(credentials, prompt, &interaction, input)
                        .await?
                    {
                        return Ok(token);
                    }
                }
                _ => {}
            }
        }
    }

    /// Handle one submitted form; `None` keeps the flow waiting
    async fn submit_code(
        &self,
        credentials: &ClientCredentials,
        prompt: &SourceMessage,
        interaction: &Interaction,
        input: &str,
    ) -> Result<Option<UserToken>> {
        let Some(code) = extract_auth_code(input) else {
            if let Err(e) = self
                .notifier
                .reply(
                    interaction,
                    "❌ Could not parse a code. Paste the code Google showed you, or the full URL.",
                )
                .await
            {
                warn!("Failed to reply to code submission: {}", e);
            }
            return Ok(None);
        };

        if let Err(e) = self.notifier.defer_reply(interaction).await {
            warn!("Failed to acknowledge code submission: {}", e);
        }

        let exchanged = self
            .oauth
            .exchange_code(credentials, &code)
            .await
            .and_then(|tokens| {
                tokens
                    .refresh_token
                    .filter(|refresh| !refresh.is_empty())
                    .ok_or_else(|| {
                        NotifierError::AuthExchange("no refresh token was issued".to_string())
                    })
            });

        let refresh_token = match exchanged {
            Ok(refresh_token) => refresh_token,
            Err(e) => {
                warn!("Authorization code exchange failed: {}", e);
                self.edit_reply(
                    interaction,
                    &format!("❌ Authorization failed: {}. Press **Enter code** to try again.", e),
                )
                .await;
                return Ok(None);
            }
        };

        let token = UserToken::new(credentials, refresh_token);

        if let Err(e) = self
            .notifier
            .update_actions(prompt, &formatter::disable_all(&prompt.actions))
            .await
        {
            warn!("Failed to disable the authorization buttons: {}", e);
        }

        self.store.set_setting(USER_TOKENS_KEY, &token.to_json()?);
        self.edit_reply(interaction, "✅ Authorization successful, Gmail monitoring is starting.")
            .await;
        info!("User token stored");
        Ok(Some(token))
    }

    async fn edit_reply(&self, interaction: &Interaction, text: &str) {
        if let Err(e) = self.notifier.edit_reply(interaction, text).await {
            warn!("Failed to update the interaction reply: {}", e);
        }
    }
}

/// Next channel event, skipping over lag; a closed channel ends the wait
async fn next_event(events: &mut broadcast::Receiver<ChannelEvent>) -> Result<ChannelEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Missed {} channel events while waiting", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(NotifierError::CredentialAcquisition(
                    "chat channel closed while waiting for the recipient".to_string(),
                ))
            }
        }
    }
}
