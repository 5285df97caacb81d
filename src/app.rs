//! Process wiring for the `run`, `status` and `reset-auth` commands

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acknowledge::{mark_read_callback, AcknowledgeHandler};
use crate::auth::GoogleOAuthProvider;
use crate::bootstrap::Bootstrapper;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::database::Database;
use crate::dedup::DedupStore;
use crate::discord::DiscordNotifier;
use crate::error::Result;
use crate::models::{CLIENT_CREDENTIALS_KEY, USER_TOKENS_KEY};
use crate::notifier::Notifier;
use crate::pipeline::{DeliveryOptions, DeliveryPipeline};
use crate::scheduler::PollingScheduler;

/// Snapshot of the persisted state, for `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub database_path: PathBuf,
    pub processed_ids: usize,
    pub has_client_credentials: bool,
    pub has_user_token: bool,
    /// Legacy files still waiting to be migrated
    pub legacy_files: Vec<PathBuf>,
}

pub fn open_database(config: &Config) -> Result<Arc<Database>> {
    let path = config.storage.database_path();
    debug!("Opening database at {:?}", path);
    Ok(Arc::new(Database::open(path)?))
}

pub fn status(config: &Config) -> Result<StatusReport> {
    let db = open_database(config)?;
    let dedup = DedupStore::new(Arc::clone(&db));
    let store = CredentialStore::new(db);

    let legacy_files = [
        config.storage.legacy_processed_ids_path(),
        config.storage.legacy_credentials_path(),
        config.storage.legacy_token_path(),
    ]
    .into_iter()
    .filter(|path| path.exists())
    .collect();

    Ok(StatusReport {
        database_path: config.storage.database_path(),
        processed_ids: dedup.count(),
        has_client_credentials: store.get_setting(CLIENT_CREDENTIALS_KEY).is_some(),
        has_user_token: store.get_setting(USER_TOKENS_KEY).is_some(),
        legacy_files,
    })
}

/// Forget the stored user token, and the client credentials with `all`
///
/// Returns the keys that were actually removed. The next `run` asks the
/// recipient again for whatever is missing.
pub fn reset_auth(config: &Config, all: bool) -> Result<Vec<&'static str>> {
    let store = CredentialStore::new(open_database(config)?);

    let mut keys = vec![USER_TOKENS_KEY];
    if all {
        keys.push(CLIENT_CREDENTIALS_KEY);
    }

    Ok(keys
        .into_iter()
        .filter(|key| store.delete_setting(key))
        .collect())
}

/// Run the notifier until `cancel` fires
///
/// Startup order: stores and migrations, the chat channel, the credential
/// bootstrap, then the acknowledgement handler and the polling loop.
pub async fn run(config: Config, cancel: CancellationToken) -> Result<()> {
    let db = open_database(&config)?;
    let dedup = DedupStore::new(Arc::clone(&db));
    dedup
        .init(&config.storage.legacy_processed_ids_path())
        .await?;
    let store = CredentialStore::new(db);

    let discord = Arc::new(DiscordNotifier::new(&config.discord)?);
    let gateway = {
        let discord = Arc::clone(&discord);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = discord.run_gateway(cancel).await {
                error!("Discord Gateway stopped: {}", e);
            }
        })
    };
    let notifier: Arc<dyn Notifier> = discord;
    let recipient = config.discord.recipient_id.clone();

    let bootstrapper = Bootstrapper::new(
        store,
        Arc::clone(&notifier),
        Arc::new(GoogleOAuthProvider::new()?),
        recipient.clone(),
    )
    .with_legacy_paths(
        config.storage.legacy_credentials_path(),
        config.storage.legacy_token_path(),
    )
    .with_prompt_timeout(config.auth.prompt_timeout());

    let session = tokio::select! {
        _ = cancel.cancelled() => {
            info!("Shutdown requested during authentication");
            let _ = gateway.await;
            return Ok(());
        }
        session = bootstrapper.get_client() => session?,
    };
    info!("Gmail session ready for client {}", session.credentials.client_id);

    let acknowledger = AcknowledgeHandler::new(
        Arc::clone(&notifier),
        recipient.clone(),
        mark_read_callback(Arc::clone(&session.mail)),
    );
    let acknowledge_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { acknowledger.run(cancel).await })
    };

    let pipeline = DeliveryPipeline::new(
        Arc::clone(&session.mail),
        notifier,
        dedup,
        recipient,
        DeliveryOptions::from(&config),
    );
    let scheduler = PollingScheduler::new(config.polling_interval());
    info!(
        "Polling Gmail every {} minute(s)",
        config.gmail.polling_interval_minutes
    );

    {
        let pipeline = pipeline.clone();
        scheduler
            .run(
                move || {
                    let pipeline = pipeline.clone();
                    async move {
                        match pipeline.run_cycle().await {
                            Ok(report) if report.new > 0 => info!(
                                delivered = report.delivered,
                                retries = report.retries_scheduled,
                                "Polling cycle finished"
                            ),
                            Ok(_) => debug!("Polling cycle finished, nothing new"),
                            Err(e) => error!("Polling cycle failed: {}", e),
                        }
                    }
                },
                cancel.clone(),
            )
            .await;
    }

    let pending = pipeline.pending_retries().await;
    if pending > 0 {
        warn!("Dropping {} pending delivery retries on shutdown", pending);
    }
    pipeline.abort_retries().await;

    let _ = acknowledge_task.await;
    let _ = gateway.await;
    info!("Shutdown complete");
    Ok(())
}
