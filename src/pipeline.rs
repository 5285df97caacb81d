//! Delivery cycle: list unread mail, skip delivered ids, notify, remember
//!
//! A failed delivery gets exactly one delayed retry. Ids are recorded as
//! delivered only after the notification was accepted by the channel.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dedup::DedupStore;
use crate::error::{NotifierError, Result};
use crate::formatter;
use crate::mail::MailProvider;
use crate::notifier::{MessagePayload, Notifier};

/// Tunables of a delivery cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub max_results: u32,
    pub pacing_delay: Duration,
    pub retry_delay: Duration,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            pacing_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl From<&Config> for DeliveryOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_results: config.gmail.max_results,
            pacing_delay: config.pacing_delay(),
            retry_delay: config.retry_delay(),
        }
    }
}

/// Outcome of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Unread ids returned by the provider
    pub listed: usize,
    /// Ids neither delivered before nor waiting for a retry
    pub new: usize,
    pub delivered: usize,
    pub retries_scheduled: usize,
}

#[derive(Clone)]
pub struct DeliveryPipeline {
    mail: Arc<dyn MailProvider>,
    notifier: Arc<dyn Notifier>,
    dedup: DedupStore,
    recipient: String,
    options: DeliveryOptions,
    retrying: Arc<Mutex<HashSet<String>>>,
    retries: Arc<tokio::sync::Mutex<JoinSet<()>>>,
}

impl DeliveryPipeline {
    pub fn new(
        mail: Arc<dyn MailProvider>,
        notifier: Arc<dyn Notifier>,
        dedup: DedupStore,
        recipient: impl Into<String>,
        options: DeliveryOptions,
    ) -> Self {
        Self {
            mail,
            notifier,
            dedup,
            recipient: recipient.into(),
            options,
            retrying: Arc::new(Mutex::new(HashSet::new())),
            retries: Arc::new(tokio::sync::Mutex::new(JoinSet::new())),
        }
    }

    pub fn options(&self) -> DeliveryOptions {
        self.options
    }

    fn is_retrying(&self, id: &str) -> bool {
        self.retrying
            .lock()
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }

    /// Run one delivery cycle
    ///
    /// A provider failure aborts the cycle with `ProviderQuery`; ids delivered
    /// before the failure stay recorded. Delivery failures never abort it.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let ids = self
            .mail
            .list_unread(self.options.max_results)
            .await
            .map_err(provider_query)?;

        let mut report = CycleReport {
            listed: ids.len(),
            ..CycleReport::default()
        };

        let fresh: Vec<String> = ids
            .into_iter()
            .filter(|id| !self.dedup.has(id) && !self.is_retrying(id))
            .collect();
        report.new = fresh.len();

        if fresh.is_empty() {
            debug!("No new unread mail ({} listed)", report.listed);
            return Ok(report);
        }
        info!("Found {} new unread message(s)", fresh.len());

        for id in fresh {
            let item = self.mail.get_details(&id).await.map_err(provider_query)?;
            let payload = formatter::mail_notification(&item);

            match self
                .notifier
                .send_direct_message(&self.recipient, &payload)
                .await
            {
                Ok(_) => {
                    self.dedup.add(&id);
                    report.delivered += 1;
                    info!(id = %id, "Delivered notification for \"{}\"", item.subject);
                    tokio::time::sleep(self.options.pacing_delay).await;
                }
                Err(e) => {
                    warn!(
                        id = %id,
                        "Delivery failed, retrying in {}s: {}",
                        self.options.retry_delay.as_secs(),
                        e
                    );
                    self.schedule_retry(id, payload).await;
                    report.retries_scheduled += 1;
                }
            }
        }

        Ok(report)
    }

    async fn schedule_retry(&self, id: String, payload: MessagePayload) {
        if let Ok(mut set) = self.retrying.lock() {
            set.insert(id.clone());
        }

        let notifier = Arc::clone(&self.notifier);
        let dedup = self.dedup.clone();
        let recipient = self.recipient.clone();
        let retrying = Arc::clone(&self.retrying);
        let delay = self.options.retry_delay;

        let mut retries = self.retries.lock().await;
        while retries.try_join_next().is_some() {}
        retries.spawn(async move {
            tokio::time::sleep(delay).await;
            match notifier.send_direct_message(&recipient, &payload).await {
                Ok(_) => {
                    dedup.add(&id);
                    info!(id = %id, "Retry delivered notification");
                }
                Err(e) => {
                    error!(id = %id, "Retry failed, giving up until the next cycle: {}", e);
                }
            }
            if let Ok(mut set) = retrying.lock() {
                set.remove(&id);
            }
        });
    }

    /// Number of retries that have not finished yet
    pub async fn pending_retries(&self) -> usize {
        let mut retries = self.retries.lock().await;
        while retries.try_join_next().is_some() {}
        retries.len()
    }

    /// Wait for every scheduled retry to finish
    pub async fn wait_for_retries(&self) {
        let mut retries = self.retries.lock().await;
        while retries.join_next().await.is_some() {}
    }

    /// Drop every scheduled retry without sending it
    pub async fn abort_retries(&self) {
        let mut retries = self.retries.lock().await;
        retries.shutdown().await;
        if let Ok(mut set) = self.retrying.lock() {
            set.clear();
        }
    }
}

fn provider_query(e: NotifierError) -> NotifierError {
    match e {
        NotifierError::ProviderQuery(_) => e,
        other => NotifierError::ProviderQuery(other.to_string()),
    }
}
