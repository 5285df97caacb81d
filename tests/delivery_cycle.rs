//! Delivery cycles and acknowledgements against a file-backed store

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{button_press, create_test_mail, FakeChannel, MockMailProvider, Outbound, RECIPIENT};
use gmail_notifier::acknowledge::{mark_read_callback, AcknowledgeHandler};
use gmail_notifier::database::Database;
use gmail_notifier::dedup::DedupStore;
use gmail_notifier::formatter::{mark_read_action_id, MARKED_READ_LABEL};
use gmail_notifier::notifier::{Action, SourceMessage};
use gmail_notifier::pipeline::{DeliveryOptions, DeliveryPipeline};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn open_dedup(dir: &TempDir) -> DedupStore {
    let db = Database::open(dir.path().join("gmail-notifier.sqlite")).unwrap();
    DedupStore::new(Arc::new(db))
}

fn inbox(ids: &'static [&'static str]) -> MockMailProvider {
    let mut mail = MockMailProvider::new();
    mail.expect_list_unread()
        .returning(move |_| Ok(ids.iter().map(|id| id.to_string()).collect()));
    mail.expect_get_details().returning(|id| {
        Ok(create_test_mail(
            id,
            "Alice <alice@example.com>",
            "Quarterly report",
        ))
    });
    mail
}

fn pipeline(
    mail: MockMailProvider,
    channel: &Arc<FakeChannel>,
    dedup: DedupStore,
) -> DeliveryPipeline {
    DeliveryPipeline::new(
        Arc::new(mail),
        channel.clone(),
        dedup,
        RECIPIENT,
        DeliveryOptions::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_delivered_ids_survive_restart() {
    let dir = TempDir::new().unwrap();
    let channel = FakeChannel::new();

    let report = pipeline(inbox(&["m1", "m2"]), &channel, open_dedup(&dir))
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.delivered, 2);

    // Fresh store handle on the same file, as after a process restart
    let report = pipeline(inbox(&["m1", "m2", "m3"]), &channel, open_dedup(&dir))
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.new, 1);
    assert_eq!(report.delivered, 1);

    let messages = channel.direct_messages();
    assert_eq!(messages.len(), 3);
    assert!(messages
        .iter()
        .all(|m| m.actions.len() == 2 && m.fields.len() == 3));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retry_leaves_id_for_a_later_cycle() {
    let dir = TempDir::new().unwrap();
    let channel = FakeChannel::new();
    channel.fail_next_sends(2);

    let dedup = open_dedup(&dir);
    let pipeline = pipeline(inbox(&["m1"]), &channel, dedup.clone());

    let report = pipeline.run_cycle().await.unwrap();
    assert_eq!(report.retries_scheduled, 1);
    pipeline.wait_for_retries().await;

    assert!(channel.direct_messages().is_empty());
    assert!(!dedup.has("m1"));

    // Still unread and never delivered, so the next cycle tries again
    let report = pipeline.run_cycle().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(dedup.has("m1"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_delivers_after_delay() {
    let dir = TempDir::new().unwrap();
    let channel = FakeChannel::new();
    channel.fail_next_sends(1);

    let dedup = open_dedup(&dir);
    let pipeline = pipeline(inbox(&["m1"]), &channel, dedup.clone());
    pipeline.run_cycle().await.unwrap();

    tokio::time::sleep(Duration::from_secs(299)).await;
    assert!(channel.direct_messages().is_empty());

    pipeline.wait_for_retries().await;
    assert_eq!(channel.direct_messages().len(), 1);
    assert!(dedup.has("m1"));
}

#[tokio::test]
async fn test_mark_read_from_notification() {
    let dir = TempDir::new().unwrap();
    let channel = FakeChannel::new();
    pipeline(inbox(&["m1"]), &channel, open_dedup(&dir))
        .run_cycle()
        .await
        .unwrap();

    let (message_id, payload) = match channel.outbound().remove(0) {
        Outbound::DirectMessage {
            message_id,
            payload,
            ..
        } => (message_id, payload),
        other => panic!("expected a direct message, got {:?}", other),
    };

    let mut mail = MockMailProvider::new();
    mail.expect_mark_read()
        .withf(|id| id == "m1")
        .times(1)
        .returning(|_| Ok(()));

    let handler = AcknowledgeHandler::new(
        channel.clone(),
        RECIPIENT,
        mark_read_callback(Arc::new(mail)),
    );
    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { handler.run(cancel).await })
    };
    channel.wait_for_subscribers(1).await;

    channel.push(button_press(
        RECIPIENT,
        &mark_read_action_id("m1"),
        Some(SourceMessage {
            channel_id: "dm-channel".to_string(),
            message_id: message_id.clone(),
            actions: payload.actions,
        }),
    ));

    channel
        .wait_for("mark-read confirmation", |out| {
            out.iter().any(|o| {
                matches!(o, Outbound::EditedReply { text, .. } if text.contains("Marked as read"))
            })
        })
        .await;
    cancel.cancel();
    task.await.unwrap();

    let updated = channel
        .outbound()
        .into_iter()
        .find_map(|o| match o {
            Outbound::ActionsUpdated {
                message_id: updated_id,
                actions,
            } if updated_id == message_id => Some(actions),
            _ => None,
        })
        .expect("notification buttons were not updated");
    assert!(matches!(&updated[0], Action::Link { .. }));
    assert!(matches!(
        &updated[1],
        Action::Button { label, disabled: true, .. } if label.as_str() == MARKED_READ_LABEL
    ));
}
