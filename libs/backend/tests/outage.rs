mod common;

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use inlet_backend::{BackendConfig, WriteOutcome};
use inlet_spool::{DEAD_SUFFIX, ERROR_SUFFIX, SpoolKind};
use inlet_store::MessageStore;
use serde_json::json;

use common::{harness, harness_with};

#[tokio::test]
async fn outage_spools_and_flush_recovers() {
    let h = harness().await;
    h.store.set_available(false);

    let receipt = h.backend.receive_msg(&h.channel, h.msg("hello")).await.unwrap();
    assert_eq!(receipt.outcome, WriteOutcome::Spooled);
    assert_eq!(h.sqlite.count_msgs().await.unwrap(), 0);
    assert_eq!(h.spool.pending_count().await.unwrap(), 1);
    assert!(!h.backend.health().await.store_ok);

    // nothing changes while the store is still down
    let report = h.backend.flush_spool().await;
    assert_eq!(report.retried, 1);
    assert_eq!(h.spool.pending_count().await.unwrap(), 1);

    h.store.set_available(true);
    let report = h.backend.flush_spool().await;
    assert_eq!(report.flushed, 1);
    assert_eq!(h.spool.pending_count().await.unwrap(), 0);
    assert_eq!(h.sqlite.count_msgs().await.unwrap(), 1);

    let id = h.sqlite.msg_id_for_uuid(receipt.uuid).await.unwrap().unwrap();
    let row = h.sqlite.msg_by_id(id).await.unwrap().unwrap();
    assert_eq!(row.text, "hello");
    assert_eq!(h.bus.take_published().await.len(), 1);

    let health = h.backend.health().await;
    assert!(health.store_ok);
    assert_eq!(health.spool_pending, 0);
}

#[tokio::test]
async fn spooled_duplicate_is_still_suppressed() {
    let h = harness().await;
    h.store.set_available(false);
    let first = h.backend.receive_msg(&h.channel, h.msg("hello")).await.unwrap();
    let again = h.backend.receive_msg(&h.channel, h.msg("hello")).await.unwrap();
    assert_eq!(again.outcome, WriteOutcome::Duplicate);
    assert_eq!(again.uuid, first.uuid);
    assert_eq!(h.spool.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn replaying_one_entry_twice_creates_one_row() {
    let h = harness().await;
    h.store.set_available(false);
    let receipt = h.backend.receive_msg(&h.channel, h.msg("once")).await.unwrap();

    let pending = h.spool.pending(SpoolKind::Msgs).await.unwrap();
    let copy = pending[0].with_file_name("99999999999999999999_copy.json");
    std::fs::copy(&pending[0], &copy).unwrap();

    h.store.set_available(true);
    let report = h.backend.flush_spool().await;
    assert_eq!(report.flushed, 2);
    assert_eq!(h.sqlite.count_msgs_with_uuid(receipt.uuid).await.unwrap(), 1);
    assert_eq!(h.bus.take_published().await.len(), 1);
}

#[tokio::test]
async fn spooled_attachments_are_inlined_on_replay() {
    let h = harness().await;
    h.store.set_available(false);
    let bytes = b"%PDF-1.7 invoice".to_vec();
    let msg = h
        .msg("invoice")
        .with_attachment(format!("data:application/pdf;base64,{}", STANDARD.encode(&bytes)));
    let receipt = h.backend.receive_msg(&h.channel, msg).await.unwrap();
    assert_eq!(receipt.outcome, WriteOutcome::Spooled);

    h.store.set_available(true);
    h.backend.flush_spool().await;
    let id = h.sqlite.msg_id_for_uuid(receipt.uuid).await.unwrap().unwrap();
    let row = h.sqlite.msg_by_id(id).await.unwrap().unwrap();
    let (content_type, url) = row.attachments[0].split_once(':').unwrap();
    assert_eq!(content_type, "application/pdf");
    assert_eq!(tokio::fs::read(h.blobs.resolve(url).unwrap()).await.unwrap(), bytes);
}

#[tokio::test]
async fn malformed_and_orphaned_entries_are_quarantined() {
    let h = harness().await;
    h.spool
        .write(SpoolKind::Msgs, h.channel.uuid, &json!({"text": 12}))
        .await
        .unwrap();
    let orphan = common::channel();
    let msg = inlet_core::Msg::new_incoming(&orphan, inlet_core::Urn::parse(common::SENDER).unwrap(), "x");
    h.spool.write(SpoolKind::Msgs, orphan.uuid, &msg).await.unwrap();

    let report = h.backend.flush_spool().await;
    assert_eq!(report.quarantined, 2);
    assert_eq!(h.spool.pending_count().await.unwrap(), 0);
    assert_eq!(h.spool.set_aside(SpoolKind::Msgs, ERROR_SUFFIX).await.unwrap().len(), 2);
    assert_eq!(h.sqlite.count_msgs().await.unwrap(), 0);
}

#[tokio::test]
async fn bounded_retry_dead_letters_entries() {
    let h = harness_with(BackendConfig {
        spool_max_attempts: Some(2),
        ..BackendConfig::default()
    })
    .await;
    h.store.set_available(false);
    h.backend.receive_msg(&h.channel, h.msg("doomed")).await.unwrap();

    assert_eq!(h.backend.flush_spool().await.retried, 1);
    assert_eq!(h.backend.flush_spool().await.dead, 1);
    assert_eq!(h.spool.pending_count().await.unwrap(), 0);
    assert_eq!(h.spool.set_aside(SpoolKind::Msgs, DEAD_SUFFIX).await.unwrap().len(), 1);
}

#[tokio::test]
async fn insert_that_outlives_the_timeout_is_dispatched_once() {
    let h = harness_with(BackendConfig {
        store_timeout: Duration::from_millis(50),
        ..BackendConfig::default()
    })
    .await;
    h.store.set_latency(Duration::from_millis(300));
    let msg = h.msg("slow ack");
    let receipt = h.backend.receive_msg(&h.channel, msg.clone()).await.unwrap();
    h.store.set_latency(Duration::ZERO);
    assert_eq!(receipt.outcome, WriteOutcome::Spooled);
    assert_eq!(h.spool.pending_count().await.unwrap(), 1);

    // the late insert still holds the message
    let again = h.backend.receive_msg(&h.channel, msg).await.unwrap();
    assert_eq!(again.outcome, WriteOutcome::InFlight);
    assert_eq!(h.backend.flush_spool().await.retried, 1);

    let mut flushed = 0;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        flushed = h.backend.flush_spool().await.flushed;
        if flushed == 1 {
            break;
        }
    }
    assert_eq!(flushed, 1);
    assert_eq!(h.spool.pending_count().await.unwrap(), 0);
    assert_eq!(h.sqlite.count_msgs_with_uuid(receipt.uuid).await.unwrap(), 1);

    let tasks = h.bus.take_published().await;
    assert_eq!(tasks.len(), 1);
    let id = h.sqlite.msg_id_for_uuid(receipt.uuid).await.unwrap().unwrap();
    assert_eq!(tasks[0].1["msg_id"], id.get());
}
