//! Fault injection helpers for exercising outage paths.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use inlet_core::{Channel, ChannelUuid, Msg, MsgId, MsgUuid, StatusUpdate};

use crate::{
    ChannelSource, ContactRequest, ContactResolver, InsertedMsg, MessageStore, ResolvedContact,
    StatusOutcome, StoreError, StoredMsg,
};

/// Wraps a store and fails every call while switched off.
///
/// A latency can also be set: channel lookups and inserts then run against
/// the inner store right away but only return after the delay, like a
/// commit whose acknowledgement is slow.
#[derive(Clone)]
pub struct ToggleStore<S> {
    inner: S,
    down: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl<S> ToggleStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            down: Arc::new(AtomicBool::new(false)),
            latency_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    async fn lag(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: ChannelSource> ChannelSource for ToggleStore<S> {
    async fn channel_by_uuid(&self, uuid: ChannelUuid) -> Result<Option<Channel>, StoreError> {
        self.check()?;
        let channel = self.inner.channel_by_uuid(uuid).await;
        self.lag().await;
        channel
    }
}

#[async_trait]
impl<S: ContactResolver> ContactResolver for ToggleStore<S> {
    async fn resolve_contact(&self, req: ContactRequest) -> Result<ResolvedContact, StoreError> {
        self.check()?;
        self.inner.resolve_contact(req).await
    }
}

#[async_trait]
impl<S: MessageStore> MessageStore for ToggleStore<S> {
    async fn insert_msg(&self, channel: &Channel, msg: &Msg) -> Result<InsertedMsg, StoreError> {
        self.check()?;
        let inserted = self.inner.insert_msg(channel, msg).await;
        self.lag().await;
        inserted
    }

    async fn msg_id_for_uuid(&self, uuid: MsgUuid) -> Result<Option<MsgId>, StoreError> {
        self.check()?;
        self.inner.msg_id_for_uuid(uuid).await
    }

    async fn msg_by_id(&self, id: MsgId) -> Result<Option<StoredMsg>, StoreError> {
        self.check()?;
        self.inner.msg_by_id(id).await
    }

    async fn update_status(&self, status: &StatusUpdate) -> Result<StatusOutcome, StoreError> {
        self.check()?;
        self.inner.update_status(status).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;

    #[tokio::test]
    async fn switch_toggles_availability() {
        let store = ToggleStore::new(SqliteStore::open_in_memory().unwrap());
        store.ping().await.unwrap();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        store.set_available(true);
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn slow_insert_commits_before_returning() {
        let sqlite = SqliteStore::open_in_memory().unwrap();
        let store = ToggleStore::new(sqlite.clone());
        let channel = Channel {
            id: inlet_core::ChannelId(1),
            uuid: ChannelUuid::new(),
            org_id: inlet_core::OrgId(1),
            channel_type: inlet_core::ChannelType::new("EX"),
            name: "ex".into(),
            address: "1".into(),
            country: None,
            schemes: vec!["tel".into()],
            config: Default::default(),
        };
        sqlite.add_channel(&channel).await.unwrap();
        store.set_latency(Duration::from_millis(200));

        let msg = Msg::new_incoming(&channel, inlet_core::Urn::parse("tel:+1555").unwrap(), "hi");
        let timed_out = tokio::time::timeout(Duration::from_millis(50), store.insert_msg(&channel, &msg)).await;
        assert!(timed_out.is_err());
        assert!(sqlite.msg_id_for_uuid(msg.uuid).await.unwrap().is_some());
    }
}
