use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use inlet_core::{ChannelType, ChannelUuid, ContactId, MsgId, OrgId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

pub const DEFAULT_SUBJECT_PREFIX: &str = "inlet.handle";

#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error(transparent)]
    Publish(#[from] anyhow::Error),
}

#[async_trait]
pub trait BusClient: Send + Sync {
    async fn publish_value(&self, subject: &str, payload: Value) -> Result<(), BusError>;
}

pub type SharedBus = Arc<dyn BusClient>;

pub struct NatsBusClient {
    client: async_nats::Client,
}

impl NatsBusClient {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BusClient for NatsBusClient {
    async fn publish_value(&self, subject: &str, payload: Value) -> Result<(), BusError> {
        let bytes =
            serde_json::to_vec(&payload).map_err(|e| BusError::Publish(anyhow::Error::new(e)))?;
        self.client
            .publish(subject.to_string(), bytes.into())
            .await
            .map_err(|err| BusError::Publish(anyhow::Error::new(err)))
    }
}

/// Records published payloads; can be told to fail every publish.
#[derive(Clone, Default)]
pub struct InMemoryBusClient {
    published: Arc<Mutex<Vec<(String, Value)>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryBusClient {
    pub async fn take_published(&self) -> Vec<(String, Value)> {
        let mut guard = self.published.lock().await;
        std::mem::take(&mut *guard)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BusClient for InMemoryBusClient {
    async fn publish_value(&self, subject: &str, payload: Value) -> Result<(), BusError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BusError::Publish(anyhow::anyhow!("bus unavailable")));
        }
        let mut guard = self.published.lock().await;
        guard.push((subject.to_string(), payload));
        Ok(())
    }
}

pub fn to_value<T: serde::Serialize>(payload: &T) -> Result<Value, BusError> {
    serde_json::to_value(payload).map_err(|e| BusError::Publish(anyhow::Error::new(e)))
}

/// Task handed to the downstream engine for each newly stored inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleTask {
    pub contact_id: ContactId,
    pub msg_id: MsgId,
    pub channel_uuid: ChannelUuid,
    pub channel_type: ChannelType,
}

#[derive(Debug, Clone)]
pub struct WorkQueueConfig {
    pub subject_prefix: String,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
        }
    }
}

impl WorkQueueConfig {
    pub fn from_env() -> Self {
        std::env::var("INLET_WORK_SUBJECT_PREFIX")
            .ok()
            .map(|prefix| prefix.trim().trim_end_matches('.').to_string())
            .filter(|prefix| !prefix.is_empty())
            .map(|subject_prefix| Self { subject_prefix })
            .unwrap_or_default()
    }
}

/// Publishes handle tasks to `{prefix}.{org_id}`.
#[derive(Clone)]
pub struct WorkQueue {
    bus: SharedBus,
    prefix: String,
}

impl WorkQueue {
    pub fn new(bus: SharedBus, config: &WorkQueueConfig) -> Self {
        Self {
            bus,
            prefix: config.subject_prefix.clone(),
        }
    }

    pub fn subject(&self, org_id: OrgId) -> String {
        format!("{}.{}", self.prefix, org_id)
    }

    /// Single publish attempt; callers log failures and move on.
    #[instrument(name = "work_queue.dispatch", skip(self, task), fields(msg_id = task.msg_id.get()))]
    pub async fn dispatch(&self, org_id: OrgId, task: &HandleTask) -> Result<(), BusError> {
        let subject = self.subject(org_id);
        self.bus.publish_value(&subject, to_value(task)?).await?;
        debug!(%subject, "handle task published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> HandleTask {
        HandleTask {
            contact_id: ContactId(4),
            msg_id: MsgId(99),
            channel_uuid: ChannelUuid::new(),
            channel_type: ChannelType::new("EX"),
        }
    }

    #[tokio::test]
    async fn dispatch_publishes_task_under_org_subject() {
        let bus = InMemoryBusClient::default();
        let queue = WorkQueue::new(Arc::new(bus.clone()), &WorkQueueConfig::default());
        let task = task();
        queue.dispatch(OrgId(12), &task).await.unwrap();

        let published = bus.take_published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "inlet.handle.12");
        let decoded: HandleTask = serde_json::from_value(published[0].1.clone()).unwrap();
        assert_eq!(decoded, task);
        assert_eq!(published[0].1["channel_type"], "EX");
    }

    #[tokio::test]
    async fn failing_bus_surfaces_error() {
        let bus = InMemoryBusClient::default();
        bus.set_failing(true);
        let queue = WorkQueue::new(Arc::new(bus.clone()), &WorkQueueConfig::default());
        assert!(queue.dispatch(OrgId(1), &task()).await.is_err());
        assert!(bus.take_published().await.is_empty());
    }
}
