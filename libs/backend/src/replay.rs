//! Spool handlers that feed spooled writes back through the live write path.

use async_trait::async_trait;
use inlet_core::{Channel, ChannelUuid, Msg, StatusUpdate};
use inlet_spool::{ReplayError, SpoolEntry, SpoolHandler, SpoolKind};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::Backend;
use crate::ingest::PersistError;

pub(crate) struct MsgReplay {
    backend: Backend,
}

impl MsgReplay {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }
}

pub(crate) struct StatusReplay {
    backend: Backend,
}

impl StatusReplay {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }
}

impl Backend {
    /// Re-reads the channel; its configuration may have changed since the
    /// entry was spooled. A channel that no longer exists makes the entry
    /// unreplayable.
    async fn current_channel(&self, uuid: ChannelUuid) -> Result<Channel, ReplayError> {
        let timeout = self.inner.store_timeout;
        match tokio::time::timeout(timeout, self.inner.store.channel_by_uuid(uuid)).await {
            Ok(Ok(Some(channel))) => Ok(channel),
            Ok(Ok(None)) => Err(ReplayError::Malformed(format!("channel {uuid} no longer exists"))),
            Ok(Err(err)) => Err(ReplayError::Retry(err.to_string())),
            Err(_) => Err(ReplayError::Retry(format!("channel lookup timed out after {timeout:?}"))),
        }
    }

    #[instrument(name = "backend.replay_msg", skip(self, msg), fields(msg_uuid = %msg.uuid))]
    async fn replay_msg(&self, channel_uuid: ChannelUuid, mut msg: Msg) -> Result<(), ReplayError> {
        let channel = self.current_channel(channel_uuid).await?;
        msg.channel_id = channel.id;

        // a timed out insert of this message may still be running
        let Some(claim) = self.inner.in_flight.claim(msg.uuid) else {
            return Err(ReplayError::Retry("write of this message is in flight".into()));
        };
        if let Some(id) = msg.id {
            debug!(msg_id = id.get(), "spooled message already has a durable id, dropping entry");
            return Ok(());
        }
        let timeout = self.inner.store_timeout;
        match tokio::time::timeout(timeout, self.inner.store.msg_id_for_uuid(msg.uuid)).await {
            Ok(Ok(Some(id))) => {
                debug!(msg_id = id.get(), "message already stored, dropping entry");
                return Ok(());
            }
            Ok(Ok(None)) => {}
            Ok(Err(err)) => return Err(ReplayError::Retry(err.to_string())),
            Err(_) => return Err(ReplayError::Retry("uuid lookup timed out".into())),
        }

        match self.persist_msg(&channel, &mut msg, claim).await {
            Ok(inserted) => {
                info!(msg_id = inserted.id.get(), "spooled message stored");
                self.dispatch(&channel, &msg, &inserted).await;
                Ok(())
            }
            Err(PersistError::Invalid(err)) => Err(ReplayError::Malformed(err.to_string())),
            Err(err) => Err(ReplayError::Retry(err.to_string())),
        }
    }

    #[instrument(name = "backend.replay_status", skip(self, status), fields(reference = %status.reference))]
    async fn replay_status(
        &self,
        channel_uuid: ChannelUuid,
        mut status: StatusUpdate,
    ) -> Result<(), ReplayError> {
        let channel = self.current_channel(channel_uuid).await?;
        status.channel_id = channel.id;

        let timeout = self.inner.store_timeout;
        match tokio::time::timeout(timeout, self.inner.store.update_status(&status)).await {
            Ok(Ok(outcome)) => {
                debug!(msg_id = outcome.msg_id.get(), applied = outcome.applied, "spooled receipt applied");
                Ok(())
            }
            Ok(Err(err)) if err.is_not_found() => {
                warn!("spooled receipt references an unknown message, dropping");
                Ok(())
            }
            Ok(Err(err)) => Err(ReplayError::Retry(err.to_string())),
            Err(_) => Err(ReplayError::Retry(format!("status write timed out after {timeout:?}"))),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(entry: &SpoolEntry<Value>) -> Result<T, ReplayError> {
    serde_json::from_value(entry.payload.clone()).map_err(|err| ReplayError::Malformed(err.to_string()))
}

#[async_trait]
impl SpoolHandler for MsgReplay {
    fn kind(&self) -> SpoolKind {
        SpoolKind::Msgs
    }

    async fn replay(&self, entry: &SpoolEntry<Value>) -> Result<(), ReplayError> {
        let msg: Msg = decode(entry)?;
        self.backend.replay_msg(entry.channel_uuid, msg).await
    }
}

#[async_trait]
impl SpoolHandler for StatusReplay {
    fn kind(&self) -> SpoolKind {
        SpoolKind::Statuses
    }

    async fn replay(&self, entry: &SpoolEntry<Value>) -> Result<(), ReplayError> {
        let status: StatusUpdate = decode(entry)?;
        self.backend.replay_status(entry.channel_uuid, status).await
    }
}
