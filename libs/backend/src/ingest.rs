use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use inlet_bus::HandleTask;
use inlet_core::{Channel, IngestError, Msg, MsgDirection, MsgUuid, ValidationError, attachment};
use inlet_spool::SpoolKind;
use inlet_store::{InsertedMsg, StoreError};
use inlet_telemetry::{TelemetryLabels, record_counter, record_histogram, with_common_fields};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, Span, debug, error, field, info, instrument, warn};

use crate::blobs::BlobError;
use crate::inflight::InFlightGuard;
use crate::{Backend, MsgReceipt, WriteOutcome};

/// Why a message could not be persisted.
#[derive(Debug, Error)]
pub(crate) enum PersistError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store task failed: {0}")]
    Task(#[from] JoinError),
}

fn labels(channel: &Channel) -> TelemetryLabels {
    TelemetryLabels::new().channel_type(channel.channel_type.as_str())
}

impl Backend {
    /// Accepts an inbound message from an adapter.
    ///
    /// Returns once the message is stored, spooled or recognized as a
    /// duplicate. The write itself runs on its own task and completes even if
    /// the caller stops waiting.
    #[instrument(
        name = "backend.receive_msg",
        skip(self, channel, msg),
        fields(channel_uuid = field::Empty, msg_uuid = field::Empty, msg_id = field::Empty)
    )]
    pub async fn receive_msg(&self, channel: &Channel, mut msg: Msg) -> Result<MsgReceipt, IngestError> {
        if msg.channel_uuid != channel.uuid {
            return Err(ValidationError::UnknownChannel(msg.channel_uuid).into());
        }
        let Some(claim) = self.inner.in_flight.claim(msg.uuid) else {
            debug!(msg_uuid = %msg.uuid, "write already in flight");
            return Ok(MsgReceipt {
                uuid: msg.uuid,
                id: None,
                outcome: WriteOutcome::InFlight,
            });
        };
        if let Some(prev) = self.previous_submission(&msg).await {
            msg.mark_duplicate_of(prev);
        }
        with_common_fields(
            &Span::current(),
            &channel.uuid.to_string(),
            Some(&msg.uuid.to_string()),
            None,
        );

        let this = self.clone();
        let channel = channel.clone();
        let receipt = tokio::spawn(async move { this.write_msg(&channel, msg, claim).await }.in_current_span())
            .await
            .map_err(IngestError::spool)??;
        if let Some(id) = receipt.id {
            Span::current().record("msg_id", id.get());
        }
        Ok(receipt)
    }

    /// Looks the message up under its sender key and, when it carries one,
    /// its external id key.
    async fn previous_submission(&self, msg: &Msg) -> Option<MsgUuid> {
        let fingerprints = &self.inner.fingerprints;
        if let Some(prev) = fingerprints.seen(&msg.fingerprint(), &msg.text).await {
            return Some(MsgUuid(prev));
        }
        if msg.external_id.is_some() {
            return fingerprints
                .seen(&msg.external_fingerprint(), &msg.text)
                .await
                .map(MsgUuid);
        }
        None
    }

    async fn remember(&self, msg: &Msg) {
        let fingerprints = &self.inner.fingerprints;
        let uuid = *msg.uuid.as_uuid();
        fingerprints.record(&msg.fingerprint(), uuid, &msg.text).await;
        if msg.external_id.is_some() {
            fingerprints
                .record(&msg.external_fingerprint(), uuid, &msg.text)
                .await;
        }
    }

    async fn write_msg(
        &self,
        channel: &Channel,
        mut msg: Msg,
        claim: InFlightGuard,
    ) -> Result<MsgReceipt, IngestError> {
        if msg.already_written() {
            debug!("duplicate submission, skipping write");
            record_counter("inlet_msgs_duplicate", 1, &labels(channel));
            return Ok(MsgReceipt {
                uuid: msg.uuid,
                id: None,
                outcome: WriteOutcome::Duplicate,
            });
        }
        if let Some(id) = msg.id {
            debug!(msg_id = id.get(), "message already has a durable id, skipping write");
            record_counter("inlet_msgs_duplicate", 1, &labels(channel));
            return Ok(MsgReceipt {
                uuid: msg.uuid,
                id: Some(id),
                outcome: WriteOutcome::Duplicate,
            });
        }

        match self.persist_msg(channel, &mut msg, claim).await {
            Ok(inserted) => {
                record_counter("inlet_msgs_written", 1, &labels(channel));
                self.dispatch(channel, &msg, &inserted).await;
                self.remember(&msg).await;
                Ok(MsgReceipt {
                    uuid: msg.uuid,
                    id: Some(inserted.id),
                    outcome: WriteOutcome::Stored,
                })
            }
            Err(PersistError::Invalid(err)) => Err(err.into()),
            Err(err) => {
                warn!(error = %err, "unable to persist message, spooling");
                self.spool_msg(channel, &msg).await?;
                self.remember(&msg).await;
                Ok(MsgReceipt {
                    uuid: msg.uuid,
                    id: None,
                    outcome: WriteOutcome::Spooled,
                })
            }
        }
    }

    /// Inlines attachments, then resolves the contact and inserts the message.
    /// Shared by live traffic and spool replay.
    ///
    /// The insert runs on its own task. When it outlives the store timeout the
    /// claim on the message stays with that task, so a replay of the spooled
    /// copy waits until the late insert has either landed or failed.
    pub(crate) async fn persist_msg(
        &self,
        channel: &Channel,
        msg: &mut Msg,
        claim: InFlightGuard,
    ) -> Result<InsertedMsg, PersistError> {
        self.inline_attachments(msg).await?;
        let timeout = self.inner.store_timeout;
        let started = Instant::now();
        let store = Arc::clone(&self.inner.store);
        let (owned_channel, owned_msg) = (channel.clone(), msg.clone());
        let mut insert = tokio::spawn(
            async move { store.insert_msg(&owned_channel, &owned_msg).await }.in_current_span(),
        );
        let inserted = match tokio::time::timeout(timeout, &mut insert).await {
            Ok(joined) => joined??,
            Err(_) => {
                self.await_late_insert(channel.clone(), msg.clone(), insert, claim);
                return Err(PersistError::Timeout(timeout));
            }
        };
        record_histogram(
            "inlet_store_insert_seconds",
            started.elapsed().as_secs_f64(),
            &labels(channel),
        );
        msg.id = Some(inserted.id);
        msg.contact_id = Some(inserted.contact.contact_id);
        msg.contact_urn_id = Some(inserted.contact.urn_id);
        Ok(inserted)
    }

    /// Follows an insert that timed out. If it commits after all, the message
    /// is handed to the work queue here; the spooled copy is then dropped by
    /// the replay uuid check.
    fn await_late_insert(
        &self,
        channel: Channel,
        msg: Msg,
        insert: JoinHandle<Result<InsertedMsg, StoreError>>,
        claim: InFlightGuard,
    ) {
        let this = self.clone();
        tokio::spawn(
            async move {
                let _claim = claim;
                match insert.await {
                    Ok(Ok(inserted)) => {
                        info!(msg_id = inserted.id.get(), "timed out insert landed");
                        record_counter("inlet_msgs_written", 1, &labels(&channel));
                        this.dispatch(&channel, &msg, &inserted).await;
                    }
                    Ok(Err(err)) => debug!(error = %err, "timed out insert failed"),
                    Err(err) => warn!(error = %err, "timed out insert task aborted"),
                }
            }
            .in_current_span(),
        );
    }

    /// Replaces every `data:` attachment with a `content-type:url` reference
    /// to the decoded bytes in blob storage.
    async fn inline_attachments(&self, msg: &mut Msg) -> Result<(), PersistError> {
        for index in 0..msg.attachments.len() {
            if !attachment::is_inline(&msg.attachments[index]) {
                continue;
            }
            let data = attachment::decode_inline(index, &msg.attachments[index])?;
            let (content_type, extension) = attachment::sniff(&data);
            let url = self
                .inner
                .blobs
                .save(msg.org_id, msg.channel_uuid, extension, &data)
                .await?;
            msg.attachments[index] = format!("{content_type}:{url}");
        }
        Ok(())
    }

    /// Hands a newly stored inbound message to the processing engine. Failures
    /// are logged only.
    pub(crate) async fn dispatch(&self, channel: &Channel, msg: &Msg, inserted: &InsertedMsg) {
        if msg.direction != MsgDirection::Incoming {
            return;
        }
        let task = HandleTask {
            contact_id: inserted.contact.contact_id,
            msg_id: inserted.id,
            channel_uuid: channel.uuid,
            channel_type: channel.channel_type.clone(),
        };
        if let Err(err) = self.inner.queue.dispatch(msg.org_id, &task).await {
            warn!(error = %err, msg_id = inserted.id.get(), "unable to dispatch handle task");
            record_counter("inlet_dispatch_failed", 1, &labels(channel));
        }
    }

    async fn spool_msg(&self, channel: &Channel, msg: &Msg) -> Result<(), IngestError> {
        match self.inner.spool.write(SpoolKind::Msgs, channel.uuid, msg).await {
            Ok(_) => {
                record_counter("inlet_msgs_spooled", 1, &labels(channel));
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "unable to spool message");
                Err(IngestError::spool(err))
            }
        }
    }
}
