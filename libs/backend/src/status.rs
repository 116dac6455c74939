use inlet_core::{Channel, IngestError, StatusUpdate, ValidationError};
use inlet_spool::SpoolKind;
use inlet_telemetry::{TelemetryLabels, record_counter};
use tracing::{Instrument, debug, error, instrument, warn};

use crate::{Backend, StatusReceipt, WriteOutcome};

impl Backend {
    /// Applies a delivery receipt. A receipt matching an earlier one with the
    /// same derived status is acknowledged without a second write.
    #[instrument(
        name = "backend.receive_status",
        skip(self, channel, status),
        fields(channel_uuid = %channel.uuid, reference = %status.reference, status = %status.status)
    )]
    pub async fn receive_status(
        &self,
        channel: &Channel,
        status: StatusUpdate,
    ) -> Result<StatusReceipt, IngestError> {
        if status.channel_uuid != channel.uuid {
            return Err(ValidationError::UnknownChannel(status.channel_uuid).into());
        }
        let key = status.fingerprint();
        if self
            .inner
            .fingerprints
            .seen(&key, status.status.code())
            .await
            .is_some()
        {
            debug!("duplicate receipt, skipping write");
            record_counter(
                "inlet_status_duplicate",
                1,
                &TelemetryLabels::new().channel_type(channel.channel_type.as_str()),
            );
            return Ok(StatusReceipt {
                msg_id: None,
                status: status.status,
                outcome: WriteOutcome::Duplicate,
            });
        }

        let this = self.clone();
        let channel = channel.clone();
        tokio::spawn(async move { this.write_status(&channel, status, &key).await }.in_current_span())
            .await
            .map_err(IngestError::spool)?
    }

    async fn write_status(
        &self,
        channel: &Channel,
        status: StatusUpdate,
        key: &str,
    ) -> Result<StatusReceipt, IngestError> {
        let timeout = self.inner.store_timeout;
        let result = tokio::time::timeout(timeout, self.inner.store.update_status(&status)).await;
        let receipt = match result {
            Ok(Ok(outcome)) => StatusReceipt {
                msg_id: Some(outcome.msg_id),
                status: outcome.status,
                outcome: WriteOutcome::Stored,
            },
            Ok(Err(err)) if err.is_not_found() => {
                return Err(IngestError::NotFound(status.reference.to_string()));
            }
            failed => {
                match failed {
                    Ok(Err(err)) => warn!(error = %err, "unable to write receipt, spooling"),
                    _ => warn!(timeout = ?timeout, "receipt write timed out, spooling"),
                }
                if let Err(err) = self
                    .inner
                    .spool
                    .write(SpoolKind::Statuses, channel.uuid, &status)
                    .await
                {
                    error!(error = %err, "unable to spool receipt");
                    return Err(IngestError::spool(err));
                }
                StatusReceipt {
                    msg_id: None,
                    status: status.status,
                    outcome: WriteOutcome::Spooled,
                }
            }
        };
        let uuid = status.uuid;
        self.inner
            .fingerprints
            .record(key, uuid, status.status.code())
            .await;
        Ok(receipt)
    }
}
