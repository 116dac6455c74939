//! The ingestion service object.
//!
//! [`Backend`] is built once at startup from its collaborators (store,
//! fingerprint cache, spool, work queue, blob store) and cloned into every
//! request handler. Inbound messages go through [`Backend::receive_msg`],
//! delivery receipts through [`Backend::receive_status`]; both fall back to
//! the spool when the store cannot be reached, and the flusher replays spooled
//! entries through the same write path.

use std::{sync::Arc, time::Duration};

use inlet_bus::WorkQueue;
use inlet_core::{MsgId, MsgStatus, MsgUuid};
use inlet_fingerprint::FingerprintCache;
use inlet_spool::{FlushReport, Flusher, Spool};
use inlet_store::SharedStore;
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};

mod blobs;
mod config;
mod inflight;
mod ingest;
mod replay;
mod status;

pub use blobs::{BlobError, BlobStore, FsBlobStore, SharedBlobStore};
pub use config::BackendConfig;

use inflight::InFlight;
use replay::{MsgReplay, StatusReplay};

/// What happened to a submitted message or receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Written to the store.
    Stored,
    /// Matched an earlier submission; nothing was written.
    Duplicate,
    /// The store was unreachable; the write sits in the spool.
    Spooled,
    /// Another write of the same message is underway in this process.
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MsgReceipt {
    pub uuid: MsgUuid,
    /// Durable id, when the message was stored by this call.
    pub id: Option<MsgId>,
    pub outcome: WriteOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusReceipt {
    pub msg_id: Option<MsgId>,
    pub status: MsgStatus,
    pub outcome: WriteOutcome,
}

/// Store reachability and spool backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Health {
    pub store_ok: bool,
    pub spool_pending: usize,
}

/// Collaborators the backend is assembled from.
pub struct BackendParts {
    pub store: SharedStore,
    pub fingerprints: FingerprintCache,
    pub spool: Spool,
    pub queue: WorkQueue,
    pub blobs: SharedBlobStore,
}

#[derive(Clone)]
pub struct Backend {
    inner: Arc<Inner>,
}

struct Inner {
    store: SharedStore,
    fingerprints: FingerprintCache,
    spool: Spool,
    queue: WorkQueue,
    blobs: SharedBlobStore,
    in_flight: InFlight,
    store_timeout: Duration,
    flush_interval: Duration,
    spool_max_attempts: Option<u32>,
}

impl Backend {
    pub fn new(parts: BackendParts, config: &BackendConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: parts.store,
                fingerprints: parts.fingerprints,
                spool: parts.spool,
                queue: parts.queue,
                blobs: parts.blobs,
                in_flight: InFlight::default(),
                store_timeout: config.store_timeout,
                flush_interval: config.flush_interval,
                spool_max_attempts: config.spool_max_attempts,
            }),
        }
    }

    pub fn spool(&self) -> &Spool {
        &self.inner.spool
    }

    pub fn fingerprints(&self) -> &FingerprintCache {
        &self.inner.fingerprints
    }

    fn flusher(&self) -> Flusher {
        Flusher::new(self.inner.spool.clone())
            .with_handler(Arc::new(MsgReplay::new(self.clone())))
            .with_handler(Arc::new(StatusReplay::new(self.clone())))
            .with_max_attempts(self.inner.spool_max_attempts)
    }

    /// Runs one flush cycle now.
    pub async fn flush_spool(&self) -> FlushReport {
        self.flusher().flush_once().await
    }

    /// Starts the periodic flusher; it stops once `shutdown` flips to true.
    pub fn start_flusher(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.flusher().spawn(self.inner.flush_interval, shutdown)
    }

    pub async fn health(&self) -> Health {
        let store_ok = matches!(
            tokio::time::timeout(self.inner.store_timeout, self.inner.store.ping()).await,
            Ok(Ok(()))
        );
        let spool_pending = match self.inner.spool.pending_count().await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(error = %err, "unable to count spool entries");
                0
            }
        };
        inlet_telemetry::record_gauge(
            "inlet_spool_pending",
            spool_pending as f64,
            &inlet_telemetry::TelemetryLabels::new(),
        );
        Health {
            store_ok,
            spool_pending,
        }
    }
}
