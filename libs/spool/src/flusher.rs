use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use inlet_telemetry::{TelemetryLabels, record_counter};
use serde_json::Value;
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{info, instrument, warn};

use crate::entry::{SpoolEntry, SpoolKind};
use crate::spool::{DEAD_SUFFIX, ERROR_SUFFIX, Spool};

#[derive(Debug, Error)]
pub enum ReplayError {
    /// The entry can never be replayed; it is set aside.
    #[error("malformed spool entry: {0}")]
    Malformed(String),
    /// Replay failed for now; the entry is kept for the next cycle.
    #[error("replay failed: {0}")]
    Retry(String),
}

/// Replays spooled entries of one kind.
#[async_trait]
pub trait SpoolHandler: Send + Sync {
    fn kind(&self) -> SpoolKind;

    async fn replay(&self, entry: &SpoolEntry<Value>) -> Result<(), ReplayError>;
}

pub type SharedSpoolHandler = Arc<dyn SpoolHandler>;

/// Outcome counts of one flush cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub retried: usize,
    pub quarantined: usize,
    pub dead: usize,
}

impl FlushReport {
    pub const fn is_empty(&self) -> bool {
        self.flushed == 0 && self.retried == 0 && self.quarantined == 0 && self.dead == 0
    }
}

#[derive(Clone)]
pub struct Flusher {
    spool: Spool,
    handlers: Vec<SharedSpoolHandler>,
    max_attempts: Option<u32>,
}

impl Flusher {
    pub fn new(spool: Spool) -> Self {
        Self {
            spool,
            handlers: Vec::new(),
            max_attempts: None,
        }
    }

    pub fn with_handler(mut self, handler: SharedSpoolHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Entries failing this many replays are moved aside as dead. `None`
    /// retries forever.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts.filter(|max| *max > 0);
        self
    }

    /// Runs one pass over every pending entry. Concurrent calls on the same
    /// spool are serialized.
    #[instrument(name = "spool.flush", skip(self))]
    pub async fn flush_once(&self) -> FlushReport {
        let _cycle = self.spool.lock_cycle().await;
        let mut report = FlushReport::default();
        for handler in &self.handlers {
            let kind = handler.kind();
            let paths = match self.spool.pending(kind).await {
                Ok(paths) => paths,
                Err(err) => {
                    warn!(error = %err, %kind, "unable to list spool entries");
                    continue;
                }
            };
            for path in paths {
                self.flush_entry(handler.as_ref(), kind, &path, &mut report)
                    .await;
            }
        }
        if !report.is_empty() {
            info!(
                flushed = report.flushed,
                retried = report.retried,
                quarantined = report.quarantined,
                dead = report.dead,
                "spool flush finished"
            );
        }
        report
    }

    async fn flush_entry(
        &self,
        handler: &dyn SpoolHandler,
        kind: SpoolKind,
        path: &Path,
        report: &mut FlushReport,
    ) {
        let labels = TelemetryLabels::new().kind(kind.as_str());
        let raw = match self.spool.read(path).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "unable to read spool entry");
                return;
            }
        };
        let mut entry: SpoolEntry<Value> = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                self.set_aside(path, ERROR_SUFFIX, &err.to_string()).await;
                report.quarantined += 1;
                record_counter("inlet_spool_quarantined", 1, &labels);
                return;
            }
        };
        if entry.kind != kind {
            self.set_aside(path, ERROR_SUFFIX, "entry kind does not match directory")
                .await;
            report.quarantined += 1;
            record_counter("inlet_spool_quarantined", 1, &labels);
            return;
        }

        match handler.replay(&entry).await {
            Ok(()) => match self.spool.remove(path).await {
                Ok(()) => {
                    report.flushed += 1;
                    record_counter("inlet_spool_flushed", 1, &labels);
                }
                Err(err) => warn!(error = %err, "replayed entry could not be removed"),
            },
            Err(ReplayError::Malformed(reason)) => {
                self.set_aside(path, ERROR_SUFFIX, &reason).await;
                report.quarantined += 1;
                record_counter("inlet_spool_quarantined", 1, &labels);
            }
            Err(ReplayError::Retry(reason)) => {
                entry.attempts = entry.attempts.saturating_add(1);
                if let Err(err) = self.spool.rewrite(path, &entry).await {
                    warn!(error = %err, "unable to record replay attempt");
                }
                if self.max_attempts.is_some_and(|max| entry.attempts >= max) {
                    self.set_aside(path, DEAD_SUFFIX, &reason).await;
                    report.dead += 1;
                    record_counter("inlet_spool_dead", 1, &labels);
                } else {
                    warn!(path = %path.display(), attempts = entry.attempts, %reason, "spool replay failed, will retry");
                    report.retried += 1;
                }
            }
        }
    }

    async fn set_aside(&self, path: &Path, suffix: &str, reason: &str) {
        match self.spool.set_aside_as(path, suffix).await {
            Ok(target) => warn!(path = %target.display(), %reason, "spool entry quarantined"),
            Err(err) => warn!(error = %err, %reason, "unable to quarantine spool entry"),
        }
    }

    /// Flushes every `interval` until `shutdown` flips to true or its sender is dropped.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.flush_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("spool flusher stopped");
        })
    }
}
