//! Durable local fallback for writes that cannot reach the store.
//!
//! Each spooled write is a single JSON file under `<root>/<kind>/`. Files are
//! written to a hidden temporary name, synced and renamed into place, so a
//! crash never leaves a half-written entry visible to the flusher. The
//! [`Flusher`] replays entries oldest-first through a [`SpoolHandler`] and
//! deletes them only after a confirmed replay.

mod entry;
mod flusher;
mod spool;

pub use entry::{SPOOL_VERSION, SpoolEntry, SpoolKind};
pub use flusher::{FlushReport, Flusher, ReplayError, SharedSpoolHandler, SpoolHandler};
pub use spool::{DEAD_SUFFIX, ERROR_SUFFIX, Spool, SpoolError};
