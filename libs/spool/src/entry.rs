use std::fmt::{self, Display, Formatter};

use inlet_core::ChannelUuid;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const SPOOL_VERSION: u32 = 1;

/// Entity kind of a spooled write; each kind lives in its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpoolKind {
    Msgs,
    Statuses,
}

impl SpoolKind {
    pub const ALL: [Self; 2] = [Self::Msgs, Self::Statuses];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Msgs => "msgs",
            Self::Statuses => "statuses",
        }
    }
}

impl Display for SpoolKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk envelope of one spooled write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoolEntry<T> {
    pub version: u32,
    pub kind: SpoolKind,
    /// Failed replays so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub spooled_on: OffsetDateTime,
    /// Channel the write belongs to; replay re-reads it since its
    /// configuration may have changed while the entry waited.
    pub channel_uuid: ChannelUuid,
    pub payload: T,
}

impl<T> SpoolEntry<T> {
    pub fn new(kind: SpoolKind, channel_uuid: ChannelUuid, payload: T) -> Self {
        Self {
            version: SPOOL_VERSION,
            kind,
            attempts: 0,
            spooled_on: OffsetDateTime::now_utc(),
            channel_uuid,
            payload,
        }
    }
}
