//! Identifier and enum value types shared across the ingestion pipeline.
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

macro_rules! int_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

int_id!(
    /// Organization owning channels, contacts and messages.
    OrgId
);
int_id!(
    /// Durable numeric message identity, assigned once by the store.
    MsgId
);
int_id!(ChannelId);
int_id!(ContactId);
int_id!(
    /// Identifier of the channel-scoped address row (`contact_urns`).
    ContactUrnId
);

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Client-generated business identity of a message. Never changes once assigned.
    MsgUuid
);
uuid_id!(ChannelUuid);
uuid_id!(ContactUuid);

/// Short code identifying the provider a channel talks to (`TG`, `WA`, `EX`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelType(String);

impl ChannelType {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChannelType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgDirection {
    #[serde(rename = "I")]
    Incoming,
    #[serde(rename = "O")]
    Outgoing,
}

impl MsgDirection {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Incoming => "I",
            Self::Outgoing => "O",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(Self::Incoming),
            "O" => Some(Self::Outgoing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgVisibility {
    #[serde(rename = "V")]
    Visible,
    #[serde(rename = "A")]
    Archived,
    #[serde(rename = "D")]
    Deleted,
}

impl MsgVisibility {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Visible => "V",
            Self::Archived => "A",
            Self::Deleted => "D",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "V" => Some(Self::Visible),
            "A" => Some(Self::Archived),
            "D" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Lifecycle status of a message.
///
/// The happy path runs `Pending → Queued → Wired → Sent → Delivered → Read`;
/// `Errored` may be retried, `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgStatus {
    #[serde(rename = "P")]
    Pending,
    #[serde(rename = "Q")]
    Queued,
    #[serde(rename = "W")]
    Wired,
    #[serde(rename = "S")]
    Sent,
    #[serde(rename = "D")]
    Delivered,
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "E")]
    Errored,
    #[serde(rename = "F")]
    Failed,
}

impl MsgStatus {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Pending => "P",
            Self::Queued => "Q",
            Self::Wired => "W",
            Self::Sent => "S",
            Self::Delivered => "D",
            Self::Read => "R",
            Self::Errored => "E",
            Self::Failed => "F",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "P" => Self::Pending,
            "Q" => Self::Queued,
            "W" => Self::Wired,
            "S" => Self::Sent,
            "D" => Self::Delivered,
            "R" => Self::Read,
            "E" => Self::Errored,
            "F" => Self::Failed,
            _ => return None,
        })
    }

    /// Whether a message in this status has left the gateway.
    pub const fn marks_sent(self) -> bool {
        matches!(self, Self::Wired | Self::Sent | Self::Delivered | Self::Read)
    }

    /// Whether a receipt carrying `next` may overwrite a message currently in `self`.
    ///
    /// Delivered and read messages never move back to an earlier state and
    /// failed messages stay failed.
    pub const fn accepts(self, next: Self) -> bool {
        match self {
            Self::Failed => false,
            Self::Read => false,
            Self::Delivered => matches!(next, Self::Read),
            _ => true,
        }
    }
}

impl FromStr for MsgStatus {
    type Err = ValidationError;

    /// Accepts both the single letter codes and the lowercase names adapters tend to use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(status) = Self::from_code(s) {
            return Ok(status);
        }
        Ok(match s.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "queued" => Self::Queued,
            "wired" => Self::Wired,
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            "read" => Self::Read,
            "errored" | "error" => Self::Errored,
            "failed" => Self::Failed,
            _ => return Err(ValidationError::UnknownStatus(s.to_string())),
        })
    }
}

impl Display for MsgStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
