//! Inlet core contracts and value types.
//!
//! This crate holds the canonical message, delivery receipt, channel and
//! contact address types exchanged between provider adapters and the
//! ingestion pipeline, plus the error taxonomy surfaced to adapters.
pub mod attachment;
pub mod channel;
pub mod error;
pub mod handler;
pub mod msg;
pub mod status;
pub mod types;
pub mod urn;

pub use channel::Channel;
pub use error::{IngestError, ValidationError};
pub use handler::{
    ChannelHandler, EXTERNAL_CHANNEL_TYPE, ExternalHandler, HandlerError, HandlerRegistry,
    Incoming, SendResult, SharedHandler,
};
pub use msg::Msg;
pub use status::{StatusRef, StatusUpdate};
pub use types::*;
pub use urn::Urn;
