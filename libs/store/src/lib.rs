//! Persistence for the ingestion pipeline.
//!
//! The store owns three concerns that must share a transaction: channel
//! lookup, contact resolution and message/receipt writes. A brand-new inbound
//! message and the contact it references are committed together, so a stored
//! message never points at a contact that does not exist.

use std::sync::Arc;

use async_trait::async_trait;
use inlet_core::{
    Channel, ChannelUuid, ContactId, ContactUrnId, ContactUuid, Msg, MsgId, MsgStatus, MsgUuid,
    OrgId, StatusRef, StatusUpdate, Urn,
};
use thiserror::Error;

pub mod rows;
mod schema;
mod sqlite;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use rows::StoredMsg;
pub use sqlite::{FAILED_ERROR_LIMIT, SqliteStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("no message matches {0}")]
    MsgNotFound(StatusRef),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("unable to encode column: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::MsgNotFound(_))
    }
}

/// Input to contact resolution.
#[derive(Debug, Clone)]
pub struct ContactRequest {
    pub org_id: OrgId,
    pub channel: Channel,
    pub urn: Urn,
    pub auth: Option<String>,
    pub name: Option<String>,
}

impl ContactRequest {
    pub fn for_msg(channel: &Channel, msg: &Msg) -> Self {
        Self {
            org_id: msg.org_id,
            channel: channel.clone(),
            urn: msg.urn.clone(),
            auth: msg.urn_auth.clone(),
            name: msg.contact_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedContact {
    pub contact_id: ContactId,
    pub contact_uuid: ContactUuid,
    pub urn_id: ContactUrnId,
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedMsg {
    pub id: MsgId,
    pub contact: ResolvedContact,
}

/// Result of applying a delivery receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusOutcome {
    pub msg_id: MsgId,
    /// Status the message holds after the call.
    pub status: MsgStatus,
    /// False when the receipt would have regressed the message and was ignored.
    pub applied: bool,
}

#[async_trait]
pub trait ChannelSource: Send + Sync {
    async fn channel_by_uuid(&self, uuid: ChannelUuid) -> Result<Option<Channel>, StoreError>;
}

#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// Finds or creates the contact owning `req.urn`. Concurrent calls for the
    /// same address converge on one contact.
    async fn resolve_contact(&self, req: ContactRequest) -> Result<ResolvedContact, StoreError>;
}

#[async_trait]
pub trait MessageStore: ChannelSource + ContactResolver {
    /// Resolves the sender and inserts `msg` in one transaction, assigning its
    /// durable id. Not idempotent on the message UUID.
    async fn insert_msg(&self, channel: &Channel, msg: &Msg) -> Result<InsertedMsg, StoreError>;

    async fn msg_id_for_uuid(&self, uuid: MsgUuid) -> Result<Option<MsgId>, StoreError>;

    async fn msg_by_id(&self, id: MsgId) -> Result<Option<StoredMsg>, StoreError>;

    async fn update_status(&self, status: &StatusUpdate) -> Result<StatusOutcome, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn MessageStore>;
