use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::channel::Channel;
use crate::types::{ChannelId, ChannelUuid, MsgId, MsgStatus};
use crate::urn::Urn;

/// How a delivery receipt points at the message it describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusRef {
    Id(MsgId),
    ExternalId(String),
}

impl Display for StatusRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{id}"),
            Self::ExternalId(ext) => write!(f, "external_id:{ext}"),
        }
    }
}

/// A delivery receipt for an outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub uuid: Uuid,
    pub channel_id: ChannelId,
    pub channel_uuid: ChannelUuid,
    pub reference: StatusRef,
    pub status: MsgStatus,
    /// Recipient address the provider reported, when it includes one.
    #[serde(default)]
    pub urn: Option<Urn>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,
}

impl StatusUpdate {
    pub fn for_id(channel: &Channel, id: MsgId, status: MsgStatus) -> Self {
        Self::new(channel, StatusRef::Id(id), status)
    }

    pub fn for_external_id(channel: &Channel, external_id: impl Into<String>, status: MsgStatus) -> Self {
        Self::new(channel, StatusRef::ExternalId(external_id.into()), status)
    }

    fn new(channel: &Channel, reference: StatusRef, status: MsgStatus) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            channel_id: channel.id,
            channel_uuid: channel.uuid,
            reference,
            status,
            urn: None,
            created_on: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_urn(mut self, urn: Urn) -> Self {
        self.urn = Some(urn);
        self
    }

    /// Dedup key: channel, sender identity and the provider's reference.
    pub fn fingerprint(&self) -> String {
        let identity = self.urn.as_ref().map(Urn::identity).unwrap_or_default();
        let reference = match &self.reference {
            StatusRef::Id(id) => format!("#{id}"),
            StatusRef::ExternalId(ext) => ext.clone(),
        };
        format!("{}:{}|{}", self.channel_uuid, identity, reference)
    }
}
