//! The canonical message representation built by adapters and persisted by the store.
//!
//! The serde form of [`Msg`] is also the spool document, so fields are only
//! ever added with `#[serde(default)]`.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::channel::Channel;
use crate::types::{
    ChannelId, ChannelUuid, ContactId, ContactUrnId, MsgDirection, MsgId, MsgStatus, MsgUuid,
    MsgVisibility, OrgId,
};
use crate::urn::Urn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    pub org_id: OrgId,
    #[serde(default)]
    pub id: Option<MsgId>,
    pub uuid: MsgUuid,
    pub direction: MsgDirection,
    pub status: MsgStatus,
    pub visibility: MsgVisibility,
    #[serde(default)]
    pub high_priority: bool,
    pub urn: Urn,
    #[serde(default)]
    pub urn_auth: Option<String>,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub response_to_external_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,

    pub channel_id: ChannelId,
    pub channel_uuid: ChannelUuid,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    #[serde(default)]
    pub contact_urn_id: Option<ContactUrnId>,
    #[serde(default)]
    pub contact_name: Option<String>,

    pub msg_count: u32,
    #[serde(default)]
    pub error_count: u32,

    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_on: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub queued_on: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub next_attempt: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub sent_on: Option<OffsetDateTime>,
    #[serde(default)]
    pub log_uuids: Vec<Uuid>,

    /// Set when the dedup check matched a previous submission; writing such a
    /// message is a no-op.
    #[serde(skip)]
    already_written: bool,
}

impl Msg {
    /// Builds a new incoming message received on `channel` from `urn`.
    pub fn new_incoming(channel: &Channel, urn: Urn, text: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            org_id: channel.org_id,
            id: None,
            uuid: MsgUuid::new(),
            direction: MsgDirection::Incoming,
            status: MsgStatus::Pending,
            visibility: MsgVisibility::Visible,
            high_priority: false,
            urn,
            urn_auth: None,
            text: text.into(),
            attachments: Vec::new(),
            external_id: None,
            response_to_external_id: None,
            metadata: None,
            channel_id: channel.id,
            channel_uuid: channel.uuid,
            contact_id: None,
            contact_urn_id: None,
            contact_name: None,
            msg_count: 1,
            error_count: 0,
            created_on: now,
            modified_on: now,
            queued_on: now,
            next_attempt: now,
            sent_on: None,
            log_uuids: Vec::new(),
            already_written: false,
        }
    }

    pub const fn already_written(&self) -> bool {
        self.already_written
    }

    /// Marks this message as a duplicate of `uuid`, which was already stored.
    pub fn mark_duplicate_of(&mut self, uuid: MsgUuid) {
        self.uuid = uuid;
        self.already_written = true;
    }

    /// Dedup key for incoming messages: channel plus sender identity.
    pub fn fingerprint(&self) -> String {
        format!("{}:{}", self.channel_uuid, self.urn.identity())
    }

    /// Dedup key that additionally scopes by the provider's external id.
    pub fn external_fingerprint(&self) -> String {
        format!(
            "{}:{}|{}",
            self.channel_uuid,
            self.urn.identity(),
            self.external_id.as_deref().unwrap_or_default()
        )
    }

    pub fn quick_replies(&self) -> Vec<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("quick_replies"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn topic(&self) -> Option<&str> {
        self.metadata_str("topic")
    }

    pub fn locale(&self) -> Option<&str> {
        self.metadata_str("locale")
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }

    pub fn with_contact_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.contact_name = (!name.trim().is_empty()).then_some(name);
        self
    }

    pub fn with_received_on(mut self, on: OffsetDateTime) -> Self {
        self.sent_on = Some(on);
        self
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.external_id = (!id.is_empty()).then_some(id);
        self
    }

    pub fn with_response_to_external_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.response_to_external_id = (!id.is_empty()).then_some(id);
        self
    }

    pub fn with_uuid(mut self, uuid: MsgUuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = (!metadata.is_null()).then_some(metadata);
        self
    }

    pub fn with_attachment(mut self, attachment: impl Into<String>) -> Self {
        self.attachments.push(attachment.into());
        self
    }

    pub fn with_urn_auth(mut self, auth: impl Into<String>) -> Self {
        let auth = auth.into();
        self.urn_auth = (!auth.is_empty()).then_some(auth);
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::{ChannelType, ChannelUuid};

    fn channel() -> Channel {
        Channel {
            id: ChannelId(7),
            uuid: ChannelUuid::new(),
            org_id: OrgId(1),
            channel_type: ChannelType::new("EX"),
            name: "External".into(),
            address: "+1234".into(),
            country: Some("US".into()),
            schemes: vec!["tel".into()],
            config: BTreeMap::new(),
        }
    }

    #[test]
    fn fingerprints_scope_by_channel_and_identity() {
        let ch = channel();
        let urn = Urn::parse("tel:+15551234#Bob").unwrap();
        let msg = Msg::new_incoming(&ch, urn, "hi").with_external_id("ext-1");
        assert_eq!(msg.fingerprint(), format!("{}:tel:+15551234", ch.uuid));
        assert_eq!(
            msg.external_fingerprint(),
            format!("{}:tel:+15551234|ext-1", ch.uuid)
        );
    }

    #[test]
    fn spool_document_preserves_message() {
        let ch = channel();
        let msg = Msg::new_incoming(&ch, Urn::parse("tel:+15551234").unwrap(), "hello ✓")
            .with_attachment("image/png:https://example.com/a.png")
            .with_metadata(serde_json::json!({"quick_replies": ["yes", "no"], "locale": "eng"}));
        let raw = serde_json::to_vec(&msg).unwrap();
        let back: Msg = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back.text, msg.text);
        assert_eq!(back.attachments, msg.attachments);
        assert_eq!(back.uuid, msg.uuid);
        assert_eq!(back.quick_replies(), vec!["yes", "no"]);
        assert_eq!(back.locale(), Some("eng"));
        assert!(back.topic().is_none());
        assert!(!back.already_written());
    }

    #[test]
    fn marking_duplicate_adopts_previous_uuid() {
        let mut msg = Msg::new_incoming(&channel(), Urn::parse("tel:+1555").unwrap(), "hi");
        let prev = MsgUuid::new();
        msg.mark_duplicate_of(prev);
        assert_eq!(msg.uuid, prev);
        assert!(msg.already_written());
    }
}
