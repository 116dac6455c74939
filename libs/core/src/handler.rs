//! Capability interface implemented by provider adapters, and the registry
//! that maps channel-type codes onto them.
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::channel::Channel;
use crate::error::ValidationError;
use crate::msg::Msg;
use crate::status::StatusUpdate;
use crate::types::{ChannelType, MsgId, MsgStatus};
use crate::urn::Urn;

/// Channel type code of the built-in JSON handler.
pub const EXTERNAL_CHANNEL_TYPE: &str = "EX";

/// Events an adapter extracts from one provider callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Msg(Msg),
    Status(StatusUpdate),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler {0} does not support sending")]
    Unsupported(ChannelType),
    #[error("handler initialization failed: {0}")]
    Init(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// Outcome of an outbound send performed by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub external_id: Option<String>,
    pub status: MsgStatus,
}

#[async_trait]
pub trait ChannelHandler: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    fn name(&self) -> &str;

    fn initialize(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Parses a provider callback body into canonical events.
    fn handle_incoming(&self, channel: &Channel, body: &[u8]) -> Result<Vec<Incoming>, ValidationError>;

    async fn send(&self, _channel: &Channel, _msg: &Msg) -> Result<SendResult, HandlerError> {
        Err(HandlerError::Unsupported(self.channel_type()))
    }

    /// Optional provider lookup of display details for an address.
    async fn describe_address(&self, _channel: &Channel, _urn: &Urn) -> Option<BTreeMap<String, String>> {
        None
    }
}

pub type SharedHandler = Arc<dyn ChannelHandler>;

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<ChannelType, SharedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers installed.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ExternalHandler));
        registry
    }

    pub fn register(&mut self, handler: SharedHandler) -> Option<SharedHandler> {
        self.handlers.insert(handler.channel_type(), handler)
    }

    pub fn get(&self, channel_type: &ChannelType) -> Option<SharedHandler> {
        self.handlers.get(channel_type).cloned()
    }

    /// Runs `initialize` on every handler, stopping at the first failure.
    pub fn initialize_all(&self) -> Result<(), HandlerError> {
        self.handlers.values().try_for_each(|h| h.initialize())
    }

    pub fn channel_types(&self) -> Vec<ChannelType> {
        self.handlers.keys().cloned().collect()
    }
}

/// Wire form accepted by [`ExternalHandler`].
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ExternalPayload {
    Msg {
        from: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        attachments: Vec<String>,
        #[serde(default)]
        external_id: Option<String>,
        #[serde(default)]
        response_to_external_id: Option<String>,
        #[serde(default)]
        contact_name: Option<String>,
        #[serde(default)]
        urn_auth: Option<String>,
        #[serde(default)]
        metadata: Option<Value>,
        #[serde(default, with = "time::serde::rfc3339::option")]
        received_on: Option<OffsetDateTime>,
    },
    Status {
        #[serde(default)]
        id: Option<i64>,
        #[serde(default)]
        external_id: Option<String>,
        status: String,
        #[serde(default)]
        to: Option<String>,
    },
}

impl ExternalPayload {
    fn into_incoming(self, channel: &Channel) -> Result<Incoming, ValidationError> {
        match self {
            Self::Msg {
                from,
                text,
                attachments,
                external_id,
                response_to_external_id,
                contact_name,
                urn_auth,
                metadata,
                received_on,
            } => {
                if from.trim().is_empty() {
                    return Err(ValidationError::MissingField("from"));
                }
                let urn = parse_address(channel, &from)?;
                let mut msg = Msg::new_incoming(channel, urn, text)
                    .with_received_on(received_on.unwrap_or_else(OffsetDateTime::now_utc));
                msg.attachments = attachments;
                if let Some(id) = external_id {
                    msg = msg.with_external_id(id);
                }
                if let Some(id) = response_to_external_id {
                    msg = msg.with_response_to_external_id(id);
                }
                if let Some(name) = contact_name {
                    msg = msg.with_contact_name(name);
                }
                if let Some(auth) = urn_auth {
                    msg = msg.with_urn_auth(auth);
                }
                if let Some(metadata) = metadata {
                    msg = msg.with_metadata(metadata);
                }
                Ok(Incoming::Msg(msg))
            }
            Self::Status {
                id,
                external_id,
                status,
                to,
            } => {
                let status: MsgStatus = status.parse()?;
                let mut update = match (id, external_id.filter(|e| !e.is_empty())) {
                    (Some(id), _) => StatusUpdate::for_id(channel, MsgId(id), status),
                    (None, Some(ext)) => StatusUpdate::for_external_id(channel, ext, status),
                    (None, None) => return Err(ValidationError::MissingField("external_id")),
                };
                if let Some(to) = to.filter(|t| !t.trim().is_empty()) {
                    update = update.with_urn(parse_address(channel, &to)?);
                }
                Ok(Incoming::Status(update))
            }
        }
    }
}

/// Addresses without a scheme are taken as phone numbers.
fn parse_address(channel: &Channel, raw: &str) -> Result<Urn, ValidationError> {
    let urn = if raw.contains(':') {
        Urn::parse(raw)?
    } else {
        Urn::from_parts(crate::urn::TEL_SCHEME, raw)?
    };
    if !channel.supports_scheme(urn.scheme()) {
        return Err(ValidationError::InvalidUrn {
            urn: urn.to_string(),
            reason: "scheme not supported by channel",
        });
    }
    Ok(urn)
}

/// Generic handler accepting canonical JSON, either a single event object or
/// an array of them.
pub struct ExternalHandler;

#[async_trait]
impl ChannelHandler for ExternalHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::new(EXTERNAL_CHANNEL_TYPE)
    }

    fn name(&self) -> &str {
        "External API"
    }

    fn handle_incoming(&self, channel: &Channel, body: &[u8]) -> Result<Vec<Incoming>, ValidationError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| ValidationError::Payload(e.to_string()))?;
        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        if items.is_empty() {
            return Err(ValidationError::Payload("no events in request".into()));
        }
        items
            .into_iter()
            .map(|item| {
                let payload: ExternalPayload = serde_json::from_value(item)
                    .map_err(|e| ValidationError::Payload(e.to_string()))?;
                payload.into_incoming(channel)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusRef;
    use crate::types::{ChannelId, ChannelUuid, OrgId};

    fn channel() -> Channel {
        Channel {
            id: ChannelId(3),
            uuid: ChannelUuid::new(),
            org_id: OrgId(1),
            channel_type: ChannelType::new(EXTERNAL_CHANNEL_TYPE),
            name: "ext".into(),
            address: "2020".into(),
            country: None,
            schemes: vec!["tel".into()],
            config: BTreeMap::new(),
        }
    }

    #[test]
    fn parses_messages_and_statuses() {
        let handler = ExternalHandler;
        let body = serde_json::json!([
            {"kind": "msg", "from": "+1 555 1234", "text": "hi", "external_id": "e1", "contact_name": "Bob"},
            {"kind": "status", "external_id": "e9", "status": "delivered", "to": "+15551234"}
        ]);
        let events = handler
            .handle_incoming(&channel(), body.to_string().as_bytes())
            .unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            Incoming::Msg(msg) => {
                assert_eq!(msg.urn.as_str(), "tel:+15551234");
                assert_eq!(msg.text, "hi");
                assert_eq!(msg.external_id.as_deref(), Some("e1"));
                assert_eq!(msg.contact_name.as_deref(), Some("Bob"));
                assert!(msg.sent_on.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[1] {
            Incoming::Status(status) => {
                assert_eq!(status.reference, StatusRef::ExternalId("e9".into()));
                assert_eq!(status.status, MsgStatus::Delivered);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_payloads() {
        let handler = ExternalHandler;
        let ch = channel();
        assert!(handler.handle_incoming(&ch, b"not json").is_err());
        assert!(handler.handle_incoming(&ch, b"[]").is_err());
        let missing = serde_json::json!({"kind": "msg", "from": "", "text": "x"});
        assert_eq!(
            handler.handle_incoming(&ch, missing.to_string().as_bytes()),
            Err(ValidationError::MissingField("from"))
        );
        let unsupported = serde_json::json!({"kind": "msg", "from": "telegram:1", "text": "x"});
        assert!(handler.handle_incoming(&ch, unsupported.to_string().as_bytes()).is_err());
    }

    #[tokio::test]
    async fn registry_resolves_by_channel_type() {
        let registry = HandlerRegistry::with_builtin();
        assert!(registry.initialize_all().is_ok());
        let handler = registry.get(&ChannelType::new("ex")).expect("builtin handler");
        assert_eq!(handler.name(), "External API");
        let msg = Msg::new_incoming(&channel(), Urn::parse("tel:+1").unwrap(), "x");
        assert!(matches!(
            handler.send(&channel(), &msg).await,
            Err(HandlerError::Unsupported(_))
        ));
        assert!(registry.get(&ChannelType::new("TG")).is_none());
    }
}
