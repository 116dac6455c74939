use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ChannelId, ChannelType, ChannelUuid, OrgId};

pub const CONFIG_AUTH_TOKEN: &str = "auth_token";

/// Read-only channel configuration, owned by configuration management outside
/// the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub uuid: ChannelUuid,
    pub org_id: OrgId,
    pub channel_type: ChannelType,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub schemes: Vec<String>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

impl Channel {
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn supports_scheme(&self, scheme: &str) -> bool {
        self.schemes.is_empty() || self.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme))
    }
}
