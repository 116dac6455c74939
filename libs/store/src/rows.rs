//! Explicit conversions between SQLite rows and domain values.

use std::error::Error as StdError;

use inlet_core::{
    Channel, ChannelId, ChannelType, ChannelUuid, ContactId, ContactUrnId, Msg, MsgDirection,
    MsgId, MsgStatus, MsgUuid, MsgVisibility, OrgId,
};
use rusqlite::{Error as SqlError, Row, types::Type};
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::StoreError;

/// A message as it exists in storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMsg {
    pub id: MsgId,
    pub uuid: MsgUuid,
    pub org_id: OrgId,
    pub direction: MsgDirection,
    pub status: MsgStatus,
    pub visibility: MsgVisibility,
    pub text: String,
    pub attachments: Vec<String>,
    pub external_id: Option<String>,
    pub metadata: Option<Value>,
    pub channel_id: ChannelId,
    pub contact_id: ContactId,
    pub contact_urn_id: ContactUrnId,
    pub error_count: u32,
    pub created_on: OffsetDateTime,
    pub next_attempt: OffsetDateTime,
    pub sent_on: Option<OffsetDateTime>,
    /// Why the message ended up failed, when it did.
    pub failed_reason: Option<String>,
}

impl StoredMsg {
    /// Expects the column order of `schema::MSG_COLUMNS`.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: MsgId(row.get(0)?),
            uuid: MsgUuid(uuid_col(row, 1)?),
            org_id: OrgId(row.get(2)?),
            direction: code_col(row, 3, MsgDirection::from_code)?,
            status: code_col(row, 4, MsgStatus::from_code)?,
            visibility: code_col(row, 5, MsgVisibility::from_code)?,
            text: row.get(6)?,
            attachments: json_col(row, 7)?,
            external_id: row.get(8)?,
            metadata: row
                .get::<_, Option<String>>(9)?
                .map(|raw| serde_json::from_str(&raw).map_err(|e| conversion_error(9, e)))
                .transpose()?,
            channel_id: ChannelId(row.get(10)?),
            contact_id: ContactId(row.get(11)?),
            contact_urn_id: ContactUrnId(row.get(12)?),
            error_count: row.get(13)?,
            created_on: ts_col(row, 14)?,
            next_attempt: ts_col(row, 15)?,
            sent_on: row
                .get::<_, Option<String>>(16)?
                .map(|raw| parse_ts(16, &raw))
                .transpose()?,
            failed_reason: row.get(17)?,
        })
    }
}

/// Column values for a new `msgs` row, encoded ahead of the blocking insert.
pub(crate) struct MsgInsert {
    pub uuid: String,
    pub org_id: i64,
    pub direction: &'static str,
    pub status: &'static str,
    pub visibility: &'static str,
    pub high_priority: bool,
    pub text: String,
    pub attachments: String,
    pub external_id: Option<String>,
    pub response_to_external_id: Option<String>,
    pub metadata: Option<String>,
    pub channel_id: i64,
    pub msg_count: u32,
    pub error_count: u32,
    pub created_on: String,
    pub modified_on: String,
    pub queued_on: String,
    pub next_attempt: String,
    pub sent_on: Option<String>,
    pub log_uuids: String,
}

impl MsgInsert {
    pub(crate) fn from_msg(msg: &Msg) -> Result<Self, StoreError> {
        Ok(Self {
            uuid: msg.uuid.to_string(),
            org_id: msg.org_id.get(),
            direction: msg.direction.code(),
            status: msg.status.code(),
            visibility: msg.visibility.code(),
            high_priority: msg.high_priority,
            text: msg.text.clone(),
            attachments: serde_json::to_string(&msg.attachments)?,
            external_id: msg.external_id.clone(),
            response_to_external_id: msg.response_to_external_id.clone(),
            metadata: msg.metadata.as_ref().map(serde_json::to_string).transpose()?,
            channel_id: msg.channel_id.get(),
            msg_count: msg.msg_count,
            error_count: msg.error_count,
            created_on: format_ts(msg.created_on)?,
            modified_on: format_ts(msg.modified_on)?,
            queued_on: format_ts(msg.queued_on)?,
            next_attempt: format_ts(msg.next_attempt)?,
            sent_on: msg.sent_on.map(format_ts).transpose()?,
            log_uuids: serde_json::to_string(&msg.log_uuids)?,
        })
    }
}

/// Expects the column order of `schema::CHANNEL_COLUMNS`.
pub(crate) fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: ChannelId(row.get(0)?),
        uuid: ChannelUuid(uuid_col(row, 1)?),
        org_id: OrgId(row.get(2)?),
        channel_type: ChannelType::new(row.get::<_, String>(3)?),
        name: row.get(4)?,
        address: row.get(5)?,
        country: row.get(6)?,
        schemes: json_col(row, 7)?,
        config: json_col(row, 8)?,
    })
}

pub(crate) fn format_ts(ts: OffsetDateTime) -> Result<String, StoreError> {
    ts.format(&Rfc3339)
        .map_err(|err| StoreError::Internal(format!("format timestamp: {err}")))
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| conversion_error(idx, err))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    parse_ts(idx, &row.get::<_, String>(idx)?)
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<uuid::Uuid> {
    let raw: String = row.get(idx)?;
    uuid::Uuid::parse_str(&raw).map_err(|err| conversion_error(idx, err))
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|err| conversion_error(idx, err))
}

fn code_col<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown code '{raw}'")))
}

fn conversion_error(idx: usize, err: impl Into<Box<dyn StdError + Send + Sync>>) -> SqlError {
    SqlError::FromSqlConversionFailure(idx, Type::Text, err.into())
}
