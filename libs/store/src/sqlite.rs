use std::{
    path::Path,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use inlet_core::{
    Channel, ChannelUuid, ContactId, ContactUrnId, ContactUuid, Msg, MsgId, MsgStatus, MsgUuid,
    StatusRef, StatusUpdate,
};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use time::OffsetDateTime;
use tokio::task::spawn_blocking;
use tracing::{debug, instrument};

use crate::rows::{MsgInsert, StoredMsg, channel_from_row, format_ts, parse_ts};
use crate::schema::{CHANNEL_COLUMNS, CREATE_SCHEMA_SQL, MSG_COLUMNS};
use crate::{
    ChannelSource, ContactRequest, ContactResolver, InsertedMsg, MessageStore, ResolvedContact,
    StatusOutcome, StoreError,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_RETRY_MINUTES: i64 = 5;
const MAX_ERROR_COUNT: u32 = 3;
/// Recorded in `failed_reason` when errors exhaust the retry budget.
pub const FAILED_ERROR_LIMIT: &str = "error_limit";

/// SQLite-backed store. Cloning shares the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<StdMutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(CREATE_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, func: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Internal("connection mutex poisoned".into()))?;
            func(&mut guard)
        })
        .await
        .map_err(|err| StoreError::Internal(err.to_string()))?
    }

    /// Inserts or replaces a channel row. Channels are owned by configuration
    /// management; this is its write path.
    pub async fn add_channel(&self, channel: &Channel) -> Result<(), StoreError> {
        let channel = channel.clone();
        let schemes = serde_json::to_string(&channel.schemes)?;
        let config = serde_json::to_string(&channel.config)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO channels (id, uuid, org_id, channel_type, name, address, country, schemes, config)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET uuid = excluded.uuid, org_id = excluded.org_id,
                 channel_type = excluded.channel_type, name = excluded.name,
                 address = excluded.address, country = excluded.country,
                 schemes = excluded.schemes, config = excluded.config",
                params![
                    channel.id.get(),
                    channel.uuid.to_string(),
                    channel.org_id.get(),
                    channel.channel_type.as_str(),
                    channel.name,
                    channel.address,
                    channel.country,
                    schemes,
                    config,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn count_msgs_with_uuid(&self, uuid: MsgUuid) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM msgs WHERE uuid = ?1",
                params![uuid.to_string()],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    pub async fn count_msgs(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM msgs", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }
}

fn resolve_in_tx(
    tx: &Transaction<'_>,
    req: &ContactRequest,
    now: &str,
) -> Result<ResolvedContact, StoreError> {
    let identity = req.urn.identity();
    let org_id = req.org_id.get();
    tx.execute(
        "INSERT INTO contact_urns (org_id, identity, scheme, path, display, auth, channel_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (org_id, identity) DO NOTHING",
        params![
            org_id,
            identity,
            req.urn.scheme(),
            req.urn.path(),
            req.urn.display(),
            req.auth,
            req.channel.id.get(),
        ],
    )?;
    let (urn_id, owner): (i64, Option<i64>) = tx.query_row(
        "SELECT id, contact_id FROM contact_urns WHERE org_id = ?1 AND identity = ?2",
        params![org_id, identity],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    if let Some(auth) = req.auth.as_deref() {
        tx.execute(
            "UPDATE contact_urns SET auth = ?1 WHERE id = ?2 AND auth IS NOT ?1",
            params![auth, urn_id],
        )?;
    }

    let (contact_id, is_new) = match owner {
        Some(id) => (id, false),
        None => {
            tx.execute(
                "INSERT INTO contacts (uuid, org_id, name, created_on, modified_on)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![ContactUuid::new().to_string(), org_id, req.name, now],
            )?;
            let created = tx.last_insert_rowid();
            let claimed = tx.execute(
                "UPDATE contact_urns SET contact_id = ?1 WHERE id = ?2 AND contact_id IS NULL",
                params![created, urn_id],
            )?;
            if claimed == 1 {
                (created, true)
            } else {
                // another writer attached the address first
                tx.execute("DELETE FROM contacts WHERE id = ?1", params![created])?;
                let owner: i64 = tx.query_row(
                    "SELECT contact_id FROM contact_urns WHERE id = ?1",
                    params![urn_id],
                    |row| row.get(0),
                )?;
                (owner, false)
            }
        }
    };

    let (uuid, name): (String, Option<String>) = tx.query_row(
        "SELECT uuid, name FROM contacts WHERE id = ?1",
        params![contact_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let new_name = req.name.as_deref().filter(|n| !n.trim().is_empty());
    if let (None, Some(new_name)) = (name.filter(|n| !n.is_empty()), new_name) {
        tx.execute(
            "UPDATE contacts SET name = ?1, modified_on = ?2 WHERE id = ?3",
            params![new_name, now, contact_id],
        )?;
    }

    Ok(ResolvedContact {
        contact_id: ContactId(contact_id),
        contact_uuid: uuid
            .parse()
            .map_err(|err| StoreError::Internal(format!("contact {contact_id} uuid: {err}")))?,
        urn_id: ContactUrnId(urn_id),
        is_new,
    })
}

/// The status-relevant columns of a message targeted by a receipt.
#[derive(Debug, Clone, Copy)]
struct CurrentStatus {
    id: MsgId,
    status: MsgStatus,
    error_count: u32,
    sent_on: Option<OffsetDateTime>,
}

impl CurrentStatus {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let raw: String = row.get(1)?;
        let status = MsgStatus::from_code(&raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown status '{raw}'").into(),
            )
        })?;
        Ok(Self {
            id: MsgId(row.get(0)?),
            status,
            error_count: row.get(2)?,
            sent_on: row
                .get::<_, Option<String>>(3)?
                .map(|raw| parse_ts(3, &raw))
                .transpose()?,
        })
    }

    fn transition(&self, next: MsgStatus, now: OffsetDateTime) -> Transition {
        let mut out = Transition {
            status: next,
            error_count: self.error_count,
            next_attempt: None,
            sent_on: self.sent_on,
            failed_reason: None,
        };
        if next == MsgStatus::Errored {
            out.error_count += 1;
            out.next_attempt =
                Some(now + time::Duration::minutes(ERROR_RETRY_MINUTES * i64::from(out.error_count)));
            if out.error_count >= MAX_ERROR_COUNT {
                out.status = MsgStatus::Failed;
                out.failed_reason = Some(FAILED_ERROR_LIMIT);
            }
        }
        if next.marks_sent() && out.sent_on.is_none() {
            out.sent_on = Some(now);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    status: MsgStatus,
    error_count: u32,
    next_attempt: Option<OffsetDateTime>,
    sent_on: Option<OffsetDateTime>,
    failed_reason: Option<&'static str>,
}

#[async_trait]
impl ChannelSource for SqliteStore {
    async fn channel_by_uuid(&self, uuid: ChannelUuid) -> Result<Option<Channel>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE uuid = ?1");
            Ok(conn
                .query_row(&sql, params![uuid.to_string()], channel_from_row)
                .optional()?)
        })
        .await
    }
}

#[async_trait]
impl ContactResolver for SqliteStore {
    #[instrument(name = "store.resolve_contact", skip(self, req), fields(urn = %req.urn))]
    async fn resolve_contact(&self, req: ContactRequest) -> Result<ResolvedContact, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = format_ts(OffsetDateTime::now_utc())?;
            let resolved = resolve_in_tx(&tx, &req, &now)?;
            tx.commit()?;
            Ok(resolved)
        })
        .await
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    #[instrument(
        name = "store.insert_msg",
        skip(self, channel, msg),
        fields(msg_uuid = %msg.uuid, channel_uuid = %channel.uuid)
    )]
    async fn insert_msg(&self, channel: &Channel, msg: &Msg) -> Result<InsertedMsg, StoreError> {
        let req = ContactRequest::for_msg(channel, msg);
        let row = MsgInsert::from_msg(msg)?;
        let inserted = self
            .with_conn(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let now = format_ts(OffsetDateTime::now_utc())?;
                let contact = resolve_in_tx(&tx, &req, &now)?;
                tx.execute(
                    "INSERT INTO msgs (uuid, org_id, direction, status, visibility, high_priority,
                     text, attachments, external_id, response_to_external_id, metadata, channel_id,
                     contact_id, contact_urn_id, msg_count, error_count, created_on, modified_on,
                     queued_on, next_attempt, sent_on, log_uuids)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                    params![
                        row.uuid,
                        row.org_id,
                        row.direction,
                        row.status,
                        row.visibility,
                        row.high_priority,
                        row.text,
                        row.attachments,
                        row.external_id,
                        row.response_to_external_id,
                        row.metadata,
                        row.channel_id,
                        contact.contact_id.get(),
                        contact.urn_id.get(),
                        row.msg_count,
                        row.error_count,
                        row.created_on,
                        row.modified_on,
                        row.queued_on,
                        row.next_attempt,
                        row.sent_on,
                        row.log_uuids,
                    ],
                )?;
                let id = MsgId(tx.last_insert_rowid());
                tx.commit()?;
                Ok(InsertedMsg { id, contact })
            })
            .await?;
        debug!(msg_id = inserted.id.get(), new_contact = inserted.contact.is_new, "message inserted");
        Ok(inserted)
    }

    async fn msg_id_for_uuid(&self, uuid: MsgUuid) -> Result<Option<MsgId>, StoreError> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM msgs WHERE uuid = ?1 ORDER BY id LIMIT 1",
                    params![uuid.to_string()],
                    |row| row.get(0).map(MsgId),
                )
                .optional()?)
        })
        .await
    }

    async fn msg_by_id(&self, id: MsgId) -> Result<Option<StoredMsg>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {MSG_COLUMNS} FROM msgs WHERE id = ?1");
            Ok(conn
                .query_row(&sql, params![id.get()], StoredMsg::from_row)
                .optional()?)
        })
        .await
    }

    #[instrument(
        name = "store.update_status",
        skip(self, status),
        fields(reference = %status.reference, status = %status.status)
    )]
    async fn update_status(&self, status: &StatusUpdate) -> Result<StatusOutcome, StoreError> {
        let status = status.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = match &status.reference {
                StatusRef::Id(id) => tx
                    .query_row(
                        "SELECT id, status, error_count, sent_on FROM msgs
                         WHERE id = ?1 AND channel_id = ?2 AND direction = 'O'",
                        params![id.get(), status.channel_id.get()],
                        CurrentStatus::from_row,
                    )
                    .optional()?,
                StatusRef::ExternalId(ext) => tx
                    .query_row(
                        "SELECT id, status, error_count, sent_on FROM msgs
                         WHERE channel_id = ?1 AND external_id = ?2 AND direction = 'O'
                         ORDER BY id DESC LIMIT 1",
                        params![status.channel_id.get(), ext],
                        CurrentStatus::from_row,
                    )
                    .optional()?,
            };
            let Some(current) = current else {
                return Err(StoreError::MsgNotFound(status.reference.clone()));
            };
            if !current.status.accepts(status.status) {
                debug!(current = %current.status, "ignoring status regression");
                return Ok(StatusOutcome {
                    msg_id: current.id,
                    status: current.status,
                    applied: false,
                });
            }

            let now = OffsetDateTime::now_utc();
            let next = current.transition(status.status, now);
            tx.execute(
                "UPDATE msgs SET status = ?1, error_count = ?2,
                 next_attempt = COALESCE(?3, next_attempt), sent_on = ?4, modified_on = ?5,
                 failed_reason = COALESCE(?6, failed_reason)
                 WHERE id = ?7",
                params![
                    next.status.code(),
                    next.error_count,
                    next.next_attempt.map(format_ts).transpose()?,
                    next.sent_on.map(format_ts).transpose()?,
                    format_ts(now)?,
                    next.failed_reason,
                    current.id.get(),
                ],
            )?;
            tx.commit()?;
            Ok(StatusOutcome {
                msg_id: current.id,
                status: next.status,
                applied: true,
            })
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}
