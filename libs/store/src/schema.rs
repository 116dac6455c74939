pub(crate) const CREATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS channels (
    id INTEGER PRIMARY KEY,
    uuid TEXT NOT NULL UNIQUE,
    org_id INTEGER NOT NULL,
    channel_type TEXT NOT NULL,
    name TEXT NOT NULL,
    address TEXT NOT NULL,
    country TEXT,
    schemes TEXT NOT NULL DEFAULT '[]',
    config TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS contacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    org_id INTEGER NOT NULL,
    name TEXT,
    created_on TEXT NOT NULL,
    modified_on TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS contact_urns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    identity TEXT NOT NULL,
    scheme TEXT NOT NULL,
    path TEXT NOT NULL,
    display TEXT,
    auth TEXT,
    contact_id INTEGER REFERENCES contacts(id),
    channel_id INTEGER REFERENCES channels(id),
    UNIQUE (org_id, identity)
);

CREATE TABLE IF NOT EXISTS msgs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL,
    org_id INTEGER NOT NULL,
    direction TEXT NOT NULL,
    status TEXT NOT NULL,
    visibility TEXT NOT NULL,
    high_priority INTEGER NOT NULL DEFAULT 0,
    text TEXT NOT NULL,
    attachments TEXT NOT NULL DEFAULT '[]',
    external_id TEXT,
    response_to_external_id TEXT,
    metadata TEXT,
    channel_id INTEGER NOT NULL REFERENCES channels(id),
    contact_id INTEGER NOT NULL REFERENCES contacts(id),
    contact_urn_id INTEGER NOT NULL REFERENCES contact_urns(id),
    msg_count INTEGER NOT NULL DEFAULT 1,
    error_count INTEGER NOT NULL DEFAULT 0,
    created_on TEXT NOT NULL,
    modified_on TEXT NOT NULL,
    queued_on TEXT NOT NULL,
    next_attempt TEXT NOT NULL,
    sent_on TEXT,
    log_uuids TEXT NOT NULL DEFAULT '[]',
    failed_reason TEXT
);

CREATE INDEX IF NOT EXISTS msgs_uuid_idx ON msgs (uuid);
CREATE INDEX IF NOT EXISTS msgs_channel_external_idx ON msgs (channel_id, external_id);
"#;

pub(crate) const MSG_COLUMNS: &str = "id, uuid, org_id, direction, status, visibility, text, \
     attachments, external_id, metadata, channel_id, contact_id, contact_urn_id, error_count, \
     created_on, next_attempt, sent_on, failed_reason";

pub(crate) const CHANNEL_COLUMNS: &str =
    "id, uuid, org_id, channel_type, name, address, country, schemes, config";
