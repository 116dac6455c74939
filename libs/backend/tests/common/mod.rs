#![allow(dead_code)]

use std::{collections::BTreeMap, sync::Arc};

use inlet_backend::{Backend, BackendConfig, BackendParts, FsBlobStore};
use inlet_bus::{InMemoryBusClient, WorkQueue};
use inlet_core::{Channel, ChannelId, ChannelType, ChannelUuid, Msg, OrgId, Urn};
use inlet_fingerprint::FingerprintCache;
use inlet_spool::Spool;
use inlet_store::{SqliteStore, testkit::ToggleStore};
use tempfile::TempDir;

pub const SENDER: &str = "tel:+15551234";
pub const MEDIA_BASE: &str = "https://media.test";

pub struct Harness {
    pub backend: Backend,
    pub sqlite: SqliteStore,
    pub store: ToggleStore<SqliteStore>,
    pub bus: InMemoryBusClient,
    pub blobs: FsBlobStore,
    pub spool: Spool,
    pub channel: Channel,
    pub config: BackendConfig,
    pub dir: TempDir,
}

impl Harness {
    pub fn msg(&self, text: &str) -> Msg {
        Msg::new_incoming(&self.channel, Urn::parse(SENDER).unwrap(), text)
    }
}

pub fn channel() -> Channel {
    Channel {
        id: ChannelId(1),
        uuid: ChannelUuid::new(),
        org_id: OrgId(42),
        channel_type: ChannelType::new("EX"),
        name: "External".into(),
        address: "2020".into(),
        country: Some("US".into()),
        schemes: vec!["tel".into()],
        config: BTreeMap::new(),
    }
}

pub async fn harness() -> Harness {
    harness_with(BackendConfig::default()).await
}

pub async fn harness_with(mut config: BackendConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    config.db_path = dir.path().join("inlet.db");
    config.spool_dir = dir.path().join("spool");
    config.blob_dir = dir.path().join("media");
    config.blob_base_url = MEDIA_BASE.into();

    let sqlite = SqliteStore::open(&config.db_path).unwrap();
    let channel = channel();
    sqlite.add_channel(&channel).await.unwrap();
    let store = ToggleStore::new(sqlite.clone());
    let bus = InMemoryBusClient::default();
    let spool = Spool::open(&config.spool_dir).await.unwrap();
    let blobs = FsBlobStore::new(&config.blob_dir, &config.blob_base_url);

    let backend = Backend::new(
        BackendParts {
            store: Arc::new(store.clone()),
            fingerprints: FingerprintCache::in_memory(&config.fingerprint),
            spool: spool.clone(),
            queue: WorkQueue::new(Arc::new(bus.clone()), &config.work_queue),
            blobs: Arc::new(blobs.clone()),
        },
        &config,
    );

    Harness {
        backend,
        sqlite,
        store,
        bus,
        blobs,
        spool,
        channel,
        config,
        dir,
    }
}
