use std::sync::Arc;

use anyhow::{Context, Result};
use axum::serve;
use inlet_backend::{Backend, BackendParts, FsBlobStore};
use inlet_bus::{InMemoryBusClient, NatsBusClient, SharedBus, WorkQueue};
use inlet_core::HandlerRegistry;
use inlet_fingerprint::{FingerprintCache, NatsKvFingerprintStore};
use inlet_spool::Spool;
use inlet_store::{SharedStore, SqliteStore};
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use crate::channels::ChannelCache;
use crate::config::GatewayConfig;
use crate::http::{GatewayState, build_router};

/// Assembles the pipeline from `config` and serves until ctrl-c.
pub async fn run(config: GatewayConfig) -> Result<()> {
    let backend_cfg = &config.backend;

    let sqlite = SqliteStore::open(&backend_cfg.db_path)
        .with_context(|| format!("unable to open store at {}", backend_cfg.db_path.display()))?;
    let seeds = config.load_channels()?;
    for channel in &seeds {
        sqlite
            .add_channel(channel)
            .await
            .with_context(|| format!("unable to seed channel {}", channel.uuid))?;
    }
    let store: SharedStore = Arc::new(sqlite);

    let (bus, fingerprints): (SharedBus, FingerprintCache) = match &config.nats_url {
        Some(url) => {
            let client = async_nats::connect(url.as_str())
                .await
                .with_context(|| format!("unable to connect to NATS at {url}"))?;
            let js = async_nats::jetstream::new(client.clone());
            let kv = NatsKvFingerprintStore::new(
                &js,
                &backend_cfg.fingerprint.namespace,
                backend_cfg.fingerprint.window,
            )
            .await
            .context("unable to open fingerprint bucket")?;
            (
                Arc::new(NatsBusClient::new(client)),
                FingerprintCache::new(Arc::new(kv), &backend_cfg.fingerprint),
            )
        }
        None => {
            warn!("NATS_URL not set; using in-process work queue and fingerprint cache");
            (
                Arc::new(InMemoryBusClient::default()),
                FingerprintCache::in_memory(&backend_cfg.fingerprint),
            )
        }
    };

    let spool = Spool::open(&backend_cfg.spool_dir)
        .await
        .with_context(|| format!("unable to open spool at {}", backend_cfg.spool_dir.display()))?;
    let blobs = FsBlobStore::new(&backend_cfg.blob_dir, &backend_cfg.blob_base_url);

    let backend = Backend::new(
        BackendParts {
            store: store.clone(),
            fingerprints,
            spool,
            queue: WorkQueue::new(bus, &backend_cfg.work_queue),
            blobs: Arc::new(blobs),
        },
        backend_cfg,
    );

    let handlers = HandlerRegistry::with_builtin();
    handlers
        .initialize_all()
        .context("channel handler initialization failed")?;
    info!(handlers = ?handlers.channel_types(), "channel handlers ready");

    let report = backend.flush_spool().await;
    if !report.is_empty() {
        info!(?report, "replayed spool left by previous run");
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flusher = backend.start_flusher(shutdown_rx);

    let channels = ChannelCache::new(store, backend_cfg.store_timeout);
    for channel in seeds {
        channels.prime(channel);
    }
    let router = build_router(GatewayState {
        backend,
        handlers,
        channels,
    });

    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("unable to bind {}", config.addr))?;
    info!("inlet-gateway listening on {}", config.addr);

    serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    shutdown_tx.send(true).ok();
    flusher.await.ok();
    info!("inlet-gateway stopped");
    Ok(())
}
