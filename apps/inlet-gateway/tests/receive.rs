use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use inlet_backend::{Backend, BackendConfig, BackendParts, FsBlobStore};
use inlet_bus::{InMemoryBusClient, WorkQueue};
use inlet_core::{Channel, ChannelId, ChannelType, ChannelUuid, HandlerRegistry, OrgId};
use inlet_fingerprint::FingerprintCache;
use inlet_gateway::{ChannelCache, GatewayState, build_router};
use inlet_spool::Spool;
use inlet_store::{SqliteStore, testkit::ToggleStore};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    sqlite: SqliteStore,
    store: ToggleStore<SqliteStore>,
    bus: InMemoryBusClient,
    spool: Spool,
    channel: Channel,
    _dir: TempDir,
}

impl TestApp {
    fn receive_uri(&self) -> String {
        format!("/c/ex/{}/receive", self.channel.uuid)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(&self.router, req).await
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = BackendConfig {
        db_path: dir.path().join("inlet.db"),
        spool_dir: dir.path().join("spool"),
        blob_dir: dir.path().join("media"),
        ..BackendConfig::default()
    };

    let channel = Channel {
        id: ChannelId(1),
        uuid: ChannelUuid::new(),
        org_id: OrgId(7),
        channel_type: ChannelType::new("EX"),
        name: "External".into(),
        address: "2020".into(),
        country: None,
        schemes: vec!["tel".into()],
        config: BTreeMap::new(),
    };
    let sqlite = SqliteStore::open(&config.db_path).unwrap();
    sqlite.add_channel(&channel).await.unwrap();
    let store = ToggleStore::new(sqlite.clone());
    let bus = InMemoryBusClient::default();
    let spool = Spool::open(&config.spool_dir).await.unwrap();

    let shared: inlet_store::SharedStore = Arc::new(store.clone());
    let backend = Backend::new(
        BackendParts {
            store: shared.clone(),
            fingerprints: FingerprintCache::in_memory(&config.fingerprint),
            spool: spool.clone(),
            queue: WorkQueue::new(Arc::new(bus.clone()), &config.work_queue),
            blobs: Arc::new(FsBlobStore::new(&config.blob_dir, &config.blob_base_url)),
        },
        &config,
    );
    let router = build_router(GatewayState {
        backend,
        handlers: HandlerRegistry::with_builtin(),
        channels: ChannelCache::new(shared, config.store_timeout),
    });

    TestApp {
        router,
        sqlite,
        store,
        bus,
        spool,
        channel,
        _dir: dir,
    }
}

#[tokio::test]
async fn message_is_stored_then_deduplicated() {
    let app = app().await;
    let body = json!({"kind": "msg", "from": "+15551234", "text": "hello", "external_id": "p-1"});

    let (status, first) = app.post(&app.receive_uri(), body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["events"][0]["type"], "msg");
    assert_eq!(first["events"][0]["outcome"], "stored");
    assert!(first["events"][0]["id"].is_i64());

    let (status, second) = app.post(&app.receive_uri(), body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["events"][0]["outcome"], "duplicate");
    assert_eq!(second["events"][0]["uuid"], first["events"][0]["uuid"]);

    assert_eq!(app.sqlite.count_msgs().await.unwrap(), 1);
    assert_eq!(app.bus.take_published().await.len(), 1);
}

#[tokio::test]
async fn store_outage_is_absorbed_by_the_spool() {
    let app = app().await;
    // first request caches the channel
    app.post(
        &app.receive_uri(),
        json!({"kind": "msg", "from": "+15550000", "text": "warm up"}),
    )
    .await;
    app.store.set_available(false);

    let (status, body) = app
        .post(
            &app.receive_uri(),
            json!({"kind": "msg", "from": "+15551234", "text": "during outage"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"][0]["outcome"], "spooled");
    assert_eq!(app.spool.pending_count().await.unwrap(), 1);

    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let (status, health) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["store_ok"], false);
    assert_eq!(health["spool_pending"], 1);
}

#[tokio::test]
async fn unknown_receipt_is_not_found() {
    let app = app().await;
    let (status, body) = app
        .post(
            &app.receive_uri(),
            json!({"kind": "status", "external_id": "nope", "status": "delivered"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let app = app().await;

    let (status, body) = app
        .post(&app.receive_uri(), json!({"kind": "msg", "from": "", "text": "x"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let uri = format!("/c/zz/{}/receive", app.channel.uuid);
    let (status, _) = app.post(&uri, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/c/ex/{}/receive", ChannelUuid::new());
    let (status, _) = app
        .post(&uri, json!({"kind": "msg", "from": "+1555", "text": "x"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(app.sqlite.count_msgs().await.unwrap(), 0);
}

#[tokio::test]
async fn healthz_reports_ok() {
    let app = app().await;
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let (status, health) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["store_ok"], true);
    assert_eq!(health["spool_pending"], 0);
}
