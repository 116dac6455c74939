use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    debug_handler,
    extract::{Extension, Json, Path},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::{get, post},
};
use inlet_backend::{Backend, Health, WriteOutcome};
use inlet_core::channel::CONFIG_AUTH_TOKEN;
use inlet_core::{
    Channel, ChannelType, ChannelUuid, HandlerRegistry, Incoming, IngestError, MsgId, MsgStatus,
    MsgUuid, ValidationError,
};
use serde::Serialize;
use tracing::{Instrument, error, warn};

use crate::channels::ChannelCache;

#[derive(Clone)]
pub struct GatewayState {
    pub backend: Backend,
    pub handlers: HandlerRegistry,
    pub channels: ChannelCache,
}

/// Result for one event extracted from a callback.
#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventResult {
    Msg {
        uuid: MsgUuid,
        id: Option<MsgId>,
        outcome: WriteOutcome,
    },
    Status {
        id: Option<MsgId>,
        status: MsgStatus,
        outcome: WriteOutcome,
    },
}

#[derive(Serialize, Debug)]
pub struct ApiResponse {
    pub events: Vec<EventResult>,
}

#[derive(Serialize, Debug)]
pub struct ApiError {
    code: &'static str,
    error: String,
}

type ApiFailure = (StatusCode, Json<ApiError>);

fn failure(err: IngestError) -> ApiFailure {
    let status = match &err {
        IngestError::Validation(_) => StatusCode::BAD_REQUEST,
        IngestError::NotFound(_) => StatusCode::NOT_FOUND,
        IngestError::Spool(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(ApiError {
            code: err.code(),
            error: err.to_string(),
        }),
    )
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/c/{channel_type}/{channel_uuid}/receive", post(receive))
        .route("/healthz", get(healthz))
        .layer(Extension(Arc::new(state)))
}

#[debug_handler]
async fn healthz(Extension(state): Extension<Arc<GatewayState>>) -> (StatusCode, Json<Health>) {
    let health = state.backend.health().await;
    let code = if health.store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

#[debug_handler]
async fn receive(
    Path((channel_type, channel_uuid)): Path<(String, String)>,
    Extension(state): Extension<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse>, ApiFailure> {
    let span = tracing::info_span!("receive", channel_type = %channel_type, channel_uuid = %channel_uuid);
    handle_receive(channel_type, channel_uuid, state, &headers, body)
        .instrument(span)
        .await
}

pub async fn handle_receive(
    channel_type: String,
    channel_uuid: String,
    state: Arc<GatewayState>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse>, ApiFailure> {
    let channel_type = ChannelType::new(channel_type);
    let handler = state
        .handlers
        .get(&channel_type)
        .ok_or_else(|| failure(ValidationError::UnknownChannelType(channel_type.to_string()).into()))?;
    let uuid: ChannelUuid = channel_uuid.parse().map_err(|_| {
        failure(ValidationError::Payload(format!("invalid channel uuid '{channel_uuid}'")).into())
    })?;

    let channel = match state.channels.get(uuid).await {
        Ok(Some(channel)) if channel.channel_type == channel_type => channel,
        Ok(_) => {
            let err = IngestError::from(ValidationError::UnknownChannel(uuid));
            return Err((StatusCode::NOT_FOUND, failure(err).1));
        }
        Err(err) => {
            error!(error = %err, "channel lookup failed");
            return Err(failure(IngestError::spool(err)));
        }
    };

    if !authorized(&channel, headers) {
        warn!("callback rejected, bad or missing bearer token");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiError {
                code: "unauthorized",
                error: "missing or invalid bearer token".into(),
            }),
        ));
    }

    let events = handler.handle_incoming(&channel, &body).map_err(|err| {
        warn!(error = %err, "rejected callback");
        failure(err.into())
    })?;

    let mut results = Vec::with_capacity(events.len());
    for event in events {
        let result = match event {
            Incoming::Msg(msg) => {
                let receipt = state.backend.receive_msg(&channel, msg).await.map_err(failure)?;
                EventResult::Msg {
                    uuid: receipt.uuid,
                    id: receipt.id,
                    outcome: receipt.outcome,
                }
            }
            Incoming::Status(status) => {
                let receipt = state
                    .backend
                    .receive_status(&channel, status)
                    .await
                    .map_err(failure)?;
                EventResult::Status {
                    id: receipt.msg_id,
                    status: receipt.status,
                    outcome: receipt.outcome,
                }
            }
        };
        results.push(result);
    }
    Ok(Json(ApiResponse { events: results }))
}

/// Channels configured with an auth token only accept `Authorization: Bearer <token>`.
fn authorized(channel: &Channel, headers: &HeaderMap) -> bool {
    let Some(token) = channel.config_str(CONFIG_AUTH_TOKEN) else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .is_some_and(|provided| provided == token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_http_statuses() {
        let (code, body) = failure(ValidationError::MissingField("from").into());
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "validation");

        let (code, _) = failure(IngestError::NotFound("external id x".into()));
        assert_eq!(code, StatusCode::NOT_FOUND);

        let (code, body) = failure(IngestError::spool("disk full"));
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.code, "spool");
    }

    #[test]
    fn bearer_token_is_checked_only_when_configured() {
        let mut channel = Channel {
            id: inlet_core::ChannelId(1),
            uuid: ChannelUuid::new(),
            org_id: inlet_core::OrgId(1),
            channel_type: ChannelType::new("EX"),
            name: "ext".into(),
            address: "2020".into(),
            country: None,
            schemes: Vec::new(),
            config: Default::default(),
        };
        let mut headers = HeaderMap::new();
        assert!(authorized(&channel, &headers));

        channel.config.insert(CONFIG_AUTH_TOKEN.into(), "s3cret".into());
        assert!(!authorized(&channel, &headers));
        headers.insert(AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(!authorized(&channel, &headers));
        headers.insert(AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert!(authorized(&channel, &headers));
    }
}
