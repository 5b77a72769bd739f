use crate::driver::ScrapingDriver;
use crate::error::StoreError;
use crate::metrics::encode_text;
use crate::store::CloudInfoStore;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, put},
    Router,
};
use prometheus::Registry;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct ManagementState {
    pub store: CloudInfoStore,
    pub driver: ScrapingDriver,
    pub registry: Arc<Registry>,
}

pub fn router(state: ManagementState) -> Router {
    Router::new()
        .route("/management/store/export", get(export_store))
        .route("/management/store/import", put(import_store))
        .route("/management/store/refresh/{provider}", put(refresh_provider))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve<F>(addr: SocketAddr, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "management server listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

async fn export_store(State(state): State<ManagementState>) -> Response {
    let mut body = Vec::new();
    match state.store.export(&mut body).await {
        Ok(count) => {
            info!(entries = count, "store exported");
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(e) => {
            error!(error = %e, "store export failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "export_failed", "message": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn import_store(State(state): State<ManagementState>, body: Bytes) -> Response {
    match state.store.import(body.as_ref()).await {
        Ok(count) => {
            info!(entries = count, "store imported");
            (StatusCode::OK, Json(json!({"imported": count}))).into_response()
        }
        Err(e @ (StoreError::Snapshot(_) | StoreError::UnknownKey(_) | StoreError::Serialization { .. })) => {
            warn!(error = %e, "rejected store snapshot");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_snapshot", "message": e.to_string()})),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "store import failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "import_failed", "message": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn refresh_provider(State(state): State<ManagementState>, Path(provider): Path<String>) -> Response {
    if let Err(e) = state.driver.spawn_refresh(&provider) {
        warn!(provider = %provider, error = %e, "refresh rejected");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "provider_not_found", "provider": provider})),
        )
            .into_response();
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "refresh_started", "provider": provider})),
    )
        .into_response()
}

async fn metrics(State(state): State<ManagementState>) -> Response {
    match encode_text(&state.registry) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
