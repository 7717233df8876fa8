//! HTTP surface: webhook intake, management endpoint and health check

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::dispatcher::{ManagementRequest, WebhookDispatcher};
use crate::telegram::Update;

/// Header Telegram uses to echo the webhook secret
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<WebhookDispatcher>,
    /// Expected webhook secret; `None` disables the check
    pub webhook_secret: Option<String>,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/repair", post(repair))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(address: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("Listening on {address}");
    axum::serve(listener, router(state)).await.context("server error")?;
    Ok(())
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "success": false, "error": message.into() }))).into_response()
}

async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Update>, JsonRejection>,
) -> Response {
    if let Some(expected) = &state.webhook_secret {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            warn!("Webhook call with missing or wrong secret token");
            return error_body(StatusCode::UNAUTHORIZED, "invalid secret token");
        }
    }

    let Json(update) = match payload {
        Ok(update) => update,
        Err(rejection) => return error_body(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let result = state.dispatcher.handle_update(update).await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result)).into_response()
}

async fn repair(State(state): State<AppState>, payload: Result<Json<ManagementRequest>, JsonRejection>) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => return error_body(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let response = state.dispatcher.handle_management(request).await;
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(response)).into_response()
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.dispatcher.store().db().get_connection().is_ok();
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if database { "ok" } else { "degraded" },
            "database": database,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
