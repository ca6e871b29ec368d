// server.rs - HTTP surface
// Purpose: Thin routing in front of the run controller
// Routes:
//  - POST /test_credentials  run request in, NDJSON event stream out
//  - GET  /health            liveness

use crate::config::RunRequest;
use crate::controller::{RunController, RunStream};
use crate::error::{RejectionBody, RunError};
use axum::{
    Router,
    body::Body,
    extract::{Json, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

pub fn router(controller: Arc<RunController>) -> Router {
    Router::new()
        .route("/test_credentials", post(test_credentials))
        .route("/health", get(health))
        .with_state(controller)
}

pub async fn start_server(controller: Arc<RunController>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Credential test server listening on http://{}", addr);

    axum::serve(listener, router(controller))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn test_credentials(
    State(controller): State<Arc<RunController>>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return reject(RunError::Malformed(rejection.body_text())),
    };

    match controller.start(request) {
        Ok(events) => ndjson_response(events),
        Err(e) => reject(e),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn reject(err: RunError) -> Response {
    warn!("Rejected run request: {}", err);
    (StatusCode::BAD_REQUEST, Json(RejectionBody::from(&err))).into_response()
}

/// Stream events as they arrive; the body ends after the terminal event
fn ndjson_response(events: RunStream) -> Response {
    let lines = futures::stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        Some((event.to_ndjson_line(), events))
    });

    ([(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)], Body::from_stream(lines)).into_response()
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
