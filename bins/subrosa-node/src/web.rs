//! Web Front-End
//!
//! Raw key/value access for local clients: `GET /<key>` reads through the
//! overlay, `POST /<key>` writes. A GET that misses keeps polling until a
//! bounded deadline, then answers 404 instead of holding the connection
//! open forever.

use std::time::Duration;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use subrosa_crypto::NodeId;
use subrosa_dht::DhtError;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::AppState;

/// How long a GET waits for a value to turn up before answering 404
const GET_WAIT: Duration = Duration::from_secs(5);

/// Delay between lookup retries within the GET wait window
const GET_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Build the web router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/:key", get(get_value).post(set_value))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the web front-end until shutdown
pub async fn serve(state: AppState, port: u16, mut shutdown_rx: watch::Receiver<()>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Web front-end listening on 127.0.0.1:{}", port);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

async fn get_value(Path(key): Path<String>, State(state): State<AppState>) -> Response {
    let Ok(key) = NodeId::from_hex(&key) else {
        return (StatusCode::BAD_REQUEST, "key must be 40 hex characters\n").into_response();
    };

    let deadline = tokio::time::Instant::now() + GET_WAIT;
    loop {
        match state.node.get(key).await {
            Ok(Some(value)) => return value.into_response(),
            Ok(None) => {
                if tokio::time::Instant::now() >= deadline {
                    return (StatusCode::NOT_FOUND, "not found\n").into_response();
                }
                tokio::time::sleep(GET_POLL_INTERVAL).await;
            }
            Err(e) => {
                warn!("Get of {:?} failed: {}", key, e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }
}

async fn set_value(
    Path(key): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    let Ok(key) = NodeId::from_hex(&key) else {
        return (StatusCode::BAD_REQUEST, "key must be 40 hex characters\n").into_response();
    };

    match state.node.set(key, body.to_vec()).await {
        Ok(acks) => (StatusCode::OK, format!("stored on {} peers\n", acks)).into_response(),
        Err(DhtError::ValueTooLarge { size, limit }) => (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("value of {} bytes exceeds limit of {}\n", size, limit),
        )
            .into_response(),
        Err(e) => {
            warn!("Set of {:?} failed: {}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
