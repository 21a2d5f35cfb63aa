//! JSON-RPC Front-End
//!
//! Local control surface for the messaging layer: identity export, mailbox
//! reads and sends. One POST endpoint, JSON-RPC 2.0 framing.

use anyhow::Result;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::{json, Value};
use subrosa_crypto::PublicKey;
use subrosa_message::{decode, encode_from, first_free_slot};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::AppState;

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const SEND_FAILED: i64 = -32000;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Build the RPC router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handle))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the JSON-RPC front-end until shutdown
pub async fn serve(state: AppState, port: u16, mut shutdown_rx: watch::Receiver<()>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("RPC front-end listening on 127.0.0.1:{}", port);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

async fn handle(State(state): State<AppState>, Json(request): Json<RpcRequest>) -> Json<Value> {
    debug!("RPC call: {}", request.method);

    let response = match dispatch(&state, &request.method, &request.params).await {
        Ok(result) => json!({
            "jsonrpc": "2.0",
            "id": request.id,
            "result": result,
        }),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": request.id,
            "error": { "code": code, "message": message },
        }),
    };

    Json(response)
}

async fn dispatch(state: &AppState, method: &str, params: &Value) -> RpcResult {
    match method {
        "getpubkey" => Ok(json!(state.keys.public.to_hex())),

        "getprivkey" => Ok(json!(hex::encode(state.keys.secret.to_bytes()))),

        "getmessages" => {
            let messages = decode(&state.keys.secret, state.node.as_ref()).await;
            let texts: Vec<String> = messages
                .into_iter()
                .filter_map(|m| String::from_utf8(m).ok())
                .collect();
            Ok(json!(texts))
        }

        "send" => send(state, params).await,

        _ => Err((METHOD_NOT_FOUND, format!("method not found: {}", method))),
    }
}

type RpcResult = std::result::Result<Value, (i64, String)>;

async fn send(state: &AppState, params: &Value) -> RpcResult {
    let params: Vec<String> = serde_json::from_value(params.clone())
        .map_err(|_| (INVALID_PARAMS, "params must be [pubkey, message]".to_string()))?;
    let [pubkey_hex, message] = params.as_slice() else {
        return Err((INVALID_PARAMS, "params must be [pubkey, message]".to_string()));
    };

    let recipient = PublicKey::from_hex(pubkey_hex)
        .map_err(|e| (INVALID_PARAMS, format!("invalid pubkey: {}", e)))?;

    // Redundancy planning is impossible with nobody to place blocks on
    let range = state.node.range().await;
    if range.is_isolated() {
        return Err((SEND_FAILED, "no peers available".to_string()));
    }

    // Append behind whatever mail the recipient already has
    let first_slot = first_free_slot(&recipient, state.node.as_ref()).await;

    let blocks = encode_from(
        &recipient,
        &state.keys.secret,
        message.as_bytes(),
        &range,
        first_slot,
    )
    .map_err(|e| (SEND_FAILED, e.to_string()))?;

    // Shuffle placements so write timing leaks no block ordering
    let mut entries: Vec<_> = blocks.into_iter().collect();
    entries.shuffle(&mut rand::thread_rng());

    let total = entries.len();
    let mut acks = 0;
    for (key, value) in entries {
        match state.node.set(key, value).await {
            Ok(n) => acks += n,
            Err(e) => warn!("Block placement failed: {}", e),
        }
    }

    if acks == 0 {
        return Err((SEND_FAILED, "no peer accepted the message".to_string()));
    }

    Ok(json!(format!("message sent in {} blocks", total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use subrosa_crypto::{KeyPair, NodeId};
    use subrosa_dht::OverlayNode;

    async fn isolated_state() -> AppState {
        let keys = KeyPair::generate();
        let mut node = OverlayNode::bind(NodeId::from_pubkey(&keys.public), "127.0.0.1:0")
            .await
            .unwrap();
        node.start();
        AppState {
            node: Arc::new(node),
            keys: Arc::new(keys),
        }
    }

    #[tokio::test]
    async fn test_getpubkey() {
        let state = isolated_state().await;
        let result = dispatch(&state, "getpubkey", &Value::Null).await.unwrap();
        assert_eq!(result, json!(state.keys.public.to_hex()));
    }

    #[tokio::test]
    async fn test_getmessages_empty_mailbox() {
        let state = isolated_state().await;
        let result = dispatch(&state, "getmessages", &Value::Null).await.unwrap();
        assert_eq!(result, json!(Vec::<String>::new()));
    }

    #[tokio::test]
    async fn test_send_without_peers_fails() {
        let state = isolated_state().await;
        let recipient = KeyPair::generate();
        let params = json!([recipient.public.to_hex(), "hello"]);

        let (code, message) = dispatch(&state, "send", &params).await.unwrap_err();
        assert_eq!(code, SEND_FAILED);
        assert_eq!(message, "no peers available");
    }

    #[tokio::test]
    async fn test_send_rejects_bad_params() {
        let state = isolated_state().await;

        let (code, _) = dispatch(&state, "send", &json!(["only-one"]))
            .await
            .unwrap_err();
        assert_eq!(code, INVALID_PARAMS);

        let (code, _) = dispatch(&state, "send", &json!(["not-hex", "hi"]))
            .await
            .unwrap_err();
        assert_eq!(code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let state = isolated_state().await;
        let (code, _) = dispatch(&state, "frobnicate", &Value::Null)
            .await
            .unwrap_err();
        assert_eq!(code, METHOD_NOT_FOUND);
    }
}
