//! # Status & Submission API
//!
//! Builds the axum router that exposes the thin HTTP slice a JSON-RPC
//! gateway would call through: submitting a transaction and reading chain
//! tip / account state off the Node aggregate. A full JSON-RPC 2.0 surface
//! is an external gateway's concern, not this crate's.
//!
//! ## Endpoints
//!
//! | Method | Path                  | Description                    |
//! |--------|-----------------------|---------------------------------|
//! | GET    | `/health`             | Liveness probe                 |
//! | GET    | `/status`             | Node status summary            |
//! | POST   | `/transactions`       | Submit a transaction           |
//! | GET    | `/accounts/:address`  | Account state                  |

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use covenant_core::model::{Address, Transaction};
use covenant_core::node::Node;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::SharedMetrics;

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The assembled node aggregate.
    pub node: Arc<Node>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/transactions", post(submit_transaction_handler))
        .route("/accounts/{address}", get(account_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub peer_count: u64,
}

/// Response payload for `POST /transactions`.
#[derive(Debug, Serialize)]
pub struct SubmitTransactionResponse {
    pub accepted: bool,
    pub tx_id: String,
}

/// Response payload for `GET /accounts/:address`.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub address: String,
    pub balance: u64,
    pub nonce: u64,
    pub frozen: bool,
}

/// `GET /health` — returns 200 if the node is alive.
///
/// This is the liveness probe for orchestrators. It intentionally does not
/// check internal subsystem health — that belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — returns node status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let tip = state.node.chain_tip();
    let resp = StatusResponse {
        version: state.version.clone(),
        block_height: tip.map(|(h, _)| h),
        block_hash: tip.map(|(_, hash)| hex::encode(hash)),
        peer_count: state.node.peer_count() as u64,
    };
    Json(resp)
}

/// `POST /transactions` — submits a transaction into the local mempool.
///
/// Returns 202 on acceptance, 400 on validation failure (bad signature,
/// zero amount, self-transfer) or mempool rejection (duplicate, full).
async fn submit_transaction_handler(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> impl IntoResponse {
    let tx_id = hex::encode(tx.id());
    match state.node.submit_transaction(tx).await {
        Ok(()) => {
            state.metrics.mempool_size.set(state.node.mempool.size() as i64);
            (
                StatusCode::ACCEPTED,
                Json(SubmitTransactionResponse {
                    accepted: true,
                    tx_id,
                }),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "transaction rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(SubmitTransactionResponse {
                    accepted: false,
                    tx_id,
                }),
            )
        }
    }
}

/// `GET /accounts/:address` — returns account state for a hex-encoded address.
async fn account_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Ok(addr) = Address::from_hex(&address) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid address" })),
        )
            .into_response();
    };

    let account = state.node.get_account(&addr);
    Json(AccountResponse {
        address,
        balance: account.balance,
        nonce: account.nonce,
        frozen: account.frozen,
    })
    .into_response()
}
