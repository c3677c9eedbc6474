//! Admin HTTP surface
//!
//! - `GET /status`: ship status, always 200
//! - `POST /command`: 200 `{success, result}` for any well-formed body,
//!   400 `{success: false, error: "Invalid JSON"}` otherwise
//! - anything else: 404
//!
//! Only non-2xx responses are logged; status polling stays quiet.

use crate::execution::HostControl;
use crate::fleet::{FleetNode, ParsedCommand, ShipStatus};
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn build_router<H: HostControl>(node: Arc<FleetNode<H>>) -> Router {
    Router::new()
        .route("/status", get(get_status::<H>))
        .route("/command", post(post_command::<H>))
        .fallback(not_found)
        .with_state(node)
        .layer(middleware::from_fn(log_failures))
}

async fn log_failures(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    if !response.status().is_success() {
        warn!("{method} {path} -> {}", response.status());
    }
    response
}

// GET /status
async fn get_status<H: HostControl>(State(node): State<Arc<FleetNode<H>>>) -> Json<ShipStatus> {
    Json(node.status().await)
}

// POST /command
async fn post_command<H: HostControl>(State(node): State<Arc<FleetNode<H>>>, body: Bytes) -> Response {
    match ParsedCommand::parse(&body) {
        Ok(parsed) => {
            let result = node.handle(parsed).await;
            Json(json!({ "success": true, "result": result })).into_response()
        }
        Err(e) => {
            debug!("rejected command body: {e}");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": "Invalid JSON" })),
            )
                .into_response()
        }
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
