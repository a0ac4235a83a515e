// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the streaming gateway.

pub mod amqp_sub;
pub mod auth;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::StreamerState;

/// Build the axum `Router` with the stream upgrade routes.
///
/// `/v1/streams/` is a prefix: clients may append further path segments.
pub fn build_router(state: Arc<StreamerState>) -> Router {
    Router::new()
        .route("/v1/streams/", get(ws::stream_handler))
        .route("/v1/streams/{*rest}", get(ws::stream_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
