// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upgrade entry point for stream clients.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocket;
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::dispatch::{ConnectionRole, DispatcherHandle};
use crate::session::{self, SessionHandle, MAX_MESSAGE_SIZE};
use crate::transport::auth::{self, HandshakeClaim};
use crate::StreamerState;

const SOCKET_BUFFER_SIZE: usize = 1024;

/// Query parameters for `GET /v1/streams/`. All are required.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub app_id: Option<String>,
    pub handshake_token: Option<String>,
    pub handshake_signature: Option<String>,
}

/// `GET /v1/streams/` — authenticate and upgrade a subscriber connection.
pub async fn stream_handler(
    State(state): State<Arc<StreamerState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let (Some(kind), Some(app_id), Some(token), Some(signature)) =
        (query.kind, query.app_id, query.handshake_token, query.handshake_signature)
    else {
        return bad_request("missing query parameter");
    };

    let Some(role) = ConnectionRole::parse(&kind) else {
        tracing::warn!(%remote_addr, kind = %kind, "unknown stream type");
        return bad_request("unknown stream type");
    };

    let claim = match auth::verify_handshake(
        &token,
        signature.as_bytes(),
        &app_id,
        &state.config.handshake_key,
        state.config.is_testing(),
    ) {
        Ok(claim) => claim,
        Err(e) => {
            tracing::warn!(%remote_addr, app_id = %app_id, err = %e, "handshake rejected");
            return bad_request("bad handshake");
        }
    };

    let dispatcher = state.dispatcher.clone();
    // hyper owns the 101 exchange and the read buffer; only the message cap
    // and write buffer are tunable from here.
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .write_buffer_size(SOCKET_BUFFER_SIZE)
        .on_upgrade(move |socket| serve_stream(socket, dispatcher, role, claim, remote_addr))
        .into_response()
}

/// Register the session with the dispatcher and run its pumps to completion.
async fn serve_stream(
    socket: WebSocket,
    dispatcher: DispatcherHandle,
    role: ConnectionRole,
    claim: HandshakeClaim,
    remote_addr: SocketAddr,
) {
    let (session, outbound) = SessionHandle::new(role, claim.app_id, claim.user_id, remote_addr);
    dispatcher.register(Arc::clone(&session)).await;
    session::run(socket, session, outbound, dispatcher).await;
}

fn bad_request(msg: &'static str) -> Response {
    axum::http::Response::builder()
        .status(400)
        .body(axum::body::Body::from(msg))
        .unwrap_or_default()
        .into_response()
}
