// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! siphon-streamer: real-time gateway fanning out push notifications and log
//! streams between app end-users and the message bus.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;

use crate::config::StreamerConfig;
use crate::dispatch::{Dispatcher, DispatcherHandle};

/// Shared state handed to the transport layer.
pub struct StreamerState {
    pub config: StreamerConfig,
    pub dispatcher: DispatcherHandle,
}

/// Run the gateway until shutdown.
pub async fn run(config: StreamerConfig) -> anyhow::Result<()> {
    let (dispatcher, handle) = Dispatcher::new();
    tokio::spawn(dispatcher.run());

    transport::amqp_sub::spawn_notification_consumer(handle.clone(), config.amqp_uri());

    let addr = config.listen_addr();
    let state = Arc::new(StreamerState { config: config.clone(), dispatcher: handle });
    let router = transport::build_router(state);

    if config.is_testing() {
        tracing::info!(%addr, "siphon-streamer listening (plain HTTP, testing)");
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
    } else {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let tls = RustlsConfig::from_pem_file(&config.tls_cert, &config.tls_key).await?;
        tracing::info!(%addr, "siphon-streamer listening (TLS)");
        axum_server::bind_rustls(addr, tls)
            .serve(router.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    }

    Ok(())
}
