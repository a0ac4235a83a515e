// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration for the streaming gateway.
#[derive(Debug, Clone, clap::Parser)]
pub struct StreamerConfig {
    /// Message broker host.
    #[arg(long, default_value = "localhost", env = "RABBITMQ_HOST")]
    pub rabbitmq_host: String,

    /// Message broker port.
    #[arg(long, default_value_t = 5672, env = "RABBITMQ_PORT")]
    pub rabbitmq_port: u16,

    /// Deployment environment. "testing" bypasses handshake signature checks
    /// and serves plain HTTP on :8080 instead of TLS on :443.
    #[arg(long, default_value = "production", env = "SIPHON_ENV")]
    pub env: String,

    /// PEM-encoded RSA public key used to verify handshake signatures.
    #[arg(
        long,
        default_value = "/code/.keys/handshake/handshake.pub",
        env = "SIPHON_HANDSHAKE_KEY"
    )]
    pub handshake_key: PathBuf,

    /// TLS certificate bundle.
    #[arg(
        long,
        default_value = "/code/.keys/getsiphon-com-bundle.crt",
        env = "SIPHON_TLS_CERT"
    )]
    pub tls_cert: PathBuf,

    /// TLS private key.
    #[arg(long, default_value = "/code/.keys/host.pem", env = "SIPHON_TLS_KEY")]
    pub tls_key: PathBuf,
}

impl StreamerConfig {
    pub fn is_testing(&self) -> bool {
        self.env == "testing"
    }

    /// AMQP endpoint assembled from the broker host and port.
    pub fn amqp_uri(&self) -> String {
        format!("amqp://{}:{}", self.rabbitmq_host, self.rabbitmq_port)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        let port = if self.is_testing() { 8080 } else { 443 };
        SocketAddr::from(([0, 0, 0, 0], port))
    }
}
