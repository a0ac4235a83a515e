// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::{error, info, warn};

use siphon_streamer::config::StreamerConfig;

#[tokio::main]
async fn main() {
    let config = StreamerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if config.is_testing() {
        warn!("SIPHON_ENV=testing: handshake signatures are not verified");
    }

    // Nothing is persisted; interrupt drops live connections and exits.
    tokio::select! {
        result = siphon_streamer::run(config) => {
            if let Err(e) = result {
                error!("streamer exited: {e:#}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, dropping live connections");
        }
    }
}
