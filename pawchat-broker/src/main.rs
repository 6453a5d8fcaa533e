//! Pawchat broker -- lightweight pub/sub chat broker.
//!
//! An axum server combining the WebSocket subscribe/publish endpoint with
//! the REST history and send endpoints the storefront chat client expects.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin pawchat-broker
//!
//! # Run on custom address with a required token
//! cargo run --bin pawchat-broker -- --bind 127.0.0.1:8080 --token hunter2
//!
//! # Or via environment variable
//! PAWCHAT_BROKER_ADDR=127.0.0.1:8080 cargo run --bin pawchat-broker
//! ```

use std::sync::Arc;

use clap::Parser;
use pawchat_broker::broker::{self, BrokerState};
use pawchat_broker::config::{BrokerCliArgs, BrokerConfig};
use pawchat_broker::store::ChatStore;

#[tokio::main]
async fn main() {
    let cli = BrokerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match BrokerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting pawchat broker");

    let store = ChatStore::with_history_limit(config.history_limit);
    let state = Arc::new(BrokerState::with_config(store, config.required_token));

    match broker::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "broker listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "broker server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start broker");
            std::process::exit(1);
        }
    }
}
