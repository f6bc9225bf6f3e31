//! merchant-node — the merchant payment-processing backend binary.
//!
//! Startup sequence (§6):
//!   1. Parse configuration (flags / env, §6 "Environment / config")
//!   2. Open the embedded database
//!   3. Build the key-state manager, exchange client, rate limiter, metrics
//!   4. Install the signal-driven reload coordinator (4.C)
//!   5. Serve the HTTP surface (4.K) until terminated

mod config;
mod context;
mod http;
mod instance_store;
mod longpoll;
mod metrics;
mod order_engine;
mod payment_pipeline;
mod rate_limiter;
mod refund_tip_engine;
mod support;
mod wire_tracker;

use anyhow::Context;
use clap::Parser;
use context::AppState;
use merchant_db::MerchantDb;
use merchant_exchange_client::ExchangeClient;
use merchant_keystate::reload;
use merchant_keystate::{KeyStateConfig, KeyStateManager};
use metrics::MerchantMetrics;
use rate_limiter::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,merchant_node=debug".parse().unwrap()))
        .init();

    let config = config::Config::parse();
    info!(currency = %config.currency, bind = %config.bind, "merchant-node starting");

    let exchanges = config.exchanges().context("parsing --exchange entries")?;
    let auditors = config.auditors().context("parsing --auditor entries")?;

    let db = Arc::new(MerchantDb::open(&config.db_path).with_context(|| format!("opening database at {}", config.db_path.display()))?);

    let exchange_client = ExchangeClient::new();
    let keystate = Arc::new(KeyStateManager::new(
        exchange_client.clone(),
        KeyStateConfig {
            require_auditor: config.require_auditor,
            accepted_auditors: auditors,
            key_lookahead: chrono::Duration::seconds(config.key_lookahead_seconds),
        },
    ));

    // Warm the snapshot for every configured exchange before serving traffic,
    // so the first request against a fresh process doesn't pay the `/keys`
    // round-trip out of its own request deadline.
    for exchange in &exchanges {
        if let Err(e) = keystate.reload(&exchange.url, Duration::from_millis(config.exchange_timeout_ms)).await {
            tracing::warn!(exchange_url = %exchange.url, error = %e, "initial key-state fetch failed, will retry lazily");
        }
    }

    let metrics = Arc::new(MerchantMetrics::new());
    let limiter = RateLimiter::new(config.rate_limit_rps, None);
    let config = Arc::new(config);

    let state = AppState { db, keystate: Arc::clone(&keystate), exchange_client, metrics, config: Arc::clone(&config) };

    let reload_rx = reload::install_signal_forwarder();
    let exchange_urls: Vec<String> = exchanges.iter().map(|e| e.url.clone()).collect();
    let reload_deadline = Duration::from_millis(config.exchange_timeout_ms);
    let reload_task = tokio::spawn(reload::run_reload_loop(Arc::clone(&keystate), exchange_urls, reload_rx, reload_deadline));

    let bind_addr: std::net::SocketAddr = config.bind.parse().with_context(|| format!("parsing --bind {}", config.bind))?;

    info!(%bind_addr, "serving HTTP");
    let routes = http::routes(state, limiter);
    warp::serve(routes).run(bind_addr).await;

    // `warp::serve(...).run(...)` only returns once every listener socket is
    // gone, which doesn't happen in normal operation; the reload coordinator
    // exits (and, on `ReloadEvent::Restart`, the whole process) independently
    // via `std::process::exit`. Await it here so a plain `Ctrl-C` still
    // drains cleanly when the server future is cancelled by the runtime.
    let _ = reload_task.await;

    Ok(())
}
