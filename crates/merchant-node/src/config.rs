//! Configuration (§6 "Environment / config"): a `clap`-derive CLI where
//! flags double as env vars (`#[arg(env = ...)]`), matching the
//! env-var-with-default convention used elsewhere in this workspace.

use clap::Parser;
use merchant_core::Auditor;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ExchangeEntry {
    pub url: String,
    pub master_pub: String,
    pub trusted: bool,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "merchant-node", about = "Merchant payment-processing backend")]
pub struct Config {
    /// Currency this instance of the backend operates in.
    #[arg(long, env = "MERCHANT_CURRENCY", default_value = "KUDOS")]
    pub currency: String,

    /// HTTP bind address, e.g. 0.0.0.0:9966.
    #[arg(long, env = "MERCHANT_BIND", default_value = "0.0.0.0:9966")]
    pub bind: String,

    /// Directory the embedded database is stored under.
    #[arg(long, env = "MERCHANT_DB_PATH", default_value = "merchant_db")]
    pub db_path: PathBuf,

    /// Prometheus metrics port; 0 disables the `/metrics` route.
    #[arg(long, env = "MERCHANT_METRICS_PORT", default_value_t = 0)]
    pub metrics_port: u16,

    /// How far ahead of a denomination's expiry the key-state manager
    /// proactively refetches `/keys`, in seconds.
    #[arg(long, env = "MERCHANT_KEY_LOOKAHEAD_SECONDS", default_value_t = 3600)]
    pub key_lookahead_seconds: i64,

    /// `exchange-<name>=URL,MASTER_PUB,trusted|untrusted` repeatable.
    #[arg(long = "exchange", env = "MERCHANT_EXCHANGES", value_delimiter = ';')]
    pub exchanges_raw: Vec<String>,

    /// `auditor-<name>=NAME,URL,PUBLIC_KEY` repeatable.
    #[arg(long = "auditor", env = "MERCHANT_AUDITORS", value_delimiter = ';')]
    pub auditors_raw: Vec<String>,

    #[arg(long, env = "MERCHANT_REQUIRE_AUDITOR", default_value_t = false)]
    pub require_auditor: bool,

    /// Requests per second allowed per client IP before 503 rate-limiting.
    #[arg(long, env = "MERCHANT_RATE_LIMIT_RPS", default_value_t = 50)]
    pub rate_limit_rps: u32,

    /// Bound on a single exchange RPC's share of the remaining request
    /// deadline, in milliseconds (§5 "typically the remaining HTTP
    /// request time minus a grace margin").
    #[arg(long, env = "MERCHANT_EXCHANGE_TIMEOUT_MS", default_value_t = 15_000)]
    pub exchange_timeout_ms: u64,

    /// Bearer token the private (authenticated) routes require in
    /// `Authorization: Bearer <token>`. Unset disables the check, which
    /// is only appropriate behind a trusted reverse proxy.
    #[arg(long, env = "MERCHANT_ADMIN_TOKEN")]
    pub admin_token: Option<String>,
}

impl Config {
    pub fn exchanges(&self) -> anyhow::Result<Vec<ExchangeEntry>> {
        self.exchanges_raw
            .iter()
            .map(|raw| {
                let parts: Vec<&str> = raw.split(',').collect();
                if parts.len() != 3 {
                    anyhow::bail!("malformed --exchange entry: {raw}");
                }
                Ok(ExchangeEntry {
                    url: parts[0].to_string(),
                    master_pub: parts[1].to_string(),
                    trusted: parts[2].trim().eq_ignore_ascii_case("trusted"),
                })
            })
            .collect()
    }

    pub fn auditors(&self) -> anyhow::Result<Vec<Auditor>> {
        self.auditors_raw
            .iter()
            .map(|raw| {
                let parts: Vec<&str> = raw.split(',').collect();
                if parts.len() != 3 {
                    anyhow::bail!("malformed --auditor entry: {raw}");
                }
                Ok(Auditor {
                    name: parts[0].to_string(),
                    url: parts[1].to_string(),
                    public_key: parts[2].to_string(),
                })
            })
            .collect()
    }
}
