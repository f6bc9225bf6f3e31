//! Shared per-process state threaded through every warp filter: the
//! persistence layer, key-state manager, exchange client, metrics, and
//! configuration. One such "app state" value is built at startup and a
//! cheap handle of it is cloned into each route.

use crate::config::Config;
use crate::metrics::MerchantMetrics;
use merchant_db::MerchantDb;
use merchant_exchange_client::ExchangeClient;
use merchant_keystate::KeyStateManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<MerchantDb>,
    pub keystate: Arc<KeyStateManager>,
    pub exchange_client: ExchangeClient,
    pub metrics: Arc<MerchantMetrics>,
    pub config: Arc<Config>,
}
