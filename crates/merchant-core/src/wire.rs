//! §3 "Wire-transfer record".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTransferCoin {
    pub coin_pub: String,
    pub order_id: String,
    pub deposit_value: String,
    pub deposit_fee: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTransferRecord {
    pub instance_id: String,
    pub wtid: String,
    pub exchange_url: String,
    pub total_amount: String,
    pub h_wire: String,
    pub coins: Vec<WireTransferCoin>,
    pub execution_time: chrono::DateTime<chrono::Utc>,
}
