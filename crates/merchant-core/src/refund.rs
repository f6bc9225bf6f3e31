//! §3 "Refund record".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRecord {
    pub instance_id: String,
    pub order_id: String,
    pub coin_pub: String,
    pub rtransaction_id: u64,
    pub amount: String,
    pub reason: String,
    pub merchant_sig: String,
}
