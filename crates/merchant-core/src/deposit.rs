//! §3 "Deposit" — one coin's contribution to an order's payment.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinDeposit {
    pub coin_pub: String,
    pub denom_pub: String,
    pub denom_sig: String,
    pub coin_sig: String,
    /// Gross amount the coin covers, before the exchange's deposit fee.
    pub amount_with_fee: String,
    /// Net amount credited to the merchant after the deposit fee.
    pub amount_without_fee: String,
    pub deposit_fee: String,
    pub refund_fee: String,
    pub exchange_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub instance_id: String,
    pub order_id: String,
    pub coin_pub: String,
    pub amount_with_fee: String,
    pub amount_without_fee: String,
    pub deposit_fee: String,
    pub refund_fee: String,
    pub wire_hash: String,
    pub exchange_url: String,
    pub merchant_sig: String,
    /// Exchange's signed confirmation of the deposit, opaque to us.
    pub exchange_sig: String,
}
