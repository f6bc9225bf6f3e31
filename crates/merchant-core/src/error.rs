//! The §7 error taxonomy: one enum, one HTTP status and stable numeric
//! code per variant. Handlers build this directly; the HTTP surface only
//! has to call `.status()` / `.code()` / `.hint()` to render a reply.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MerchantError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("claim nonce mismatch: {0}")]
    ClaimNonceMismatch(String),
    #[error("payment required: {0}")]
    PaymentRequired(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("failed dependency: {reason}")]
    FailedDependency { reason: String, exchange_reply: Option<serde_json::Value> },
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl MerchantError {
    pub fn http_status(&self) -> u16 {
        match self {
            MerchantError::BadRequest(_) => 400,
            MerchantError::Unauthorized(_) => 401,
            MerchantError::Forbidden(_) => 403,
            MerchantError::NotFound(_) => 404,
            MerchantError::Conflict(_) => 409,
            MerchantError::ClaimNonceMismatch(_) => 409,
            MerchantError::PaymentRequired(_) => 402,
            MerchantError::Gone(_) => 410,
            MerchantError::PayloadTooLarge(_) => 413,
            MerchantError::FailedDependency { .. } => 424,
            MerchantError::ServiceUnavailable(_) => 503,
            MerchantError::Internal(_) => 500,
        }
    }

    /// Stable numeric error code, independent from the HTTP status, so
    /// wallets can match on it even if the transport layer changes.
    pub fn code(&self) -> u32 {
        match self {
            MerchantError::BadRequest(_) => 1000,
            MerchantError::Unauthorized(_) => 1001,
            MerchantError::Forbidden(_) => 1002,
            MerchantError::NotFound(_) => 1003,
            MerchantError::Conflict(_) => 1004,
            MerchantError::Gone(_) => 1005,
            MerchantError::PayloadTooLarge(_) => 1006,
            MerchantError::FailedDependency { .. } => 1007,
            MerchantError::ServiceUnavailable(_) => 1008,
            MerchantError::Internal(_) => 1009,
            MerchantError::ClaimNonceMismatch(_) => CODE_CLAIM_NONCE_MISMATCH,
            MerchantError::PaymentRequired(_) => CODE_PAYMENT_INSUFFICIENT,
        }
    }

    pub fn hint(&self) -> String {
        self.to_string()
    }

    pub fn claim_nonce_mismatch(order_id: &str) -> Self {
        MerchantError::ClaimNonceMismatch(format!("order {order_id}: claim nonce does not match"))
    }

    pub fn payment_insufficient(have: &str, need: &str) -> Self {
        MerchantError::PaymentRequired(format!("insufficient payment: have {have}, need {need}"))
    }

    pub fn to_reply(&self) -> ErrorReply {
        let (field, exchange_reply) = match self {
            MerchantError::FailedDependency { exchange_reply, .. } => {
                (None, exchange_reply.clone())
            }
            _ => (None, None),
        };
        ErrorReply {
            code: self.code(),
            hint: self.hint(),
            field,
            exchange_reply,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorReply {
    pub code: u32,
    pub hint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_reply: Option<serde_json::Value>,
}

/// A specific, stable error code for `PAYMENT_INSUFFICIENT` per §8 scenario 3.
pub const CODE_PAYMENT_INSUFFICIENT: u32 = 2001;
/// Stable error code for `CLAIM_NONCE_MISMATCH` per §8 scenario 4.
pub const CODE_CLAIM_NONCE_MISMATCH: u32 = 2002;
