//! §3 "Order", its unsigned proposal and signed, frozen contract terms.

use crate::amount::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderState {
    Proposed,
    Claimed,
    Paid,
    Refunded,
    Aborted,
}

/// The wallet-facing, free-form offer before it is claimed. Only the
/// fields the engine must reason about are typed; everything else rides
/// along in `extra` and is echoed back verbatim into the contract terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub amount: String,
    pub max_fee: Option<String>,
    pub pay_deadline: DateTime<Utc>,
    pub refund_deadline: DateTime<Utc>,
    #[serde(default)]
    pub products: Vec<serde_json::Value>,
    #[serde(default)]
    pub fulfillment_url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ProposalError {
    #[error("malformed amount: {0}")]
    MalformedAmount(String),
    #[error("pay_deadline must be before refund_deadline")]
    DeadlineOrder,
    #[error("malformed product entry at index {0}")]
    MalformedProduct(usize),
}

impl Proposal {
    /// "Validates the proposal skeleton" per 4.F `create_proposal`.
    pub fn validate(&self) -> Result<(), ProposalError> {
        Amount::from_str(&self.amount).map_err(|e| ProposalError::MalformedAmount(e.to_string()))?;
        if let Some(ref fee) = self.max_fee {
            Amount::from_str(fee).map_err(|e| ProposalError::MalformedAmount(e.to_string()))?;
        }
        if self.pay_deadline >= self.refund_deadline {
            return Err(ProposalError::DeadlineOrder);
        }
        for (i, p) in self.products.iter().enumerate() {
            if !p.is_object() {
                return Err(ProposalError::MalformedProduct(i));
            }
        }
        Ok(())
    }

    /// Canonicalized bytes for the idempotency-equality check in
    /// `create_proposal` — same shape regardless of key insertion order.
    pub fn canonical_hash(&self) -> String {
        let value = serde_json::to_value(self).expect("proposal serializes");
        merchant_crypto::hash_canonical_json(&value)
    }
}

/// Fields added at claim time, frozen into the contract terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractTerms {
    pub order_id: String,
    pub amount: String,
    pub max_fee: Option<String>,
    pub pay_deadline: DateTime<Utc>,
    pub refund_deadline: DateTime<Utc>,
    #[serde(default)]
    pub products: Vec<serde_json::Value>,
    #[serde(default)]
    pub fulfillment_url: Option<String>,
    pub trusted_exchanges: Vec<String>,
    pub auditors: Vec<String>,
    pub h_wire: String,
    pub merchant_pub: String,
    pub timestamp: DateTime<Utc>,
    pub nonce: String,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl ContractTerms {
    /// Stable canonical hash, per 4.F.
    pub fn hash(&self) -> String {
        let value = serde_json::to_value(self).expect("contract terms serialize");
        merchant_crypto::hash_canonical_json(&value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub instance_id: String,
    pub order_id: String,
    pub state: OrderState,
    pub proposal: Proposal,
    pub proposal_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_terms: Option<ContractTerms>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_sig: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Strictly increasing per-order logical clock (§5 "ordering guarantees").
    pub version: u64,
}

impl Order {
    pub fn new(instance_id: String, order_id: String, proposal: Proposal, now: DateTime<Utc>) -> Self {
        let proposal_hash = proposal.canonical_hash();
        Order {
            instance_id,
            order_id,
            state: OrderState::Proposed,
            proposal,
            proposal_hash,
            contract_terms: None,
            contract_hash: None,
            claim_nonce: None,
            merchant_sig: None,
            created_at: now,
            version: 0,
        }
    }

    pub fn bump(&mut self) {
        self.version += 1;
    }
}
