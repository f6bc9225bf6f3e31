//! 4.F Order & Contract Engine: proposal intake, claim binding, and
//! claimant-scoped lookup.

use crate::context::AppState;
use crate::support::{db_err_to_merchant, instance_keypair, load_instance};
use chrono::Utc;
use merchant_core::{ContractTerms, MerchantError, Order, OrderState, Proposal};
use merchant_crypto::SignaturePurpose;
use merchant_db::DbError;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub enum CreateProposalOutcome {
    Created { order_id: String },
    AlreadyExists,
}

/// `create_proposal(instance, proposal)` per 4.F.
pub fn create_proposal(
    state: &AppState,
    instance_id: &str,
    order_id: Option<String>,
    proposal: Proposal,
) -> Result<CreateProposalOutcome, MerchantError> {
    load_instance(state, instance_id)?;
    proposal.validate().map_err(|e| MerchantError::BadRequest(e.to_string()))?;

    let order_id = order_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match state.db.try_get_order(instance_id, &order_id).map_err(db_err_to_merchant)? {
        None => {
            let order = Order::new(instance_id.to_string(), order_id.clone(), proposal, Utc::now());
            state.db.put_order(&order).map_err(db_err_to_merchant)?;
            Ok(CreateProposalOutcome::Created { order_id })
        }
        Some(existing) => {
            if existing.proposal_hash == proposal.canonical_hash() {
                Ok(CreateProposalOutcome::AlreadyExists)
            } else {
                Err(MerchantError::Conflict(format!(
                    "order {order_id} already exists with a different proposal"
                )))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimReceipt {
    pub contract_terms: ContractTerms,
    pub contract_hash: String,
    pub merchant_sig: String,
}

/// `claim(instance, order_id, nonce)` per 4.F. Retries locally when the
/// order changed state between the optimistic read and the transition
/// attempt, mirroring 4.B's "soft failure: caller re-executes the whole
/// unit of work" at the engine level.
pub async fn claim(
    state: &AppState,
    instance_id: &str,
    order_id: &str,
    nonce: &str,
) -> Result<ClaimReceipt, MerchantError> {
    let instance = load_instance(state, instance_id)?;
    let keypair = instance_keypair(&instance)?;

    for _ in 0..merchant_db::DEFAULT_MAX_ATTEMPTS {
        let order = state
            .db
            .try_get_order(instance_id, order_id)
            .map_err(db_err_to_merchant)?
            .ok_or_else(|| MerchantError::NotFound(format!("order {order_id}")))?;

        match order.state {
            OrderState::Claimed => {
                if order.claim_nonce.as_deref() == Some(nonce) {
                    return Ok(ClaimReceipt {
                        contract_terms: order.contract_terms.expect("claimed order carries contract terms"),
                        contract_hash: order.contract_hash.expect("claimed order carries contract hash"),
                        merchant_sig: order.merchant_sig.expect("claimed order carries a merchant signature"),
                    });
                }
                return Err(MerchantError::claim_nonce_mismatch(order_id));
            }
            OrderState::Proposed => {
                let account = instance
                    .active_account()
                    .ok_or_else(|| MerchantError::Internal(format!("instance {instance_id} has no active bank account")))?;
                let exchanges = state.config.exchanges().map_err(|e| MerchantError::Internal(e.to_string()))?;
                let auditors = state.config.auditors().map_err(|e| MerchantError::Internal(e.to_string()))?;
                let now = Utc::now();

                let terms = ContractTerms {
                    order_id: order_id.to_string(),
                    amount: order.proposal.amount.clone(),
                    max_fee: order.proposal.max_fee.clone(),
                    pay_deadline: order.proposal.pay_deadline,
                    refund_deadline: order.proposal.refund_deadline,
                    products: order.proposal.products.clone(),
                    fulfillment_url: order.proposal.fulfillment_url.clone(),
                    trusted_exchanges: exchanges.iter().filter(|e| e.trusted).map(|e| e.url.clone()).collect(),
                    auditors: auditors.iter().map(|a| a.name.clone()).collect(),
                    h_wire: account.h_wire.clone(),
                    merchant_pub: instance.merchant_pub.clone(),
                    timestamp: now,
                    nonce: nonce.to_string(),
                    extra: order.proposal.extra.clone(),
                };
                let hash = terms.hash();
                let signature = keypair
                    .sign(SignaturePurpose::Contract, hash.as_bytes())
                    .map_err(|e| MerchantError::Internal(format!("contract signing failed: {e}")))?;
                let merchant_sig = hex::encode(signature);

                let nonce_owned = nonce.to_string();
                let terms_for_closure = terms.clone();
                let hash_for_closure = hash.clone();
                let sig_for_closure = merchant_sig.clone();
                let transitioned = state.db.update_order(instance_id, order_id, move |o| {
                    if o.state != OrderState::Proposed {
                        return Err(DbError::Soft("order left PROPOSED concurrently".to_string()));
                    }
                    o.state = OrderState::Claimed;
                    o.claim_nonce = Some(nonce_owned.clone());
                    o.contract_terms = Some(terms_for_closure.clone());
                    o.contract_hash = Some(hash_for_closure.clone());
                    o.merchant_sig = Some(sig_for_closure.clone());
                    Ok(())
                });

                match transitioned {
                    Ok(_) => {
                        return Ok(ClaimReceipt { contract_terms: terms, contract_hash: hash, merchant_sig });
                    }
                    Err(DbError::Soft(_)) => continue,
                    Err(e) => return Err(db_err_to_merchant(e)),
                }
            }
            _ => {
                return Err(MerchantError::Conflict(format!(
                    "order {order_id} is not in a claimable state"
                )))
            }
        }
    }
    Err(MerchantError::Internal(format!(
        "claim on order {order_id} exhausted its retry budget under contention"
    )))
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LookupResult {
    Full { contract_terms: ContractTerms, contract_hash: String },
    StatusOnly { order_id: String, state: OrderState, contract_hash: Option<String> },
}

/// `lookup(instance, order_id, nonce?)` per 4.F: full terms only to the
/// claimant (matching nonce), otherwise an anonymous status-only view.
pub fn lookup(state: &AppState, instance_id: &str, order_id: &str, nonce: Option<&str>) -> Result<LookupResult, MerchantError> {
    let order = state
        .db
        .get_order(instance_id, order_id)
        .map_err(db_err_to_merchant)?;

    match nonce {
        Some(n) if order.claim_nonce.as_deref() == Some(n) => Ok(LookupResult::Full {
            contract_terms: order.contract_terms.ok_or_else(|| MerchantError::NotFound(format!("order {order_id} not yet claimed")))?,
            contract_hash: order.contract_hash.unwrap_or_default(),
        }),
        _ => Ok(LookupResult::StatusOnly {
            order_id: order.order_id,
            state: order.state,
            contract_hash: order.contract_hash,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::MerchantMetrics;
    use clap::Parser;
    use merchant_core::{Instance, InstanceDefaults};
    use merchant_db::MerchantDb;
    use merchant_exchange_client::ExchangeClient;
    use merchant_keystate::{KeyStateConfig, KeyStateManager};
    use std::sync::Arc;

    fn test_state(dir: &std::path::Path) -> AppState {
        let db = Arc::new(MerchantDb::open(dir).unwrap());
        let client = ExchangeClient::new();
        let keystate = Arc::new(KeyStateManager::new(
            client.clone(),
            KeyStateConfig { require_auditor: false, accepted_auditors: vec![], key_lookahead: chrono::Duration::hours(1) },
        ));
        let config = Arc::new(Config::parse_from(["merchant-node"]));
        AppState { db, keystate, exchange_client: client, metrics: Arc::new(MerchantMetrics::new()), config }
    }

    fn seed_instance(state: &AppState, id: &str) {
        let (mut instance, _kp) = Instance::new(
            id.to_string(),
            "Test Shop".to_string(),
            serde_json::json!({}),
            serde_json::json!({}),
            InstanceDefaults {
                max_wire_fee: "KUDOS:1".into(),
                wire_fee_amortization: 3,
                max_deposit_fee: "KUDOS:1".into(),
                wire_transfer_delay_seconds: 3600,
                pay_delay_seconds: 3600,
            },
        );
        instance
            .insert_account(merchant_core::BankAccount::new("payto://x-taler-bank/exchange/acct".into()))
            .unwrap();
        state.db.put_instance(&instance).unwrap();
    }

    fn sample_proposal() -> Proposal {
        Proposal {
            amount: "KUDOS:10".into(),
            max_fee: Some("KUDOS:0.5".into()),
            pay_deadline: Utc::now() + chrono::Duration::hours(1),
            refund_deadline: Utc::now() + chrono::Duration::hours(2),
            products: vec![],
            fulfillment_url: Some("https://shop.example/thanks".into()),
            extra: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn claim_is_idempotent_for_same_nonce() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        seed_instance(&state, "default");
        create_proposal(&state, "default", Some("o1".into()), sample_proposal()).unwrap();

        let first = claim(&state, "default", "o1", "nonce-a").await.unwrap();
        let second = claim(&state, "default", "o1", "nonce-a").await.unwrap();
        assert_eq!(first.contract_hash, second.contract_hash);
        assert_eq!(first.merchant_sig, second.merchant_sig);
    }

    #[tokio::test]
    async fn claim_with_different_nonce_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        seed_instance(&state, "default");
        create_proposal(&state, "default", Some("o1".into()), sample_proposal()).unwrap();

        claim(&state, "default", "o1", "nonce-a").await.unwrap();
        let err = claim(&state, "default", "o1", "nonce-b").await.unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn create_proposal_same_body_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        seed_instance(&state, "default");
        let p = sample_proposal();
        create_proposal(&state, "default", Some("o1".into()), p.clone()).unwrap();
        match create_proposal(&state, "default", Some("o1".into()), p).unwrap() {
            CreateProposalOutcome::AlreadyExists => {}
            _ => panic!("expected AlreadyExists"),
        }
    }

    #[test]
    fn create_proposal_conflicting_body_fails() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        seed_instance(&state, "default");
        let mut p2 = sample_proposal();
        create_proposal(&state, "default", Some("o1".into()), sample_proposal()).unwrap();
        p2.amount = "KUDOS:20".into();
        let err = create_proposal(&state, "default", Some("o1".into()), p2).unwrap_err();
        assert_eq!(err.http_status(), 409);
    }
}
