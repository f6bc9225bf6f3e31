//! 4.G Payment Pipeline: multi-coin deposit fan-out, per-coin outcome
//! aggregation, and abort-refund for half-paid orders.

use crate::context::AppState;
use crate::support::{db_err_to_merchant, instance_keypair, load_instance};
use chrono::Utc;
use merchant_core::{Amount, CoinDeposit, Deposit, DenominationUse, MerchantError, Order, OrderState, RefundRecord};
use merchant_crypto::SignaturePurpose;
use merchant_db::DbError;
use merchant_exchange_client::ExchangeClientError;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct PaidReceipt {
    pub order_id: String,
    pub paid_amount: String,
    pub merchant_sig: String,
}

#[derive(Debug, Serialize)]
pub struct CoinDiagnostic {
    pub coin_pub: String,
    pub reason: String,
}

/// One per-coin fan-out outcome, before the all-succeed check.
enum CoinOutcome {
    Ok { deposit: Deposit },
    Failed { diagnostic: CoinDiagnostic, exchange_reply: Option<serde_json::Value> },
}

/// `pay(instance, order_id, coins)` per 4.G's six-step algorithm.
pub async fn pay(
    state: &AppState,
    instance_id: &str,
    order_id: &str,
    coins: Vec<CoinDeposit>,
    request_deadline: Duration,
) -> Result<PaidReceipt, MerchantError> {
    let instance = load_instance(state, instance_id)?;
    let keypair = instance_keypair(&instance)?;

    let order = state
        .db
        .get_order(instance_id, order_id)
        .map_err(db_err_to_merchant)?;

    // Step 1: already PAID is an idempotent replay — Ed25519 signing is
    // deterministic, so recomputing the receipt yields byte-identical bytes.
    if order.state == OrderState::Paid {
        return build_receipt(&keypair, &order);
    }
    if order.state != OrderState::Claimed {
        return Err(MerchantError::Conflict(format!("order {order_id} is not payable from its current state")));
    }
    let terms = order.contract_terms.clone().expect("CLAIMED order carries contract terms");

    // Step 2: sum(amount_without_fee) >= contract total.
    let contract_total = Amount::from_str(&terms.amount).map_err(|e| MerchantError::Internal(e.to_string()))?;
    let without_fee: Result<Vec<Amount>, _> = coins.iter().map(|c| Amount::from_str(&c.amount_without_fee)).collect();
    let without_fee = without_fee.map_err(|e| MerchantError::BadRequest(e.to_string()))?;
    let total_offered = Amount::sum(without_fee.iter(), &contract_total.currency).map_err(|e| MerchantError::BadRequest(e.to_string()))?;
    if total_offered < contract_total {
        return Err(MerchantError::payment_insufficient(&total_offered.to_string(), &contract_total.to_string()));
    }

    // Steps 3-4: resolve + verify each coin before contacting any exchange.
    let now = Utc::now();
    let h_contract_terms = terms.hash();
    for coin in &coins {
        state
            .keystate
            .find_denomination(&coin.exchange_url, &coin.denom_pub, DenominationUse::Deposit, now, request_deadline)
            .await
            .map_err(|e| MerchantError::Unauthorized(format!("coin {}: {e}", coin.coin_pub)))?;

        let message = serde_json::json!({
            "h_contract_terms": h_contract_terms,
            "h_wire": terms.h_wire,
            "timestamp": terms.timestamp,
            "refund_deadline": terms.refund_deadline,
            "merchant_pub": terms.merchant_pub,
            "amount_with_fee": coin.amount_with_fee,
            "deposit_fee": coin.deposit_fee,
            "coin_pub": coin.coin_pub,
        });
        let digest = merchant_crypto::hash_canonical_json(&message);
        let coin_pub_bytes = merchant_crypto::base32_decode(&coin.coin_pub)
            .map_err(|_| MerchantError::Unauthorized(format!("coin {}: malformed public key", coin.coin_pub)))?;
        let sig_bytes = merchant_crypto::base32_decode(&coin.coin_sig)
            .map_err(|_| MerchantError::Unauthorized(format!("coin {}: malformed signature", coin.coin_pub)))?;
        if !merchant_crypto::verify_signature(SignaturePurpose::DepositConfirm, digest.as_bytes(), &sig_bytes, &coin_pub_bytes) {
            return Err(MerchantError::Unauthorized(format!("coin {}: signature verification failed", coin.coin_pub)));
        }
    }

    // Step 5: dispatch all deposit RPCs in parallel.
    let mut joins = tokio::task::JoinSet::new();
    for coin in coins {
        let client = state.exchange_client.clone();
        let wire_hash = terms.h_wire.clone();
        let keypair_secret = keypair.secret_bytes().to_vec();
        joins.spawn(async move {
            let result = client.deposit(&coin, request_deadline).await;
            (coin, wire_hash, keypair_secret, result)
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = joins.join_next().await {
        let (coin, wire_hash, keypair_secret, result) =
            joined.map_err(|e| MerchantError::Internal(format!("deposit task panicked: {e}")))?;
        match result {
            Ok(confirmation) => {
                let kp = merchant_crypto::KeyPair::from_secret_bytes(&keypair_secret)
                    .map_err(|e| MerchantError::Internal(format!("corrupt signing key: {e}")))?;
                let sig_message = format!("{}:{}:{}", coin.coin_pub, coin.amount_without_fee, wire_hash);
                let merchant_sig = kp
                    .sign(SignaturePurpose::DepositConfirm, sig_message.as_bytes())
                    .map_err(|e| MerchantError::Internal(format!("deposit signing failed: {e}")))?;
                outcomes.push(CoinOutcome::Ok {
                    deposit: Deposit {
                        instance_id: instance_id.to_string(),
                        order_id: order_id.to_string(),
                        coin_pub: coin.coin_pub.clone(),
                        amount_with_fee: coin.amount_with_fee.clone(),
                        amount_without_fee: coin.amount_without_fee.clone(),
                        deposit_fee: coin.deposit_fee.clone(),
                        refund_fee: coin.refund_fee.clone(),
                        wire_hash,
                        exchange_url: coin.exchange_url.clone(),
                        merchant_sig: hex::encode(merchant_sig),
                        exchange_sig: confirmation.exchange_sig,
                    },
                });
            }
            Err(e) => {
                let (reason, exchange_reply) = match &e {
                    ExchangeClientError::Unreachable(url) => (format!("exchange {url} unreachable"), None),
                    ExchangeClientError::ExchangeError { exchange_url, body } => {
                        (format!("exchange {exchange_url} rejected the deposit"), Some(body.clone()))
                    }
                    ExchangeClientError::Malformed(msg) => (format!("malformed exchange response: {msg}"), None),
                };
                outcomes.push(CoinOutcome::Failed {
                    diagnostic: CoinDiagnostic { coin_pub: coin.coin_pub.clone(), reason },
                    exchange_reply,
                });
            }
        }
    }

    // Step 7: any hard-fail aborts the whole request, nothing persisted.
    let failures: Vec<&CoinDiagnostic> = outcomes
        .iter()
        .filter_map(|o| match o {
            CoinOutcome::Failed { diagnostic, .. } => Some(diagnostic),
            _ => None,
        })
        .collect();
    if !failures.is_empty() {
        let exchange_reply = outcomes.iter().find_map(|o| match o {
            CoinOutcome::Failed { exchange_reply: Some(r), .. } => Some(r.clone()),
            _ => None,
        });
        return Err(MerchantError::FailedDependency {
            reason: format!("{} of {} coins failed at the exchange", failures.len(), outcomes.len()),
            exchange_reply,
        });
    }

    // Step 6: all succeeded — persist atomically and wake long-pollers.
    let deposits: Vec<Deposit> = outcomes
        .into_iter()
        .map(|o| match o {
            CoinOutcome::Ok { deposit } => deposit,
            CoinOutcome::Failed { .. } => unreachable!("failures already returned above"),
        })
        .collect();

    let mut paid_order = order;
    paid_order.state = OrderState::Paid;
    paid_order.bump();
    state.db.commit_payment(&paid_order, &deposits).map_err(db_err_to_merchant)?;

    build_receipt(&keypair, &paid_order)
}

fn build_receipt(keypair: &merchant_crypto::KeyPair, order: &Order) -> Result<PaidReceipt, MerchantError> {
    let terms = order.contract_terms.as_ref().expect("paid order carries contract terms");
    let message = serde_json::json!({ "order_id": order.order_id, "paid_amount": terms.amount });
    let digest = merchant_crypto::hash_canonical_json(&message);
    let sig = keypair
        .sign(SignaturePurpose::DepositConfirm, digest.as_bytes())
        .map_err(|e| MerchantError::Internal(format!("receipt signing failed: {e}")))?;
    Ok(PaidReceipt {
        order_id: order.order_id.clone(),
        paid_amount: terms.amount.clone(),
        merchant_sig: hex::encode(sig),
    })
}

#[derive(Debug, Serialize)]
pub enum AbortOutcome {
    NoOp,
    Refunded { refunds: Vec<RefundRecord> },
}

/// Abort-refund (4.G): issues refund signatures for already-submitted
/// coins of a half-paid order so the wallet can recover funds.
pub fn abort(state: &AppState, instance_id: &str, order_id: &str) -> Result<AbortOutcome, MerchantError> {
    let instance = load_instance(state, instance_id)?;
    let keypair = instance_keypair(&instance)?;

    let order = state.db.get_order(instance_id, order_id).map_err(db_err_to_merchant)?;
    if order.state == OrderState::Paid {
        return Err(MerchantError::Conflict(format!("order {order_id} already paid, cannot abort")));
    }

    let deposits = state.db.list_deposits(instance_id, order_id).map_err(db_err_to_merchant)?;
    if deposits.is_empty() {
        return Ok(AbortOutcome::NoOp);
    }

    let mut refunds = Vec::with_capacity(deposits.len());
    for (i, deposit) in deposits.iter().enumerate() {
        let amount = deposit.amount_without_fee.clone();
        let message = format!("{}:{}:{}:abort", order_id, deposit.coin_pub, amount);
        let sig = keypair
            .sign(SignaturePurpose::RefundOk, message.as_bytes())
            .map_err(|e| MerchantError::Internal(format!("refund signing failed: {e}")))?;
        let refund = RefundRecord {
            instance_id: instance_id.to_string(),
            order_id: order_id.to_string(),
            coin_pub: deposit.coin_pub.clone(),
            rtransaction_id: i as u64,
            amount,
            reason: "wallet-initiated abort of a half-paid order".to_string(),
            merchant_sig: hex::encode(sig),
        };
        state.db.insert_refund(&refund).map_err(db_err_to_merchant)?;
        refunds.push(refund);
    }

    state
        .db
        .update_order(instance_id, order_id, |o| {
            if o.state == OrderState::Paid {
                return Err(DbError::Soft("order transitioned to PAID concurrently".to_string()));
            }
            o.state = OrderState::Aborted;
            Ok(())
        })
        .map_err(db_err_to_merchant)?;

    Ok(AbortOutcome::Refunded { refunds })
}
