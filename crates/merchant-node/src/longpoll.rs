//! 4.J Long-Poll Coordinator: suspends a request until an order's state
//! satisfies the caller's condition, a timeout elapses, or the caller
//! cancels (HTTP connection close). Uses the register-then-check
//! ordering from `merchant_db::NotifierRegistry` so a commit that lands
//! between the initial check and the wait is never missed.

use crate::context::AppState;
use crate::support::db_err_to_merchant;
use merchant_core::{Amount, MerchantError, OrderState};
use serde::Serialize;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum PaymentPollOutcome {
    Paid { contract_hash: Option<String>, refund_amount: Option<String> },
    Unpaid { pay_uri: String },
}

/// `poll_payment(instance, order_id, session_id?, timeout, min_refund?)`.
/// `session_id` is accepted for interface parity with the REST route (it
/// scopes which claimant's view is being polled) but the paid/unpaid
/// condition itself depends only on persisted order + refund state.
pub async fn poll_payment<C>(
    state: &AppState,
    instance_id: &str,
    order_id: &str,
    _session_id: Option<&str>,
    timeout: Duration,
    min_refund: Option<&str>,
    cancel: C,
) -> Result<PaymentPollOutcome, MerchantError>
where
    C: Future<Output = ()>,
{
    let min_refund = min_refund.map(Amount::from_str).transpose().map_err(|e| MerchantError::BadRequest(e.to_string()))?;
    tokio::pin!(cancel);

    loop {
        let notify = state.db.notifier.get(instance_id, order_id);
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(outcome) = check_payment(state, instance_id, order_id, min_refund.as_ref())? {
            return Ok(outcome);
        }

        tokio::select! {
            _ = notified => continue,
            _ = tokio::time::sleep(timeout) => {
                return Ok(PaymentPollOutcome::Unpaid { pay_uri: pay_uri(instance_id, order_id) });
            }
            _ = &mut cancel => {
                return Ok(PaymentPollOutcome::Unpaid { pay_uri: pay_uri(instance_id, order_id) });
            }
        }
    }
}

fn check_payment(
    state: &AppState,
    instance_id: &str,
    order_id: &str,
    min_refund: Option<&Amount>,
) -> Result<Option<PaymentPollOutcome>, MerchantError> {
    let order = state.db.get_order(instance_id, order_id).map_err(db_err_to_merchant)?;
    if order.state != OrderState::Paid {
        return Ok(None);
    }

    if let Some(threshold) = min_refund {
        let refunds = state.db.list_refunds(instance_id, order_id).map_err(db_err_to_merchant)?;
        let total = if refunds.is_empty() {
            Amount::zero(&threshold.currency)
        } else {
            let amounts: Result<Vec<Amount>, _> = refunds.iter().map(|r| r.amount.parse::<Amount>()).collect();
            Amount::sum(amounts.map_err(|e| MerchantError::Internal(e.to_string()))?.iter(), &threshold.currency)
                .map_err(|e| MerchantError::Internal(e.to_string()))?
        };
        if total < *threshold {
            return Ok(None);
        }
        return Ok(Some(PaymentPollOutcome::Paid { contract_hash: order.contract_hash, refund_amount: Some(total.to_string()) }));
    }

    Ok(Some(PaymentPollOutcome::Paid { contract_hash: order.contract_hash, refund_amount: None }))
}

fn pay_uri(instance_id: &str, order_id: &str) -> String {
    format!("taler://pay/{instance_id}/{order_id}")
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum RefundPollOutcome {
    Refunded { refund_amount: String },
    NoRefund,
}

/// `poll_refund(instance, order_id, timeout)`: suspends until a refund
/// lands on the order or `timeout` elapses.
pub async fn poll_refund<C>(state: &AppState, instance_id: &str, order_id: &str, timeout: Duration, cancel: C) -> Result<RefundPollOutcome, MerchantError>
where
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);

    loop {
        let notify = state.db.notifier.get(instance_id, order_id);
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let refunds = state.db.list_refunds(instance_id, order_id).map_err(db_err_to_merchant)?;
        if !refunds.is_empty() {
            let order = state.db.get_order(instance_id, order_id).map_err(db_err_to_merchant)?;
            let currency = order
                .contract_terms
                .as_ref()
                .map(|t| Amount::from_str(&t.amount).map(|a| a.currency))
                .transpose()
                .map_err(|e| MerchantError::Internal(e.to_string()))?
                .unwrap_or_else(|| "KUDOS".to_string());
            let amounts: Result<Vec<Amount>, _> = refunds.iter().map(|r| r.amount.parse::<Amount>()).collect();
            let total = Amount::sum(amounts.map_err(|e| MerchantError::Internal(e.to_string()))?.iter(), &currency)
                .map_err(|e| MerchantError::Internal(e.to_string()))?;
            return Ok(RefundPollOutcome::Refunded { refund_amount: total.to_string() });
        }

        tokio::select! {
            _ = notified => continue,
            _ = tokio::time::sleep(timeout) => return Ok(RefundPollOutcome::NoRefund),
            _ = &mut cancel => return Ok(RefundPollOutcome::NoRefund),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::MerchantMetrics;
    use clap::Parser;
    use merchant_core::{ContractTerms, Instance, InstanceDefaults, Order, OrderState, Proposal};
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

    fn seed_unpaid_order(state: &AppState) {
        let (instance, _kp) = Instance::new(
            "default".into(),
            "Shop".into(),
            serde_json::json!({}),
            serde_json::json!({}),
            InstanceDefaults {
                max_wire_fee: "KUDOS:1".into(),
                wire_fee_amortization: 1,
                max_deposit_fee: "KUDOS:1".into(),
                wire_transfer_delay_seconds: 3600,
                pay_delay_seconds: 3600,
            },
        );
        state.db.put_instance(&instance).unwrap();
        let proposal = Proposal {
            amount: "KUDOS:10".into(),
            max_fee: None,
            pay_deadline: chrono::Utc::now() + chrono::Duration::hours(1),
            refund_deadline: chrono::Utc::now() + chrono::Duration::hours(2),
            products: vec![],
            fulfillment_url: None,
            extra: serde_json::json!({}),
        };
        let order = Order::new("default".into(), "o1".into(), proposal, chrono::Utc::now());
        state.db.put_order(&order).unwrap();
    }

    #[tokio::test]
    async fn poll_payment_times_out_when_unpaid() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        seed_unpaid_order(&state);

        let outcome = poll_payment(&state, "default", "o1", None, Duration::from_millis(20), None, std::future::pending()).await.unwrap();
        assert!(matches!(outcome, PaymentPollOutcome::Unpaid { .. }));
    }

    #[tokio::test]
    async fn poll_payment_wakes_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        seed_unpaid_order(&state);

        let state_clone = state.clone();
        let waiter = tokio::spawn(async move {
            poll_payment(&state_clone, "default", "o1", None, Duration::from_secs(5), None, std::future::pending()).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut order = state.db.get_order("default", "o1").unwrap();
        order.state = OrderState::Paid;
        order.contract_hash = Some("hash".into());
        order.contract_terms = Some(ContractTerms {
            order_id: "o1".into(),
            amount: "KUDOS:10".into(),
            max_fee: None,
            pay_deadline: chrono::Utc::now(),
            refund_deadline: chrono::Utc::now(),
            products: vec![],
            fulfillment_url: None,
            trusted_exchanges: vec![],
            auditors: vec![],
            h_wire: "h".into(),
            merchant_pub: "m".into(),
            timestamp: chrono::Utc::now(),
            nonce: "n".into(),
            extra: serde_json::json!({}),
        });
        state.db.put_order(&order).unwrap();
        state.db.notifier.wake("default", "o1");

        let outcome = waiter.await.unwrap().unwrap();
        assert!(matches!(outcome, PaymentPollOutcome::Paid { .. }));
    }
}
