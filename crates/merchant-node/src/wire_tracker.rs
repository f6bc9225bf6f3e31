//! 4.I Wire-Transfer Tracker: forwards /track/transfer to exchanges,
//! persists signed aggregations, and reports coverage per order.

use crate::context::AppState;
use crate::support::{db_err_to_merchant, load_instance};
use chrono::Utc;
use merchant_core::{MerchantError, WireTransferCoin, WireTransferRecord};
use std::time::Duration;

/// `track_transfer(instance, wtid, exchange_url, wire_method)` per 4.I.
/// `wire_method` is accepted for interface parity with the REST route but
/// is not otherwise interpreted — the exchange response alone decides
/// whether the wire covers this instance.
pub async fn track_transfer(
    state: &AppState,
    instance_id: &str,
    wtid: &str,
    exchange_url: &str,
    _wire_method: &str,
    request_deadline: Duration,
) -> Result<WireTransferRecord, MerchantError> {
    let instance = load_instance(state, instance_id)?;

    if let Some(cached) = state.db.get_wire_transfer(instance_id, wtid).map_err(db_err_to_merchant)? {
        return Ok(cached);
    }

    let response = state
        .exchange_client
        .track_transfer(exchange_url, wtid, request_deadline)
        .await
        .map_err(|e| MerchantError::FailedDependency { reason: e.to_string(), exchange_reply: None })?;

    if !instance.accounts.iter().any(|a| a.h_wire == response.h_wire) {
        return Err(MerchantError::Unauthorized(format!(
            "wire transfer {wtid} reports h_wire {} which matches none of this instance's bank accounts",
            response.h_wire
        )));
    }

    let mut coins = Vec::with_capacity(response.coins.len());
    for entry in &response.coins {
        let order_id = state
            .db
            .order_for_coin(instance_id, &entry.coin_pub)
            .map_err(db_err_to_merchant)?
            .ok_or_else(|| MerchantError::Unauthorized(format!("coin {} is not known to this instance", entry.coin_pub)))?;

        let order = state.db.get_order(instance_id, &order_id).map_err(db_err_to_merchant)?;
        let contract_hash = order.contract_hash.as_deref().unwrap_or_default();
        if contract_hash != entry.proposal_hash {
            return Err(MerchantError::Unauthorized(format!(
                "coin {} reports proposal hash {} which does not match order {order_id}'s contract hash",
                entry.coin_pub, entry.proposal_hash
            )));
        }

        coins.push(WireTransferCoin {
            coin_pub: entry.coin_pub.clone(),
            order_id,
            deposit_value: entry.deposit_value.clone(),
            deposit_fee: entry.deposit_fee.clone(),
        });
    }

    let record = WireTransferRecord {
        instance_id: instance_id.to_string(),
        wtid: wtid.to_string(),
        exchange_url: exchange_url.to_string(),
        total_amount: response.total_amount,
        h_wire: response.h_wire,
        coins,
        execution_time: response.execution_time,
    };
    state.db.put_wire_transfer(&record).map_err(db_err_to_merchant)?;
    Ok(record)
}

#[derive(Debug, serde::Serialize)]
#[serde(tag = "status")]
pub enum TransactionCoverage {
    Covered { wtids: Vec<String> },
    #[serde(rename = "NOT_YET_TRANSFERRED")]
    NotYetTransferred,
    Pending,
}

/// `track_transaction(instance, order_id)` per 4.I.
pub fn track_transaction(state: &AppState, instance_id: &str, order_id: &str) -> Result<TransactionCoverage, MerchantError> {
    load_instance(state, instance_id)?;
    let order = state.db.get_order(instance_id, order_id).map_err(db_err_to_merchant)?;
    let wtids = state.db.wtids_for_order(instance_id, order_id).map_err(db_err_to_merchant)?;
    if !wtids.is_empty() {
        return Ok(TransactionCoverage::Covered { wtids });
    }

    let instance = load_instance(state, instance_id)?;
    let deadline_passed = order
        .contract_terms
        .as_ref()
        .map(|terms| terms.timestamp + chrono::Duration::seconds(instance.defaults.wire_transfer_delay_seconds) < Utc::now())
        .unwrap_or(false);

    if deadline_passed {
        Ok(TransactionCoverage::NotYetTransferred)
    } else {
        Ok(TransactionCoverage::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::MerchantMetrics;
    use clap::Parser;
    use merchant_core::{Instance, InstanceDefaults, Order, Proposal};
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

    #[test]
    fn untransferred_order_past_deadline_reports_not_yet_transferred() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let (mut instance, _kp) = Instance::new(
            "default".into(),
            "Shop".into(),
            serde_json::json!({}),
            serde_json::json!({}),
            InstanceDefaults {
                max_wire_fee: "KUDOS:1".into(),
                wire_fee_amortization: 1,
                max_deposit_fee: "KUDOS:1".into(),
                wire_transfer_delay_seconds: 1,
                pay_delay_seconds: 3600,
            },
        );
        instance.insert_account(merchant_core::BankAccount::new("payto://x-taler-bank/exchange/acct".into())).unwrap();
        state.db.put_instance(&instance).unwrap();

        let proposal = Proposal {
            amount: "KUDOS:10".into(),
            max_fee: None,
            pay_deadline: Utc::now() - chrono::Duration::hours(2),
            refund_deadline: Utc::now() - chrono::Duration::hours(1),
            products: vec![],
            fulfillment_url: None,
            extra: serde_json::json!({}),
        };
        let mut order = Order::new("default".into(), "o1".into(), proposal, Utc::now() - chrono::Duration::hours(2));
        order.state = merchant_core::OrderState::Paid;
        order.contract_terms = Some(merchant_core::ContractTerms {
            order_id: "o1".into(),
            amount: "KUDOS:10".into(),
            max_fee: None,
            pay_deadline: Utc::now() - chrono::Duration::hours(2),
            refund_deadline: Utc::now() - chrono::Duration::hours(1),
            products: vec![],
            fulfillment_url: None,
            trusted_exchanges: vec![],
            auditors: vec![],
            h_wire: "h".into(),
            merchant_pub: instance.merchant_pub.clone(),
            timestamp: Utc::now() - chrono::Duration::hours(2),
            nonce: "n".into(),
            extra: serde_json::json!({}),
        });
        state.db.put_order(&order).unwrap();

        let coverage = track_transaction(&state, "default", "o1").unwrap();
        assert!(matches!(coverage, TransactionCoverage::NotYetTransferred));
    }
}
