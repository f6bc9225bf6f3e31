//! 4.H Refund & Tip Engine: refund increases against a PAID order, tip
//! reserve authorization, and all-or-nothing tip pickup.

use crate::context::AppState;
use crate::support::{db_err_to_merchant, instance_keypair, load_instance};
use chrono::Utc;
use merchant_core::{Amount, DenominationUse, MerchantError, OrderState, RefundRecord, Tip, TipPickupError, TipReserve, TipReserveError};
use merchant_crypto::SignaturePurpose;
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct RefundOutcome {
    pub total_refunded: String,
    pub new_refunds: Vec<RefundRecord>,
}

/// Refund increase (4.H): idempotent for `amount <= current refund`,
/// grants only the delta otherwise, fails CONFLICT above the paid total.
pub fn refund_increase(state: &AppState, instance_id: &str, order_id: &str, amount: &str, reason: &str) -> Result<RefundOutcome, MerchantError> {
    let instance = load_instance(state, instance_id)?;
    let keypair = instance_keypair(&instance)?;

    let order = state.db.get_order(instance_id, order_id).map_err(db_err_to_merchant)?;
    if order.state != OrderState::Paid {
        return Err(MerchantError::Conflict(format!("order {order_id} is not PAID, cannot refund")));
    }
    let terms = order.contract_terms.as_ref().expect("PAID order carries contract terms");
    let paid_total = Amount::from_str(&terms.amount).map_err(|e| MerchantError::Internal(e.to_string()))?;
    let requested = Amount::from_str(amount).map_err(|e| MerchantError::BadRequest(e.to_string()))?;

    let existing = state.db.list_refunds(instance_id, order_id).map_err(db_err_to_merchant)?;
    let already_refunded = Amount::sum(existing.iter().map(|r| r.amount.parse::<Amount>()).collect::<Result<Vec<_>, _>>().map_err(|e| MerchantError::Internal(e.to_string()))?.iter(), &paid_total.currency)
        .map_err(|e| MerchantError::Internal(e.to_string()))?;

    if requested <= already_refunded {
        // Idempotent-success interpretation per the DESIGN.md open-question
        // resolution: amount == current refund is a no-op, not a conflict.
        return Ok(RefundOutcome { total_refunded: already_refunded.to_string(), new_refunds: vec![] });
    }
    if requested > paid_total {
        return Err(MerchantError::Conflict(format!("refund amount {amount} exceeds paid total {paid_total}")));
    }

    let delta = requested.checked_sub(&already_refunded).map_err(|e| MerchantError::Internal(e.to_string()))?;

    // Pro rata across the order's deposits, largest remainder gets whatever
    // integer-fraction dust is left so the sum exactly matches `delta`.
    let deposits = state.db.list_deposits(instance_id, order_id).map_err(db_err_to_merchant)?;
    if deposits.is_empty() {
        return Err(MerchantError::Internal(format!("order {order_id} is PAID but has no deposits on record")));
    }
    let deposit_total = Amount::sum(
        deposits.iter().map(|d| d.amount_without_fee.parse::<Amount>()).collect::<Result<Vec<_>, _>>().map_err(|e| MerchantError::Internal(e.to_string()))?.iter(),
        &paid_total.currency,
    )
    .map_err(|e| MerchantError::Internal(e.to_string()))?;

    let mut remaining = delta.clone();
    let mut new_refunds = Vec::with_capacity(deposits.len());
    for (i, deposit) in deposits.iter().enumerate() {
        if remaining.is_zero() {
            break;
        }
        let deposit_value = Amount::from_str(&deposit.amount_without_fee).map_err(|e| MerchantError::Internal(e.to_string()))?;
        let share = if deposit_total.is_zero() {
            Amount::zero(&paid_total.currency)
        } else {
            let share_fraction = (deposit_value.value as u128 * merchant_core::amount::FRACTION_BASE as u128 + deposit_value.fraction as u128)
                * (delta.value as u128 * merchant_core::amount::FRACTION_BASE as u128 + delta.fraction as u128)
                / (deposit_total.value as u128 * merchant_core::amount::FRACTION_BASE as u128 + deposit_total.fraction as u128);
            let units = (share_fraction / merchant_core::amount::FRACTION_BASE as u128) as u64;
            let frac = (share_fraction % merchant_core::amount::FRACTION_BASE as u128) as u64;
            Amount::new(&paid_total.currency, units, frac).unwrap_or_else(|_| Amount::zero(&paid_total.currency))
        };
        let grant = if share > remaining { remaining.clone() } else { share };
        if grant.is_zero() {
            continue;
        }
        remaining = remaining.saturating_sub(&grant);

        let rtransaction_id = existing.iter().filter(|r| r.coin_pub == deposit.coin_pub).map(|r| r.rtransaction_id).max().map(|m| m + 1).unwrap_or(0) + i as u64;
        let message = format!("{}:{}:{}:{}", order_id, deposit.coin_pub, grant, rtransaction_id);
        let sig = keypair
            .sign(SignaturePurpose::RefundOk, message.as_bytes())
            .map_err(|e| MerchantError::Internal(format!("refund signing failed: {e}")))?;
        let refund = RefundRecord {
            instance_id: instance_id.to_string(),
            order_id: order_id.to_string(),
            coin_pub: deposit.coin_pub.clone(),
            rtransaction_id,
            amount: grant.to_string(),
            reason: reason.to_string(),
            merchant_sig: hex::encode(sig),
        };
        state.db.insert_refund(&refund).map_err(db_err_to_merchant)?;
        new_refunds.push(refund);
    }

    let total_refunded = already_refunded.checked_add(&delta).map_err(|e| MerchantError::Internal(e.to_string()))?;
    Ok(RefundOutcome { total_refunded: total_refunded.to_string(), new_refunds })
}

#[derive(Debug, Serialize)]
pub struct TipAuthorization {
    pub tip_id: String,
    pub pickup_uri: String,
}

/// Tip authorization (4.H): debits the instance's reserve, mints a tip_id.
pub fn tip_authorize(state: &AppState, instance_id: &str, reserve_pub: &str, amount: &str) -> Result<TipAuthorization, MerchantError> {
    load_instance(state, instance_id)?;
    let mut reserve = state.db.get_tip_reserve(instance_id, reserve_pub).map_err(db_err_to_merchant)?;
    let requested = Amount::from_str(amount).map_err(|e| MerchantError::BadRequest(e.to_string()))?;
    let now = Utc::now();

    reserve.debit(&requested, now).map_err(|e| match e {
        TipReserveError::Expired => MerchantError::Gone(format!("reserve {reserve_pub} has expired")),
        TipReserveError::Insufficient { remaining, requested } => {
            MerchantError::Forbidden(format!("reserve {reserve_pub} insufficient: remaining {remaining}, requested {requested}"))
        }
    })?;
    state.db.put_tip_reserve(&reserve).map_err(db_err_to_merchant)?;

    let tip_id = uuid::Uuid::new_v4().to_string();
    let tip = Tip {
        instance_id: instance_id.to_string(),
        tip_id: tip_id.clone(),
        reserve_pub: reserve_pub.to_string(),
        total: requested.clone(),
        remaining: requested,
        expiration: reserve.expiration,
    };
    state.db.put_tip(&tip).map_err(db_err_to_merchant)?;

    Ok(TipAuthorization { pickup_uri: format!("taler://tip/{}", tip.tip_id), tip_id })
}

#[derive(Debug, Clone)]
pub struct PlanchetRequest {
    pub denom_pub: String,
    pub blinded_planchet: String,
}

#[derive(Debug, Serialize)]
pub struct TipPickupReceipt {
    pub blind_sigs: Vec<String>,
}

/// Tip pickup (4.H): all-or-nothing across the requested planchets — any
/// withdraw failure rolls the debit back so the tip remains pickupable.
pub async fn tip_pickup(
    state: &AppState,
    instance_id: &str,
    tip_id: &str,
    exchange_url: &str,
    planchets: Vec<PlanchetRequest>,
    request_deadline: Duration,
) -> Result<TipPickupReceipt, MerchantError> {
    load_instance(state, instance_id)?;
    let mut tip = state.db.get_tip(instance_id, tip_id).map_err(db_err_to_merchant)?;
    let reserve_pub = tip.reserve_pub.clone();
    let now = Utc::now();

    let mut planchet_values = Vec::with_capacity(planchets.len());
    for planchet in &planchets {
        let denom = state
            .keystate
            .find_denomination(exchange_url, &planchet.denom_pub, DenominationUse::Withdraw, now, request_deadline)
            .await
            .map_err(|_| MerchantError::Unauthorized(format!("denomination {} not currently valid for withdraw", planchet.denom_pub)))?;
        let value = Amount::from_str(&denom.value).map_err(|e| MerchantError::Internal(e.to_string()))?;
        planchet_values.push(value);
    }
    let debit_amount = Amount::sum(planchet_values.iter(), &tip.total.currency).map_err(|e| MerchantError::BadRequest(e.to_string()))?;

    tip.debit(&debit_amount, now).map_err(|e| match e {
        TipPickupError::Expired => MerchantError::Gone(format!("tip {tip_id} has expired")),
        TipPickupError::Insufficient => MerchantError::Forbidden(format!("tip {tip_id} has insufficient remaining balance")),
    })?;

    let mut blind_sigs = Vec::with_capacity(planchets.len());
    let mut rollback_needed = false;
    let mut failure_reason = String::new();
    for planchet in &planchets {
        let request = merchant_exchange_client::WithdrawRequest {
            denom_pub: planchet.denom_pub.clone(),
            blinded_planchet: planchet.blinded_planchet.clone(),
        };
        match state.exchange_client.reserve_withdraw(exchange_url, &reserve_pub, &request, request_deadline).await {
            Ok(resp) => blind_sigs.push(resp.blind_sig),
            Err(e) => {
                rollback_needed = true;
                failure_reason = e.to_string();
                break;
            }
        }
    }

    if rollback_needed {
        tip.credit(&debit_amount);
        state.db.put_tip(&tip).map_err(db_err_to_merchant)?;
        return Err(MerchantError::FailedDependency { reason: failure_reason, exchange_reply: None });
    }

    state.db.put_tip(&tip).map_err(db_err_to_merchant)?;
    Ok(TipPickupReceipt { blind_sigs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_reserve_rejects_expired() {
        let mut reserve = TipReserve {
            instance_id: "i".into(),
            reserve_pub: "r".into(),
            exchange_url: "https://exchange.example".into(),
            authorized: "KUDOS:10".parse().unwrap(),
            picked_up: "KUDOS:0".parse().unwrap(),
            expiration: Utc::now() - chrono::Duration::seconds(1),
        };
        let amount: Amount = "KUDOS:1".parse().unwrap();
        assert!(matches!(reserve.debit(&amount, Utc::now()), Err(TipReserveError::Expired)));
    }
}
