//! §6 Public routes: claim, pay, abort, payment long-poll, tip lookup and
//! pickup, and `/config`. None of these require the admin bearer token —
//! they're the wallet-facing surface.

use super::{idempotency_fingerprint, idempotent, json_body, observe, reply_err, reply_result, with_state};
use crate::context::AppState;
use crate::refund_tip_engine::{self, PlanchetRequest};
use crate::support::db_err_to_merchant;
use crate::{longpoll, order_engine, payment_pipeline};
use merchant_core::{CoinDeposit, MerchantError};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use warp::reply::Response;
use warp::{Filter, Rejection};

const REQUEST_DEADLINE: Duration = Duration::from_secs(15);

pub fn routes(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    claim(state.clone())
        .or(pay(state.clone()))
        .unify()
        .or(abort(state.clone()))
        .unify()
        .or(poll_order(state.clone()))
        .unify()
        .or(tip_lookup(state.clone()))
        .unify()
        .or(tip_pickup(state.clone()))
        .unify()
        .or(config(state))
        .unify()
}

#[derive(Debug, Deserialize, Serialize)]
struct ClaimRequest {
    nonce: String,
}

fn claim(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "orders" / String / "claim")
        .and(warp::post())
        .and(json_body::<ClaimRequest>())
        .and(with_state(state))
        .and_then(|instance_id: String, order_id: String, body: ClaimRequest, state: AppState| async move {
            let started = Instant::now();
            let path = format!("/instances/{instance_id}/orders/{order_id}/claim");
            let fingerprint = idempotency_fingerprint(&path, &body);
            let response = idempotent(&state, &instance_id, &fingerprint, order_engine::claim(&state, &instance_id, &order_id, &body.nonce)).await;
            observe(&state, "orders.claim", started, &response);
            Ok::<_, Rejection>(response)
        })
}

fn pay(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    #[derive(Deserialize, Serialize)]
    struct PayRequest {
        coins: Vec<CoinDeposit>,
    }

    warp::path!("instances" / String / "orders" / String / "pay")
        .and(warp::post())
        .and(json_body::<PayRequest>())
        .and(with_state(state))
        .and_then(|instance_id: String, order_id: String, body: PayRequest, state: AppState| async move {
            let started = Instant::now();
            let path = format!("/instances/{instance_id}/orders/{order_id}/pay");
            let fingerprint = idempotency_fingerprint(&path, &body);
            let response = idempotent(
                &state,
                &instance_id,
                &fingerprint,
                payment_pipeline::pay(&state, &instance_id, &order_id, body.coins, REQUEST_DEADLINE),
            )
            .await;
            observe(&state, "orders.pay", started, &response);
            Ok::<_, Rejection>(response)
        })
}

fn abort(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "orders" / String / "abort")
        .and(warp::post())
        .and(with_state(state))
        .map(|instance_id: String, order_id: String, state: AppState| {
            let started = Instant::now();
            let response = reply_result(payment_pipeline::abort(&state, &instance_id, &order_id));
            observe(&state, "orders.abort", started, &response);
            response
        })
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    min_refund: Option<String>,
}

/// `GET /orders/{id}` — 4.J long-poll. Real HTTP-disconnect cancellation
/// would need hyper's connection-drop signal plumbed through warp, which
/// isn't wired up here; this suspends on state change or `timeout_ms`
/// only, which still satisfies "returns early with no observable state
/// change" on timeout.
fn poll_order(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "orders" / String)
        .and(warp::get())
        .and(warp::query::<PollQuery>())
        .and(with_state(state))
        .and_then(|instance_id: String, order_id: String, query: PollQuery, state: AppState| async move {
            let started = Instant::now();
            let timeout = Duration::from_millis(query.timeout_ms.unwrap_or(30_000));
            let outcome = longpoll::poll_payment(
                &state,
                &instance_id,
                &order_id,
                query.session_id.as_deref(),
                timeout,
                query.min_refund.as_deref(),
                std::future::pending(),
            )
            .await;
            let response = reply_result(outcome);
            observe(&state, "orders.poll", started, &response);
            Ok::<_, Rejection>(response)
        })
}

fn tip_lookup(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "tips" / String)
        .and(warp::get())
        .and(with_state(state))
        .map(|instance_id: String, tip_id: String, state: AppState| {
            let started = Instant::now();
            let result = state.db.get_tip(&instance_id, &tip_id).map_err(db_err_to_merchant);
            let response = reply_result(result);
            observe(&state, "tips.lookup", started, &response);
            response
        })
}

#[derive(Debug, Deserialize, Serialize)]
struct PlanchetDto {
    denom_pub: String,
    blinded_planchet: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct TipPickupRequest {
    exchange_url: String,
    planchets: Vec<PlanchetDto>,
}

fn tip_pickup(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "tips" / String / "pickup")
        .and(warp::post())
        .and(json_body::<TipPickupRequest>())
        .and(with_state(state))
        .and_then(|instance_id: String, tip_id: String, body: TipPickupRequest, state: AppState| async move {
            let started = Instant::now();
            let path = format!("/instances/{instance_id}/tips/{tip_id}/pickup");
            let fingerprint = idempotency_fingerprint(&path, &body);
            let planchets: Vec<PlanchetRequest> = body
                .planchets
                .iter()
                .map(|p| PlanchetRequest { denom_pub: p.denom_pub.clone(), blinded_planchet: p.blinded_planchet.clone() })
                .collect();
            let response = idempotent(
                &state,
                &instance_id,
                &fingerprint,
                refund_tip_engine::tip_pickup(&state, &instance_id, &tip_id, &body.exchange_url, planchets, REQUEST_DEADLINE),
            )
            .await;
            observe(&state, "tips.pickup", started, &response);
            Ok::<_, Rejection>(response)
        })
}

#[derive(Debug, Serialize)]
struct ConfigReply {
    currency: String,
    version: &'static str,
    exchanges: Vec<String>,
}

fn config(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("config")
        .and(warp::get())
        .and(with_state(state))
        .map(|state: AppState| {
            let started = Instant::now();
            let result: Result<ConfigReply, MerchantError> = state
                .config
                .exchanges()
                .map(|exchanges| ConfigReply {
                    currency: state.config.currency.clone(),
                    version: env!("CARGO_PKG_VERSION"),
                    exchanges: exchanges.into_iter().map(|e| e.url).collect(),
                })
                .map_err(|e| MerchantError::Internal(e.to_string()));
            let response = match result {
                Ok(reply) => super::reply_ok(&reply),
                Err(e) => reply_err(&e),
            };
            observe(&state, "config", started, &response);
            response
        })
}
