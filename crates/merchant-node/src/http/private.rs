//! §6 Private (authenticated) routes: instance/product/inventory CRUD,
//! order creation and history, refunds, tip authorization, and
//! wire-transfer tracking. Every route here sits behind `require_admin`.

use super::{idempotency_fingerprint, idempotent, json_body, observe, require_admin, reply_err, reply_result, with_state};
use crate::context::AppState;
use crate::instance_store::{self, InstancePatch, ProductPatch};
use crate::support::db_err_to_merchant;
use crate::wire_tracker;
use merchant_core::{InstanceDefaults, Proposal};
use merchant_db::{Direction, PageRequest};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use warp::reply::Response;
use warp::{Filter, Rejection};

pub fn routes(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let guarded = require_admin(state.clone());

    let instances = create_instance(state.clone())
        .or(list_instances(state.clone()))
        .unify()
        .or(get_instance(state.clone()))
        .unify()
        .or(patch_instance(state.clone()))
        .unify()
        .or(delete_instance(state.clone()))
        .unify()
        .or(purge_instance(state.clone()))
        .unify();

    let products = create_product(state.clone())
        .or(list_products(state.clone()))
        .unify()
        .or(get_product(state.clone()))
        .unify()
        .or(patch_product(state.clone()))
        .unify()
        .or(delete_product(state.clone()))
        .unify()
        .or(lock_product(state.clone()))
        .unify();

    let orders = create_order(state.clone())
        .or(list_orders(state.clone()))
        .unify()
        .or(refund_order(state.clone()))
        .unify();

    let tips_and_transfers = tip_authorize(state.clone())
        .or(transfers(state.clone()))
        .unify()
        .or(order_transfers(state))
        .unify();

    guarded.and(instances.or(products).unify().or(orders).unify().or(tips_and_transfers).unify())
}

// ---- Instances --------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
struct CreateInstanceRequest {
    id: String,
    name: String,
    #[serde(default)]
    address: serde_json::Value,
    #[serde(default)]
    jurisdiction: serde_json::Value,
    defaults: InstanceDefaults,
    #[serde(default)]
    payto_uri: Option<String>,
}

fn create_instance(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances")
        .and(warp::post())
        .and(json_body::<CreateInstanceRequest>())
        .and(with_state(state))
        .map(|body: CreateInstanceRequest, state: AppState| {
            let started = Instant::now();
            let result = instance_store::create_instance(&state, body.id, body.name, body.address, body.jurisdiction, body.defaults, body.payto_uri);
            let response = reply_result(result);
            observe(&state, "instances.create", started, &response);
            response
        })
}

fn list_instances(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances")
        .and(warp::get())
        .and(with_state(state))
        .map(|state: AppState| {
            let started = Instant::now();
            let response = reply_result(instance_store::list_instances(&state));
            observe(&state, "instances.list", started, &response);
            response
        })
}

fn get_instance(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String)
        .and(warp::get())
        .and(with_state(state))
        .map(|id: String, state: AppState| {
            let started = Instant::now();
            let response = reply_result(instance_store::get_instance(&state, &id));
            observe(&state, "instances.get", started, &response);
            response
        })
}

fn patch_instance(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String)
        .and(warp::patch())
        .and(json_body::<InstancePatch>())
        .and(with_state(state))
        .map(|id: String, patch: InstancePatch, state: AppState| {
            let started = Instant::now();
            let response = reply_result(instance_store::patch_instance(&state, &id, patch));
            observe(&state, "instances.patch", started, &response);
            response
        })
}

fn delete_instance(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String)
        .and(warp::delete())
        .and(with_state(state))
        .map(|id: String, state: AppState| {
            let started = Instant::now();
            let response = match instance_store::delete_instance(&state, &id) {
                Ok(()) => super::reply_no_content(),
                Err(e) => reply_err(&e),
            };
            observe(&state, "instances.delete", started, &response);
            response
        })
}

fn purge_instance(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "purge")
        .and(warp::post())
        .and(with_state(state))
        .map(|id: String, state: AppState| {
            let started = Instant::now();
            let response = match instance_store::purge_instance(&state, &id) {
                Ok(()) => super::reply_no_content(),
                Err(e) => reply_err(&e),
            };
            observe(&state, "instances.purge", started, &response);
            response
        })
}

// ---- Products -----------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
struct CreateProductRequest {
    product_id: String,
    description: String,
    unit: String,
    price: String,
    stocked: i64,
}

fn create_product(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "products")
        .and(warp::post())
        .and(json_body::<CreateProductRequest>())
        .and(with_state(state))
        .map(|instance_id: String, body: CreateProductRequest, state: AppState| {
            let started = Instant::now();
            let result = instance_store::create_product(&state, &instance_id, body.product_id, body.description, body.unit, body.price, body.stocked);
            let response = reply_result(result);
            observe(&state, "products.create", started, &response);
            response
        })
}

fn list_products(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "products")
        .and(warp::get())
        .and(with_state(state))
        .map(|instance_id: String, state: AppState| {
            let started = Instant::now();
            let response = reply_result(instance_store::list_products(&state, &instance_id));
            observe(&state, "products.list", started, &response);
            response
        })
}

fn get_product(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "products" / String)
        .and(warp::get())
        .and(with_state(state))
        .map(|instance_id: String, product_id: String, state: AppState| {
            let started = Instant::now();
            let response = reply_result(instance_store::get_product(&state, &instance_id, &product_id));
            observe(&state, "products.get", started, &response);
            response
        })
}

fn patch_product(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "products" / String)
        .and(warp::patch())
        .and(json_body::<ProductPatch>())
        .and(with_state(state))
        .map(|instance_id: String, product_id: String, patch: ProductPatch, state: AppState| {
            let started = Instant::now();
            let response = reply_result(instance_store::patch_product(&state, &instance_id, &product_id, patch));
            observe(&state, "products.patch", started, &response);
            response
        })
}

fn delete_product(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "products" / String)
        .and(warp::delete())
        .and(with_state(state))
        .map(|instance_id: String, product_id: String, state: AppState| {
            let started = Instant::now();
            let response = match instance_store::delete_product(&state, &instance_id, &product_id) {
                Ok(()) => super::reply_no_content(),
                Err(e) => reply_err(&e),
            };
            observe(&state, "products.delete", started, &response);
            response
        })
}

#[derive(Debug, Deserialize, Serialize)]
struct LockStockRequest {
    quantity: u64,
    #[serde(default = "default_lock_ttl")]
    ttl_seconds: i64,
}

fn default_lock_ttl() -> i64 {
    300
}

#[derive(Debug, Serialize)]
struct LockStockReply {
    lock_id: uuid::Uuid,
}

fn lock_product(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "products" / String / "lock")
        .and(warp::post())
        .and(json_body::<LockStockRequest>())
        .and(with_state(state))
        .map(|instance_id: String, product_id: String, body: LockStockRequest, state: AppState| {
            let started = Instant::now();
            let result = instance_store::lock_stock(&state, &instance_id, &product_id, body.quantity, body.ttl_seconds).map(|lock_id| LockStockReply { lock_id });
            let response = reply_result(result);
            observe(&state, "products.lock", started, &response);
            response
        })
}

// ---- Orders -------------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
struct CreateOrderRequest {
    #[serde(default)]
    order_id: Option<String>,
    #[serde(flatten)]
    proposal: Proposal,
}

#[derive(Debug, Serialize)]
struct CreateOrderReply {
    order_id: String,
}

fn create_order(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "orders")
        .and(warp::post())
        .and(json_body::<CreateOrderRequest>())
        .and(with_state(state))
        .and_then(|instance_id: String, body: CreateOrderRequest, state: AppState| async move {
            let started = Instant::now();
            let path = format!("/instances/{instance_id}/orders");
            let fingerprint = idempotency_fingerprint(&path, &body);
            let requested_order_id = body.order_id.clone().unwrap_or_default();
            let result = crate::order_engine::create_proposal(&state, &instance_id, body.order_id, body.proposal).map(|outcome| match outcome {
                crate::order_engine::CreateProposalOutcome::Created { order_id } => CreateOrderReply { order_id },
                crate::order_engine::CreateProposalOutcome::AlreadyExists => CreateOrderReply { order_id: requested_order_id },
            });
            let response = idempotent(&state, &instance_id, &fingerprint, async { result }).await;
            observe(&state, "orders.create", started, &response);
            Ok::<_, Rejection>(response)
        })
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    cursor: Option<u64>,
    #[serde(default = "default_page_limit")]
    limit: usize,
    #[serde(default)]
    backward: bool,
}

fn default_page_limit() -> usize {
    50
}

fn list_orders(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "orders")
        .and(warp::get())
        .and(warp::query::<HistoryQuery>())
        .and(with_state(state))
        .map(|instance_id: String, query: HistoryQuery, state: AppState| {
            let started = Instant::now();
            let req = PageRequest {
                cursor: query.cursor,
                limit: query.limit,
                direction: if query.backward { Direction::Backward } else { Direction::Forward },
            };
            let result = state.db.list_order_history(&instance_id, &req).map_err(db_err_to_merchant);
            let response = reply_result(result);
            observe(&state, "orders.list", started, &response);
            response
        })
}

#[derive(Debug, Deserialize, Serialize)]
struct RefundRequest {
    amount: String,
    reason: String,
}

fn refund_order(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "orders" / String / "refund")
        .and(warp::post())
        .and(json_body::<RefundRequest>())
        .and(with_state(state))
        .and_then(|instance_id: String, order_id: String, body: RefundRequest, state: AppState| async move {
            let started = Instant::now();
            let path = format!("/instances/{instance_id}/orders/{order_id}/refund");
            let fingerprint = idempotency_fingerprint(&path, &body);
            let outcome = async {
                crate::refund_tip_engine::refund_increase(&state, &instance_id, &order_id, &body.amount, &body.reason)
            };
            let response = idempotent(&state, &instance_id, &fingerprint, outcome).await;
            observe(&state, "orders.refund", started, &response);
            Ok::<_, Rejection>(response)
        })
}

// ---- Tips and wire-transfer tracking --------------------------------

#[derive(Debug, Deserialize, Serialize)]
struct TipAuthorizeRequest {
    reserve_pub: String,
    amount: String,
}

fn tip_authorize(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "tips")
        .and(warp::post())
        .and(json_body::<TipAuthorizeRequest>())
        .and(with_state(state))
        .and_then(|instance_id: String, body: TipAuthorizeRequest, state: AppState| async move {
            let started = Instant::now();
            let path = format!("/instances/{instance_id}/tips");
            let fingerprint = idempotency_fingerprint(&path, &body);
            let outcome = async { crate::refund_tip_engine::tip_authorize(&state, &instance_id, &body.reserve_pub, &body.amount) };
            let response = idempotent(&state, &instance_id, &fingerprint, outcome).await;
            observe(&state, "tips.authorize", started, &response);
            Ok::<_, Rejection>(response)
        })
}

#[derive(Debug, Deserialize)]
struct TransferQuery {
    wtid: String,
    exchange: String,
    #[serde(default)]
    wire_method: Option<String>,
}

const TRANSFER_REQUEST_DEADLINE: std::time::Duration = std::time::Duration::from_secs(15);

fn transfers(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "transfers")
        .and(warp::get())
        .and(warp::query::<TransferQuery>())
        .and(with_state(state))
        .and_then(|instance_id: String, query: TransferQuery, state: AppState| async move {
            let started = Instant::now();
            let wire_method = query.wire_method.unwrap_or_default();
            let result = wire_tracker::track_transfer(&state, &instance_id, &query.wtid, &query.exchange, &wire_method, TRANSFER_REQUEST_DEADLINE).await;
            let response = reply_result(result);
            observe(&state, "transfers.track", started, &response);
            Ok::<_, Rejection>(response)
        })
}

fn order_transfers(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("instances" / String / "orders" / String / "transfers")
        .and(warp::get())
        .and(with_state(state))
        .map(|instance_id: String, order_id: String, state: AppState| {
            let started = Instant::now();
            let response = reply_result(wire_tracker::track_transaction(&state, &instance_id, &order_id));
            observe(&state, "orders.transfers", started, &response);
            response
        })
}
