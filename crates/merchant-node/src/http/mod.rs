//! 4.K HTTP Surface: warp route wiring, body-size limiting, idempotency
//! replay ahead of dispatch, and uniform JSON error rendering. One
//! `warp::path!` filter per route, `with_state` injecting shared state,
//! `warp::reply::with_status(warp::reply::json(...), status)` for every
//! response, routes split into per-concern modules.
//!
//! Every leaf handler renders straight to `warp::reply::Response` so the
//! whole tree of `.or()`-chained routes shares one concrete `Extract`
//! type and a single trailing `.unify()` closes it out.

mod private;
mod public;

use crate::context::AppState;
use crate::rate_limiter::{self, RateLimiter};
use merchant_core::MerchantError;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::time::Instant;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// §6 "body parsing up to a small bounded size (1 MiB; reject with 413)".
pub const MAX_BODY_BYTES: u64 = 1024 * 1024;

pub fn routes(state: AppState, limiter: RateLimiter) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone {
    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|state: AppState| warp::reply::with_header(state.metrics.encode(), "content-type", "text/plain; version=0.0.4").into_response());

    let app = public::routes(state.clone())
        .or(private::routes(state.clone()))
        .unify()
        .or(metrics_route)
        .unify()
        .recover(handle_rejection)
        .unify();

    rate_limiter::filters::rate_limit(limiter).and(app).map(|reply: Response| reply)
}

pub(crate) fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub(crate) fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

pub(crate) fn reply_json<T: Serialize>(status: u16, body: &T) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    warp::reply::with_status(warp::reply::json(body), code).into_response()
}

pub(crate) fn reply_ok<T: Serialize>(value: &T) -> Response {
    reply_json(200, value)
}

pub(crate) fn reply_no_content() -> Response {
    warp::reply::with_status(warp::reply::reply(), StatusCode::NO_CONTENT).into_response()
}

pub(crate) fn reply_err(err: &MerchantError) -> Response {
    reply_json(err.http_status(), &err.to_reply())
}

pub(crate) fn reply_result<T: Serialize>(result: Result<T, MerchantError>) -> Response {
    match result {
        Ok(value) => reply_ok(&value),
        Err(e) => reply_err(&e),
    }
}

/// §6 "authenticated" private routes: a single shared bearer token. A
/// missing `admin_token` in config disables the check — only meant for
/// running behind a reverse proxy that already enforces access control.
pub(crate) fn require_admin(state: AppState) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(|header: Option<String>, state: AppState| async move {
            let Some(expected) = state.config.admin_token.as_deref() else {
                return Ok(());
            };
            let presented = header.as_deref().and_then(|h| h.strip_prefix("Bearer "));
            if presented == Some(expected) {
                Ok(())
            } else {
                Err(warp::reject::custom(Unauthorized))
            }
        })
        .untuple_one()
}

#[derive(Debug)]
pub(crate) struct Unauthorized;
impl warp::reject::Reject for Unauthorized {}

/// Records the §2 ambient `merchant_http_requests_total` / duration
/// metrics for one handler invocation.
pub(crate) fn observe(state: &AppState, route: &'static str, started: Instant, response: &Response) {
    let elapsed = started.elapsed().as_secs_f64();
    state.metrics.http_request_duration_seconds.with_label_values(&[route]).observe(elapsed);
    let status_class = format!("{}xx", response.status().as_u16() / 100);
    state.metrics.http_requests_total.with_label_values(&[route, &status_class]).inc();
}

/// Stable fingerprint for the 4.K idempotency-replay table: the route
/// path plus the canonical form of the deserialized request body. Two
/// retried POSTs with byte-identical JSON (modulo key order) map to the
/// same fingerprint regardless of client serialization quirks.
pub(crate) fn idempotency_fingerprint<T: Serialize>(path: &str, req: &T) -> String {
    let mut buf = path.as_bytes().to_vec();
    buf.push(0);
    buf.extend_from_slice(&serde_json::to_vec(req).unwrap_or_default());
    merchant_crypto::hash_bytes(&buf)
}

fn bytes_reply(status: u16, body: Vec<u8>) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    warp::reply::with_status(warp::reply::with_header(body, "content-type", "application/json"), code).into_response()
}

/// Wraps a POST handler with idempotency replay (4.K / §6 "Persisted
/// state"): a request whose fingerprint was already served returns the
/// cached status+body verbatim without re-running `fut`. Only successful
/// (2xx) outcomes are cached — a failed attempt should be retriable.
pub(crate) async fn idempotent<Fut, T>(state: &AppState, instance_id: &str, fingerprint: &str, fut: Fut) -> Response
where
    Fut: Future<Output = Result<T, MerchantError>>,
    T: Serialize,
{
    if let Ok(Some((status, body))) = state.db.get_idempotent_reply(instance_id, fingerprint) {
        return bytes_reply(status, body);
    }
    match fut.await {
        Ok(value) => {
            let body = serde_json::to_vec(&value).unwrap_or_default();
            let _ = state.db.put_idempotent_reply(instance_id, fingerprint, 200, body.clone());
            bytes_reply(200, body)
        }
        Err(e) => reply_err(&e),
    }
}

/// Renders every uncaught warp rejection as the same `{code, hint}` shape
/// user-visible errors already use (§7 "every non-2xx response is a JSON
/// object").
async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.is_not_found() {
        return Ok(reply_err(&MerchantError::NotFound("no route matches this request".to_string())));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(reply_err(&MerchantError::PayloadTooLarge(MAX_BODY_BYTES as usize)));
    }
    if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        return Ok(reply_err(&MerchantError::BadRequest(e.to_string())));
    }
    if err.find::<Unauthorized>().is_some() {
        return Ok(reply_err(&MerchantError::Unauthorized("missing or invalid admin bearer token".to_string())));
    }
    if let Some(e) = err.find::<rate_limiter::filters::RateLimitExceeded>() {
        return Ok(reply_json(
            503,
            &serde_json::json!({ "code": 1010, "hint": format!("rate limit exceeded for {}", e.ip) }),
        ));
    }
    Ok(reply_err(&MerchantError::Internal(format!("unhandled rejection: {err:?}"))))
}
