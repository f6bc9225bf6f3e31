//! 4.D Exchange Client: async RPC to exchanges — a config struct, a
//! typed error enum with `Display`, and request methods that wrap
//! `reqwest` with an explicit per-request deadline instead of relying on
//! the default client timeout, since the deadline here is dynamic (the
//! remaining HTTP request time minus a grace margin, per §5).

use merchant_core::{CoinDeposit, ExchangeKeySnapshot};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeClientError {
    #[error("exchange {0} unreachable within deadline")]
    Unreachable(String),
    #[error("exchange {0} returned an error")]
    ExchangeError { exchange_url: String, body: serde_json::Value },
    #[error("malformed exchange response: {0}")]
    Malformed(String),
}

#[derive(Clone)]
pub struct ExchangeClient {
    http: reqwest::Client,
}

impl Default for ExchangeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeClient {
    pub fn new() -> Self {
        ExchangeClient {
            http: reqwest::Client::builder()
                .build()
                .expect("reqwest client builds with default TLS backend"),
        }
    }

    async fn send_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        exchange_url: &str,
        method: reqwest::Method,
        path: &str,
        body: Option<&Req>,
        deadline: Duration,
    ) -> Result<Resp, ExchangeClientError> {
        let url = format!("{}/{}", exchange_url.trim_end_matches('/'), path.trim_start_matches('/'));
        let mut req = self.http.request(method, &url).timeout(deadline);
        if let Some(b) = body {
            req = req.json(b);
        }
        let response = req.send().await.map_err(|e| {
            tracing::warn!(%exchange_url, error = %e, "exchange request failed");
            ExchangeClientError::Unreachable(exchange_url.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
            return Err(ExchangeClientError::ExchangeError {
                exchange_url: exchange_url.to_string(),
                body,
            });
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| ExchangeClientError::Malformed(e.to_string()))
    }

    /// `GET /keys` (4.C's primary trigger for a key-state reload).
    pub async fn get_keys(&self, exchange_url: &str, deadline: Duration) -> Result<ExchangeKeySnapshot, ExchangeClientError> {
        self.send_json::<(), ExchangeKeySnapshot>(exchange_url, reqwest::Method::GET, "/keys", None, deadline)
            .await
    }

    /// `POST /coins/{coin_pub}/deposit`.
    pub async fn deposit(
        &self,
        coin: &CoinDeposit,
        deadline: Duration,
    ) -> Result<DepositConfirmation, ExchangeClientError> {
        self.send_json(
            &coin.exchange_url,
            reqwest::Method::POST,
            &format!("/coins/{}/deposit", coin.coin_pub),
            Some(coin),
            deadline,
        )
        .await
    }

    /// `GET /transfers/{wtid}`.
    pub async fn track_transfer(
        &self,
        exchange_url: &str,
        wtid: &str,
        deadline: Duration,
    ) -> Result<TrackTransferResponse, ExchangeClientError> {
        self.send_json::<(), TrackTransferResponse>(
            exchange_url,
            reqwest::Method::GET,
            &format!("/transfers/{wtid}"),
            None,
            deadline,
        )
        .await
    }

    /// `POST /reserves/{pub}/withdraw`.
    pub async fn reserve_withdraw(
        &self,
        exchange_url: &str,
        reserve_pub: &str,
        request: &WithdrawRequest,
        deadline: Duration,
    ) -> Result<WithdrawResponse, ExchangeClientError> {
        self.send_json(
            exchange_url,
            reqwest::Method::POST,
            &format!("/reserves/{reserve_pub}/withdraw"),
            Some(request),
            deadline,
        )
        .await
    }

    /// `POST /refund`.
    pub async fn refund(
        &self,
        exchange_url: &str,
        request: &RefundRequest,
        deadline: Duration,
    ) -> Result<RefundResponse, ExchangeClientError> {
        self.send_json(exchange_url, reqwest::Method::POST, "/refund", Some(request), deadline)
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositConfirmation {
    pub exchange_sig: String,
    pub exchange_pub: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackTransferCoinEntry {
    pub coin_pub: String,
    pub proposal_hash: String,
    pub deposit_value: String,
    pub deposit_fee: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackTransferResponse {
    pub total_amount: String,
    pub h_wire: String,
    pub execution_time: chrono::DateTime<chrono::Utc>,
    pub coins: Vec<TrackTransferCoinEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub denom_pub: String,
    pub blinded_planchet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawResponse {
    pub blind_sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub coin_pub: String,
    pub rtransaction_id: u64,
    pub amount: String,
    pub merchant_sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub exchange_sig: String,
}
