//! Prometheus metrics: a struct of pre-registered counters/gauges/
//! histograms plus an `encode()` that feeds `/metrics`, covering the
//! payment backend's own concerns.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct MerchantMetrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub deposits_total: IntCounterVec,
    pub key_reloads_total: IntCounterVec,
    pub longpoll_waiters: IntGauge,
    pub rate_limit_rejections_total: IntCounterVec,
}

impl MerchantMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("merchant_http_requests_total", "HTTP requests by route and status class"),
            &["route", "status_class"],
        )
        .expect("metric registers");
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("merchant_http_request_duration_seconds", "HTTP handler latency"),
            &["route"],
        )
        .expect("metric registers");
        let deposits_total = IntCounterVec::new(
            Opts::new("merchant_deposits_total", "Per-coin deposit outcomes"),
            &["outcome"],
        )
        .expect("metric registers");
        let key_reloads_total = IntCounterVec::new(
            Opts::new("merchant_key_reloads_total", "Key-state snapshot reloads by exchange"),
            &["exchange_url", "outcome"],
        )
        .expect("metric registers");
        let longpoll_waiters = IntGauge::new("merchant_longpoll_waiters", "Currently suspended long-poll requests")
            .expect("metric registers");
        let rate_limit_rejections_total = IntCounterVec::new(
            Opts::new("merchant_rate_limit_rejections_total", "Requests rejected by the token-bucket limiter"),
            &["route"],
        )
        .expect("metric registers");

        registry.register(Box::new(http_requests_total.clone())).unwrap();
        registry.register(Box::new(http_request_duration_seconds.clone())).unwrap();
        registry.register(Box::new(deposits_total.clone())).unwrap();
        registry.register(Box::new(key_reloads_total.clone())).unwrap();
        registry.register(Box::new(longpoll_waiters.clone())).unwrap();
        registry.register(Box::new(rate_limit_rejections_total.clone())).unwrap();

        MerchantMetrics {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            deposits_total,
            key_reloads_total,
            longpoll_waiters,
            rate_limit_rejections_total,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode(&families, &mut buffer).expect("prometheus text encoding cannot fail");
        buffer
    }
}

impl Default for MerchantMetrics {
    fn default() -> Self {
        Self::new()
    }
}
