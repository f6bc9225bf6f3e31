//! Token-bucket rate limiter: integer millitoken math keeps refill
//! deterministic without floating point, tracked per client IP.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

fn safe_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

const MILLITOKEN: u64 = 1000;

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, TokenBucket>>>,
    max_tokens_milli: u64,
    refill_rate: u32,
    cleanup_interval: Duration,
    last_cleanup: Arc<Mutex<Instant>>,
}

struct TokenBucket {
    tokens_milli: u64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst_size: Option<u32>) -> Self {
        let max_tokens = burst_size.unwrap_or(requests_per_second * 2);
        RateLimiter {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            max_tokens_milli: max_tokens as u64 * MILLITOKEN,
            refill_rate: requests_per_second,
            cleanup_interval: Duration::from_secs(300),
            last_cleanup: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn check_rate_limit(&self, ip: IpAddr) -> bool {
        self.cleanup_if_needed();

        let mut buckets = safe_lock(&self.buckets);
        let bucket = buckets.entry(ip).or_insert_with(|| TokenBucket {
            tokens_milli: self.max_tokens_milli,
            last_refill: Instant::now(),
        });

        let now = Instant::now();
        let elapsed_ms = now.duration_since(bucket.last_refill).as_millis() as u64;
        let tokens_to_add_milli = elapsed_ms * self.refill_rate as u64;

        bucket.tokens_milli = (bucket.tokens_milli + tokens_to_add_milli).min(self.max_tokens_milli);
        bucket.last_refill = now;

        if bucket.tokens_milli >= MILLITOKEN {
            bucket.tokens_milli -= MILLITOKEN;
            true
        } else {
            false
        }
    }

    fn cleanup_if_needed(&self) {
        let mut last_cleanup = safe_lock(&self.last_cleanup);
        if last_cleanup.elapsed() >= self.cleanup_interval {
            let mut buckets = safe_lock(&self.buckets);
            let now = Instant::now();
            buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < Duration::from_secs(600));
            *last_cleanup = now;
        }
    }
}

/// Warp filter glue (4.K: the rate limiter sits ahead of dispatch).
pub mod filters {
    use super::RateLimiter;
    use std::net::IpAddr;
    use warp::Filter;

    pub fn client_ip() -> impl Filter<Extract = (IpAddr,), Error = std::convert::Infallible> + Clone {
        warp::addr::remote().map(|addr: Option<std::net::SocketAddr>| addr.map(|a| a.ip()).unwrap_or_else(|| IpAddr::from([127, 0, 0, 1])))
    }

    pub fn rate_limit(limiter: RateLimiter) -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
        client_ip()
            .and(warp::any().map(move || limiter.clone()))
            .and_then(|ip: IpAddr, limiter: RateLimiter| async move {
                if limiter.check_rate_limit(ip) {
                    Ok(())
                } else {
                    Err(warp::reject::custom(RateLimitExceeded { ip }))
                }
            })
            .untuple_one()
    }

    #[derive(Debug)]
    pub struct RateLimitExceeded {
        pub ip: IpAddr,
    }

    impl warp::reject::Reject for RateLimitExceeded {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::thread;

    #[test]
    fn allows_burst_then_blocks() {
        let limiter = RateLimiter::new(10, Some(20));
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        for i in 0..20 {
            assert!(limiter.check_rate_limit(ip), "request {i} should be allowed");
        }
        assert!(!limiter.check_rate_limit(ip));
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new(10, Some(10));
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2));
        for _ in 0..10 {
            assert!(limiter.check_rate_limit(ip));
        }
        assert!(!limiter.check_rate_limit(ip));
        thread::sleep(Duration::from_secs(1));
        for i in 0..10 {
            assert!(limiter.check_rate_limit(ip), "refilled request {i} should be allowed");
        }
    }

    #[test]
    fn tracks_ips_independently() {
        let limiter = RateLimiter::new(5, Some(5));
        let ip1 = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
        let ip2 = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        for _ in 0..5 {
            assert!(limiter.check_rate_limit(ip1));
        }
        assert!(!limiter.check_rate_limit(ip1));
        for i in 0..5 {
            assert!(limiter.check_rate_limit(ip2), "ip2 request {i} should be allowed");
        }
    }
}
