//! Request throttling
//!
//! Two layers: a per-caller sliding limiter applied independently around each
//! dispatch endpoint, and an optional process-wide limiter applied to the
//! whole router when configured.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::NotKeyed};

use super::ApiError;

/// Header carrying an explicit caller identity
pub const CALLER_ID_HEADER: &str = "x-user-id";

/// Per-caller sliding rate limiter
///
/// Tracks the last accepted call per caller identifier and enforces a minimum
/// interval of `60 / max_per_minute` seconds between accepted calls. The first
/// call from any caller is always admitted. Entries are never removed for the
/// lifetime of the process. The map lock serializes same-caller admissions so
/// at most one of two near-simultaneous calls is accepted.
#[derive(Debug, Clone)]
pub struct CallerLimiter {
    interval: Duration,
    last_accepted: Arc<Mutex<HashMap<String, Instant>>>,
}

impl CallerLimiter {
    /// Create a limiter admitting at most `max_per_minute` calls per caller
    #[must_use]
    pub fn per_minute(max_per_minute: u32) -> Self {
        let interval = Duration::from_secs_f64(60.0 / f64::from(max_per_minute.max(1)));
        Self {
            interval,
            last_accepted: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether a call from `caller_id` is admitted right now
    pub fn admit(&self, caller_id: &str) -> bool {
        self.admit_at(caller_id, Instant::now())
    }

    /// Check admission against an explicit clock reading
    ///
    /// On admission the caller's entry is updated to `now`; on rejection it is
    /// left untouched.
    pub fn admit_at(&self, caller_id: &str, now: Instant) -> bool {
        let mut map = self
            .last_accepted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(last) = map.get(caller_id)
            && now.duration_since(*last) < self.interval
        {
            return false;
        }

        map.insert(caller_id.to_string(), now);
        true
    }

    /// Minimum interval between accepted calls for one caller
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

/// Resolve the caller identity for throttling: explicit header if present,
/// else the network-derived source address.
fn caller_id(req: &Request) -> String {
    if let Some(id) = req
        .headers()
        .get(CALLER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return id.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ci| ci.0.ip().to_string())
}

/// Per-caller rate limiting middleware, parameterized by the limiter
pub async fn caller_rate_limit(
    State(limiter): State<CallerLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let caller = caller_id(&req);
    if !limiter.admit(&caller) {
        tracing::warn!(caller = %caller, "rate limit exceeded");
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(req).await)
}

/// Process-wide rate limiter
pub type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a process-wide limiter with the given requests-per-minute capacity
#[must_use]
pub fn create_global_limiter(requests_per_minute: u32) -> SharedLimiter {
    let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(rpm)))
}

/// Process-wide rate limiting middleware (active only when configured)
pub async fn global_rate_limit(
    State(state): State<Arc<super::ApiState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(ref limiter) = state.global_limiter
        && limiter.check().is_err()
    {
        tracing::warn!("global rate limit exceeded");
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_is_always_admitted() {
        let limiter = CallerLimiter::per_minute(30);
        assert!(limiter.admit_at("a", Instant::now()));
        assert!(limiter.admit_at("b", Instant::now()));
    }

    #[test]
    fn second_call_within_interval_is_rejected_then_readmitted() {
        let limiter = CallerLimiter::per_minute(30);
        let start = Instant::now();

        assert!(limiter.admit_at("caller", start));
        assert!(!limiter.admit_at("caller", start + Duration::from_secs(1)));
        assert!(limiter.admit_at("caller", start + Duration::from_secs(2)));
    }

    #[test]
    fn rejection_does_not_reset_the_window() {
        let limiter = CallerLimiter::per_minute(30);
        let start = Instant::now();

        assert!(limiter.admit_at("caller", start));
        // Repeated rejected attempts must not push the window forward
        assert!(!limiter.admit_at("caller", start + Duration::from_millis(1500)));
        assert!(!limiter.admit_at("caller", start + Duration::from_millis(1900)));
        assert!(limiter.admit_at("caller", start + Duration::from_secs(2)));
    }

    #[test]
    fn callers_are_throttled_independently() {
        let limiter = CallerLimiter::per_minute(30);
        let start = Instant::now();

        assert!(limiter.admit_at("a", start));
        assert!(limiter.admit_at("b", start + Duration::from_millis(10)));
        assert!(!limiter.admit_at("a", start + Duration::from_millis(20)));
    }

    #[test]
    fn thirty_evenly_spaced_calls_pass_then_call_31_is_rejected() {
        // 30/min => 2s minimum interval. 30 calls at t=0,2,...,58 all pass;
        // the 31st lands inside the same 60s and inside the last interval.
        let limiter = CallerLimiter::per_minute(30);
        let start = Instant::now();

        for i in 0..30 {
            assert!(
                limiter.admit_at("caller", start + Duration::from_secs(i * 2)),
                "call {} should be admitted",
                i + 1
            );
        }
        assert!(!limiter.admit_at("caller", start + Duration::from_secs(59)));
    }

    #[test]
    fn interval_derives_from_max_per_minute() {
        assert_eq!(CallerLimiter::per_minute(30).interval(), Duration::from_secs(2));
        assert_eq!(CallerLimiter::per_minute(20).interval(), Duration::from_secs(3));
        // Zero is clamped rather than dividing by zero
        assert_eq!(CallerLimiter::per_minute(0).interval(), Duration::from_secs(60));
    }
}
