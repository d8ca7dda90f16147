//! Rate limiting and other middleware.

use crate::config::RateLimitConfig;
use crate::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tracing::{debug, warn};

const GENERAL_LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again later.";
const REGISTRATION_LIMIT_MESSAGE: &str =
    "Too many registration attempts. Please wait before trying again.";

/// Rate limiter keyed by client IP.
pub type IpLimiter = DefaultKeyedRateLimiter<IpAddr>;

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    /// Applies to every request
    pub general: Arc<IpLimiter>,
    /// Applies to registration submissions only
    pub registration: Arc<IpLimiter>,
}

impl RateLimitState {
    /// Create rate limiters from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            general: Arc::new(keyed_limiter(config.requests_per_window, config.window)),
            registration: Arc::new(keyed_limiter(
                config.registrations_per_window,
                config.registration_window,
            )),
        }
    }

    /// Create a permissive rate limiter for testing.
    pub fn permissive() -> Self {
        let window = Duration::from_secs(1);
        Self {
            general: Arc::new(keyed_limiter(10_000, window)),
            registration: Arc::new(keyed_limiter(10_000, window)),
        }
    }

    /// Forget clients whose quota has fully replenished.
    pub fn prune(&self) {
        self.general.retain_recent();
        self.registration.retain_recent();
    }
}

/// `max` cells per `window`, replenished evenly, with the whole window
/// available as a burst.
fn keyed_limiter(max: u32, window: Duration) -> IpLimiter {
    let max = NonZeroU32::new(max).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(window / max.get())
        .unwrap_or_else(|| Quota::per_second(max))
        .allow_burst(max);
    RateLimiter::keyed(quota)
}

/// Client address from the connection, localhost when unknown.
pub fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn check(limiter: &IpLimiter, ip: IpAddr, message: &'static str) -> Result<(), ApiError> {
    limiter.check_key(&ip).map_err(|not_until| {
        let wait = not_until.wait_time_from(DefaultClock::default().now());
        // Round up so clients never retry early
        let retry_after_secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        warn!(client_ip = %ip, retry_after_secs, "{}", message);
        ApiError::RateLimitExceeded {
            message,
            retry_after_secs: retry_after_secs.max(1),
        }
    })
}

/// Rate limiting middleware.
///
/// Checks the per-IP general limit and returns 429 Too Many Requests if exceeded.
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&request);
    check(&rate_limit.general, ip, GENERAL_LIMIT_MESSAGE)?;

    debug!(client_ip = %ip, "Rate limit check passed");
    Ok(next.run(request).await)
}

/// Stricter per-IP limit for registration submissions.
pub async fn registration_rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&request);
    check(&rate_limit.registration, ip, REGISTRATION_LIMIT_MESSAGE)?;
    Ok(next.run(request).await)
}

/// Logging middleware for requests.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let ip = client_ip(&request);
    let start = std::time::Instant::now();

    debug!(%method, %uri, client_ip = %ip, "Request started");

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_success() {
        debug!(%method, %uri, %status, ?duration, "Request completed");
    } else {
        warn!(%method, %uri, %status, ?duration, "Request failed");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn config(registrations: u32) -> RateLimitConfig {
        RateLimitConfig {
            registrations_per_window: registrations,
            ..Default::default()
        }
    }

    #[test]
    fn test_rate_limit_state_creation() {
        let state = RateLimitState::new(&RateLimitConfig::default());
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(state.general.check_key(&ip).is_ok());
        assert!(state.registration.check_key(&ip).is_ok());
    }

    #[test]
    fn test_registration_limit_exhaustion() {
        let state = RateLimitState::new(&config(3));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for _ in 0..3 {
            assert!(check(&state.registration, ip, REGISTRATION_LIMIT_MESSAGE).is_ok());
        }

        match check(&state.registration, ip, REGISTRATION_LIMIT_MESSAGE) {
            Err(ApiError::RateLimitExceeded {
                message,
                retry_after_secs,
            }) => {
                assert_eq!(message, REGISTRATION_LIMIT_MESSAGE);
                // One cell replenishes every 20 minutes
                assert!(retry_after_secs > 0 && retry_after_secs <= 20 * 60);
            }
            other => panic!("expected rate limit error, got {other:?}"),
        }
    }

    #[test]
    fn test_limits_are_per_client() {
        let state = RateLimitState::new(&config(1));
        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(state.registration.check_key(&first).is_ok());
        assert!(state.registration.check_key(&first).is_err());
        assert!(state.registration.check_key(&second).is_ok());
    }

    #[test]
    fn test_zero_limit_allows_one() {
        let limiter = keyed_limiter(0, Duration::from_secs(60));
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(limiter.check_key(&ip).is_ok());
        assert!(limiter.check_key(&ip).is_err());
    }

    #[test]
    fn test_permissive_rate_limit() {
        let state = RateLimitState::permissive();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        for _ in 0..100 {
            assert!(state.general.check_key(&ip).is_ok());
        }
        state.prune();
    }

    #[test]
    fn test_client_ip() {
        let request = Request::new(Body::empty());
        assert_eq!(client_ip(&request), IpAddr::V4(Ipv4Addr::LOCALHOST));

        let mut request = Request::new(Body::empty());
        let addr: SocketAddr = "192.168.1.7:5000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_ip(&request), addr.ip());
    }
}
