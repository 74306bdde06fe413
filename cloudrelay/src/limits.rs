//! Resource limiting for protecting upstream quotas.
//!
//! This module provides a per-client fixed-window request limiter and the axum middleware that
//! applies it before any handler runs. Time is read through the [`Clock`] trait so window expiry
//! can be driven by tests without sleeping.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{LimitsConfig, RequestLimitsConfig};
use crate::errors::Error;

/// Message returned to clients that exceed their allowance
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later.";

/// Bucket shared by requests whose origin cannot be determined
const UNKNOWN_CLIENT: &str = "unknown";

/// Source of the current time for window bookkeeping.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: std::sync::Mutex<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: std::sync::Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

/// Container for all resource limiters.
#[derive(Debug, Default, Clone)]
pub struct Limiters {
    /// Per-client request limiter. None means unlimited.
    pub requests: Option<Arc<RequestLimiter>>,
}

impl Limiters {
    /// Creates all limiters from configuration.
    pub fn new(config: &LimitsConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &LimitsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: RequestLimiter::new(&config.requests, clock).map(Arc::new),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of counting one request against a client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the client's current window ends
    pub reset_after: Duration,
}

impl RateLimitDecision {
    /// Seconds until reset, rounded up so clients never retry early
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 { secs + 1 } else { secs }
    }

    fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert("ratelimit-reset", HeaderValue::from(self.reset_secs()));
    }
}

/// Fixed-window request counter keyed by client.
///
/// Each client gets `max_requests` within a window that starts at its first request. Requests
/// beyond the allowance are rejected until the window ends; rejected requests are not counted.
#[derive(Debug)]
pub struct RequestLimiter {
    max_requests: u32,
    window: Duration,
    trust_forwarded_for: bool,
    clock: Arc<dyn Clock>,
    windows: DashMap<String, Window>,
}

impl RequestLimiter {
    /// Creates a new request limiter from configuration.
    ///
    /// If `max_requests` is 0, returns `None` (unlimited).
    pub fn new(config: &RequestLimitsConfig, clock: Arc<dyn Clock>) -> Option<Self> {
        if config.max_requests == 0 {
            return None;
        }

        Some(Self {
            max_requests: config.max_requests,
            window: config.window,
            trust_forwarded_for: config.trust_forwarded_for,
            clock,
            windows: DashMap::new(),
        })
    }

    /// Count a request from `client` and decide whether it may proceed.
    pub fn check(&self, client: &str) -> RateLimitDecision {
        let now = self.clock.now();
        let mut window = self.windows.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        let reset_after = self.window.saturating_sub(now.duration_since(window.started));
        let allowed = window.count < self.max_requests;
        if allowed {
            window.count += 1;
        }

        RateLimitDecision {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests - window.count,
            reset_after,
        }
    }

    /// Drop windows that have ended. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, w| now.duration_since(w.started) < self.window);
        before - self.windows.len()
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Periodically purge ended windows until `shutdown` is cancelled.
    pub fn spawn_purge_task(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.window);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Rate limit purge task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let removed = limiter.purge_expired();
                        if removed > 0 {
                            trace!(removed, "Purged expired rate limit windows");
                        }
                    }
                }
            }
        })
    }

    /// Identify the client behind a request.
    fn client_key(&self, request: &Request) -> String {
        if self.trust_forwarded_for
            && let Some(forwarded) = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        {
            return forwarded.to_string();
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

/// Middleware enforcing the request limiter.
pub async fn rate_limit(State(limiter): State<Arc<RequestLimiter>>, request: Request, next: Next) -> Response {
    let client = limiter.client_key(&request);
    let decision = limiter.check(&client);

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        debug!(%client, "Request rejected by rate limiter");
        Error::TooManyRequests {
            message: RATE_LIMIT_MESSAGE.to_string(),
            retry_after_secs: decision.reset_secs(),
        }
        .into_response()
    };

    decision.apply_headers(response.headers_mut());
    response
}
