//! Per-caller request rate limiting
//!
//! Fixed windows per caller identity: the first request opens a window, at
//! most `max` requests are accepted until it elapses, excess requests are
//! rejected rather than queued.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::{AppState, GatewayError};

/// Who is asking, as far as rate limiting and request logs are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity(pub IpAddr);

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    states: Mutex<HashMap<IpAddr, WindowState>>,
}

impl RateLimiter {
    /// A `max` of zero disables limiting
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check if a request is allowed and record it if so.
    /// Returns `Err(retry_after)` when the caller is over the limit
    pub fn check(&self, caller: IpAddr) -> Result<(), Duration> {
        self.check_at(caller, Instant::now())
    }

    fn check_at(&self, caller: IpAddr, now: Instant) -> Result<(), Duration> {
        if self.max == 0 {
            return Ok(());
        }

        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(caller).or_insert(WindowState {
            count: 0,
            window_start: now,
        });

        let elapsed = now.saturating_duration_since(state.window_start);
        if elapsed >= self.window {
            state.count = 0;
            state.window_start = now;
        }

        if state.count >= self.max {
            let retry_after = self
                .window
                .saturating_sub(now.saturating_duration_since(state.window_start));
            return Err(retry_after);
        }

        state.count += 1;
        Ok(())
    }

    /// Drop callers whose window has elapsed. Returns how many were removed
    pub fn purge_stale(&self) -> usize {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let before = states.len();
        states.retain(|_, state| now.saturating_duration_since(state.window_start) < self.window);
        before - states.len()
    }
}

/// Resolve the caller identity of a request
pub fn caller_identity(req: &Request, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Middleware: tags the request with its caller identity and enforces the limit
pub async fn rate_limit(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let caller = caller_identity(&req, state.config.gateway.trust_forwarded_for);

    if let Err(retry_after) = state.limiter.check(caller) {
        warn!(client = %caller, path = %req.uri().path(), "Rate limit exceeded");
        return GatewayError::RateLimited { retry_after }.into_response();
    }

    debug!(client = %caller, "Request within rate limit");
    req.extensions_mut().insert(CallerIdentity(caller));
    next.run(req).await
}
