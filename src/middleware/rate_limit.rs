//! Per-IP sliding-window rate limiting. Adapted from the teacher's
//! Redis-backed distributed limiter: this system is explicitly
//! single-process-per-batch (non-goal: "distributed/multi-node
//! coordination"), so the sliding window lives in an in-process
//! `DashMap<(route, ip), VecDeque<Instant>>` instead of Lua scripts against
//! a shared Redis instance.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct RoutePolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RoutePolicy {
    pub const fn per_minute(limit: u32) -> Self {
        Self { limit, window: Duration::from_secs(60) }
    }
}

pub struct RateLimiter {
    buckets: DashMap<(&'static str, IpAddr), VecDeque<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self { buckets: DashMap::new() }
    }
}

impl RateLimiter {
    /// Records a hit and reports whether the caller is still within the
    /// policy's window. Sliding window: entries older than the window are
    /// dropped before counting.
    pub fn check(&self, route: &'static str, ip: IpAddr, policy: RoutePolicy) -> Result<(), u64> {
        let now = Instant::now();
        let mut bucket = self.buckets.entry((route, ip)).or_default();
        while let Some(front) = bucket.front() {
            if now.duration_since(*front) > policy.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() as u32 >= policy.limit {
            let reset_in = bucket
                .front()
                .map(|oldest| policy.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(policy.window);
            return Err(reset_in.as_secs().max(1));
        }

        bucket.push_back(now);
        Ok(())
    }

    /// Periodic cache cleanup: drops buckets that have gone fully idle, so
    /// the map doesn't grow unbounded with one-off client IPs.
    pub fn sweep_idle(&self, idle_after: Duration) {
        let now = Instant::now();
        self.buckets.retain(|_, bucket| {
            bucket.back().map(|latest| now.duration_since(*latest) < idle_after).unwrap_or(false)
        });
    }
}

pub fn policy_for_path(path: &str) -> Option<(&'static str, RoutePolicy)> {
    if path.starts_with("/api/check-logo/single") {
        Some(("single", RoutePolicy::per_minute(100)))
    } else if path.starts_with("/api/check-logo/batch/export-csv") {
        Some(("csv_export", RoutePolicy::per_minute(10)))
    } else if path.starts_with("/api/check-logo/batch") {
        Some(("batch_submit", RoutePolicy::per_minute(60)))
    } else if path.starts_with("/maintenance/cleanup") {
        Some(("manual_cleanup", RoutePolicy::per_minute(2)))
    } else {
        None
    }
}

pub async fn enforce(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    if let Some((route, policy)) = policy_for_path(request.uri().path()) {
        if let Err(retry_after_secs) = state.rate_limiter.check(route, addr.ip(), policy) {
            return Err(AppError::RateLimited { retry_after_secs });
        }
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_blocks_after_limit() {
        let limiter = RateLimiter::default();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let policy = RoutePolicy { limit: 2, window: Duration::from_secs(60) };
        assert!(limiter.check("t", ip, policy).is_ok());
        assert!(limiter.check("t", ip, policy).is_ok());
        assert!(limiter.check("t", ip, policy).is_err());
    }
}
