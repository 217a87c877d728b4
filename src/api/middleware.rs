use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::api::state::AppState;
use crate::db::SessionRepository;
use crate::error::AppError;

/// The authenticated caller, inserted into request extensions
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: String,
    pub token: String,
}

/// Pull the token out of `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_header = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Auth("Missing Authorization header".to_string()))?;

    auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Invalid Authorization format".to_string()))
}

/// Authentication middleware - validates session tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())?.to_string();

    let session = SessionRepository::get_by_token(&state.db, &token)
        .await?
        .ok_or_else(|| AppError::Auth("Invalid or expired session".to_string()))?;

    request.extensions_mut().insert(AuthSession {
        user_id: session.user_id,
        token,
    });

    Ok(next.run(request).await)
}

struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-window attempt counter per client IP
pub struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, Window>>,
    max_attempts: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window_secs: u64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_attempts,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Record an attempt; `false` once the window's budget is spent
    pub async fn check(&self, ip: IpAddr) -> bool {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();

        let entry = windows.entry(ip).or_insert(Window { count: 0, started: now });

        if now.duration_since(entry.started) > self.window {
            *entry = Window { count: 1, started: now };
            return true;
        }

        if entry.count < self.max_attempts {
            entry.count += 1;
            true
        } else {
            false
        }
    }

    /// Drop windows that ended long ago; returns how many were removed
    pub async fn cleanup(&self) -> usize {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.started) <= self.window * 2);
        before - windows.len()
    }
}

/// Rate limiting middleware for the unauthenticated auth endpoints
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    if !state.limiter.check(ip).await {
        tracing::warn!(%ip, "🚫 Auth rate limit exceeded");
        return Err(AppError::RateLimited);
    }

    Ok(next.run(request).await)
}
