//! CSRF enforcement for mutating admin routes. Reads `X-Auth-Token` and
//! `X-CSRF-Token` headers; the session's own validity check (token
//! unauthorized vs csrf mismatch) is delegated to [`crate::session::SessionStore`].

use axum::{
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;
use crate::state::AppState;

pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";
pub const CSRF_TOKEN_HEADER: &str = "x-csrf-token";

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers.get(AUTH_TOKEN_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string)
}

pub fn extract_csrf(headers: &HeaderMap) -> Option<String> {
    headers.get(CSRF_TOKEN_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Applied to admin routes that change state (logout, manual cleanup).
/// Read-only admin routes and non-admin routes are exempt.
pub async fn require_csrf(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(request.headers()).ok_or(AppError::Unauthorized)?;
    let csrf = extract_csrf(request.headers()).ok_or(AppError::Forbidden)?;
    state
        .sessions
        .check_csrf(&token, &csrf)
        .map_err(|_| AppError::Forbidden)?;
    Ok(next.run(request).await)
}

/// Applied to every admin route: validates the bearer token and refreshes
/// its sliding expiry.
pub async fn require_session(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(request.headers()).ok_or(AppError::Unauthorized)?;
    state.sessions.validate(&token).map_err(|_| AppError::Unauthorized)?;
    Ok(next.run(request).await)
}
