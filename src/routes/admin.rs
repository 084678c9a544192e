//! Admin endpoints: login/logout/session-check, batch history/detail,
//! dashboard aggregates. Mutating calls (`logout`) sit behind the CSRF
//! middleware registered in [`crate::routes::admin_router`]; read-only
//! calls sit behind session validation only.

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::middleware::csrf::extract_token;
use crate::model::BatchSummary;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub csrf: String,
}

pub async fn login(
    State(state): State<AppState>,
    axum::extract::Form(form): axum::extract::Form<LoginForm>,
) -> AppResult<impl IntoResponse> {
    let (token, csrf) = state
        .sessions
        .login(&form.username, &form.password)
        .map_err(|_| AppError::Unauthorized)?;
    Ok(Json(LoginResponse { token, csrf }))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<impl IntoResponse> {
    let token = extract_token(&headers).ok_or(AppError::Unauthorized)?;
    state.sessions.logout(&token);
    Ok(axum::http::StatusCode::OK)
}

pub async fn check_session(State(state): State<AppState>, headers: HeaderMap) -> AppResult<impl IntoResponse> {
    let token = extract_token(&headers).ok_or(AppError::Unauthorized)?;
    state.sessions.validate(&token).map_err(|_| AppError::Unauthorized)?;
    Ok(axum::http::StatusCode::OK)
}

pub async fn batch_history(State(state): State<AppState>) -> AppResult<Json<Vec<BatchSummary>>> {
    Ok(Json(state.tracker.list_all().map_err(|e| AppError::Internal(e.into()))?))
}

pub async fn batch_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let batch = state.tracker.load(&id).await?;
    Ok(Json(batch))
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub preview: Vec<crate::model::BatchResult>,
}

pub async fn batch_preview(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let batch = state.tracker.load(&id).await?;
    let preview = batch.results.into_iter().take(5).collect();
    Ok(Json(PreviewResponse { preview }))
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_batches: usize,
    pub active_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub connected_clients: usize,
}

pub async fn dashboard_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let summaries = state.tracker.list_all().map_err(|e| AppError::Internal(e.into()))?;
    let stats = DashboardStats {
        total_batches: summaries.len(),
        active_batches: summaries
            .iter()
            .filter(|b| matches!(b.status, crate::model::BatchStatus::Processing | crate::model::BatchStatus::Initialized))
            .count(),
        completed_batches: summaries.iter().filter(|b| b.status == crate::model::BatchStatus::Completed).count(),
        failed_batches: summaries.iter().filter(|b| b.status == crate::model::BatchStatus::Failed).count(),
        connected_clients: state.progress.client_count(),
    };
    Ok(Json(stats))
}
