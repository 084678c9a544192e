pub mod admin;
pub mod batch;
pub mod maintenance;
pub mod ws;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let batch_routes = Router::new()
        .route("/api/start-batch", post(batch::start_batch))
        .route("/api/init-batch", post(batch::init_batch))
        .route("/api/check-logo/single/", post(batch::check_logo_single))
        .route("/api/check-logo/batch/", post(batch::check_logo_batch))
        .route("/api/check-logo/batch/{id}/status", get(batch::batch_status))
        .route("/api/check-logo/batch/{id}/complete", post(batch::complete_batch))
        .route("/api/check-logo/batch/export-csv/{id}", get(batch::export_csv));

    let admin_read_routes = Router::new()
        .route("/api/admin/check-session", get(admin::check_session))
        .route("/api/admin/batch-history", get(admin::batch_history))
        .route("/api/admin/batch/{id}", get(admin::batch_detail))
        .route("/api/admin/batch/{id}/preview", get(admin::batch_preview))
        .route("/api/admin/dashboard-stats", get(admin::dashboard_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::middleware::csrf::require_session));

    let admin_mutating_routes = Router::new()
        .route("/api/admin/logout", post(admin::logout))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::middleware::csrf::require_csrf))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::middleware::csrf::require_session));

    let admin_login_route = Router::new().route("/api/admin/login", post(admin::login));

    let maintenance_routes = Router::new()
        .route("/maintenance/cleanup", post(maintenance::manual_cleanup))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::middleware::csrf::require_csrf))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::middleware::csrf::require_session));

    let ws_routes = Router::new()
        .route("/ws/{client_id}", get(ws::client_socket))
        .route("/ws/batch/{batch_id}", get(ws::batch_socket));

    let health_route = Router::new().route("/healthz", get(health));

    Router::new()
        .merge(batch_routes)
        .merge(admin_read_routes)
        .merge(admin_mutating_routes)
        .merge(admin_login_route)
        .merge(maintenance_routes)
        .merge(ws_routes)
        .merge(health_route)
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::middleware::rate_limit::enforce))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
