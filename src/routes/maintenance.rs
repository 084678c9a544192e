//! Manual maintenance trigger: `POST /maintenance/cleanup`.

use axum::{Json, extract::State, response::IntoResponse};
use serde::Deserialize;

use crate::errors::AppResult;
use crate::maintenance::{self, MaintenanceConfig};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub batch_age_hours: Option<u64>,
    pub temp_age_minutes: Option<u64>,
    pub pending_age_hours: Option<u64>,
}

pub async fn manual_cleanup(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<CleanupQuery>,
) -> AppResult<impl IntoResponse> {
    let mut cfg = state.maintenance_config();
    if let Some(hours) = query.batch_age_hours {
        cfg = MaintenanceConfig { batch_age: std::time::Duration::from_secs(hours * 3600), ..cfg };
    }
    if let Some(minutes) = query.temp_age_minutes {
        cfg = MaintenanceConfig { temp_age: std::time::Duration::from_secs(minutes * 60), ..cfg };
    }
    if let Some(hours) = query.pending_age_hours {
        cfg = MaintenanceConfig { pending_age: std::time::Duration::from_secs(hours * 3600), ..cfg };
    }

    let report = maintenance::run_cleanup(&state.store, &state.tracker, &state.sessions, cfg).await;
    Ok(Json(report))
}
