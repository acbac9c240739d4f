use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::core::errors::ApiError;
use crate::state::AppState;

/// Effective merged config with secrets masked.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let config = state.config.load_config()?;
    Ok(Json(state.config.redact_sensitive_values(&config)))
}
