use axum::{extract::State, Json};

use crate::{error::Result, server::AppState, store::StoreStats};

/// Store internals for operators: per-bucket record counts and engine
/// figures.
pub async fn stats(State(state): State<AppState>) -> Result<Json<StoreStats>> {
    Ok(Json(state.store.stats()?))
}
