use super::{StatsAggregator, StatsResponse};
use crate::error::ApiError;

use axum::{Extension, Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// `GET /stats`
pub async fn handle_stats(
    Extension(stats): Extension<Arc<StatsAggregator>>,
) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(stats.snapshot().await?))
}

/// `GET /health`
pub async fn handle_health() -> Json<Value> {
    Json(json!({ "ok": true }))
}
