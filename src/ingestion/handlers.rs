use super::gate::{normalize_body, parse_limit, IngestionGate};
use super::types::{EventView, ListParams, PublishResponse, RetryResponse};
use crate::backlog::types::IdentityKey;
use crate::error::{ApiError, ValidationError};

use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::{Extension, Json};
use std::sync::Arc;

/// `POST /publish`
///
/// The body is read as raw bytes so that a non-JSON body maps to `400`
/// instead of the extractor's own rejection.
pub async fn handle_publish(
    Extension(gate): Extension<Arc<IngestionGate>>,
    body: Bytes,
) -> Result<Json<PublishResponse>, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|err| ValidationError::MalformedBody(format!("invalid JSON body: {}", err)))?;

    let raw = normalize_body(value)?;
    let summary = gate.submit(raw).await?;

    Ok(Json(summary))
}

/// `GET /events?topic=&limit=`
pub async fn handle_list_events(
    Query(params): Query<ListParams>,
    Extension(gate): Extension<Arc<IngestionGate>>,
) -> Result<Json<Vec<EventView>>, ApiError> {
    let limit = params.limit.as_deref().map(parse_limit).transpose()?;
    let events = gate.list_events(params.topic.as_deref(), limit).await?;

    Ok(Json(events.into_iter().map(EventView::from).collect()))
}

/// `POST /events/:topic/:event_id/retry`
pub async fn handle_retry(
    Path((topic, event_id)): Path<(String, String)>,
    Extension(gate): Extension<Arc<IngestionGate>>,
) -> Result<Json<RetryResponse>, ApiError> {
    let retried = gate
        .retry_failed(&IdentityKey::new(topic, event_id))
        .await?;

    Ok(Json(RetryResponse { retried }))
}
