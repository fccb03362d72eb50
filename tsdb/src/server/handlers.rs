//! HTTP route handlers for the query server.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use common::clock::{Clock, SystemClock};

use super::error::ApiError;
use super::metrics::Metrics;
use super::request::{parse_timestamp, EventsParams, SeriesParams, StatsParams};
use super::response::{
    EventsResponse, HealthResponse, JsonPoint, SeriesResponse, StatsResponse,
};
use crate::{Tsdb, TsdbRead};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Tsdb>,
    pub metrics: Arc<Metrics>,
}

/// Handle `GET /series`.
///
/// `start` defaults to the epoch and `end` to now, like the dashboard
/// expects when it first loads.
pub async fn handle_series(
    State(state): State<AppState>,
    Query(params): Query<SeriesParams>,
) -> Result<Json<SeriesResponse>, ApiError> {
    let start = match &params.start {
        Some(raw) => parse_timestamp(raw)?,
        None => 0,
    };
    let end = match &params.end {
        Some(raw) => parse_timestamp(raw)?,
        None => SystemClock.now_ms(),
    };

    let list = state.db.list_series(start, end).await?;
    state
        .metrics
        .query_files_scanned_total
        .inc_by(list.files.len() as u64);

    Ok(Json(SeriesResponse {
        start,
        end,
        files: list.files,
        series: list.series,
    }))
}

/// Handle `GET /events`.
pub async fn handle_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Result<Json<EventsResponse>, ApiError> {
    let start = parse_timestamp(&params.start)?;
    let end = parse_timestamp(&params.end)?;
    if params.max_events == 0 {
        return Err(ApiError::bad_request("maxEvents must be > 0"));
    }

    let events = state
        .db
        .get_events(&params.series, start, end, params.max_events)
        .await?;

    state
        .metrics
        .query_points_returned_total
        .inc_by(events.points.len() as u64);
    state
        .metrics
        .query_files_scanned_total
        .inc_by(events.files.len() as u64);

    let note = events.truncated.then(|| {
        "Series is non-numeric; returned first maxEvents without min/avg/max aggregation."
            .to_string()
    });

    let points: Vec<JsonPoint> = events.points.into_iter().map(Into::into).collect();
    Ok(Json(EventsResponse {
        series: params.series,
        start,
        end,
        requested_max_events: params.max_events,
        returned_points: points.len(),
        downsampled: events.downsampled,
        decimal_places: events.decimal_places,
        files: events.files,
        points,
        note,
    }))
}

/// Handle `GET /stats`.
pub async fn handle_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<StatsResponse>, ApiError> {
    let start = parse_timestamp(&params.start)?;
    let end = parse_timestamp(&params.end)?;

    let stats = state.db.get_stats(&params.series, start, end).await?;
    state
        .metrics
        .query_files_scanned_total
        .inc_by(stats.files.len() as u64);

    Ok(Json(StatsResponse {
        series: params.series,
        start,
        end,
        count: stats.count,
        current_value: stats.current_value.map(Into::into),
        max_value: stats.max_value,
        decimal_places: stats.decimal_places,
        files: stats.files,
    }))
}

/// Handle `GET /metrics`.
pub async fn handle_metrics(State(state): State<AppState>) -> String {
    state.metrics.encode()
}

/// Handle `GET /-/healthy`.
pub async fn handle_healthy() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}
