//! HTTP API for the Babel node.
//!
//! Ingestion (`POST /api/v1/contribute`) runs the full pipeline: batch
//! spacing policy, pixel-to-millimeter conversion, size and velocity
//! validation, then the store increment. Rejections come back as a
//! declined status with a reason code, never as an HTTP error - cheaters
//! get no oracle beyond the code itself.
//!
//! Heights cross the wire as decimal strings so consumers with 53-bit
//! integers never lose precision.

use crate::node::{now_ms, NodeState};
use crate::storage::{day_for_ms, Contributor, DailySummary};
use crate::ws::ws_snapshot_handler;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

type AppState = Arc<NodeState>;

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    // CORS layer for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Ingestion
        .route("/api/v1/contribute", post(contribute))
        // Real-time read model
        .route("/api/v1/snapshot", get(get_snapshot))
        .route("/api/v1/rankings", get(get_rankings))
        // Historical queries over persisted data
        .route("/api/v1/series", get(get_series))
        .route("/api/v1/stats", get(get_stats))
        // WebSocket for snapshot broadcasts
        .route("/api/v1/ws", get(ws_snapshot_handler))
        .layer(cors)
        .with_state(state)
}

// --- Health endpoints ---

async fn health() -> &'static str {
    "OK"
}

async fn ready() -> &'static str {
    "OK"
}

// --- Ingestion ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributeRequest {
    contributor_id: String,
    region: String,
    device_pixels_delta: f64,
    elapsed_ms_since_last_batch: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContributeResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region_height: Option<String>,
}

impl ContributeResponse {
    fn rejected(reason: &'static str) -> Self {
        Self {
            status: "rejected",
            reason: Some(reason),
            region_height: None,
        }
    }
}

async fn contribute(
    State(state): State<AppState>,
    Json(req): Json<ContributeRequest>,
) -> Result<(StatusCode, Json<ContributeResponse>), StatusCode> {
    if req.contributor_id.is_empty() || req.region.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.elapsed_ms_since_last_batch <= 0 || !req.device_pixels_delta.is_finite() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let now = now_ms();

    // Spacing policy: minimum gap between accepted batches from the
    // same contributor, applied before validation even runs.
    let min_spacing = state.config.engine.min_batch_spacing_ms;
    if let Some(last) = state.contributors.read().await.get(&req.contributor_id) {
        if now.saturating_sub(*last) < min_spacing {
            return Ok((
                StatusCode::OK,
                Json(ContributeResponse::rejected("too-soon")),
            ));
        }
    }

    let delta_mm = babel_core::px_to_mm(req.device_pixels_delta);
    if delta_mm < 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    match babel_core::validate(
        delta_mm,
        req.elapsed_ms_since_last_batch,
        state.config.engine.max_velocity_mm_per_sec,
    ) {
        babel_core::Verdict::Rejected(reason) => {
            let velocity =
                delta_mm as f64 / req.elapsed_ms_since_last_batch as f64 * 1000.0;
            warn!(
                "Rejected contribution from {}: {} ({} mm at {:.0} mm/s)",
                req.contributor_id,
                reason.code(),
                delta_mm,
                velocity
            );
            Ok((
                StatusCode::OK,
                Json(ContributeResponse::rejected(reason.code())),
            ))
        }
        babel_core::Verdict::Accepted => {
            let region_height = state
                .store
                .write()
                .await
                .increment(&req.region, delta_mm as u64, now);

            // The accumulator is the source of truth: the spacing stamp
            // goes in the moment the increment commits, before any
            // durable-store access can fail.
            state
                .contributors
                .write()
                .await
                .insert(req.contributor_id.clone(), now);

            // Contributor record is created lazily on first acceptance.
            // A failure here must not fail the already-credited batch;
            // the hot path never depends on durable-store availability.
            match state.storage.get_contributor(&req.contributor_id) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    let contributor = Contributor {
                        id: req.contributor_id.clone(),
                        region: req.region.clone(),
                        created_at_ms: now,
                    };
                    if let Err(e) = state.storage.put_contributor(&contributor) {
                        warn!(
                            "Failed to persist contributor record for {}: {}",
                            req.contributor_id, e
                        );
                    }
                }
                Err(e) => warn!(
                    "Failed to read contributor record for {}: {}",
                    req.contributor_id, e
                ),
            }

            Ok((
                StatusCode::ACCEPTED,
                Json(ContributeResponse {
                    status: "accepted",
                    reason: None,
                    region_height: Some(region_height.to_string()),
                }),
            ))
        }
    }
}

// --- Snapshot ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub total_height: String,
    pub velocity: f64,
    pub regional_heights: BTreeMap<String, String>,
}

/// Build the snapshot payload shared by the REST and WebSocket paths.
pub async fn snapshot_payload(state: &NodeState) -> SnapshotResponse {
    let snapshot = *state.snapshot.read().await;
    let regional_heights = state
        .store
        .read()
        .await
        .all_heights()
        .into_iter()
        .map(|(region, height)| (region, height.to_string()))
        .collect();

    SnapshotResponse {
        total_height: snapshot.total_mm.to_string(),
        velocity: round2(snapshot.velocity_mm_per_sec),
        regional_heights,
    }
}

async fn get_snapshot(State(state): State<AppState>) -> Json<SnapshotResponse> {
    Json(snapshot_payload(&state).await)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// --- Rankings ---

#[derive(Debug, Serialize)]
struct RankingEntry {
    region: String,
    height: String,
}

async fn get_rankings(State(state): State<AppState>) -> Json<Vec<RankingEntry>> {
    let mut entries: Vec<(String, u64)> = state
        .store
        .read()
        .await
        .all_heights()
        .into_iter()
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Json(
        entries
            .into_iter()
            .map(|(region, height)| RankingEntry {
                region,
                height: height.to_string(),
            })
            .collect(),
    )
}

// --- Series ---

#[derive(Debug, Deserialize)]
struct SeriesQuery {
    region: Option<String>,
    /// Epoch ms, inclusive. Defaults to one hour ago.
    from: Option<u64>,
    /// Epoch ms, exclusive. Defaults to now.
    to: Option<u64>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct SeriesPoint {
    timestamp: u64,
    height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_count: Option<u64>,
}

/// Epoch ms of midnight UTC for a `YYYY-MM-DD` day.
fn day_start_ms(day: &str) -> u64 {
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis() as u64)
        .unwrap_or(0)
}

async fn get_series(
    State(state): State<AppState>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<Vec<SeriesPoint>>, StatusCode> {
    let now = now_ms();
    let to = query.to.unwrap_or(now);
    let from = query.from.unwrap_or_else(|| now.saturating_sub(3_600_000));
    if from >= to {
        return Err(StatusCode::BAD_REQUEST);
    }
    let region = query.region.as_deref().filter(|r| *r != "all");

    // Ranges inside the raw retention window come from raw samples;
    // anything older is served from daily summaries. The all-regions
    // view is one point per instant: heights summed across regions.
    let raw_floor = now.saturating_sub(state.config.raw_retention_ms);
    let points = if from >= raw_floor {
        let samples = state
            .storage
            .raw_samples_in_range(from, to)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        match region {
            Some(r) => samples
                .into_iter()
                .filter(|s| s.region == r)
                .map(|s| SeriesPoint {
                    timestamp: s.recorded_at_ms,
                    height: s.height_mm,
                    min: None,
                    max: None,
                    sample_count: None,
                })
                .collect(),
            None => {
                let mut totals: BTreeMap<u64, u64> = BTreeMap::new();
                for s in samples {
                    *totals.entry(s.recorded_at_ms).or_insert(0) += s.height_mm;
                }
                totals
                    .into_iter()
                    .map(|(timestamp, height)| SeriesPoint {
                        timestamp,
                        height,
                        min: None,
                        max: None,
                        sample_count: None,
                    })
                    .collect()
            }
        }
    } else {
        let summaries = state
            .storage
            .daily_summaries(region)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        match region {
            Some(_) => summary_points(summaries, from, to),
            None => combined_summary_points(summaries, from, to),
        }
    };

    Ok(Json(points))
}

/// One region's daily summaries as ordered series points within [from, to).
fn summary_points(summaries: Vec<DailySummary>, from: u64, to: u64) -> Vec<SeriesPoint> {
    let mut points: Vec<SeriesPoint> = summaries
        .into_iter()
        .filter_map(|s| {
            let ts = day_start_ms(&s.day);
            (ts >= from && ts < to).then_some(SeriesPoint {
                timestamp: ts,
                height: s.avg_height_mm,
                min: Some(s.min_height_mm),
                max: Some(s.max_height_mm),
                sample_count: Some(s.sample_count),
            })
        })
        .collect();
    points.sort_by_key(|p| p.timestamp);
    points
}

/// Every region's daily summaries summed into one point per day:
/// heights, mins and maxes add up (bounds on the total), counts add up.
fn combined_summary_points(
    summaries: Vec<DailySummary>,
    from: u64,
    to: u64,
) -> Vec<SeriesPoint> {
    let mut per_day: BTreeMap<String, (u64, u64, u64, u64)> = BTreeMap::new();
    for s in summaries {
        let entry = per_day.entry(s.day).or_insert((0, 0, 0, 0));
        entry.0 += s.avg_height_mm;
        entry.1 += s.min_height_mm;
        entry.2 += s.max_height_mm;
        entry.3 += s.sample_count;
    }

    per_day
        .into_iter()
        .filter_map(|(day, (height, min, max, count))| {
            let ts = day_start_ms(&day);
            (ts >= from && ts < to).then_some(SeriesPoint {
                timestamp: ts,
                height,
                min: Some(min),
                max: Some(max),
                sample_count: Some(count),
            })
        })
        .collect()
}

// --- Stats ---

#[derive(Debug, Deserialize)]
struct StatsQuery {
    region: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    peak_height: String,
    peak_date: String,
    total_growth: String,
    average_growth_per_day: f64,
    days_tracked: u64,
    current_height: String,
}

async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, StatusCode> {
    let region = query.region.as_deref().filter(|r| *r != "all");

    let current = {
        let store = state.store.read().await;
        match region {
            Some(r) => store.height(r).unwrap_or(0),
            None => store.total_height(),
        }
    };

    let summaries = state
        .storage
        .daily_summaries(region)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(compute_stats(&summaries, current, &day_for_ms(now_ms()))))
}

/// Historical stats from daily summaries plus the live height.
///
/// For the all-regions view, per-day values are the sum of each
/// region's daily average; peak considers the live height too.
fn compute_stats(summaries: &[DailySummary], current: u64, today: &str) -> StatsResponse {
    let mut per_day: BTreeMap<&str, u64> = BTreeMap::new();
    for s in summaries {
        *per_day.entry(s.day.as_str()).or_insert(0) += s.avg_height_mm;
    }

    let days_tracked = per_day.len() as u64;

    let (mut peak_height, mut peak_date) = (current, today.to_string());
    for (day, height) in &per_day {
        if *height > peak_height {
            peak_height = *height;
            peak_date = (*day).to_string();
        }
    }

    let first = per_day.values().next().copied().unwrap_or(current);
    let total_growth = current as i64 - first as i64;
    let average_growth_per_day = total_growth as f64 / days_tracked.max(1) as f64;

    StatsResponse {
        peak_height: peak_height.to_string(),
        peak_date,
        total_growth: total_growth.to_string(),
        average_growth_per_day: round2(average_growth_per_day),
        days_tracked,
        current_height: current.to_string(),
    }
}
