//! Flow Map API Routes
//!
//! Asset x cohort flow matrix, its latest snapshot, and the metadata the
//! dashboard controls are built from.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use flow_core::{
    Advisory, Asset, Cohort, CohortInfo, CohortSelection, DateRange, DegradedCell, FlowDirection,
    FlowError, FlowRangeTable, FlowResult, Provenance, SummaryStats,
};
use flow_map::{FlowRequest, FlowSnapshot};
use serde::{Deserialize, Serialize};

use crate::display::{direction_tag, format_millions};
use crate::{flow_err, ApiResponse, AppError, AppState};

/// Query params for the matrix endpoint
#[derive(Debug, Default, Deserialize)]
pub struct MatrixQuery {
    /// `7d`, `30d` or `ytd`; takes precedence over `start`/`end`
    pub preset: Option<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD`
    pub start: Option<String>,
    pub end: Option<String>,
    /// Comma separated symbols
    pub assets: Option<String>,
    /// Comma separated cohort ids
    pub cohorts: Option<String>,
    /// Scopes last-request-wins to one client
    pub session: Option<String>,
}

impl MatrixQuery {
    pub fn date_range(&self, now: DateTime<Utc>) -> FlowResult<DateRange> {
        if let Some(preset) = &self.preset {
            return match preset.trim().to_lowercase().as_str() {
                "7d" => Ok(DateRange::last_days(7, now)),
                "30d" => Ok(DateRange::last_days(30, now)),
                "ytd" => Ok(DateRange::year_to_date(now)),
                other => Err(FlowError::InvalidData(format!("unknown preset '{}'", other))),
            };
        }

        match (&self.start, &self.end) {
            (Some(start), Some(end)) => DateRange::new(parse_instant(start)?, parse_instant(end)?),
            (Some(start), None) => DateRange::new(parse_instant(start)?, now),
            (None, Some(_)) => Err(FlowError::InvalidData("end given without start".to_string())),
            (None, None) => Ok(DateRange::last_days(7, now)),
        }
    }

    pub fn to_request(&self, default_assets: &[Asset], now: DateTime<Utc>) -> FlowResult<FlowRequest> {
        let assets = match &self.assets {
            Some(list) => Asset::parse_list(list)?,
            None => default_assets.to_vec(),
        };
        let cohorts = match &self.cohorts {
            Some(list) => CohortSelection::parse(list)?,
            None => CohortSelection::all(),
        };

        Ok(FlowRequest {
            assets,
            cohorts,
            date_range: self.date_range(now)?,
        })
    }
}

fn parse_instant(value: &str) -> FlowResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| FlowError::InvalidData(format!("unparseable date '{}'", value)))
}

#[derive(Debug, Serialize)]
pub struct CellView {
    pub cohort: Cohort,
    pub value: f64,
    pub display: String,
    pub direction: &'static str,
    pub color: &'static str,
    pub provenance: Provenance,
}

#[derive(Debug, Serialize)]
pub struct AssetRow {
    pub asset: Asset,
    pub cells: Vec<CellView>,
    /// Exchanges + retail
    pub external_flow: f64,
    pub external_flow_display: String,
    pub total_flow: f64,
    pub total_flow_display: String,
    pub direction: FlowDirection,
    pub direction_label: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MatrixResponse {
    pub generation: u64,
    pub source: &'static str,
    pub date_range: DateRange,
    pub days: i64,
    pub scale_factor: f64,
    pub cohorts: Vec<CohortInfo>,
    pub selection: String,
    pub rows: Vec<AssetRow>,
    pub summary: SummaryStats,
    pub net_flow_display: String,
    pub advisory: Option<Advisory>,
    pub degraded: Vec<DegradedCell>,
    pub estimated_cells: usize,
    pub real_cells: usize,
    pub generated_at: DateTime<Utc>,
}

impl MatrixResponse {
    pub fn from_snapshot(snapshot: &FlowSnapshot, source: &'static str) -> Self {
        let matrix = &snapshot.matrix;

        let rows = snapshot
            .asset_summaries
            .iter()
            .map(|summary| AssetRow {
                asset: summary.asset.clone(),
                cells: matrix
                    .cells_for_asset(&summary.asset)
                    .map(|cell| CellView {
                        cohort: cell.cohort,
                        value: cell.value,
                        display: format_millions(cell.value),
                        direction: direction_tag(cell.value),
                        color: cell.color_bucket.css_class(),
                        provenance: cell.provenance,
                    })
                    .collect(),
                external_flow: summary.external_flow,
                external_flow_display: format_millions(summary.external_flow),
                total_flow: summary.total_flow,
                total_flow_display: format_millions(summary.total_flow),
                direction: summary.direction,
                direction_label: summary.direction.label(),
            })
            .collect();

        Self {
            generation: snapshot.generation,
            source,
            date_range: matrix.date_range,
            days: matrix.date_range.days(),
            scale_factor: matrix.scale_factor,
            cohorts: matrix.cohorts.iter().map(|c| c.info()).collect(),
            selection: snapshot.request.cohorts.summary(),
            rows,
            summary: snapshot.summary,
            net_flow_display: format_millions(snapshot.summary.net_flow),
            advisory: matrix.advisory.clone(),
            degraded: matrix.degraded.clone(),
            estimated_cells: matrix.estimated_count(),
            real_cells: matrix.real_count(),
            generated_at: matrix.generated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AssetsResponse {
    pub assets: Vec<Asset>,
    pub builtin: Vec<Asset>,
}

pub fn flow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows/matrix", get(get_matrix))
        .route("/api/flows/latest", get(get_latest))
        .route("/api/flows/cohorts", get(get_cohorts))
        .route("/api/flows/assets", get(get_assets))
}

fn respond(state: &AppState, snapshot: &FlowSnapshot) -> Json<ApiResponse<MatrixResponse>> {
    let source = state.engine().source_name();
    Json(ApiResponse::success(MatrixResponse::from_snapshot(snapshot, source)))
}

/// Compute the matrix for the requested controls. Without a session the
/// request stands alone; within a session only the newest request answers.
async fn get_matrix(
    State(state): State<AppState>,
    Query(query): Query<MatrixQuery>,
) -> Result<Json<ApiResponse<MatrixResponse>>, AppError> {
    let request = query
        .to_request(&state.config.assets, Utc::now())
        .map_err(flow_err)?;

    let Some(id) = query.session.as_deref() else {
        let matrix = state
            .engine()
            .get_flow_matrix(&request.assets, request.cohorts.cohorts(), &request.date_range)
            .await
            .map_err(flow_err)?;
        return Ok(respond(&state, &FlowSnapshot::new(0, request, matrix)));
    };

    let session = state.session(id).map_err(flow_err)?;
    match session.recompute(request).await.map_err(flow_err)? {
        Some(snapshot) => Ok(respond(&state, &snapshot)),
        None => Err(AppError::with_status(
            StatusCode::CONFLICT,
            anyhow::anyhow!("Superseded by a newer request in session '{}'", id),
        )),
    }
}

/// Most recently published matrix
async fn get_latest(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<MatrixResponse>>, AppError> {
    let latest = state
        .dashboard
        .current()
        .ok_or_else(|| AppError::not_found("No flow matrix has been computed yet"))?;
    Ok(respond(&state, &latest))
}

async fn get_cohorts() -> Result<Json<ApiResponse<Vec<CohortInfo>>>, AppError> {
    let cohorts = Cohort::ALL.iter().map(|c| c.info()).collect();
    Ok(Json(ApiResponse::success(cohorts)))
}

async fn get_assets(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<AssetsResponse>>, AppError> {
    Ok(Json(ApiResponse::success(AssetsResponse {
        assets: state.config.assets.clone(),
        builtin: FlowRangeTable::builtin_assets(),
    })))
}
