//! Read-only JSON dashboard over the cleaned results, the WC qualifiers and
//! the race catalog.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use kona::clean::{CLEANED_ALL, CLEANED_WC};
use kona::stats::{
    self, BestPerformances, FastAndBrutal, FilterOptions, ResultFilter, SlotFilter, SlotRow,
    WcStatistics,
};
use kona::types::{CleanedResultRow, QualifiedAthlete, Race, Stage};
use kona::{Config, StoreError, store};
use serde::Serialize;
use tower_http::cors::CorsLayer;

/// Everything the pages read, loaded once at startup.
#[derive(Debug, Default)]
pub struct DashboardState {
    pub results: Vec<CleanedResultRow>,
    pub wc: Vec<CleanedResultRow>,
    pub qualifiers: Vec<QualifiedAthlete>,
    pub catalog: Vec<Race>,
}

impl DashboardState {
    /// Fails when a pipeline output is missing, naming the stage to run.
    pub fn load(config: &Config) -> Result<Self, StoreError> {
        let results_path = config.paths.cleaned_path(CLEANED_ALL);
        let wc_path = config.paths.cleaned_path(CLEANED_WC);
        let qualifiers_path = config.paths.qualifiers_path();
        let catalog_path = config.paths.catalog_path();

        store::require_input(&catalog_path, Stage::Races)?;
        store::require_input(&results_path, Stage::Clean)?;
        store::require_input(&wc_path, Stage::Clean)?;
        store::require_input(&qualifiers_path, Stage::Qualifiers)?;

        let state = DashboardState {
            results: store::read_records(&results_path)?,
            wc: store::read_records(&wc_path)?,
            qualifiers: store::read_records(&qualifiers_path)?,
            catalog: store::read_records(&catalog_path)?,
        };
        log::info!(
            "Loaded {} result(s), {} WC result(s), {} qualifier(s), {} race(s)",
            state.results.len(),
            state.wc.len(),
            state.qualifiers.len(),
            state.catalog.len()
        );
        Ok(state)
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.status.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

type SharedState = Arc<DashboardState>;

#[derive(Serialize)]
struct Index {
    name: &'static str,
    version: &'static str,
    endpoints: [&'static str; 5],
}

async fn index() -> Json<Index> {
    Json(Index {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints: [
            "/api/filters",
            "/api/wc-statistics",
            "/api/best-performances",
            "/api/fast-and-brutal",
            "/api/wc-slots",
        ],
    })
}

async fn filters(State(state): State<SharedState>) -> Json<FilterOptions> {
    Json(stats::filter_options(
        &state.results,
        &state.wc,
        &state.qualifiers,
    ))
}

fn validated(filter: ResultFilter) -> Result<ResultFilter, ApiError> {
    filter
        .validate()
        .inspect_err(|e| log::warn!("Rejected filter: {e}"))
        .map_err(ApiError::bad_request)
}

async fn wc_statistics(
    State(state): State<SharedState>,
    Query(filter): Query<ResultFilter>,
) -> Result<Json<WcStatistics>, ApiError> {
    let filter = validated(filter)?;
    Ok(Json(stats::wc_statistics(&state.wc, &filter)))
}

async fn best_performances(
    State(state): State<SharedState>,
    Query(filter): Query<ResultFilter>,
) -> Result<Json<BestPerformances>, ApiError> {
    let filter = validated(filter)?;
    Ok(Json(stats::best_performances(&state.results, &filter)))
}

async fn fast_and_brutal(
    State(state): State<SharedState>,
    Query(filter): Query<ResultFilter>,
) -> Result<Json<FastAndBrutal>, ApiError> {
    let filter = validated(filter)?;
    Ok(Json(stats::fast_and_brutal(
        &state.results,
        &state.catalog,
        &filter,
    )))
}

async fn wc_slots(
    State(state): State<SharedState>,
    Query(filter): Query<SlotFilter>,
) -> Json<Vec<SlotRow>> {
    Json(stats::wc_slots(&state.qualifiers, &filter))
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/filters", get(filters))
        .route("/api/wc-statistics", get(wc_statistics))
        .route("/api/best-performances", get(best_performances))
        .route("/api/fast-and-brutal", get(fast_and_brutal))
        .route("/api/wc-slots", get(wc_slots))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}
