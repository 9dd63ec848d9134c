//! Flow Map API Server
//!
//! JSON endpoints over the flow dashboard plus a background refresh loop
//! that keeps the default view current.

pub mod display;
pub mod flow_routes;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use dashmap::DashMap;
use flow_core::{Asset, FlowError, FlowResult};
use flow_map::{FlowConfig, FlowDashboard, FlowEngine, FlowRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Idle sessions are pruned once the table grows past this
const MAX_SESSIONS: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    /// Shared view kept current by the refresh loop
    pub dashboard: Arc<FlowDashboard>,
    /// Per-session dashboards for `/matrix?session=`
    pub sessions: Arc<DashMap<String, Arc<FlowDashboard>>>,
    pub config: Arc<FlowConfig>,
}

impl AppState {
    pub fn new(dashboard: Arc<FlowDashboard>, config: FlowConfig) -> Self {
        Self {
            dashboard,
            sessions: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }

    pub fn engine(&self) -> &Arc<FlowEngine> {
        self.dashboard.engine()
    }

    /// Dashboard owned by `id`, created on first use. Requests in one
    /// session supersede each other; sessions never see one another.
    pub fn session(&self, id: &str) -> FlowResult<Arc<FlowDashboard>> {
        let valid = !id.is_empty()
            && id.len() <= 64
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(FlowError::InvalidData(format!("invalid session id '{}'", id)));
        }

        if self.sessions.len() >= MAX_SESSIONS && !self.sessions.contains_key(id) {
            // Only sessions with no request in flight hold a single reference.
            self.sessions.retain(|_, dashboard| Arc::strong_count(dashboard) > 1);
            tracing::debug!("Pruned idle sessions, {} remain", self.sessions.len());
        }

        let dashboard = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(FlowDashboard::new(Arc::clone(self.engine()))));
        Ok(Arc::clone(dashboard.value()))
    }
}

/// Response envelope shared by every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    pub fn not_found(message: &str) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, anyhow::anyhow!("{}", message))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.error);
        } else {
            tracing::debug!("Request rejected ({}): {:#}", self.status, self.error);
        }

        (self.status, Json(ApiResponse::<()>::error(format!("{:#}", self.error)))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(error: E) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, error.into())
    }
}

/// Map FlowError to AppError: bad input is the caller's fault, the rest is ours.
pub fn flow_err(e: FlowError) -> AppError {
    let status = match e {
        FlowError::InvalidRange { .. } | FlowError::InvalidData(_) => StatusCode::BAD_REQUEST,
        FlowError::ProviderUnavailable(_) | FlowError::RateLimited(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    AppError::with_status(status, e.into())
}

/// Full router with middleware, ready to serve
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(flow_routes::flow_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let latest = state.dashboard.current();
    Json(serde_json::json!({
        "status": "ok",
        "source": state.engine().source_name(),
        "generation": state.dashboard.latest_generation(),
        "sessions": state.sessions.len(),
        "last_published": latest.map(|s| s.matrix.generated_at),
    }))
}

/// Recompute the default view (configured assets, all cohorts, last 7 days)
/// every `every`. A zero interval disables the loop.
pub fn spawn_refresh_loop(
    dashboard: Arc<FlowDashboard>,
    assets: Vec<Asset>,
    every: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        tracing::info!("Background refresh disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let request = FlowRequest::default_view(assets.clone(), Utc::now());
            match dashboard.recompute(request).await {
                Ok(Some(snapshot)) => {
                    tracing::debug!("Scheduled refresh published generation {}", snapshot.generation)
                }
                Ok(None) => tracing::debug!("Scheduled refresh superseded by a newer request"),
                Err(e) => tracing::warn!("Scheduled refresh failed: {}", e),
            }
        }
    }))
}

fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = FlowConfig::from_env().context("Failed to load configuration")?;
    let source = config.build_source();
    tracing::info!(
        "Flow map starting: {} assets, source '{}'",
        config.assets.len(),
        source.source_name()
    );

    let engine = Arc::new(FlowEngine::new(source));
    let dashboard = Arc::new(FlowDashboard::new(engine));
    let refresh = spawn_refresh_loop(dashboard.clone(), config.assets.clone(), config.refresh_interval);

    let bind_addr = config.bind_addr;
    let state = AppState::new(dashboard, config);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(handle) = refresh {
        handle.abort();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use flow_core::{Cohort, FlowRangeTable, Signal, SignalSource, SignalWindow};
    use flow_map::EstimatedSource;
    use serde_json::Value;
    use tower::ServiceExt;

    /// 7-day windows take 10s, longer ones 1s; value encodes the scale
    struct ScaleDependentLatency;

    #[async_trait]
    impl SignalSource for ScaleDependentLatency {
        async fn get_value(
            &self,
            _asset: &Asset,
            _cohort: Cohort,
            window: &SignalWindow,
        ) -> FlowResult<Signal> {
            let delay = if window.scale_factor == 1.0 { 10 } else { 1 };
            tokio::time::sleep(Duration::from_secs(delay)).await;
            Ok(Signal::real(window.scale_factor * 100.0))
        }

        fn source_name(&self) -> &'static str {
            "scale-dependent"
        }

        fn is_live(&self) -> bool {
            true
        }
    }

    fn state_with(source: Arc<dyn SignalSource>) -> AppState {
        let dashboard = Arc::new(FlowDashboard::new(Arc::new(FlowEngine::new(source))));
        let config = FlowConfig {
            assets: Asset::parse_list("BTC,ETH,SOL").unwrap(),
            ..FlowConfig::default()
        };
        AppState::new(dashboard, config)
    }

    fn test_state() -> AppState {
        state_with(Arc::new(EstimatedSource::seeded(FlowRangeTable::builtin(), 99)))
    }

    /// Two requests with different controls; the second starts 100ms later
    async fn overlapping(router: &Router, first: &str, second: &str) -> ((StatusCode, Value), (StatusCode, Value)) {
        tokio::join!(get(router, first), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            get(router, second).await
        })
    }

    async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let router = app(test_state());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["source"], "estimated");
    }

    #[tokio::test]
    async fn test_matrix_endpoint() {
        let router = app(test_state());
        let (status, body) = get(
            &router,
            "/api/flows/matrix?preset=30d&assets=BTC,ETH&cohorts=exchanges,retail",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let data = &body["data"];
        assert_eq!(data["scale_factor"].as_f64().unwrap(), 30.0 / 7.0);
        assert_eq!(data["selection"], "2 of 5 selected");
        assert_eq!(data["rows"].as_array().unwrap().len(), 2);
        assert_eq!(data["rows"][0]["asset"], "BTC");
        assert_eq!(data["rows"][0]["cells"].as_array().unwrap().len(), 2);
        assert_eq!(data["estimated_cells"], 4);
        assert_eq!(data["real_cells"], 0);
    }

    #[tokio::test]
    async fn test_matrix_defaults_to_configured_assets() {
        let router = app(test_state());
        let (status, body) = get(&router, "/api/flows/matrix").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rows"].as_array().unwrap().len(), 3);
        assert_eq!(body["data"]["scale_factor"].as_f64().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_inverted_range_is_bad_request() {
        let router = app(test_state());
        let (status, body) = get(&router, "/api/flows/matrix?start=2024-07-10&end=2024-07-01").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("Invalid date range"));
    }

    #[tokio::test]
    async fn test_latest_before_and_after_recompute() {
        let state = test_state();
        let router = app(state.clone());

        let (status, _) = get(&router, "/api/flows/latest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Ad-hoc and session requests never publish to the shared view.
        get(&router, "/api/flows/matrix?preset=7d").await;
        get(&router, "/api/flows/matrix?preset=7d&session=tab-1").await;
        let (status, _) = get(&router, "/api/flows/latest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = FlowRequest::default_view(state.config.assets.clone(), Utc::now());
        state.dashboard.recompute(request).await.unwrap();
        let (status, body) = get(&router, "/api/flows/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["generation"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_requests_without_session_both_answer() {
        let router = app(state_with(Arc::new(ScaleDependentLatency)));

        let ((slow_status, slow), (fast_status, fast)) = overlapping(
            &router,
            "/api/flows/matrix?preset=7d&assets=BTC",
            "/api/flows/matrix?preset=30d&assets=ETH",
        )
        .await;

        assert_eq!(slow_status, StatusCode::OK);
        assert_eq!(slow["data"]["rows"][0]["asset"], "BTC");
        assert_eq!(slow["data"]["scale_factor"].as_f64().unwrap(), 1.0);
        assert_eq!(slow["data"]["rows"][0]["cells"][0]["value"].as_f64().unwrap(), 100.0);
        assert_eq!(slow["data"]["real_cells"], 5);

        assert_eq!(fast_status, StatusCode::OK);
        assert_eq!(fast["data"]["rows"][0]["asset"], "ETH");
        assert_eq!(fast["data"]["scale_factor"].as_f64().unwrap(), 30.0 / 7.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_request_in_same_session_wins() {
        let router = app(state_with(Arc::new(ScaleDependentLatency)));

        let ((old_status, old), (new_status, new)) = overlapping(
            &router,
            "/api/flows/matrix?preset=7d&assets=BTC&session=tab-1",
            "/api/flows/matrix?preset=30d&assets=ETH&session=tab-1",
        )
        .await;

        assert_eq!(old_status, StatusCode::CONFLICT);
        assert!(old["error"].as_str().unwrap().contains("tab-1"));
        assert_eq!(new_status, StatusCode::OK);
        assert_eq!(new["data"]["rows"][0]["asset"], "ETH");
        assert_eq!(new["data"]["generation"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_and_refresh_do_not_interfere() {
        let state = state_with(Arc::new(ScaleDependentLatency));
        let router = app(state.clone());

        let refresh = FlowRequest::default_view(state.config.assets.clone(), Utc::now());
        let (published, (a_status, a), (b_status, b)) = tokio::join!(
            state.dashboard.recompute(refresh),
            get(&router, "/api/flows/matrix?preset=7d&assets=BTC&session=alice"),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                get(&router, "/api/flows/matrix?preset=30d&assets=ETH&session=bob").await
            }
        );

        assert!(published.unwrap().is_some());
        assert_eq!(a_status, StatusCode::OK);
        assert_eq!(a["data"]["rows"][0]["asset"], "BTC");
        assert_eq!(b_status, StatusCode::OK);
        assert_eq!(b["data"]["rows"][0]["asset"], "ETH");
        assert_eq!(state.sessions.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_session_id_is_bad_request() {
        let router = app(test_state());
        let (status, body) = get(&router, "/api/flows/matrix?session=a%20b").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid session id"));
    }

    #[test]
    fn test_idle_sessions_are_pruned() {
        let state = test_state();
        for i in 0..MAX_SESSIONS {
            state.session(&format!("s{}", i)).unwrap();
        }
        let busy = state.session("s0").unwrap();
        assert_eq!(state.sessions.len(), MAX_SESSIONS);

        let fresh = state.session("fresh").unwrap();
        assert_eq!(state.sessions.len(), 2);
        assert!(Arc::ptr_eq(&busy, &state.session("s0").unwrap()));
        assert!(Arc::ptr_eq(&fresh, &state.session("fresh").unwrap()));
    }

    #[tokio::test]
    async fn test_metadata_endpoints() {
        let router = app(test_state());

        let (_, cohorts) = get(&router, "/api/flows/cohorts").await;
        let cohorts = cohorts["data"].as_array().unwrap().clone();
        assert_eq!(cohorts.len(), 5);
        assert_eq!(cohorts[3]["id"], "smart-contracts");

        let (_, assets) = get(&router, "/api/flows/assets").await;
        assert_eq!(assets["data"]["assets"].as_array().unwrap().len(), 3);
        assert_eq!(assets["data"]["builtin"].as_array().unwrap().len(), 19);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_publishes_default_view() {
        let state = test_state();
        let handle = spawn_refresh_loop(
            state.dashboard.clone(),
            state.config.assets.clone(),
            Duration::from_secs(60),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let first = state.dashboard.current().unwrap();
        assert_eq!(first.matrix.len(), 15);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(state.dashboard.current().unwrap().generation, 2);
        handle.abort();

        assert!(spawn_refresh_loop(state.dashboard.clone(), Vec::new(), Duration::ZERO).is_none());
    }

    #[test]
    fn test_flow_error_status_mapping() {
        let bad = flow_err(FlowError::InvalidData("x".into()));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let busy = flow_err(FlowError::RateLimited("x".into()));
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);
        let internal = flow_err(FlowError::Config("x".into()));
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
