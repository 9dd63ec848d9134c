//! Recompute Coordinator
//!
//! Every control change (date range, cohort toggle, asset set) triggers a
//! full recompute. The published snapshot always belongs to the most
//! recently *requested* inputs: a recompute that is overtaken by a newer
//! request is cancelled and its result is never published.

use chrono::{DateTime, Utc};
use flow_core::{
    Asset, AssetFlowSummary, CohortSelection, DateRange, FlowMatrix, FlowResult, SummaryStats,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::aggregator;
use crate::engine::FlowEngine;

/// Inputs of one recompute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRequest {
    pub assets: Vec<Asset>,
    pub cohorts: CohortSelection,
    pub date_range: DateRange,
}

impl FlowRequest {
    /// Every cohort over the last seven days
    pub fn default_view(assets: Vec<Asset>, now: DateTime<Utc>) -> Self {
        Self {
            assets,
            cohorts: CohortSelection::all(),
            date_range: DateRange::last_days(7, now),
        }
    }
}

/// A recompute result with its aggregates
#[derive(Debug, Clone, Serialize)]
pub struct FlowSnapshot {
    pub generation: u64,
    pub request: FlowRequest,
    pub matrix: FlowMatrix,
    pub summary: SummaryStats,
    pub asset_summaries: Vec<AssetFlowSummary>,
}

impl FlowSnapshot {
    pub fn new(generation: u64, request: FlowRequest, matrix: FlowMatrix) -> Self {
        Self {
            generation,
            summary: aggregator::summarize(&matrix),
            asset_summaries: aggregator::asset_summaries(&matrix),
            request,
            matrix,
        }
    }
}

pub struct FlowDashboard {
    engine: Arc<FlowEngine>,
    requested: watch::Sender<u64>,
    latest: watch::Sender<Option<Arc<FlowSnapshot>>>,
}

impl FlowDashboard {
    pub fn new(engine: Arc<FlowEngine>) -> Self {
        let (requested, _) = watch::channel(0);
        let (latest, _) = watch::channel(None);
        Self {
            engine,
            requested,
            latest,
        }
    }

    pub fn engine(&self) -> &Arc<FlowEngine> {
        &self.engine
    }

    /// Latest published snapshot, if any
    pub fn current(&self) -> Option<Arc<FlowSnapshot>> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<FlowSnapshot>>> {
        self.latest.subscribe()
    }

    /// Generation of the most recent request
    pub fn latest_generation(&self) -> u64 {
        *self.requested.borrow()
    }

    /// Recompute for `request` and publish the result. Returns `Ok(None)`
    /// when a newer request superseded this one.
    pub async fn recompute(&self, request: FlowRequest) -> FlowResult<Option<Arc<FlowSnapshot>>> {
        let mut generation = 0;
        self.requested.send_modify(|latest| {
            *latest += 1;
            generation = *latest;
        });
        let mut newer = self.requested.subscribe();

        let build = self.engine.get_flow_matrix(
            &request.assets,
            request.cohorts.cohorts(),
            &request.date_range,
        );

        let matrix = tokio::select! {
            result = build => result?,
            changed = newer.wait_for(|latest| *latest != generation) => {
                drop(changed);
                tracing::debug!("Recompute {} superseded before completion", generation);
                return Ok(None);
            }
        };

        let snapshot = Arc::new(FlowSnapshot::new(generation, request, matrix));

        let published = self.latest.send_if_modified(|current| {
            if *self.requested.borrow() != generation {
                return false;
            }
            if current.as_ref().is_some_and(|s| s.generation > generation) {
                return false;
            }
            *current = Some(Arc::clone(&snapshot));
            true
        });

        if !published {
            tracing::debug!("Recompute {} finished after a newer request, discarded", generation);
            return Ok(None);
        }

        tracing::info!(
            "Published flow matrix #{}: {} cells, net {:+.0}M (in {:.0}M / out {:.0}M)",
            generation,
            snapshot.matrix.len(),
            snapshot.summary.net_flow,
            snapshot.summary.total_inflow,
            snapshot.summary.total_outflow
        );
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::EstimatedSource;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use flow_core::{Cohort, FlowRangeTable, Signal, SignalSource, SignalWindow};
    use std::time::Duration as StdDuration;

    /// Slow for 7-day windows, fast otherwise; value encodes the scale
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
            tokio::time::sleep(StdDuration::from_secs(delay)).await;
            Ok(Signal::real(window.scale_factor * 100.0))
        }

        fn source_name(&self) -> &'static str {
            "scale-dependent"
        }

        fn is_live(&self) -> bool {
            true
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    fn request(days: i64) -> FlowRequest {
        FlowRequest {
            assets: vec![Asset::new("BTC").unwrap(), Asset::new("ETH").unwrap()],
            cohorts: CohortSelection::all(),
            date_range: DateRange::new(start(), start() + Duration::days(days)).unwrap(),
        }
    }

    fn dashboard(source: Arc<dyn SignalSource>) -> FlowDashboard {
        FlowDashboard::new(Arc::new(FlowEngine::new(source)))
    }

    #[tokio::test]
    async fn test_publishes_snapshot() {
        let dashboard = dashboard(Arc::new(EstimatedSource::seeded(FlowRangeTable::builtin(), 1)));
        let mut updates = dashboard.subscribe();
        assert!(dashboard.current().is_none());

        let snapshot = dashboard.recompute(request(7)).await.unwrap().unwrap();

        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.matrix.len(), 10);
        assert_eq!(snapshot.asset_summaries.len(), 2);
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().as_ref().map(|s| s.generation), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_request_wins() {
        let dashboard = dashboard(Arc::new(ScaleDependentLatency));

        // R1 (7 days) is slow; R2 (14 days) arrives while R1 is in flight.
        let (first, second) = tokio::join!(dashboard.recompute(request(7)), async {
            tokio::time::sleep(StdDuration::from_millis(500)).await;
            dashboard.recompute(request(14)).await
        });

        assert!(first.unwrap().is_none());
        let second = second.unwrap().unwrap();
        assert_eq!(second.matrix.scale_factor, 2.0);

        let current = dashboard.current().unwrap();
        assert_eq!(current.generation, 2);
        assert_eq!(current.matrix.scale_factor, 2.0);
        assert!(current.matrix.cells.iter().all(|c| c.value == 200.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_fast_request_is_not_overwritten_by_older_slow_one() {
        let dashboard = dashboard(Arc::new(ScaleDependentLatency));

        let (slow, fast) = tokio::join!(dashboard.recompute(request(7)), async {
            tokio::time::sleep(StdDuration::from_millis(100)).await;
            dashboard.recompute(request(21)).await
        });
        assert!(slow.unwrap().is_none());
        assert!(fast.unwrap().is_some());

        // Let any straggling timers fire; nothing may replace the newest snapshot.
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        assert_eq!(dashboard.current().unwrap().matrix.scale_factor, 3.0);
    }

    #[tokio::test]
    async fn test_inverted_request_is_rejected_before_recompute() {
        let dashboard = dashboard(Arc::new(EstimatedSource::seeded(FlowRangeTable::builtin(), 2)));
        dashboard.recompute(request(7)).await.unwrap();

        let mut json = serde_json::to_value(request(7)).unwrap();
        let range = json["date_range"].clone();
        json["date_range"]["start"] = range["end"].clone();
        json["date_range"]["end"] = range["start"].clone();
        let err = serde_json::from_value::<FlowRequest>(json).unwrap_err();

        assert!(err.to_string().contains("Invalid date range"));
        assert_eq!(dashboard.latest_generation(), 1);
        assert_eq!(dashboard.current().unwrap().generation, 1);
    }

    #[tokio::test]
    async fn test_cohort_toggle_changes_matrix_shape() {
        let dashboard = dashboard(Arc::new(EstimatedSource::seeded(FlowRangeTable::builtin(), 3)));

        let mut req = request(30);
        req.cohorts.toggle(Cohort::Whales, false);
        req.cohorts.toggle(Cohort::Miners, false);
        let snapshot = dashboard.recompute(req).await.unwrap().unwrap();

        assert_eq!(snapshot.matrix.cohorts, vec![Cohort::Exchanges, Cohort::SmartContracts, Cohort::Retail]);
        assert_eq!(snapshot.matrix.len(), 6);
    }
}
