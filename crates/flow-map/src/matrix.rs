//! Flow Matrix Builder
//!
//! Resolves one signal per (asset, cohort) pair and assembles them into a
//! complete [`FlowMatrix`].

use chrono::Utc;
use flow_core::{
    Advisory, AdvisoryKind, Asset, Cohort, DateRange, DegradedCell, FlowCell, FlowError,
    FlowMatrix, FlowRangeTable, FlowResult, Provenance, Signal, SignalSource, SignalWindow,
};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::estimator::EstimatedSource;
use crate::range_scaler;

/// What to do when the source cannot resolve a pair at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegradationPolicy {
    /// Substitute a default-range estimate for the failed cell only
    #[default]
    DefaultEstimate,
    /// Fail the whole build with `FlowError::PartialData`
    FailFast,
}

pub struct FlowMatrixBuilder {
    source: Arc<dyn SignalSource>,
    fallback: EstimatedSource,
    policy: DegradationPolicy,
}

impl FlowMatrixBuilder {
    pub fn new(source: Arc<dyn SignalSource>) -> Self {
        Self {
            source,
            fallback: EstimatedSource::new(FlowRangeTable::new()),
            policy: DegradationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DegradationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Estimator used for cells the source could not resolve
    pub fn with_fallback(mut self, fallback: EstimatedSource) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn source(&self) -> &Arc<dyn SignalSource> {
        &self.source
    }

    /// Build the matrix for every pair in `assets` x `cohorts`.
    ///
    /// Duplicate inputs are ignored. Assets are resolved concurrently; the
    /// cohorts of one asset are queried in sequence so live sources can reuse
    /// the asset's market snapshot.
    pub async fn build(
        &self,
        assets: &[Asset],
        cohorts: &[Cohort],
        date_range: &DateRange,
    ) -> FlowResult<FlowMatrix> {
        let window = range_scaler::window_for(date_range)?;
        let assets = dedupe(assets);
        let cohorts = dedupe(cohorts);

        let rows = join_all(
            assets
                .iter()
                .map(|asset| self.resolve_asset(asset, &cohorts, &window)),
        )
        .await;

        let mut resolved: BTreeMap<(usize, Cohort), FlowCell> = BTreeMap::new();
        let mut degraded = Vec::new();

        for (index, (asset, row)) in assets.iter().zip(rows).enumerate() {
            for (cohort, outcome) in row {
                let signal = match outcome {
                    Ok(signal) => signal,
                    Err(e) => {
                        let failure = FlowError::PartialData {
                            asset: asset.clone(),
                            cohort,
                            reason: e.to_string(),
                        };
                        if self.policy == DegradationPolicy::FailFast {
                            return Err(failure);
                        }
                        tracing::warn!("{}; substituting default-range estimate", failure);
                        degraded.push(DegradedCell {
                            asset: asset.clone(),
                            cohort,
                            reason: e.to_string(),
                        });
                        self.fallback.estimate_default(window.scale_factor)
                    }
                };
                resolved.insert((index, cohort), FlowCell::new(asset.clone(), cohort, signal));
            }
        }

        let cells: Vec<FlowCell> = resolved.into_values().collect();
        debug_assert_eq!(cells.len(), assets.len() * cohorts.len());

        let advisory = self.advisory_for(&cells, &degraded);

        tracing::debug!(
            "Built {}x{} flow matrix via {} (scale {:.2}, {} degraded)",
            assets.len(),
            cohorts.len(),
            self.source.source_name(),
            window.scale_factor,
            degraded.len()
        );

        Ok(FlowMatrix {
            assets,
            cohorts,
            date_range: window.date_range,
            scale_factor: window.scale_factor,
            cells,
            degraded,
            advisory,
            generated_at: Utc::now(),
        })
    }

    async fn resolve_asset(
        &self,
        asset: &Asset,
        cohorts: &[Cohort],
        window: &SignalWindow,
    ) -> Vec<(Cohort, FlowResult<Signal>)> {
        let mut row = Vec::with_capacity(cohorts.len());
        for cohort in cohorts {
            let outcome = self.source.get_value(asset, *cohort, window).await;
            row.push((*cohort, outcome));
        }
        row
    }

    fn advisory_for(&self, cells: &[FlowCell], degraded: &[DegradedCell]) -> Option<Advisory> {
        let all_estimated = !cells.is_empty()
            && cells.iter().all(|c| c.provenance == Provenance::Estimated);

        if self.source.is_live() && all_estimated {
            Some(Advisory {
                kind: AdvisoryKind::AllEstimated,
                message: format!(
                    "Live flow data is unavailable; all {} cells show estimates",
                    cells.len()
                ),
            })
        } else if !degraded.is_empty() {
            Some(Advisory {
                kind: AdvisoryKind::PartialData,
                message: format!(
                    "{} of {} cells could not be resolved and show default-range estimates",
                    degraded.len(),
                    cells.len()
                ),
            })
        } else {
            None
        }
    }
}

fn dedupe<T: PartialEq + Clone>(items: &[T]) -> Vec<T> {
    let mut unique: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(item) {
            unique.push(item.clone());
        }
    }
    unique
}
