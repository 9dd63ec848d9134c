//! Synthetic flow estimates drawn from configured ranges.

use async_trait::async_trait;
use flow_core::{
    Asset, Cohort, FlowRange, FlowRangeTable, FlowResult, Signal, SignalSource, SignalWindow,
};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Draws `round(scale * (low + u * (high - low)))` with `u` uniform in [0, 1)
/// from the range configured for each (asset, cohort).
pub struct EstimatedSource<R = StdRng> {
    ranges: FlowRangeTable,
    rng: Mutex<R>,
}

impl EstimatedSource<StdRng> {
    pub fn new(ranges: FlowRangeTable) -> Self {
        Self::with_rng(ranges, StdRng::from_entropy())
    }

    /// Reproducible estimates for a fixed seed
    pub fn seeded(ranges: FlowRangeTable, seed: u64) -> Self {
        Self::with_rng(ranges, StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore + Send> EstimatedSource<R> {
    pub fn with_rng(ranges: FlowRangeTable, rng: R) -> Self {
        Self {
            ranges,
            rng: Mutex::new(rng),
        }
    }

    pub fn ranges(&self) -> &FlowRangeTable {
        &self.ranges
    }

    fn uniform(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen::<f64>()
    }

    pub fn estimate(&self, range: FlowRange, scale_factor: f64) -> Signal {
        let base = range.low() + self.uniform() * range.width();
        Signal::estimated(scale_factor * base)
    }

    pub fn estimate_for(&self, asset: &Asset, cohort: Cohort, scale_factor: f64) -> Signal {
        self.estimate(self.ranges.range_for(asset, cohort), scale_factor)
    }

    /// Estimate from the generic default range, ignoring the table
    pub fn estimate_default(&self, scale_factor: f64) -> Signal {
        self.estimate(FlowRange::DEFAULT, scale_factor)
    }
}

#[async_trait]
impl<R: RngCore + Send + 'static> SignalSource for EstimatedSource<R> {
    async fn get_value(
        &self,
        asset: &Asset,
        cohort: Cohort,
        window: &SignalWindow,
    ) -> FlowResult<Signal> {
        Ok(self.estimate_for(asset, cohort, window.scale_factor))
    }

    fn source_name(&self) -> &'static str {
        "estimated"
    }
}
