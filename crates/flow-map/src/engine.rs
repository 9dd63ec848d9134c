//! Engine facade exposed to the presentation layer.

use flow_core::{Asset, Cohort, DateRange, FlowMatrix, FlowResult, SignalSource, SummaryStats};
use std::sync::Arc;

use crate::aggregator;
use crate::matrix::FlowMatrixBuilder;

pub struct FlowEngine {
    builder: FlowMatrixBuilder,
}

impl FlowEngine {
    pub fn new(source: Arc<dyn SignalSource>) -> Self {
        Self::with_builder(FlowMatrixBuilder::new(source))
    }

    pub fn with_builder(builder: FlowMatrixBuilder) -> Self {
        Self { builder }
    }

    pub fn source_name(&self) -> &'static str {
        self.builder.source().source_name()
    }

    /// Recompute the full matrix. Only `FlowError::InvalidRange` is expected
    /// here; provider trouble degrades to estimates inside the builder.
    pub async fn get_flow_matrix(
        &self,
        assets: &[Asset],
        cohorts: &[Cohort],
        date_range: &DateRange,
    ) -> FlowResult<FlowMatrix> {
        self.builder.build(assets, cohorts, date_range).await
    }

    pub fn get_summary(&self, matrix: &FlowMatrix) -> SummaryStats {
        aggregator::summarize(matrix)
    }

    /// External (exchanges + retail) net flow for one asset
    pub fn get_asset_net_flow(&self, matrix: &FlowMatrix, asset: &Asset) -> f64 {
        aggregator::external_flow_for_asset(matrix, asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::EstimatedSource;
    use chrono::Utc;
    use flow_core::FlowRangeTable;

    #[tokio::test]
    async fn test_engine_round_trip() {
        let engine = FlowEngine::new(Arc::new(EstimatedSource::seeded(FlowRangeTable::builtin(), 21)));
        let assets = vec![Asset::new("BTC").unwrap(), Asset::new("ETH").unwrap()];

        let matrix = engine
            .get_flow_matrix(&assets, &Cohort::ALL, &DateRange::last_days(7, Utc::now()))
            .await
            .unwrap();
        let summary = engine.get_summary(&matrix);

        assert_eq!(matrix.len(), 10);
        assert_eq!(summary.net_flow, summary.total_inflow - summary.total_outflow);

        let btc_exchanges = matrix.cell(&assets[0], Cohort::Exchanges).unwrap().value;
        let btc_retail = matrix.cell(&assets[0], Cohort::Retail).unwrap().value;
        assert_eq!(engine.get_asset_net_flow(&matrix, &assets[0]), btc_exchanges + btc_retail);
        assert_eq!(engine.source_name(), "estimated");
    }
}
