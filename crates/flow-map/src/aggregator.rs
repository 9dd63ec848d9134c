//! Aggregation over a flow matrix. Pure functions, no I/O.

use flow_core::{Asset, AssetFlowSummary, Cohort, FlowDirection, FlowMatrix, SummaryStats};

/// Matrix-wide inflow, outflow and net flow
pub fn summarize(matrix: &FlowMatrix) -> SummaryStats {
    let total_inflow: f64 = matrix
        .cells
        .iter()
        .filter(|c| c.is_inflow())
        .map(|c| c.value)
        .sum();
    let total_outflow: f64 = matrix
        .cells
        .iter()
        .map(|c| c.value)
        .filter(|v| *v < 0.0)
        .sum::<f64>()
        .abs();

    SummaryStats {
        total_inflow,
        total_outflow,
        net_flow: total_inflow - total_outflow,
    }
}

/// Sum of an asset's cells restricted to `cohort_filter`
pub fn net_flow_for_asset(matrix: &FlowMatrix, asset: &Asset, cohort_filter: &[Cohort]) -> f64 {
    matrix
        .cells_for_asset(asset)
        .filter(|c| cohort_filter.contains(&c.cohort))
        .map(|c| c.value)
        .sum()
}

/// Flow entering or leaving the ecosystem (exchanges + retail)
pub fn external_flow_for_asset(matrix: &FlowMatrix, asset: &Asset) -> f64 {
    matrix
        .cells_for_asset(asset)
        .filter(|c| c.cohort.is_external())
        .map(|c| c.value)
        .sum()
}

/// Sum over every cohort present for the asset
pub fn total_flow_for_asset(matrix: &FlowMatrix, asset: &Asset) -> f64 {
    matrix.cells_for_asset(asset).map(|c| c.value).sum()
}

/// One row per asset, in matrix order
pub fn asset_summaries(matrix: &FlowMatrix) -> Vec<AssetFlowSummary> {
    matrix
        .assets
        .iter()
        .map(|asset| {
            let external_flow = external_flow_for_asset(matrix, asset);
            AssetFlowSummary {
                asset: asset.clone(),
                external_flow,
                total_flow: total_flow_for_asset(matrix, asset),
                direction: FlowDirection::from_value(external_flow),
            }
        })
        .collect()
}
