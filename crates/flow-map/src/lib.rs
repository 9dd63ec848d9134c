//! Flow Map Module
//!
//! Estimates net fund flows between crypto assets and wallet cohorts and
//! aggregates them into an asset x cohort matrix.

pub mod aggregator;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod estimator;
pub mod live_source;
pub mod matrix;
pub mod range_scaler;

pub use aggregator::{
    asset_summaries, external_flow_for_asset, net_flow_for_asset, summarize, total_flow_for_asset,
};
pub use config::{DataSourceMode, FlowConfig};
pub use dashboard::{FlowDashboard, FlowRequest, FlowSnapshot};
pub use engine::FlowEngine;
pub use estimator::EstimatedSource;
pub use live_source::LiveSource;
pub use matrix::{DegradationPolicy, FlowMatrixBuilder};
pub use range_scaler::{scale_factor, scale_for, BASELINE_DAYS};
