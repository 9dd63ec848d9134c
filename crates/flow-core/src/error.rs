use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Asset, Cohort};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("Invalid date range: end {end} is before start {start}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No data for {asset}/{cohort}: {reason}")]
    PartialData {
        asset: Asset,
        cohort: Cohort,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlowError {
    /// Failures worth another attempt after backing off.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlowError::RateLimited(_) | FlowError::Network(_))
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
