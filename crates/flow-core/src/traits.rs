use async_trait::async_trait;

use crate::{Asset, Cohort, DateRange, FlowResult, MarketSnapshot, Signal, SignalWindow};

/// Supplies one flow value per (asset, cohort) pair.
///
/// Implemented by the synthetic estimator and by the live source that
/// derives values from market and on-chain providers.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn get_value(
        &self,
        asset: &Asset,
        cohort: Cohort,
        window: &SignalWindow,
    ) -> FlowResult<Signal>;

    fn source_name(&self) -> &'static str;

    /// Whether this source can return observed (non-estimated) values
    fn is_live(&self) -> bool {
        false
    }
}

/// Asset-level market data (price, volume, market cap, percent changes)
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn market_snapshot(&self, asset: &Asset) -> FlowResult<MarketSnapshot>;

    fn provider_name(&self) -> &'static str;
}

/// Direct per-cohort net flow figures from an on-chain analytics provider
#[async_trait]
pub trait OnChainProvider: Send + Sync {
    /// Net flow in USD over `range`, `None` when the provider has no series
    /// for this asset/cohort.
    async fn cohort_net_flow(
        &self,
        asset: &Asset,
        cohort: Cohort,
        range: &DateRange,
    ) -> FlowResult<Option<f64>>;

    fn provider_name(&self) -> &'static str;
}
