//! Live Signal Source
//!
//! Derives cohort flows from observed market and on-chain data, falling back
//! to synthetic estimates whenever a provider cannot answer.

use async_trait::async_trait;
use dashmap::DashMap;
use flow_core::{
    Asset, Cohort, FlowError, FlowResult, MarketDataProvider, MarketSnapshot, OnChainProvider,
    Signal, SignalSource, SignalWindow,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::estimator::EstimatedSource;

const USD_PER_MILLION: f64 = 1_000_000.0;

/// Share of 24h volume attributed to net exchange flow
const EXCHANGE_VOLUME_SHARE: f64 = 0.02;
/// Share of price-change-weighted market cap attributed to whales
const WHALE_CAP_SHARE: f64 = 0.05;
const MINER_VOLUME_SHARE: f64 = 0.004;
const CONTRACT_VOLUME_SHARE: f64 = 0.01;
const RETAIL_VOLUME_SHARE: f64 = 0.005;

/// Platforms hosting most DeFi activity get their smart-contract flow weighted up
const DEFI_PLATFORMS: &[&str] = &["ETH", "SOL", "BNB", "ADA", "AVAX", "MATIC", "DOT", "ATOM", "ALGO"];
const DEFI_WEIGHT: f64 = 2.0;
const NON_DEFI_WEIGHT: f64 = 0.5;

/// Estimated 7-day net flow (millions USD) for a cohort from market data
pub fn derive_weekly_flow(snapshot: &MarketSnapshot, cohort: Cohort) -> FlowResult<f64> {
    if !snapshot.is_well_formed() {
        return Err(FlowError::InvalidResponse(format!(
            "malformed market data for {}",
            snapshot.asset
        )));
    }

    let weekly_volume = snapshot.volume_24h / USD_PER_MILLION * 7.0;
    let market_cap = snapshot.market_cap / USD_PER_MILLION;
    let direction = if snapshot.change_24h >= 0.0 { 1.0 } else { -1.0 };

    let flow = match cohort {
        Cohort::Exchanges => EXCHANGE_VOLUME_SHARE * weekly_volume * direction,
        Cohort::Whales => WHALE_CAP_SHARE * market_cap * snapshot.change_7d / 100.0,
        Cohort::Miners => MINER_VOLUME_SHARE * weekly_volume,
        Cohort::SmartContracts => {
            let weight = if DEFI_PLATFORMS.contains(&snapshot.asset.as_str()) {
                DEFI_WEIGHT
            } else {
                NON_DEFI_WEIGHT
            };
            CONTRACT_VOLUME_SHARE * weekly_volume * weight
        }
        Cohort::Retail => RETAIL_VOLUME_SHARE * weekly_volume * direction,
    };

    Ok(flow)
}

/// Real-data strategy with estimated fallback
pub struct LiveSource {
    market: Arc<dyn MarketDataProvider>,
    on_chain: Option<Arc<dyn OnChainProvider>>,
    fallback: EstimatedSource,
    snapshots: DashMap<Asset, (Instant, MarketSnapshot)>,
    snapshot_ttl: Duration,
}

impl LiveSource {
    pub fn new(market: Arc<dyn MarketDataProvider>, fallback: EstimatedSource) -> Self {
        Self {
            market,
            on_chain: None,
            fallback,
            snapshots: DashMap::new(),
            snapshot_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_on_chain(mut self, provider: Arc<dyn OnChainProvider>) -> Self {
        self.on_chain = Some(provider);
        self
    }

    pub fn with_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    /// Cached market snapshot, refreshed once older than the TTL
    async fn snapshot(&self, asset: &Asset) -> FlowResult<MarketSnapshot> {
        if let Some(entry) = self.snapshots.get(asset) {
            let (fetched_at, snapshot) = entry.value();
            if fetched_at.elapsed() < self.snapshot_ttl {
                return Ok(snapshot.clone());
            }
        }

        let snapshot = self.market.market_snapshot(asset).await?;
        self.snapshots
            .insert(asset.clone(), (Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }

    async fn observed_value(
        &self,
        asset: &Asset,
        cohort: Cohort,
        window: &SignalWindow,
    ) -> FlowResult<f64> {
        if let Some(on_chain) = &self.on_chain {
            match on_chain.cohort_net_flow(asset, cohort, &window.date_range).await {
                Ok(Some(usd)) if usd.is_finite() => return Ok(usd / USD_PER_MILLION),
                Ok(_) => {}
                Err(e) => tracing::debug!(
                    "{} has no {} flow for {}: {}",
                    on_chain.provider_name(),
                    cohort,
                    asset,
                    e
                ),
            }
        }

        let snapshot = self.snapshot(asset).await?;
        let weekly = derive_weekly_flow(&snapshot, cohort)?;
        Ok(window.scale_factor * weekly)
    }

    pub fn cached_snapshots(&self) -> usize {
        self.snapshots.len()
    }
}

#[async_trait]
impl SignalSource for LiveSource {
    async fn get_value(
        &self,
        asset: &Asset,
        cohort: Cohort,
        window: &SignalWindow,
    ) -> FlowResult<Signal> {
        match self.observed_value(asset, cohort, window).await {
            Ok(value) => Ok(Signal::real(value)),
            Err(e) => {
                tracing::warn!(
                    "Live data unavailable for {}/{} via {} ({}), using estimate",
                    asset,
                    cohort,
                    self.market.provider_name(),
                    e
                );
                Ok(self.fallback.estimate_for(asset, cohort, window.scale_factor))
            }
        }
    }

    fn source_name(&self) -> &'static str {
        "live"
    }

    fn is_live(&self) -> bool {
        true
    }
}
