//! Glassnode on-chain cohort flow series.

use async_trait::async_trait;
use flow_core::{Asset, Cohort, DateRange, FlowError, FlowResult, OnChainProvider};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

use crate::{ProviderConfig, RequestExecutor, Throttle};

pub const DEFAULT_BASE_URL: &str = "https://api.glassnode.com";

const PROVIDER: &str = "glassnode";

#[derive(Clone)]
pub struct GlassnodeClient {
    config: ProviderConfig,
    executor: RequestExecutor,
}

impl GlassnodeClient {
    pub fn new(config: ProviderConfig, throttle: Arc<Throttle>) -> Self {
        let executor = RequestExecutor::new(PROVIDER, &config, throttle);
        Self { config, executor }
    }

    /// Transaction-volume metric tracking each cohort's net change
    pub fn metric_for(cohort: Cohort) -> &'static str {
        match cohort {
            Cohort::Exchanges => "volume_change_from_exchanges",
            Cohort::Whales => "volume_change_whale",
            Cohort::Miners => "volume_change_miners",
            Cohort::SmartContracts => "volume_change_smart_contracts",
            Cohort::Retail => "volume_change_retail",
        }
    }

    /// Daily USD series for one cohort over `range`
    pub async fn get_flow_series(
        &self,
        asset: &Asset,
        cohort: Cohort,
        range: &DateRange,
    ) -> FlowResult<Option<Vec<FlowPoint>>> {
        let url = format!(
            "{}/v1/metrics/transactions/{}",
            self.config.base_url,
            Self::metric_for(cohort)
        );

        let mut query = vec![
            ("a", asset.as_str().to_string()),
            ("s", range.start().timestamp().to_string()),
            ("u", range.end().timestamp().to_string()),
            ("i", "24h".to_string()),
            ("c", "USD".to_string()),
        ];
        if let Some(key) = &self.config.api_key {
            query.push(("api_key", key.clone()));
        }

        let response = self.executor.send(self.executor.client().get(&url).query(&query)).await?;

        // Unsupported asset or metric tier
        if response.status() == StatusCode::NOT_FOUND || response.status() == StatusCode::BAD_REQUEST {
            tracing::debug!("Glassnode has no {} series for {}", Self::metric_for(cohort), asset);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FlowError::InvalidResponse(format!(
                "Glassnode HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let points: Vec<FlowPoint> = response
            .json()
            .await
            .map_err(|e| FlowError::InvalidResponse(e.to_string()))?;

        Ok(Some(points))
    }
}

#[async_trait]
impl OnChainProvider for GlassnodeClient {
    async fn cohort_net_flow(
        &self,
        asset: &Asset,
        cohort: Cohort,
        range: &DateRange,
    ) -> FlowResult<Option<f64>> {
        let series = self.get_flow_series(asset, cohort, range).await?;
        Ok(series.and_then(|points| sum_series(&points)))
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// One `{t, v}` sample of a Glassnode series
#[derive(Debug, Clone, Deserialize)]
pub struct FlowPoint {
    pub t: i64,
    pub v: Option<f64>,
}

/// Sum of the non-null, finite samples; `None` when there are none.
pub fn sum_series(points: &[FlowPoint]) -> Option<f64> {
    let values: Vec<f64> = points
        .iter()
        .filter_map(|p| p.v)
        .filter(|v| v.is_finite())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum())
    }
}
