use anyhow::{bail, Context, Result};
use flow_core::{Asset, FlowRangeTable, SignalSource};
use market_data_client::{
    coingecko, glassnode, CoinGeckoClient, GlassnodeClient, ProviderConfig, RetryPolicy, Throttle,
};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::estimator::EstimatedSource;
use crate::live_source::LiveSource;

/// Which signal source backs the matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataSourceMode {
    #[default]
    Estimated,
    Live,
}

impl FromStr for DataSourceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "estimated" | "estimate" | "mock" => Ok(Self::Estimated),
            "live" | "real" => Ok(Self::Live),
            other => bail!("Unknown FLOW_DATA_SOURCE '{}', expected 'estimated' or 'live'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub assets: Vec<Asset>,
    pub ranges: FlowRangeTable,
    pub data_source: DataSourceMode,

    // Providers
    pub coingecko: ProviderConfig,
    pub glassnode: Option<ProviderConfig>,
    pub min_interval: Duration,     // per provider, between requests
    pub snapshot_ttl: Duration,     // market snapshot cache

    // Server
    pub bind_addr: SocketAddr,
    pub refresh_interval: Duration, // background recompute
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            assets: FlowRangeTable::builtin_assets(),
            ranges: FlowRangeTable::builtin(),
            data_source: DataSourceMode::Estimated,
            coingecko: ProviderConfig::new(coingecko::DEFAULT_BASE_URL),
            glassnode: None,
            min_interval: Duration::from_millis(1200),
            snapshot_ttl: Duration::from_secs(300),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            refresh_interval: Duration::from_secs(1800),
        }
    }
}

impl FlowConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; missing keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let assets = match lookup("FLOW_ASSETS").filter(|s| !s.trim().is_empty()) {
            Some(list) => Asset::parse_list(&list).context("Invalid FLOW_ASSETS")?,
            None => FlowRangeTable::builtin_assets(),
        };

        let mut ranges = FlowRangeTable::builtin();
        if let Some(path) = lookup("FLOW_RANGES_PATH") {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read FLOW_RANGES_PATH {}", path))?;
            let overrides = FlowRangeTable::from_json(&json)
                .with_context(|| format!("Invalid range table in {}", path))?;
            ranges.merge(overrides);
        }

        let retry = RetryPolicy::new(
            var("PROVIDER_MAX_RETRIES", "3").parse()?,
            Duration::from_millis(var("PROVIDER_BACKOFF_MS", "1000").parse()?),
        );
        let timeout = Duration::from_secs(var("PROVIDER_TIMEOUT_SECS", "30").parse()?);

        let coingecko = ProviderConfig::new(var("COINGECKO_BASE_URL", coingecko::DEFAULT_BASE_URL))
            .with_api_key(lookup("COINGECKO_API_KEY"))
            .with_timeout(timeout)
            .with_retry(retry);

        let glassnode = ProviderConfig::new(var("GLASSNODE_BASE_URL", glassnode::DEFAULT_BASE_URL))
            .with_api_key(lookup("GLASSNODE_API_KEY"))
            .with_timeout(timeout)
            .with_retry(retry);
        // On-chain data is only queried with a key
        let glassnode = glassnode.api_key.is_some().then_some(glassnode);

        Ok(Self {
            assets,
            ranges,
            data_source: var("FLOW_DATA_SOURCE", "estimated").parse()?,
            coingecko,
            glassnode,
            min_interval: Duration::from_millis(var("PROVIDER_MIN_INTERVAL_MS", "1200").parse()?),
            snapshot_ttl: Duration::from_secs(var("SNAPSHOT_TTL_SECS", "300").parse()?),
            bind_addr: var("API_BIND_ADDR", "0.0.0.0:3000")
                .parse()
                .context("Invalid API_BIND_ADDR")?,
            refresh_interval: Duration::from_secs(var("REFRESH_INTERVAL_SECS", "1800").parse()?),
        })
    }

    /// Construct the signal source selected by `data_source`
    pub fn build_source(&self) -> Arc<dyn SignalSource> {
        let estimator = EstimatedSource::new(self.ranges.clone());

        match self.data_source {
            DataSourceMode::Estimated => Arc::new(estimator),
            DataSourceMode::Live => {
                let market = CoinGeckoClient::new(self.coingecko.clone(), Throttle::shared(self.min_interval));
                let mut source = LiveSource::new(Arc::new(market), estimator)
                    .with_snapshot_ttl(self.snapshot_ttl);

                if let Some(config) = &self.glassnode {
                    let on_chain = GlassnodeClient::new(config.clone(), Throttle::shared(self.min_interval));
                    source = source.with_on_chain(Arc::new(on_chain));
                } else {
                    tracing::info!("GLASSNODE_API_KEY not set, deriving cohort flows from market data");
                }
                Arc::new(source)
            }
        }
    }
}
