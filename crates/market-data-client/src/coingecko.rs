//! CoinGecko market data (price, market cap, volume, percent changes).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flow_core::{Asset, FlowError, FlowResult, MarketDataProvider, MarketSnapshot};
use serde::Deserialize;
use std::sync::Arc;

use crate::{ProviderConfig, RequestExecutor, Throttle};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

const PROVIDER: &str = "coingecko";

/// CoinGecko coin ids for the symbols the dashboard tracks
const COIN_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
    ("XRP", "ripple"),
    ("USDT", "tether"),
    ("USDC", "usd-coin"),
    ("BNB", "binancecoin"),
    ("ADA", "cardano"),
    ("AVAX", "avalanche-2"),
    ("DOGE", "dogecoin"),
    ("MATIC", "matic-network"),
    ("DOT", "polkadot"),
    ("LINK", "chainlink"),
    ("UNI", "uniswap"),
    ("ATOM", "cosmos"),
    ("LTC", "litecoin"),
    ("ETC", "ethereum-classic"),
    ("XLM", "stellar"),
    ("ALGO", "algorand"),
];

#[derive(Clone)]
pub struct CoinGeckoClient {
    config: ProviderConfig,
    executor: RequestExecutor,
}

impl CoinGeckoClient {
    pub fn new(config: ProviderConfig, throttle: Arc<Throttle>) -> Self {
        let executor = RequestExecutor::new(PROVIDER, &config, throttle);
        Self { config, executor }
    }

    pub fn coin_id(asset: &Asset) -> Option<&'static str> {
        COIN_IDS
            .iter()
            .find(|(symbol, _)| *symbol == asset.as_str())
            .map(|(_, id)| *id)
    }

    /// Fetch the current market snapshot for one asset
    pub async fn get_market(&self, asset: &Asset) -> FlowResult<MarketSnapshot> {
        let coin_id = Self::coin_id(asset).ok_or_else(|| {
            FlowError::ProviderUnavailable(format!("no CoinGecko id for {}", asset))
        })?;

        let url = format!("{}/coins/markets", self.config.base_url);
        let mut builder = self.executor.client().get(&url).query(&[
            ("vs_currency", "usd"),
            ("ids", coin_id),
            ("price_change_percentage", "24h,7d,30d"),
        ]);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("x-cg-demo-api-key", key);
        }

        let markets: Vec<CoinMarket> = self.executor.get_json(builder).await?;
        snapshot_from_markets(asset, coin_id, markets)
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    async fn market_snapshot(&self, asset: &Asset) -> FlowResult<MarketSnapshot> {
        self.get_market(asset).await
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

fn snapshot_from_markets(
    asset: &Asset,
    coin_id: &str,
    markets: Vec<CoinMarket>,
) -> FlowResult<MarketSnapshot> {
    let market = markets
        .into_iter()
        .find(|m| m.id == coin_id)
        .ok_or_else(|| FlowError::InvalidResponse(format!("no market entry for {}", coin_id)))?;

    let required = |name: &str, value: Option<f64>| {
        value.ok_or_else(|| FlowError::InvalidResponse(format!("{} missing {}", coin_id, name)))
    };

    let snapshot = MarketSnapshot {
        asset: asset.clone(),
        price: required("current_price", market.current_price)?,
        market_cap: required("market_cap", market.market_cap)?,
        volume_24h: required("total_volume", market.total_volume)?,
        change_24h: market
            .price_change_percentage_24h_in_currency
            .or(market.price_change_percentage_24h)
            .unwrap_or(0.0),
        change_7d: market.price_change_percentage_7d_in_currency.unwrap_or(0.0),
        change_30d: market.price_change_percentage_30d_in_currency.unwrap_or(0.0),
        circulating_supply: market.circulating_supply,
        total_supply: market.total_supply,
        updated_at: market.last_updated.unwrap_or_else(Utc::now),
    };

    if !snapshot.is_well_formed() {
        return Err(FlowError::InvalidResponse(format!(
            "{} returned non-finite market data",
            coin_id
        )));
    }

    Ok(snapshot)
}

#[derive(Debug, Deserialize)]
struct CoinMarket {
    id: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
    #[serde(default)]
    price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    price_change_percentage_24h_in_currency: Option<f64>,
    #[serde(default)]
    price_change_percentage_7d_in_currency: Option<f64>,
    #[serde(default)]
    price_change_percentage_30d_in_currency: Option<f64>,
    #[serde(default)]
    circulating_supply: Option<f64>,
    #[serde(default)]
    total_supply: Option<f64>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}
