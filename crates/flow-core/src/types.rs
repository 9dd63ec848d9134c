use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::FlowError;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Asset symbol, always upper-case (e.g. "BTC")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Asset(String);

impl Asset {
    pub fn new(symbol: &str) -> Result<Self, FlowError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(FlowError::InvalidData("empty asset symbol".to_string()));
        }
        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(FlowError::InvalidData(format!(
                "asset symbol '{}' must be alphanumeric",
                symbol
            )));
        }
        Ok(Self(symbol.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a comma separated symbol list, skipping blanks and duplicates.
    pub fn parse_list(list: &str) -> Result<Vec<Asset>, FlowError> {
        let mut assets: Vec<Asset> = Vec::new();
        for part in list.split(',').filter(|p| !p.trim().is_empty()) {
            let asset = Asset::new(part)?;
            if !assets.contains(&asset) {
                assets.push(asset);
            }
        }
        Ok(assets)
    }
}

impl TryFrom<String> for Asset {
    type Error = FlowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Asset::new(&value)
    }
}

impl From<Asset> for String {
    fn from(asset: Asset) -> Self {
        asset.0
    }
}

impl FromStr for Asset {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Asset::new(s)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wallet-behaviour cohort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cohort {
    Exchanges,
    Whales,
    Miners,
    SmartContracts,
    Retail,
}

impl Cohort {
    pub const ALL: [Cohort; 5] = [
        Cohort::Exchanges,
        Cohort::Whales,
        Cohort::Miners,
        Cohort::SmartContracts,
        Cohort::Retail,
    ];

    /// Cohorts whose flows cross the boundary of the on-chain ecosystem.
    /// Whales, miners and smart contracts only reshuffle funds internally.
    pub const EXTERNAL: [Cohort; 2] = [Cohort::Exchanges, Cohort::Retail];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::Exchanges => "exchanges",
            Cohort::Whales => "whales",
            Cohort::Miners => "miners",
            Cohort::SmartContracts => "smart-contracts",
            Cohort::Retail => "retail",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Cohort::Exchanges => "Exchanges",
            Cohort::Whales => "Whales",
            Cohort::Miners => "Miners",
            Cohort::SmartContracts => "Smart Contracts",
            Cohort::Retail => "Retail",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Cohort::Exchanges => "Centralized exchanges",
            Cohort::Whales => "> 1K BTC equivalent",
            Cohort::Miners => "Mining pools",
            Cohort::SmartContracts => "DeFi protocols",
            Cohort::Retail => "< 1 BTC equivalent",
        }
    }

    pub fn is_external(&self) -> bool {
        Cohort::EXTERNAL.contains(self)
    }

    pub fn info(&self) -> CohortInfo {
        CohortInfo {
            id: *self,
            label: self.label().to_string(),
            description: self.description().to_string(),
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cohort {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_ascii_lowercase().replace('_', "-");
        Cohort::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == id)
            .ok_or_else(|| FlowError::InvalidData(format!("unknown cohort '{}'", s.trim())))
    }
}

/// Cohort metadata for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortInfo {
    pub id: Cohort,
    pub label: String,
    pub description: String,
}

/// The set of cohorts currently toggled on, kept in canonical order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CohortSelection(Vec<Cohort>);

impl Default for CohortSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl CohortSelection {
    pub fn all() -> Self {
        Self(Cohort::ALL.to_vec())
    }

    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn from_cohorts(cohorts: &[Cohort]) -> Self {
        let mut selection = Self::none();
        for cohort in cohorts {
            selection.toggle(*cohort, true);
        }
        selection
    }

    /// Parse a comma separated list of cohort ids
    pub fn parse(list: &str) -> Result<Self, FlowError> {
        let cohorts = list
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .map(Cohort::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_cohorts(&cohorts))
    }

    pub fn toggle(&mut self, cohort: Cohort, checked: bool) {
        if checked {
            if !self.0.contains(&cohort) {
                self.0.push(cohort);
                self.0.sort();
            }
        } else {
            self.0.retain(|c| *c != cohort);
        }
    }

    pub fn select_all(&mut self) {
        self.0 = Cohort::ALL.to_vec();
    }

    pub fn deselect_all(&mut self) {
        self.0.clear();
    }

    pub fn is_all_selected(&self) -> bool {
        self.0.len() == Cohort::ALL.len()
    }

    pub fn contains(&self, cohort: Cohort) -> bool {
        self.0.contains(&cohort)
    }

    pub fn cohorts(&self) -> &[Cohort] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// e.g. "3 of 5 selected"
    pub fn summary(&self) -> String {
        format!("{} of {} selected", self.0.len(), Cohort::ALL.len())
    }
}

/// Bounds (millions USD, 7-day baseline) for synthetic flow values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(f64, f64)", into = "(f64, f64)")]
pub struct FlowRange {
    low: f64,
    high: f64,
}

impl FlowRange {
    /// Used for any (asset, cohort) pair without a configured range.
    pub const DEFAULT: FlowRange = FlowRange {
        low: -100.0,
        high: 100.0,
    };

    pub fn new(low: f64, high: f64) -> Result<Self, FlowError> {
        if !low.is_finite() || !high.is_finite() {
            return Err(FlowError::InvalidData(format!(
                "flow range [{}, {}] must be finite",
                low, high
            )));
        }
        if low > high {
            return Err(FlowError::InvalidData(format!(
                "flow range low {} exceeds high {}",
                low, high
            )));
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

impl TryFrom<(f64, f64)> for FlowRange {
    type Error = FlowError;

    fn try_from((low, high): (f64, f64)) -> Result<Self, Self::Error> {
        FlowRange::new(low, high)
    }
}

impl From<FlowRange> for (f64, f64) {
    fn from(range: FlowRange) -> Self {
        (range.low, range.high)
    }
}

/// Baseline ranges per asset, columns in `Cohort::ALL` order.
const BUILTIN_RANGES: &[(&str, [(f64, f64); 5])] = &[
    ("BTC", [(200.0, 300.0), (-300.0, -100.0), (80.0, 150.0), (-80.0, 50.0), (20.0, 60.0)]),
    ("ETH", [(150.0, 250.0), (-250.0, -150.0), (60.0, 120.0), (200.0, 400.0), (-60.0, 20.0)]),
    ("SOL", [(70.0, 120.0), (-150.0, -80.0), (30.0, 60.0), (120.0, 200.0), (-40.0, 10.0)]),
    ("XRP", [(50.0, 90.0), (-120.0, -60.0), (20.0, 45.0), (80.0, 150.0), (-30.0, 15.0)]),
    ("USDT", [(300.0, 500.0), (-700.0, -400.0), (100.0, 200.0), (400.0, 600.0), (-100.0, -40.0)]),
    ("USDC", [(250.0, 400.0), (-600.0, -300.0), (80.0, 180.0), (300.0, 500.0), (-80.0, -30.0)]),
    ("BNB", [(120.0, 180.0), (-250.0, -150.0), (50.0, 90.0), (200.0, 300.0), (-50.0, 20.0)]),
    ("ADA", [(60.0, 100.0), (-140.0, -80.0), (25.0, 55.0), (100.0, 180.0), (-35.0, 15.0)]),
    ("AVAX", [(50.0, 90.0), (-120.0, -70.0), (20.0, 45.0), (90.0, 160.0), (-30.0, 10.0)]),
    ("DOGE", [(30.0, 60.0), (-80.0, -40.0), (15.0, 30.0), (60.0, 100.0), (-20.0, 10.0)]),
    ("MATIC", [(40.0, 75.0), (-100.0, -50.0), (20.0, 40.0), (80.0, 130.0), (-25.0, 15.0)]),
    ("DOT", [(45.0, 80.0), (-110.0, -60.0), (22.0, 42.0), (90.0, 140.0), (-28.0, 12.0)]),
    ("LINK", [(55.0, 95.0), (-130.0, -70.0), (25.0, 48.0), (100.0, 160.0), (-32.0, 14.0)]),
    ("UNI", [(35.0, 65.0), (-90.0, -45.0), (18.0, 33.0), (70.0, 110.0), (-22.0, 9.0)]),
    ("ATOM", [(40.0, 75.0), (-100.0, -55.0), (20.0, 40.0), (80.0, 130.0), (-27.0, 11.0)]),
    ("LTC", [(25.0, 50.0), (-70.0, -35.0), (12.0, 26.0), (50.0, 90.0), (-18.0, 7.0)]),
    ("ETC", [(20.0, 45.0), (-65.0, -30.0), (10.0, 23.0), (45.0, 80.0), (-16.0, 6.0)]),
    ("XLM", [(15.0, 40.0), (-60.0, -25.0), (8.0, 20.0), (40.0, 70.0), (-14.0, 5.0)]),
    ("ALGO", [(12.0, 35.0), (-55.0, -20.0), (6.0, 18.0), (35.0, 60.0), (-12.0, 4.0)]),
];

/// Per-(asset, cohort) flow ranges
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowRangeTable {
    ranges: HashMap<Asset, HashMap<Cohort, FlowRange>>,
}

impl FlowRangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The 7-day baseline table for the 19 default assets
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (symbol, row) in BUILTIN_RANGES {
            let asset = Asset(symbol.to_string());
            for (cohort, (low, high)) in Cohort::ALL.iter().zip(row.iter()) {
                table.insert(asset.clone(), *cohort, FlowRange { low: *low, high: *high });
            }
        }
        table
    }

    /// Parse `{ "BTC": { "exchanges": [200, 300] } }`
    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        serde_json::from_str(json)
            .map_err(|e| FlowError::Config(format!("invalid flow range table: {}", e)))
    }

    /// Assets that appear in the builtin table, in display order
    pub fn builtin_assets() -> Vec<Asset> {
        BUILTIN_RANGES
            .iter()
            .map(|(symbol, _)| Asset(symbol.to_string()))
            .collect()
    }

    pub fn insert(&mut self, asset: Asset, cohort: Cohort, range: FlowRange) {
        self.ranges.entry(asset).or_default().insert(cohort, range);
    }

    /// Overlay every range of `other` on top of this table
    pub fn merge(&mut self, other: FlowRangeTable) {
        for (asset, row) in other.ranges {
            for (cohort, range) in row {
                self.insert(asset.clone(), cohort, range);
            }
        }
    }

    pub fn get(&self, asset: &Asset, cohort: Cohort) -> Option<FlowRange> {
        self.ranges.get(asset).and_then(|row| row.get(&cohort)).copied()
    }

    pub fn range_for(&self, asset: &Asset, cohort: Cohort) -> FlowRange {
        self.get(asset, cohort).unwrap_or(FlowRange::DEFAULT)
    }

    pub fn len(&self) -> usize {
        self.ranges.values().map(|row| row.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whole days between two instants, rounded up. Negative when `end < start`.
pub fn whole_days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let ms = (end - start).num_milliseconds();
    if ms >= 0 {
        (ms + DAY_MS - 1) / DAY_MS
    } else {
        -((-ms) / DAY_MS)
    }
}

/// Requested reporting window, always `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange", into = "RawDateRange")]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Unvalidated wire form of [`DateRange`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawDateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = FlowError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl From<DateRange> for RawDateRange {
    fn from(range: DateRange) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, FlowError> {
        if end < start {
            return Err(FlowError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// The `days` days leading up to `now` (the "7 Days" / "30 Days" presets)
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::days(i64::from(days)),
            end: now,
        }
    }

    /// January 1st (UTC) of the current year up to `now`
    pub fn year_to_date(now: DateTime<Utc>) -> Self {
        let start = Utc
            .with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        Self { start, end: now }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn days(&self) -> i64 {
        whole_days_between(self.start, self.end)
    }
}

/// Where a flow value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Real,
    Estimated,
}

/// Presentation bucket derived from a value's sign and magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorBucket {
    StrongInflow,
    ModerateInflow,
    MildInflow,
    Neutral,
    MildOutflow,
    ModerateOutflow,
    StrongOutflow,
}

impl ColorBucket {
    pub const STRONG_THRESHOLD: f64 = 200.0;
    pub const MODERATE_THRESHOLD: f64 = 100.0;

    pub fn from_value(value: f64) -> Self {
        let magnitude = value.abs();
        if value > 0.0 {
            if magnitude > Self::STRONG_THRESHOLD {
                ColorBucket::StrongInflow
            } else if magnitude > Self::MODERATE_THRESHOLD {
                ColorBucket::ModerateInflow
            } else {
                ColorBucket::MildInflow
            }
        } else if value < 0.0 {
            if magnitude > Self::STRONG_THRESHOLD {
                ColorBucket::StrongOutflow
            } else if magnitude > Self::MODERATE_THRESHOLD {
                ColorBucket::ModerateOutflow
            } else {
                ColorBucket::MildOutflow
            }
        } else {
            ColorBucket::Neutral
        }
    }

    /// Colorblind-friendly palette: blue for inflow, orange for outflow
    pub fn css_class(&self) -> &'static str {
        match self {
            ColorBucket::StrongInflow => "bg-blue-600 text-white",
            ColorBucket::ModerateInflow => "bg-blue-500 text-white",
            ColorBucket::MildInflow => "bg-blue-400 text-white",
            ColorBucket::Neutral => "bg-gray-400",
            ColorBucket::MildOutflow => "bg-orange-400 text-white",
            ColorBucket::ModerateOutflow => "bg-orange-500 text-white",
            ColorBucket::StrongOutflow => "bg-orange-600 text-white",
        }
    }
}

/// Window a signal is requested for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWindow {
    pub date_range: DateRange,
    /// Range length relative to the 7-day baseline
    pub scale_factor: f64,
}

/// A single value produced by a signal source, in whole millions USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub value: f64,
    pub provenance: Provenance,
}

impl Signal {
    pub fn real(value: f64) -> Self {
        Self {
            value: value.round(),
            provenance: Provenance::Real,
        }
    }

    pub fn estimated(value: f64) -> Self {
        Self {
            value: value.round(),
            provenance: Provenance::Estimated,
        }
    }
}

/// One cell of the asset x cohort matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowCell {
    pub asset: Asset,
    pub cohort: Cohort,
    /// Net flow in millions USD (positive = inflow, negative = outflow)
    pub value: f64,
    pub provenance: Provenance,
    pub color_bucket: ColorBucket,
}

impl FlowCell {
    pub fn new(asset: Asset, cohort: Cohort, signal: Signal) -> Self {
        Self {
            asset,
            cohort,
            value: signal.value,
            provenance: signal.provenance,
            color_bucket: ColorBucket::from_value(signal.value),
        }
    }

    pub fn is_inflow(&self) -> bool {
        self.value > 0.0
    }
}

/// A pair that fell back to a default-range estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedCell {
    pub asset: Asset,
    pub cohort: Cohort,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    /// A live source was configured but every cell came back estimated
    AllEstimated,
    /// Some pairs could not be resolved and were replaced by default estimates
    PartialData,
}

/// Non-fatal notice attached to a matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    pub message: String,
}

/// Complete asset x cohort matrix for one recompute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowMatrix {
    pub assets: Vec<Asset>,
    pub cohorts: Vec<Cohort>,
    pub date_range: DateRange,
    pub scale_factor: f64,
    /// One cell per (asset, cohort), ordered by asset then cohort
    pub cells: Vec<FlowCell>,
    #[serde(default)]
    pub degraded: Vec<DegradedCell>,
    #[serde(default)]
    pub advisory: Option<Advisory>,
    pub generated_at: DateTime<Utc>,
}

impl FlowMatrix {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, asset: &Asset, cohort: Cohort) -> Option<&FlowCell> {
        self.cells
            .iter()
            .find(|c| &c.asset == asset && c.cohort == cohort)
    }

    pub fn cells_for_asset<'a>(&'a self, asset: &'a Asset) -> impl Iterator<Item = &'a FlowCell> + 'a {
        self.cells.iter().filter(move |c| &c.asset == asset)
    }

    pub fn estimated_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| c.provenance == Provenance::Estimated)
            .count()
    }

    pub fn real_count(&self) -> usize {
        self.len() - self.estimated_count()
    }
}

/// Matrix-wide totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_inflow: f64,
    pub total_outflow: f64,
    pub net_flow: f64,
}

/// Direction of an asset's net flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    Inflow,
    Outflow,
    Neutral,
}

impl FlowDirection {
    pub fn from_value(value: f64) -> Self {
        if value > 0.0 {
            FlowDirection::Inflow
        } else if value < 0.0 {
            FlowDirection::Outflow
        } else {
            FlowDirection::Neutral
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FlowDirection::Inflow => "Net Inflow",
            FlowDirection::Outflow => "Net Outflow",
            FlowDirection::Neutral => "Balanced",
        }
    }
}

/// Per-asset row totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetFlowSummary {
    pub asset: Asset,
    /// Exchanges + retail only
    pub external_flow: f64,
    /// All cohorts in the matrix
    pub total_flow: f64,
    pub direction: FlowDirection,
}

/// Asset-level market data (USD, percent changes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub asset: Asset,
    pub price: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    pub change_24h: f64,
    pub change_7d: f64,
    pub change_30d: f64,
    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// All numeric fields used for flow derivation are finite
    pub fn is_well_formed(&self) -> bool {
        [
            self.price,
            self.market_cap,
            self.volume_24h,
            self.change_24h,
            self.change_7d,
            self.change_30d,
        ]
        .iter()
        .all(|v| v.is_finite())
            && self.volume_24h >= 0.0
            && self.market_cap >= 0.0
    }
}
