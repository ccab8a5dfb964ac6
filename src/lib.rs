//! # reclaim - consolidation breakdown/reclaim detection and momentum screening
//!
//! Batch engine over daily price histories. Per symbol it derives a trailing-only
//! indicator frame (ATR, consolidation box, moving average, slope), runs the
//! breakdown→reclaim state machine, and screens the symbol for the momentum
//! candidate groups.
//!
//! ## Quick Start
//!
//! ```rust
//! use reclaim::prelude::*;
//! use chrono::NaiveDate;
//!
//! let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//! let points: Vec<PricePoint> = (0..40)
//!     .map(|i| {
//!         let date = start + chrono::Days::new(i);
//!         PricePoint::new(date, 100.0, 100.5, 99.5, 100.0, 1_000_000.0)
//!     })
//!     .collect();
//! let universe = vec![PriceSeries::new("2330", points)];
//!
//! let engine = EngineBuilder::new().build().unwrap();
//! let result = engine.run(&universe, &CancelToken::new());
//! assert!(result.diagnostics.is_empty());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use log::{debug, info, warn};
use rayon::prelude::*;

pub mod detectors;
pub mod params;

pub mod prelude {
    pub use crate::{
        // Detectors
        detectors::*,
        // Parameters
        params::{get_f64, get_period, get_ratio, ParamMeta, ParamType, ParameterizedConfig},
        // Batch
        BatchResult,
        CancelToken,
        // Config
        DetectorConfig,
        DistanceBand,
        // Engine
        EngineBuilder,
        // Frame
        compute_frame,
        validate_bars,
        IndicatorFrame,
        IndicatorRow,
        OHLCVExt,
        Period,
        // Data
        PricePoint,
        PriceSeries,
        Ratio,
        Result,
        ScanConfig,
        ScanEngine,
        // Errors
        ScanError,
        SelectorConfig,
        SlopeMethod,
        SymbolDiagnostic,
        // Core traits
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors raised while validating configuration or a symbol's price series
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient history: need {need} bars, got {got}")]
    InsufficientHistory { need: usize, got: usize },

    #[error("Malformed series at index {index}: {reason}")]
    MalformedSeries { index: usize, reason: &'static str },
}

impl ScanError {
    /// Short machine-friendly tag, used in diagnostics output
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::InvalidValue(_) | ScanError::OutOfRange { .. } => "invalid_value",
            ScanError::InvalidConfig(_) => "invalid_config",
            ScanError::InsufficientHistory { .. } => "insufficient_history",
            ScanError::MalformedSeries { .. } => "malformed_series",
        }
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(ScanError::InvalidValue("Ratio cannot be NaN or infinite"));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(ScanError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(ScanError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core daily bar trait
pub trait OHLCV {
    fn date(&self) -> NaiveDate;
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    #[inline]
    fn true_range(&self, prev_close: f64) -> f64 {
        self.range()
            .max((self.high() - prev_close).abs())
            .max((self.low() - prev_close).abs())
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) {
            return Err(ScanError::MalformedSeries {
                index: 0,
                reason: "NaN in OHLC",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) {
            return Err(ScanError::MalformedSeries {
                index: 0,
                reason: "Infinite value in OHLC",
            });
        }
        if prices.iter().any(|p| *p <= 0.0) {
            return Err(ScanError::MalformedSeries {
                index: 0,
                reason: "non-positive price",
            });
        }
        if self.high() < self.low() {
            return Err(ScanError::MalformedSeries {
                index: 0,
                reason: "high < low",
            });
        }
        if self.volume().is_nan() || self.volume() < 0.0 {
            return Err(ScanError::MalformedSeries {
                index: 0,
                reason: "invalid volume",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// PRICE DATA
// ============================================================

/// One daily bar. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for PricePoint {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Per-symbol daily history, strictly increasing by date.
///
/// Non-trading days are simply absent; rolling windows count bars, not calendar days.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> Self {
        Self {
            symbol: symbol.into(),
            points,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// Check every bar and the date ordering.
    pub fn validate(&self) -> Result<()> {
        validate_bars(&self.points)
    }

    /// Fail with `InsufficientHistory` when fewer than `need` bars are present
    pub fn require(&self, need: usize) -> Result<()> {
        if self.len() < need {
            return Err(ScanError::InsufficientHistory {
                need,
                got: self.len(),
            });
        }
        Ok(())
    }
}

/// Validate bars and strict date monotonicity, reporting the offending index.
pub fn validate_bars<T: OHLCV>(bars: &[T]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            ScanError::MalformedSeries { reason, .. } => ScanError::MalformedSeries { index: i, reason },
            other => other,
        })?;
        if i > 0 && bars[i - 1].date() >= bar.date() {
            return Err(ScanError::MalformedSeries {
                index: i,
                reason: "dates not strictly increasing",
            });
        }
    }
    Ok(())
}

// ============================================================
// CONFIGURATION
// ============================================================

/// Parameters of the volatility, consolidation and breakdown/reclaim stages
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub atr_period: Period,
    pub consolidation_window: Period,
    /// (box_high - box_low) / close must stay below this
    pub consolidation_range_pct: Ratio,
    /// ATR / close must stay below this
    pub consolidation_atr_pct: Ratio,
    /// Breakdown margin below the prior box floor, in ATR multiples
    pub breakdown_k_atr: f64,
    /// Bars after the breakdown in which a reclaim may occur
    pub reclaim_max_lag: Period,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            atr_period: Period::new_const(14),
            consolidation_window: Period::new_const(20),
            consolidation_range_pct: Ratio::new_const(0.08),
            consolidation_atr_pct: Ratio::new_const(0.025),
            breakdown_k_atr: 0.5,
            reclaim_max_lag: Period::new_const(2),
        }
    }
}

impl DetectorConfig {
    /// Fewest bars for which a breakdown can be evaluated at all.
    ///
    /// ATR is first defined at index `atr_period`, the box at `window - 1`; the
    /// breakdown bar needs one consolidating bar before it.
    pub fn min_history(&self) -> usize {
        self.atr_period
            .get()
            .max(self.consolidation_window.get().saturating_sub(1))
            + 2
    }

    pub fn validate(&self) -> Result<()> {
        check_period("atr_period", self.atr_period)?;
        check_period("consolidation_window", self.consolidation_window)?;
        check_period("reclaim_max_lag", self.reclaim_max_lag)?;
        if self.consolidation_range_pct.get() <= 0.0 {
            return Err(ScanError::InvalidConfig(
                "consolidation_range_pct must be > 0".into(),
            ));
        }
        if self.consolidation_atr_pct.get() <= 0.0 {
            return Err(ScanError::InvalidConfig(
                "consolidation_atr_pct must be > 0".into(),
            ));
        }
        if !self.breakdown_k_atr.is_finite() || self.breakdown_k_atr < 0.0 {
            return Err(ScanError::InvalidConfig(format!(
                "breakdown_k_atr must be finite and >= 0, got {}",
                self.breakdown_k_atr
            )));
        }
        Ok(())
    }
}

/// How the distance-to-MA band (filter C4) is sized
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistanceBand {
    /// Constant band, in percent of the MA
    Fixed { max_pct: f64 },
    /// max(floor_pct, volatility% * volatility_multiplier)
    Dynamic {
        floor_pct: f64,
        volatility_multiplier: f64,
    },
}

impl Default for DistanceBand {
    fn default() -> Self {
        DistanceBand::Dynamic {
            floor_pct: 2.0,
            volatility_multiplier: 1.5,
        }
    }
}

impl DistanceBand {
    /// Allowed |close - MA| / MA, in percent, for a given close volatility (percent)
    pub fn max_pct(&self, volatility_pct: f64) -> f64 {
        match *self {
            DistanceBand::Fixed { max_pct } => max_pct,
            DistanceBand::Dynamic {
                floor_pct,
                volatility_multiplier,
            } => floor_pct.max(volatility_pct * volatility_multiplier),
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match *self {
            DistanceBand::Fixed { max_pct } => max_pct.is_finite() && max_pct >= 0.0,
            DistanceBand::Dynamic {
                floor_pct,
                volatility_multiplier,
            } => {
                floor_pct.is_finite()
                    && floor_pct >= 0.0
                    && volatility_multiplier.is_finite()
                    && volatility_multiplier >= 0.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(ScanError::InvalidConfig(format!(
                "distance band must be finite and non-negative: {self:?}"
            )))
        }
    }
}

/// Definition of the MA slope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeMethod {
    /// (MA_t - MA_{t-1}) / MA_{t-1} * 100
    #[default]
    PercentChange,
    /// (MA_t - MA_{t-d+1}) / (d - 1) with d = trend_days, in price units per bar
    PointsPerDay,
}

/// Parameters of the momentum screen and group reduction
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub ma_window: Period,
    /// Trailing bars for trend confirmation, volatility and the 5-day low
    pub trend_days: Period,
    pub group_capacity: Period,
    pub strong_slope_low: f64,
    /// Upper bound of Group-Strong, also the overheat cap
    pub strong_slope_high: f64,
    /// Optional lower bound for Group-Watch; `None` admits any slope below `strong_slope_low`
    pub watch_slope_floor: Option<f64>,
    /// Cap on stddev / mean of the trailing closes
    pub volatility_cap_pct: Ratio,
    pub distance_band: DistanceBand,
    pub slope_method: SlopeMethod,
    pub liquidity_days: Period,
    /// Minimum mean volume over `liquidity_days`
    pub min_avg_volume: Option<f64>,
    /// Minimum mean (high - low) over `liquidity_days`
    pub min_avg_range: Option<f64>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            ma_window: Period::new_const(20),
            trend_days: Period::new_const(5),
            group_capacity: Period::new_const(6),
            strong_slope_low: 0.5,
            strong_slope_high: 1.0,
            watch_slope_floor: None,
            volatility_cap_pct: Ratio::new_const(0.03),
            distance_band: DistanceBand::default(),
            slope_method: SlopeMethod::default(),
            liquidity_days: Period::new_const(10),
            min_avg_volume: None,
            min_avg_range: None,
        }
    }
}

impl SelectorConfig {
    /// Fewest bars for which every filter is defined on the last bar
    pub fn min_history(&self) -> usize {
        let trend = self.ma_window.get() + self.trend_days.get() - 1;
        if self.min_avg_volume.is_some() || self.min_avg_range.is_some() {
            trend.max(self.liquidity_days.get())
        } else {
            trend
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_period("ma_window", self.ma_window)?;
        check_period("group_capacity", self.group_capacity)?;
        check_period("liquidity_days", self.liquidity_days)?;
        if self.trend_days.get() < 2 {
            return Err(ScanError::InvalidConfig("trend_days must be >= 2".into()));
        }
        if !self.strong_slope_low.is_finite() || !self.strong_slope_high.is_finite() {
            return Err(ScanError::InvalidConfig("slope bounds must be finite".into()));
        }
        if self.strong_slope_low >= self.strong_slope_high {
            return Err(ScanError::InvalidConfig(format!(
                "strong_slope_low ({}) must be < strong_slope_high ({})",
                self.strong_slope_low, self.strong_slope_high
            )));
        }
        if let Some(floor) = self.watch_slope_floor {
            if !floor.is_finite() || floor >= self.strong_slope_low {
                return Err(ScanError::InvalidConfig(format!(
                    "watch_slope_floor ({floor}) must be finite and < strong_slope_low"
                )));
            }
        }
        if self.volatility_cap_pct.get() <= 0.0 {
            return Err(ScanError::InvalidConfig("volatility_cap_pct must be > 0".into()));
        }
        self.distance_band.validate()
    }
}

/// Full configuration surface, passed explicitly into every run
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub detector: DetectorConfig,
    pub selector: SelectorConfig,
}

impl ScanConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ScanConfig =
            serde_json::from_str(json).map_err(|e| ScanError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ScanError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.selector.validate()
    }

    /// Minimum lookback for a symbol to take part in both detection and selection
    pub fn min_history(&self) -> usize {
        self.detector.min_history().max(self.selector.min_history())
    }
}

fn check_period(field: &'static str, period: Period) -> Result<()> {
    if period.get() == 0 {
        return Err(ScanError::InvalidConfig(format!("{field} must be > 0")));
    }
    Ok(())
}

// ============================================================
// INDICATOR FRAME
// ============================================================

/// Indicator values for one bar; `None` means the trailing window is not yet full
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct IndicatorRow {
    pub date: NaiveDate,
    pub atr: Option<f64>,
    pub box_high: Option<f64>,
    pub box_low: Option<f64>,
    pub is_consolidating: Option<bool>,
    pub ma: Option<f64>,
    pub slope: Option<f64>,
}

/// Date-aligned indicator rows, one per input bar
pub type IndicatorFrame = Vec<IndicatorRow>;

/// Derive every trailing indicator for a bar sequence.
pub fn compute_frame<T: OHLCV>(bars: &[T], config: &ScanConfig) -> IndicatorFrame {
    let atr = VolatilityEstimator::from_config(&config.detector).estimate(bars);
    let consolidation = ConsolidationDetector::from_config(&config.detector).detect(bars, &atr);
    let selector = &config.selector;
    let ma = moving_average(bars, selector.ma_window.get());
    let slope = slope_series(&ma, selector.slope_method, selector.trend_days.get());

    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let bx = consolidation.boxes[i];
            IndicatorRow {
                date: bar.date(),
                atr: atr[i],
                box_high: bx.map(|b| b.high),
                box_low: bx.map(|b| b.low),
                is_consolidating: consolidation.flags[i],
                ma: ma[i],
                slope: slope[i],
            }
        })
        .collect()
}

// ============================================================
// SCAN ENGINE
// ============================================================

use detectors::*;

pub use detectors::{detect, detect_events, filter_events_by_date, select_candidates, summarize};

/// Why a symbol was left out of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolDiagnostic {
    pub symbol: String,
    pub error: ScanError,
}

/// Cooperative cancellation, checked between symbols
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Merged output of one batch pass
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// Reclaim events sorted by (reclaim_date, symbol)
    pub events: Vec<ReclaimEvent>,
    /// Per-symbol detection reports sorted by symbol
    pub reports: Vec<DetectionReport>,
    pub selection: Selection,
    /// Skipped symbols sorted by symbol
    pub diagnostics: Vec<SymbolDiagnostic>,
    /// Symbols never started because the run was cancelled
    pub not_run: Vec<String>,
    pub cancelled: bool,
}

impl BatchResult {
    /// Events whose reclaim happened on `date`
    pub fn events_on(&self, date: NaiveDate) -> Vec<ReclaimEvent> {
        filter_events_by_date(&self.events, date)
    }
}

enum SymbolOutcome {
    Done {
        report: DetectionReport,
        screening: Screening,
    },
    Skipped(SymbolDiagnostic),
    NotRun(String),
}

/// Main batch engine
#[derive(Debug, Clone)]
pub struct ScanEngine {
    config: ScanConfig,
    detector: BreakdownReclaimDetector,
    selector: MomentumSlopeSelector,
}

impl ScanEngine {
    pub fn new(config: ScanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            detector: BreakdownReclaimDetector::new(&config.detector),
            selector: MomentumSlopeSelector::new(config.selector.clone()),
            config,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn compute_frame<T: OHLCV>(&self, bars: &[T]) -> IndicatorFrame {
        compute_frame(bars, &self.config)
    }

    /// Run detection for one symbol
    pub fn detect(&self, series: &PriceSeries) -> Result<DetectionReport> {
        series.validate()?;
        series.require(self.config.detector.min_history())?;
        Ok(self.detector.scan(&series.symbol, &series.points))
    }

    pub fn detect_events(&self, series: &PriceSeries) -> Result<Vec<ReclaimEvent>> {
        self.detect(series).map(|report| report.reclaims)
    }

    pub fn select(&self, universe: &[PriceSeries]) -> Selection {
        self.selector.select(universe)
    }

    /// One batch pass: detection and selection for every symbol, in parallel.
    ///
    /// Per-symbol failures land in `diagnostics`; cancellation leaves completed
    /// symbols intact and lists the rest in `not_run`.
    pub fn run(&self, universe: &[PriceSeries], cancel: &CancelToken) -> BatchResult {
        self.run_with_progress(universe, cancel, |_| {})
    }

    /// Like [`run`](Self::run), calling `on_symbol` with each symbol once it
    /// has been processed (scanned or skipped), from the worker thread.
    pub fn run_with_progress<F>(&self, universe: &[PriceSeries], cancel: &CancelToken, on_symbol: F) -> BatchResult
    where
        F: Fn(&str) + Sync,
    {
        let need = self.config.min_history();
        let outcomes: Vec<SymbolOutcome> = universe
            .par_iter()
            .map(|series| {
                if cancel.is_cancelled() {
                    return SymbolOutcome::NotRun(series.symbol.clone());
                }
                let outcome = match self.scan_symbol(series, need) {
                    Ok((report, screening)) => SymbolOutcome::Done { report, screening },
                    Err(error) => SymbolOutcome::Skipped(SymbolDiagnostic {
                        symbol: series.symbol.clone(),
                        error,
                    }),
                };
                on_symbol(&series.symbol);
                outcome
            })
            .collect();

        let mut result = BatchResult::default();
        let mut candidates = Vec::new();

        for outcome in outcomes {
            match outcome {
                SymbolOutcome::Done { report, screening } => {
                    if let Screening::Eligible(candidate) = screening {
                        candidates.push(candidate);
                    }
                    result.reports.push(report);
                }
                SymbolOutcome::Skipped(diag) => {
                    warn!("skipping {}: {}", diag.symbol, diag.error);
                    result.diagnostics.push(diag);
                }
                SymbolOutcome::NotRun(symbol) => result.not_run.push(symbol),
            }
        }

        result.reports.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        result.diagnostics.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        result.not_run.sort();
        result.events = summarize(&result.reports);
        result.selection = self.selector.group(candidates);
        result.cancelled = !result.not_run.is_empty();

        if result.cancelled {
            warn!(
                "batch cancelled: {} of {} symbols not run",
                result.not_run.len(),
                universe.len()
            );
        }
        info!(
            "batch done: {} symbols, {} events, {} strong, {} watch, {} skipped",
            result.reports.len(),
            result.events.len(),
            result.selection.strong.members.len(),
            result.selection.watch.members.len(),
            result.diagnostics.len()
        );

        result
    }

    fn scan_symbol(&self, series: &PriceSeries, need: usize) -> Result<(DetectionReport, Screening)> {
        series.validate()?;
        series.require(need)?;
        let report = self.detector.scan(&series.symbol, &series.points);
        let screening = self.selector.screen(&series.symbol, &series.points)?;
        debug!(
            "{}: {} breakdowns, {} reclaims, screening {:?}",
            series.symbol,
            report.breakdowns.len(),
            report.reclaims.len(),
            screening.rejection()
        );
        Ok((report, screening))
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating ScanEngine instances
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: ScanConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn detector(mut self, detector: DetectorConfig) -> Self {
        self.config.detector = detector;
        self
    }

    pub fn selector(mut self, selector: SelectorConfig) -> Self {
        self.config.selector = selector;
        self
    }

    pub fn atr_period(mut self, period: usize) -> Self {
        self.config.detector.atr_period = Period::new_const(period);
        self
    }

    pub fn consolidation_window(mut self, window: usize) -> Self {
        self.config.detector.consolidation_window = Period::new_const(window);
        self
    }

    pub fn reclaim_max_lag(mut self, lag: usize) -> Self {
        self.config.detector.reclaim_max_lag = Period::new_const(lag);
        self
    }

    pub fn group_capacity(mut self, capacity: usize) -> Self {
        self.config.selector.group_capacity = Period::new_const(capacity);
        self
    }

    /// Build the engine, validating the configuration
    pub fn build(self) -> Result<ScanEngine> {
        ScanEngine::new(self.config)
    }
}

// ============================================================
// TESTS
// ============================================================
