//! Parameter metadata for the detector and selector configurations
//!
//! This module provides metadata about tunable parameters, enabling:
//! - Grid search sweeps over thresholds
//! - Parameter documentation
//! - Building a configuration from a flat key/value map
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use reclaim::params::ParameterizedConfig;
//! use reclaim::DetectorConfig;
//!
//! for param in DetectorConfig::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//!
//! let mut params = HashMap::new();
//! params.insert("reclaim_max_lag", 3.0);
//! let config = DetectorConfig::with_params(&params).unwrap();
//! assert_eq!(config.reclaim_max_lag.get(), 3);
//! ```

use std::collections::HashMap;

use crate::{DetectorConfig, Period, Ratio, Result, ScanError, SelectorConfig};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Fraction in 0.0..=1.0
  Ratio,
  /// Positive integer bar count
  Period,
  /// Unbounded real (ATR multiples, slope bounds)
  Real,
}

/// Metadata for a single configuration parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name, matching the config field
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Range for sweeps: (min, max, step)
  pub range: (f64, f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  pub const fn real(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Real, default, range, description }
  }

  /// Generate all values for grid search
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    let mut values = Vec::new();
    let mut v = min;
    while v <= max + f64::EPSILON {
      values.push(v);
      v += step;
    }
    values
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max, _) = self.range;
    if value < min || value > max {
      return Err(ScanError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Period if value < 1.0 || value.fract() != 0.0 => {
        Err(ScanError::InvalidValue("Period must be a positive integer"))
      },
      _ => Ok(()),
    }
  }
}

// ============================================================
// PARAMETERIZED CONFIG TRAIT
// ============================================================

/// Configurations that can be built from a flat parameter map
pub trait ParameterizedConfig: Sized {
  /// Returns metadata for all tunable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Creates a config from a HashMap.
  ///
  /// Missing parameters use their default values.
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;
}

const DETECTOR_PARAMS: &[ParamMeta] = &[
  ParamMeta::period("atr_period", 14.0, (5.0, 30.0, 1.0), "ATR averaging period"),
  ParamMeta::period("consolidation_window", 20.0, (10.0, 60.0, 5.0), "Trailing box window"),
  ParamMeta::ratio(
    "consolidation_range_pct",
    0.08,
    (0.02, 0.20, 0.01),
    "Max (box_high - box_low) / close",
  ),
  ParamMeta::ratio("consolidation_atr_pct", 0.025, (0.005, 0.06, 0.005), "Max ATR / close"),
  ParamMeta::real("breakdown_k_atr", 0.5, (0.0, 2.0, 0.25), "Breakdown margin in ATR multiples"),
  ParamMeta::period("reclaim_max_lag", 2.0, (1.0, 10.0, 1.0), "Bars allowed for the reclaim"),
];

const SELECTOR_PARAMS: &[ParamMeta] = &[
  ParamMeta::period("ma_window", 20.0, (5.0, 60.0, 5.0), "Moving average window"),
  ParamMeta::period("trend_days", 5.0, (2.0, 10.0, 1.0), "Trailing bars for C1 and C3"),
  ParamMeta::period("group_capacity", 6.0, (1.0, 30.0, 1.0), "Max members per group"),
  ParamMeta::real("strong_slope_low", 0.5, (0.0, 2.0, 0.1), "Group-Strong lower slope bound"),
  ParamMeta::real("strong_slope_high", 1.0, (0.1, 5.0, 0.1), "Overheat cap on slope"),
  ParamMeta::ratio("volatility_cap_pct", 0.03, (0.005, 0.10, 0.005), "Max stddev / mean of closes"),
];

impl ParameterizedConfig for DetectorConfig {
  fn param_meta() -> &'static [ParamMeta] {
    DETECTOR_PARAMS
  }

  fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
    check_supplied(DETECTOR_PARAMS, params)?;
    let d = DetectorConfig::default();
    let config = DetectorConfig {
      atr_period: get_period(params, "atr_period", d.atr_period.get())?,
      consolidation_window: get_period(params, "consolidation_window", d.consolidation_window.get())?,
      consolidation_range_pct: get_ratio(
        params,
        "consolidation_range_pct",
        d.consolidation_range_pct.get(),
      )?,
      consolidation_atr_pct: get_ratio(params, "consolidation_atr_pct", d.consolidation_atr_pct.get())?,
      breakdown_k_atr: get_f64(params, "breakdown_k_atr", d.breakdown_k_atr),
      reclaim_max_lag: get_period(params, "reclaim_max_lag", d.reclaim_max_lag.get())?,
    };
    config.validate()?;
    Ok(config)
  }
}

impl ParameterizedConfig for SelectorConfig {
  fn param_meta() -> &'static [ParamMeta] {
    SELECTOR_PARAMS
  }

  fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
    check_supplied(SELECTOR_PARAMS, params)?;
    let d = SelectorConfig::default();
    let config = SelectorConfig {
      ma_window: get_period(params, "ma_window", d.ma_window.get())?,
      trend_days: get_period(params, "trend_days", d.trend_days.get())?,
      group_capacity: get_period(params, "group_capacity", d.group_capacity.get())?,
      strong_slope_low: get_f64(params, "strong_slope_low", d.strong_slope_low),
      strong_slope_high: get_f64(params, "strong_slope_high", d.strong_slope_high),
      volatility_cap_pct: get_ratio(params, "volatility_cap_pct", d.volatility_cap_pct.get())?,
      ..d
    };
    config.validate()?;
    Ok(config)
  }
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Helper to get a Ratio from params with default fallback
pub fn get_ratio(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Ratio> {
  let value = params.get(key).copied().unwrap_or(default);
  Ratio::new(value)
}

/// Helper to get a Period from params with default fallback.
///
/// Fractional values are rejected rather than truncated.
pub fn get_period(params: &HashMap<&str, f64>, key: &str, default: usize) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  if !value.is_finite() || value < 1.0 || value.fract() != 0.0 {
    return Err(ScanError::InvalidValue("Period must be a positive integer"));
  }
  Period::new(value as usize)
}

/// Check every supplied value that has metadata against its range and type
fn check_supplied(meta: &[ParamMeta], params: &HashMap<&str, f64>) -> Result<()> {
  meta
    .iter()
    .filter_map(|m| params.get(m.name).map(|v| (m, *v)))
    .try_for_each(|(m, value)| m.validate(value))
}

/// Helper to get a raw value from params with default fallback
pub fn get_f64(params: &HashMap<&str, f64>, key: &str, default: f64) -> f64 {
  params.get(key).copied().unwrap_or(default)
}

// ============================================================
// TESTS
// ============================================================
