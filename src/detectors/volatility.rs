//! True range and Average True Range.

use super::helpers::rolling_mean_opt;
use crate::{DetectorConfig, OHLCVExt, Period, OHLCV};

/// True range per bar. The first bar has no previous close and yields `None`.
pub fn true_ranges<T: OHLCV>(bars: &[T]) -> Vec<Option<f64>> {
    std::iter::once(None)
        .chain(bars.windows(2).map(|w| Some(w[1].true_range(w[0].close()))))
        .take(bars.len())
        .collect()
}

/// Rolling ATR with simple averaging
#[derive(Debug, Clone, Copy)]
pub struct VolatilityEstimator {
    pub period: Period,
}

impl Default for VolatilityEstimator {
    fn default() -> Self {
        Self {
            period: Period::new_const(14),
        }
    }
}

impl VolatilityEstimator {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            period: config.atr_period,
        }
    }

    /// ATR per bar. The first `period` bars have no value: the first true
    /// range needs a previous close, and the mean needs `period` of them.
    pub fn estimate<T: OHLCV>(&self, bars: &[T]) -> Vec<Option<f64>> {
        rolling_mean_opt(&true_ranges(bars), self.period.get())
    }
}
