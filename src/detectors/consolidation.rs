//! Tight-range (consolidation) classification.
//!
//! A bar is consolidating when the trailing box is narrow relative to the close
//! and ATR is low relative to the close. Both windows end at the bar itself.

use super::helpers::{rolling_max, rolling_min};
use crate::{DetectorConfig, Period, Ratio, OHLCV};

/// Rolling high/low bounds of the trailing window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsolidationBox {
    pub high: f64,
    pub low: f64,
}

impl ConsolidationBox {
    /// (high - low) / close
    #[inline]
    pub fn range_pct(&self, close: f64) -> f64 {
        (self.high - self.low) / close
    }
}

/// Per-bar box and consolidation flag, aligned with the input bars
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationSeries {
    /// `None` until `window` bars exist
    pub boxes: Vec<Option<ConsolidationBox>>,
    /// `None` when either the box or the ATR is undefined
    pub flags: Vec<Option<bool>>,
}

impl ConsolidationSeries {
    #[inline]
    pub fn is_consolidating(&self, index: usize) -> bool {
        matches!(self.flags.get(index), Some(Some(true)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsolidationDetector {
    pub window: Period,
    pub range_pct: Ratio,
    pub atr_pct: Ratio,
}

impl Default for ConsolidationDetector {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

impl ConsolidationDetector {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            window: config.consolidation_window,
            range_pct: config.consolidation_range_pct,
            atr_pct: config.consolidation_atr_pct,
        }
    }

    /// Trailing box per bar
    pub fn boxes<T: OHLCV>(&self, bars: &[T]) -> Vec<Option<ConsolidationBox>> {
        let window = self.window.get();
        let highs: Vec<f64> = bars.iter().map(|b| b.high()).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low()).collect();

        rolling_max(&highs, window)
            .into_iter()
            .zip(rolling_min(&lows, window))
            .map(|(high, low)| Some(ConsolidationBox { high: high?, low: low? }))
            .collect()
    }

    /// Classify every bar. `atr` must be aligned with `bars`.
    pub fn detect<T: OHLCV>(&self, bars: &[T], atr: &[Option<f64>]) -> ConsolidationSeries {
        let boxes = self.boxes(bars);
        let flags = bars
            .iter()
            .zip(&boxes)
            .enumerate()
            .map(|(i, (bar, bx))| {
                let bx = (*bx)?;
                let atr = atr.get(i).copied().flatten()?;
                let close = bar.close();
                Some(bx.range_pct(close) < self.range_pct.get() && atr / close < self.atr_pct.get())
            })
            .collect();

        ConsolidationSeries { boxes, flags }
    }
}
