//! Breakdown→reclaim state machine
//!
//! Per symbol, bars are consumed strictly in date order:
//!
//! - **Idle** / **Consolidating** follow the consolidation flag of the last bar.
//! - From **Consolidating** (bar `t - 1`), bar `t` breaks down when
//!   `low_t < box_low_{t-1} - k * ATR_t`. The floor is frozen at that moment.
//! - **Pending** looks at the next `max_lag` bars for the first close above the
//!   frozen floor. A hit emits a [`ReclaimEvent`]; otherwise the breakdown expires.
//!   Either way the detector drops back to **Idle**, so the earliest next
//!   breakdown is two bars after the resolving one.
//!
//! Only one breakdown can be pending at a time, and nothing after bar `t` ever
//! feeds into the decision taken at `t`.

use chrono::NaiveDate;
use log::debug;

use super::consolidation::{ConsolidationDetector, ConsolidationSeries};
use super::volatility::VolatilityEstimator;
use crate::{DetectorConfig, Period, PriceSeries, Result, OHLCV};

/// Bar that pierced the consolidation floor
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BreakdownEvent {
    pub symbol: String,
    pub breakdown_date: NaiveDate,
    /// Box low as of the bar before the breakdown
    pub box_low_ref: f64,
    pub low_at_breakdown: f64,
    pub atr_at_breakdown: f64,
    /// box_low_ref - k * atr_at_breakdown
    pub threshold: f64,
}

/// Close back above the frozen floor within the lag window
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReclaimEvent {
    pub symbol: String,
    pub breakdown_date: NaiveDate,
    pub reclaim_date: NaiveDate,
    /// Bars between breakdown and reclaim, in 1..=max_lag
    pub lag: usize,
    pub close_at_reclaim: f64,
    pub box_low_ref: f64,
    pub low_at_breakdown: f64,
    /// (close_at_reclaim - box_low_ref) / box_low_ref * 100
    pub reclaim_pct: f64,
}

impl ReclaimEvent {
    fn from_breakdown(breakdown: &BreakdownEvent, reclaim_date: NaiveDate, close: f64, lag: usize) -> Self {
        Self {
            symbol: breakdown.symbol.clone(),
            breakdown_date: breakdown.breakdown_date,
            reclaim_date,
            lag,
            close_at_reclaim: close,
            box_low_ref: breakdown.box_low_ref,
            low_at_breakdown: breakdown.low_at_breakdown,
            reclaim_pct: reclaim_pct(close, breakdown.box_low_ref),
        }
    }
}

/// Percentage by which `close` sits above `box_low_ref`
#[inline]
pub fn reclaim_pct(close: f64, box_low_ref: f64) -> f64 {
    (close - box_low_ref) / box_low_ref * 100.0
}

/// Detector state between bars
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorState {
    Idle,
    Consolidating,
    BreakdownPending { index: usize, breakdown: BreakdownEvent },
}

impl DetectorState {
    #[inline]
    fn settle(consolidating: bool) -> Self {
        if consolidating {
            DetectorState::Consolidating
        } else {
            DetectorState::Idle
        }
    }
}

/// Everything the state machine produced for one symbol
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DetectionReport {
    pub symbol: String,
    /// Every breakdown, in date order
    pub breakdowns: Vec<BreakdownEvent>,
    /// Reclaims, in date order; at most one per breakdown
    pub reclaims: Vec<ReclaimEvent>,
    /// Breakdowns whose lag window closed without a reclaim
    pub expired: Vec<BreakdownEvent>,
    /// Breakdown still inside its lag window when the series ended
    pub pending: Option<BreakdownEvent>,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakdownReclaimDetector {
    pub volatility: VolatilityEstimator,
    pub consolidation: ConsolidationDetector,
    pub k_atr: f64,
    pub max_lag: Period,
}

impl Default for BreakdownReclaimDetector {
    fn default() -> Self {
        Self::new(&DetectorConfig::default())
    }
}

impl BreakdownReclaimDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            volatility: VolatilityEstimator::from_config(config),
            consolidation: ConsolidationDetector::from_config(config),
            k_atr: config.breakdown_k_atr,
            max_lag: config.reclaim_max_lag,
        }
    }

    /// Compute indicators and run the state machine over `bars`
    pub fn scan<T: OHLCV>(&self, symbol: &str, bars: &[T]) -> DetectionReport {
        let atr = self.volatility.estimate(bars);
        let consolidation = self.consolidation.detect(bars, &atr);
        self.run(symbol, bars, &atr, &consolidation)
    }

    /// Run the state machine over precomputed indicators aligned with `bars`.
    pub fn run<T: OHLCV>(
        &self,
        symbol: &str,
        bars: &[T],
        atr: &[Option<f64>],
        consolidation: &ConsolidationSeries,
    ) -> DetectionReport {
        let mut report = DetectionReport {
            symbol: symbol.to_string(),
            ..Default::default()
        };
        let max_lag = self.max_lag.get();
        let mut state = DetectorState::Idle;

        for (t, bar) in bars.iter().enumerate() {
            let consolidating = consolidation.is_consolidating(t);

            state = match state {
                DetectorState::BreakdownPending { index, breakdown } => {
                    let lag = t - index;
                    if bar.close() > breakdown.box_low_ref {
                        let reclaim = ReclaimEvent::from_breakdown(&breakdown, bar.date(), bar.close(), lag);
                        debug!(
                            "{symbol}: reclaim on {} (lag {lag}, {:.3}%)",
                            reclaim.reclaim_date, reclaim.reclaim_pct
                        );
                        report.reclaims.push(reclaim);
                        DetectorState::Idle
                    } else if lag >= max_lag {
                        debug!("{symbol}: breakdown on {} expired", breakdown.breakdown_date);
                        report.expired.push(breakdown);
                        DetectorState::Idle
                    } else {
                        DetectorState::BreakdownPending { index, breakdown }
                    }
                }
                DetectorState::Consolidating => match self.breakdown_at(symbol, bars, t, atr, consolidation) {
                    Some(breakdown) => {
                        debug!(
                            "{symbol}: breakdown on {} below {:.4}",
                            breakdown.breakdown_date, breakdown.box_low_ref
                        );
                        report.breakdowns.push(breakdown.clone());
                        DetectorState::BreakdownPending { index: t, breakdown }
                    }
                    None => DetectorState::settle(consolidating),
                },
                DetectorState::Idle => DetectorState::settle(consolidating),
            };
        }

        if let DetectorState::BreakdownPending { breakdown, .. } = state {
            report.pending = Some(breakdown);
        }

        report
    }

    /// Breakdown test for bar `t`, using the box as of `t - 1` and the ATR at `t`.
    fn breakdown_at<T: OHLCV>(
        &self,
        symbol: &str,
        bars: &[T],
        t: usize,
        atr: &[Option<f64>],
        consolidation: &ConsolidationSeries,
    ) -> Option<BreakdownEvent> {
        let prev = t.checked_sub(1)?;
        let box_low_ref = consolidation.boxes.get(prev).copied().flatten()?.low;
        let atr_t = atr.get(t).copied().flatten()?;
        let threshold = box_low_ref - self.k_atr * atr_t;
        let bar = &bars[t];

        (bar.low() < threshold).then(|| BreakdownEvent {
            symbol: symbol.to_string(),
            breakdown_date: bar.date(),
            box_low_ref,
            low_at_breakdown: bar.low(),
            atr_at_breakdown: atr_t,
            threshold,
        })
    }
}

/// Validate `series` and run detection with `config`
pub fn detect(series: &PriceSeries, config: &DetectorConfig) -> Result<DetectionReport> {
    config.validate()?;
    series.validate()?;
    series.require(config.min_history())?;
    Ok(BreakdownReclaimDetector::new(config).scan(&series.symbol, &series.points))
}

/// Reclaim events for one symbol, in reclaim-date order
pub fn detect_events(series: &PriceSeries, config: &DetectorConfig) -> Result<Vec<ReclaimEvent>> {
    detect(series, config).map(|report| report.reclaims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::ConsolidationBox;
    use crate::PricePoint;

    fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64)
    }

    fn bar(i: usize, low: f64, close: f64) -> PricePoint {
        PricePoint::new(day(i), close, close.max(low) + 1.0, low, close, 1000.0)
    }

    /// Indicators fixed by hand: consolidating on `consolidating` bars, box low
    /// `box_low` everywhere, ATR `atr` everywhere.
    fn indicators(n: usize, consolidating: std::ops::Range<usize>, box_low: f64, atr: f64) -> (Vec<Option<f64>>, ConsolidationSeries) {
        let boxes = vec![
            Some(ConsolidationBox {
                high: box_low + 5.0,
                low: box_low
            });
            n
        ];
        let flags = (0..n).map(|i| Some(consolidating.contains(&i))).collect();
        (vec![Some(atr); n], ConsolidationSeries { boxes, flags })
    }

    #[test]
    fn test_breakdown_then_reclaim_next_bar() {
        // consolidating on days 1..=19, box low 100, ATR 2 -> threshold 99
        let mut bars: Vec<_> = (0..22).map(|i| bar(i, 100.5, 101.0)).collect();
        bars[20] = bar(20, 98.0, 99.5);
        bars[21] = bar(21, 99.0, 101.0);
        let (atr, cons) = indicators(22, 1..20, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("2330", &bars, &atr, &cons);

        assert_eq!(report.breakdowns.len(), 1);
        let bd = &report.breakdowns[0];
        assert_eq!(bd.breakdown_date, day(20));
        assert_eq!(bd.box_low_ref, 100.0);
        assert_eq!(bd.threshold, 99.0);

        assert_eq!(report.reclaims.len(), 1);
        let rc = &report.reclaims[0];
        assert_eq!(rc.breakdown_date, day(20));
        assert_eq!(rc.reclaim_date, day(21));
        assert_eq!(rc.lag, 1);
        assert!((rc.reclaim_pct - 1.0).abs() < 1e-12);
        assert!(report.expired.is_empty());
        assert!(report.pending.is_none());
    }

    #[test]
    fn test_low_above_threshold_is_not_breakdown() {
        let mut bars: Vec<_> = (0..22).map(|i| bar(i, 100.5, 101.0)).collect();
        // 99.5 is below the box low but not below 100 - 0.5 * 2
        bars[20] = bar(20, 99.5, 99.8);
        let (atr, cons) = indicators(22, 1..20, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        assert!(report.breakdowns.is_empty());
    }

    #[test]
    fn test_breakdown_requires_prior_bar_consolidating() {
        let mut bars: Vec<_> = (0..22).map(|i| bar(i, 100.5, 101.0)).collect();
        bars[20] = bar(20, 98.0, 99.5);
        // consolidation ends at bar 18, bar 19 is not consolidating
        let (atr, cons) = indicators(22, 1..19, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        assert!(report.breakdowns.is_empty());
    }

    #[test]
    fn test_reclaim_on_second_bar() {
        let mut bars: Vec<_> = (0..23).map(|i| bar(i, 100.5, 101.0)).collect();
        bars[20] = bar(20, 98.0, 99.0);
        bars[21] = bar(21, 98.5, 100.0); // equal to the floor is not a reclaim
        bars[22] = bar(22, 99.0, 102.0);
        let (atr, cons) = indicators(23, 1..20, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        assert_eq!(report.reclaims.len(), 1);
        assert_eq!(report.reclaims[0].lag, 2);
        assert_eq!(report.reclaims[0].reclaim_date, day(22));
        assert_eq!(report.reclaims[0].close_at_reclaim, 102.0);
    }

    #[test]
    fn test_breakdown_expires_without_reclaim() {
        let mut bars: Vec<_> = (0..25).map(|i| bar(i, 100.5, 101.0)).collect();
        bars[20] = bar(20, 98.0, 99.0);
        bars[21] = bar(21, 97.0, 98.0);
        bars[22] = bar(22, 96.0, 97.0);
        // recovery after the lag window does not count
        bars[23] = bar(23, 99.0, 105.0);
        let (atr, cons) = indicators(25, 1..20, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        assert_eq!(report.breakdowns.len(), 1);
        assert!(report.reclaims.is_empty());
        assert_eq!(report.expired.len(), 1);
        assert_eq!(report.expired[0].breakdown_date, day(20));
    }

    #[test]
    fn test_first_match_not_best_match() {
        let mut bars: Vec<_> = (0..23).map(|i| bar(i, 100.5, 101.0)).collect();
        bars[20] = bar(20, 98.0, 99.0);
        bars[21] = bar(21, 99.0, 100.2);
        bars[22] = bar(22, 100.0, 110.0);
        let (atr, cons) = indicators(23, 1..20, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        assert_eq!(report.reclaims.len(), 1);
        assert_eq!(report.reclaims[0].lag, 1);
        assert_eq!(report.reclaims[0].close_at_reclaim, 100.2);
    }

    #[test]
    fn test_no_new_breakdown_while_pending() {
        let mut bars: Vec<_> = (0..24).map(|i| bar(i, 100.5, 101.0)).collect();
        bars[20] = bar(20, 98.0, 99.0);
        bars[21] = bar(21, 95.0, 96.0);
        // consolidating throughout: bar 21 would qualify on its own
        let (atr, cons) = indicators(24, 1..24, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        assert_eq!(report.breakdowns[0].breakdown_date, day(20));
        assert!(report.breakdowns.iter().all(|b| b.breakdown_date != day(21)));
        assert_eq!(report.reclaims.len(), 1);
        assert_eq!(report.reclaims[0].reclaim_date, day(22));
    }

    #[test]
    fn test_pending_at_end_of_series() {
        let mut bars: Vec<_> = (0..21).map(|i| bar(i, 100.5, 101.0)).collect();
        bars[20] = bar(20, 98.0, 99.0);
        let (atr, cons) = indicators(21, 1..20, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        assert!(report.reclaims.is_empty());
        assert!(report.expired.is_empty());
        assert_eq!(report.pending.as_ref().map(|b| b.breakdown_date), Some(day(20)));
    }

    #[test]
    fn test_reclaim_pct_worked_values() {
        // box_low_ref 367, ATR 10: threshold 362, low 360 breaks, close 378 reclaims
        let mut bars: Vec<_> = (0..5).map(|i| bar(i, 368.0, 370.0)).collect();
        bars[3] = bar(3, 360.0, 365.0);
        bars[4] = bar(4, 366.0, 378.0);
        let (atr, cons) = indicators(5, 0..3, 367.0, 10.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        assert_eq!(report.breakdowns[0].threshold, 362.0);
        let rc = &report.reclaims[0];
        assert_eq!(rc.lag, 1);
        assert!((rc.reclaim_pct - 2.997_275_204_359_673).abs() < 1e-9);
        assert_eq!(rc.reclaim_pct, reclaim_pct(378.0, 367.0));
    }

    #[test]
    fn test_re_eligible_after_reclaim() {
        let mut bars: Vec<_> = (0..40).map(|i| bar(i, 100.5, 101.0)).collect();
        bars[20] = bar(20, 98.0, 99.0);
        bars[21] = bar(21, 99.0, 101.0);
        bars[30] = bar(30, 97.0, 99.0);
        bars[31] = bar(31, 98.0, 99.5);
        bars[32] = bar(32, 98.0, 99.5);
        let (atr, cons) = indicators(40, 1..40, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        let dates: Vec<_> = report.breakdowns.iter().map(|b| b.breakdown_date).collect();
        assert_eq!(dates, vec![day(20), day(30)]);
        assert_eq!(report.reclaims.len(), 1);
        assert_eq!(report.expired.len(), 1);
        assert_eq!(report.expired[0].breakdown_date, day(30));
    }

    #[test]
    fn test_idle_on_bar_after_expiry() {
        let mut bars: Vec<_> = (0..27).map(|i| bar(i, 100.5, 101.0)).collect();
        bars[20] = bar(20, 98.0, 99.0);
        bars[21] = bar(21, 98.5, 99.5);
        bars[22] = bar(22, 98.5, 99.5);
        // expired on 22: 23 only brings the detector back to Consolidating
        bars[23] = bar(23, 97.0, 99.0);
        bars[24] = bar(24, 97.0, 99.0);
        let (atr, cons) = indicators(27, 1..27, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        let dates: Vec<_> = report.breakdowns.iter().map(|b| b.breakdown_date).collect();
        assert_eq!(dates, vec![day(20), day(24)]);
        assert_eq!(report.expired[0].breakdown_date, day(20));
        assert_eq!(report.reclaims.len(), 1);
        assert_eq!(report.reclaims[0].breakdown_date, day(24));
        assert_eq!(report.reclaims[0].reclaim_date, day(25));
    }

    #[test]
    fn test_idle_on_bar_after_reclaim() {
        let mut bars: Vec<_> = (0..26).map(|i| bar(i, 100.5, 101.0)).collect();
        bars[20] = bar(20, 98.0, 99.0);
        bars[21] = bar(21, 99.0, 101.0);
        bars[22] = bar(22, 97.0, 99.0);
        bars[23] = bar(23, 97.0, 99.0);
        let (atr, cons) = indicators(26, 1..26, 100.0, 2.0);

        let report = BreakdownReclaimDetector::default().run("X", &bars, &atr, &cons);
        let dates: Vec<_> = report.breakdowns.iter().map(|b| b.breakdown_date).collect();
        assert_eq!(dates, vec![day(20), day(23)]);
        assert_eq!(report.reclaims.len(), 2);
        assert_eq!(report.reclaims[1].reclaim_date, day(24));
    }

    #[test]
    fn test_detect_rejects_short_series() {
        let points: Vec<_> = (0..10).map(|i| bar(i, 100.5, 101.0)).collect();
        let series = PriceSeries::new("X", points);
        let err = detect(&series, &DetectorConfig::default()).unwrap_err();
        assert!(matches!(err, crate::ScanError::InsufficientHistory { need: 21, got: 10 }));
    }
}
