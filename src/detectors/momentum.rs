//! Momentum slope screen
//!
//! For the last bar of each series:
//!
//! - **C1** every one of the last `trend_days` bars opens and closes above its MA
//! - **C2** slope stays below `strong_slope_high`
//! - **C3** stddev / mean of the last `trend_days` closes stays below `volatility_cap_pct`
//! - **C4** |close - MA| / MA stays inside the [`DistanceBand`](crate::DistanceBand)
//!
//! Survivors split into Group-Strong (`[strong_slope_low, strong_slope_high)`) and
//! Group-Watch (below `strong_slope_low`, above the optional floor). Groups that
//! overflow their capacity are cut by [`reduce_group`].

use std::cmp::Ordering;

use chrono::NaiveDate;
use log::debug;
use rayon::prelude::*;

use super::helpers::{mean, rolling_mean, sample_std};
use crate::{OHLCVExt, PriceSeries, Result, ScanError, SelectorConfig, SlopeMethod, SymbolDiagnostic, OHLCV};

/// Simple moving average of the close
pub fn moving_average<T: OHLCV>(bars: &[T], window: usize) -> Vec<Option<f64>> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close()).collect();
    rolling_mean(&closes, window)
}

/// Slope of the MA at bar `t`, reading MA values at or before `t` only
pub fn slope_at(ma: &[Option<f64>], t: usize, method: SlopeMethod, trend_days: usize) -> Option<f64> {
    match method {
        SlopeMethod::PercentChange => {
            let now = (*ma.get(t)?)?;
            let prev = (*ma.get(t.checked_sub(1)?)?)?;
            (prev != 0.0).then(|| (now - prev) / prev * 100.0)
        }
        SlopeMethod::PointsPerDay => {
            let span = trend_days.checked_sub(1).filter(|s| *s > 0)?;
            let now = (*ma.get(t)?)?;
            let then = (*ma.get(t.checked_sub(span)?)?)?;
            Some((now - then) / span as f64)
        }
    }
}

/// Slope per bar
pub fn slope_series(ma: &[Option<f64>], method: SlopeMethod, trend_days: usize) -> Vec<Option<f64>> {
    (0..ma.len()).map(|t| slope_at(ma, t, method, trend_days)).collect()
}

// ============================================================
// TYPES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum GroupKind {
    Strong,
    Watch,
}

impl GroupKind {
    pub fn label(self) -> &'static str {
        match self {
            GroupKind::Strong => "Group-Strong",
            GroupKind::Watch => "Group-Watch",
        }
    }
}

/// Filter that rejected a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Rejection {
    Illiquid,
    NarrowRange,
    TrendNotConfirmed,
    Overheated,
    TooVolatile,
    TooFarFromMa,
    BelowWatchFloor,
}

/// Symbol that passed every filter, annotated for ranking
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Candidate {
    pub symbol: String,
    pub date: NaiveDate,
    pub close: f64,
    pub ma: f64,
    pub slope: f64,
    /// stddev / mean of the trailing closes
    pub volatility: f64,
    /// |close - MA|
    pub ma_distance: f64,
    /// |close - MA| / MA * 100
    pub ma_distance_pct: f64,
    pub max_distance_pct: f64,
    /// Lowest close of the trailing `trend_days` bars
    pub min_close_5d: f64,
    /// Latest close is the trailing minimum
    pub closing_at_low: bool,
    pub avg_volume: Option<f64>,
    pub group: GroupKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Screening {
    Eligible(Candidate),
    Rejected(Rejection),
}

impl Screening {
    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            Screening::Eligible(c) => Some(c),
            Screening::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Screening::Eligible(_) => None,
            Screening::Rejected(r) => Some(*r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SelectionGroup {
    pub kind: GroupKind,
    pub label: String,
    /// Inclusive lower slope bound, `None` when unbounded
    pub slope_floor: Option<f64>,
    /// Exclusive upper slope bound
    pub slope_ceiling: f64,
    /// Ordered by ascending MA distance, then symbol
    pub members: Vec<Candidate>,
}

impl SelectionGroup {
    pub fn new(kind: GroupKind, config: &SelectorConfig, members: Vec<Candidate>) -> Self {
        let (slope_floor, slope_ceiling) = match kind {
            GroupKind::Strong => (Some(config.strong_slope_low), config.strong_slope_high),
            GroupKind::Watch => (config.watch_slope_floor, config.strong_slope_low),
        };
        Self {
            kind,
            label: kind.label().to_string(),
            slope_floor,
            slope_ceiling,
            members,
        }
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.members.iter().map(|c| c.symbol.as_str()).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub strong: SelectionGroup,
    pub watch: SelectionGroup,
    /// Symbols that could not be screened
    pub diagnostics: Vec<SymbolDiagnostic>,
}

impl Default for Selection {
    fn default() -> Self {
        let config = SelectorConfig::default();
        Self {
            strong: SelectionGroup::new(GroupKind::Strong, &config, Vec::new()),
            watch: SelectionGroup::new(GroupKind::Watch, &config, Vec::new()),
            diagnostics: Vec::new(),
        }
    }
}

// ============================================================
// SELECTOR
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct MomentumSlopeSelector {
    pub config: SelectorConfig,
}

impl MomentumSlopeSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Group for a slope that already passed the overheat guard
    pub fn classify(&self, slope: f64) -> Option<GroupKind> {
        let cfg = &self.config;
        if slope >= cfg.strong_slope_high {
            None
        } else if slope >= cfg.strong_slope_low {
            Some(GroupKind::Strong)
        } else if cfg.watch_slope_floor.map_or(true, |floor| slope >= floor) {
            Some(GroupKind::Watch)
        } else {
            None
        }
    }

    /// Run every filter against the last bar of `bars`.
    pub fn screen<T: OHLCV>(&self, symbol: &str, bars: &[T]) -> Result<Screening> {
        let cfg = &self.config;
        let need = cfg.min_history();
        let n = bars.len();
        if n < need {
            return Err(ScanError::InsufficientHistory { need, got: n });
        }

        let avg_volume = (n >= cfg.liquidity_days.get()).then(|| {
            let recent = &bars[n - cfg.liquidity_days.get()..];
            recent.iter().map(|b| b.volume()).sum::<f64>() / recent.len() as f64
        });
        if let Some(min_volume) = cfg.min_avg_volume {
            if avg_volume.map_or(true, |v| v < min_volume) {
                return Ok(Screening::Rejected(Rejection::Illiquid));
            }
        }
        if let Some(min_range) = cfg.min_avg_range {
            let recent = &bars[n - cfg.liquidity_days.get()..];
            let avg_range = recent.iter().map(|b| b.range()).sum::<f64>() / recent.len() as f64;
            if avg_range <= min_range {
                return Ok(Screening::Rejected(Rejection::NarrowRange));
            }
        }

        let days = cfg.trend_days.get();
        let ma = moving_average(bars, cfg.ma_window.get());
        let recent = &bars[n - days..];
        let recent_ma: Vec<f64> = ma[n - days..]
            .iter()
            .copied()
            .collect::<Option<_>>()
            .ok_or(ScanError::InsufficientHistory { need, got: n })?;

        // C1
        let above = recent
            .iter()
            .zip(&recent_ma)
            .all(|(bar, ma)| bar.open() > *ma && bar.close() > *ma);
        if !above {
            return Ok(Screening::Rejected(Rejection::TrendNotConfirmed));
        }

        // C2
        let slope = slope_at(&ma, n - 1, cfg.slope_method, days)
            .ok_or(ScanError::InsufficientHistory { need, got: n })?;
        if slope >= cfg.strong_slope_high {
            return Ok(Screening::Rejected(Rejection::Overheated));
        }

        // C3
        let closes: Vec<f64> = recent.iter().map(|b| b.close()).collect();
        let volatility = match (sample_std(&closes), mean(&closes)) {
            (Some(sd), Some(m)) if m > 0.0 => sd / m,
            _ => f64::INFINITY,
        };
        if volatility >= cfg.volatility_cap_pct.get() {
            return Ok(Screening::Rejected(Rejection::TooVolatile));
        }

        // C4
        let last = &bars[n - 1];
        let ma_t = recent_ma[days - 1];
        let ma_distance = (last.close() - ma_t).abs();
        let ma_distance_pct = ma_distance / ma_t * 100.0;
        let max_distance_pct = cfg.distance_band.max_pct(volatility * 100.0);
        if ma_distance_pct > max_distance_pct {
            return Ok(Screening::Rejected(Rejection::TooFarFromMa));
        }

        let Some(group) = self.classify(slope) else {
            return Ok(Screening::Rejected(Rejection::BelowWatchFloor));
        };

        let min_close_5d = closes.iter().copied().fold(f64::INFINITY, f64::min);

        Ok(Screening::Eligible(Candidate {
            symbol: symbol.to_string(),
            date: last.date(),
            close: last.close(),
            ma: ma_t,
            slope,
            volatility,
            ma_distance,
            ma_distance_pct,
            max_distance_pct,
            min_close_5d,
            closing_at_low: last.close() <= min_close_5d,
            avg_volume,
            group,
        }))
    }

    /// Partition eligible candidates and cut each group down to capacity
    pub fn group(&self, candidates: Vec<Candidate>) -> Selection {
        let capacity = self.config.group_capacity.get();
        let (strong, watch): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| c.group == GroupKind::Strong);

        if strong.len() > capacity || watch.len() > capacity {
            debug!(
                "reducing groups to {capacity}: strong {}, watch {}",
                strong.len(),
                watch.len()
            );
        }

        Selection {
            strong: SelectionGroup::new(GroupKind::Strong, &self.config, reduce_group(strong, capacity)),
            watch: SelectionGroup::new(GroupKind::Watch, &self.config, reduce_group(watch, capacity)),
            diagnostics: Vec::new(),
        }
    }

    /// Screen every series in parallel and group the survivors
    pub fn select(&self, universe: &[PriceSeries]) -> Selection {
        let outcomes: Vec<std::result::Result<Screening, SymbolDiagnostic>> = universe
            .par_iter()
            .map(|series| {
                series
                    .validate()
                    .and_then(|_| self.screen(&series.symbol, &series.points))
                    .map_err(|error| SymbolDiagnostic {
                        symbol: series.symbol.clone(),
                        error,
                    })
            })
            .collect();

        let mut candidates = Vec::new();
        let mut diagnostics = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(Screening::Eligible(c)) => candidates.push(c),
                Ok(Screening::Rejected(_)) => {}
                Err(diag) => diagnostics.push(diag),
            }
        }
        diagnostics.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut selection = self.group(candidates);
        selection.diagnostics = diagnostics;
        selection
    }
}

/// Validate `config` and select from `universe`
pub fn select_candidates(universe: &[PriceSeries], config: &SelectorConfig) -> Result<Selection> {
    config.validate()?;
    Ok(MomentumSlopeSelector::new(config.clone()).select(universe))
}

// ============================================================
// CAPACITY REDUCTION
// ============================================================

/// Ascending MA distance; the smaller symbol wins exact ties
pub fn distance_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.ma_distance
        .total_cmp(&b.ma_distance)
        .then_with(|| a.symbol.cmp(&b.symbol))
}

/// Cut a group down to `capacity` members.
///
/// 1. Members closing at their trailing low are dropped first, lowest trailing
///    minimum close first, until the group fits or none are left.
/// 2. The rest is ranked by [`distance_order`] and truncated.
///
/// On exact ties the lexicographically smaller symbol is kept. The output is
/// always in [`distance_order`], so reducing twice changes nothing.
pub fn reduce_group(mut members: Vec<Candidate>, capacity: usize) -> Vec<Candidate> {
    members.sort_by(distance_order);
    if members.len() <= capacity {
        return members;
    }

    let excess = members.len() - capacity;
    let mut droppable: Vec<usize> = (0..members.len()).filter(|&i| members[i].closing_at_low).collect();
    droppable.sort_by(|&a, &b| {
        members[a]
            .min_close_5d
            .total_cmp(&members[b].min_close_5d)
            .then_with(|| members[b].symbol.cmp(&members[a].symbol))
    });

    let mut keep = vec![true; members.len()];
    for &i in droppable.iter().take(excess) {
        keep[i] = false;
    }
    let mut kept: Vec<Candidate> = members
        .into_iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect();

    kept.truncate(capacity);
    kept
}
