//! Sliding-window primitives shared across the detector modules.
//!
//! All rolling functions are trailing: the value at index `t` is computed from
//! `values[t + 1 - window..=t]` and is `None` until that window is full.

/// The trailing window ending at `t`, or `None` if fewer than `window` values exist.
#[inline]
pub fn trailing_window<T>(values: &[T], t: usize, window: usize) -> Option<&[T]> {
    if window == 0 || t >= values.len() || t + 1 < window {
        return None;
    }
    Some(&values[t + 1 - window..=t])
}

/// Rolling mean over a dense series
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|t| trailing_window(values, t, window).map(|w| w.iter().sum::<f64>() / window as f64))
        .collect()
}

/// Rolling mean over a sparse series; defined only when all `window` trailing
/// values are present.
pub fn rolling_mean_opt(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|t| {
            trailing_window(values, t, window)
                .and_then(|w| w.iter().copied().sum::<Option<f64>>())
                .map(|sum| sum / window as f64)
        })
        .collect()
}

/// Rolling maximum
pub fn rolling_max(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|t| trailing_window(values, t, window).map(|w| w.iter().copied().fold(f64::MIN, f64::max)))
        .collect()
}

/// Rolling minimum
pub fn rolling_min(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|t| trailing_window(values, t, window).map(|w| w.iter().copied().fold(f64::MAX, f64::min)))
        .collect()
}

#[inline]
pub fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator). Needs at least two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

// ============================================================
// TESTS
// ============================================================
