// =============================================================================
// Exponential Moving Average
// =============================================================================

/// EMA series seeded with the SMA of the first `period` values and smoothed
/// with `k = 2 / (period + 1)`.
///
/// Output has one value per input starting at index `period - 1`. Empty when
/// `period == 0` or the input is shorter than `period`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);

    let mut prev = seed;
    for &v in &values[period..] {
        prev = (v - prev) * k + prev;
        out.push(prev);
    }

    out
}

/// Latest EMA value.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Slope of the EMA over the last `lookback` steps, as a percentage of the
/// older value. Positive means rising.
pub fn ema_slope_pct(values: &[f64], period: usize, lookback: usize) -> Option<f64> {
    let series = ema_series(values, period);
    if lookback == 0 || series.len() <= lookback {
        return None;
    }
    let newest = *series.last()?;
    let older = series[series.len() - 1 - lookback];
    if older == 0.0 {
        return None;
    }
    Some((newest - older) / older * 100.0)
}
