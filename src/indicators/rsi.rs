// =============================================================================
// Relative Strength Index — Wilder's smoothing
// =============================================================================
//
// avg_gain/avg_loss are seeded with the SMA of the first `period` deltas and
// then smoothed:
//   avg = (prev_avg * (period - 1) + current) / period
//   RSI = 100 - 100 / (1 + avg_gain / avg_loss)
// =============================================================================

/// Full RSI series. One value per close starting at index `period`.
///
/// Empty when `period == 0` or fewer than `period + 1` closes are supplied.
/// A flat market yields 50, an all-gains market 100, all-losses 0.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let period_f = period as f64;

    let mut avg_gain = deltas[..period].iter().filter(|d| **d > 0.0).sum::<f64>() / period_f;
    let mut avg_loss =
        deltas[..period].iter().filter(|d| **d < 0.0).map(|d| -d).sum::<f64>() / period_f;

    let mut out = Vec::with_capacity(deltas.len() - period + 1);
    match point(avg_gain, avg_loss) {
        Some(v) => out.push(v),
        None => return out,
    }

    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
        match point(avg_gain, avg_loss) {
            Some(v) => out.push(v),
            None => break,
        }
    }

    out
}

/// Latest RSI value, or `None` on insufficient data.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    rsi_series(closes, period).last().copied()
}

fn point(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let value = if avg_gain == 0.0 && avg_loss == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        assert!(rsi_series(&[], 14).is_empty());
        assert!(rsi(&[], 14).is_none());
    }

    #[test]
    fn zero_period() {
        assert!(rsi_series(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn needs_period_plus_one_closes() {
        let closes: Vec<f64> = (1..=14).map(f64::from).collect();
        assert!(rsi_series(&closes, 14).is_empty());
        let closes: Vec<f64> = (1..=15).map(f64::from).collect();
        assert_eq!(rsi_series(&closes, 14).len(), 1);
    }

    #[test]
    fn monotonic_rise_pins_at_100() {
        let closes: Vec<f64> = (1..=40).map(f64::from).collect();
        for v in rsi_series(&closes, 14) {
            assert!((v - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn monotonic_fall_pins_at_0() {
        let closes: Vec<f64> = (1..=40).rev().map(f64::from).collect();
        for v in rsi_series(&closes, 14) {
            assert!(v.abs() < 1e-9);
        }
    }

    #[test]
    fn flat_market_is_neutral() {
        let closes = vec![250.0; 40];
        assert!((rsi(&closes, 14).unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn bounded_between_0_and_100() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13, 44.01, 43.20,
        ];
        for v in rsi_series(&closes, 14) {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn deterministic_for_identical_input() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + ((i * 7) % 13) as f64).collect();
        assert_eq!(rsi_series(&closes, 14), rsi_series(&closes, 14));
    }
}
