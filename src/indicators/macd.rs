// =============================================================================
// MACD — Moving Average Convergence/Divergence
// =============================================================================
//
// macd      = EMA(fast) - EMA(slow)
// signal    = EMA(macd, signal_period)
// histogram = macd - signal
//
// A cross is reported when the histogram changes sign between the last two
// completed bars.
// =============================================================================

use crate::indicators::ema::ema_series;

/// Latest MACD reading with cross flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    /// Histogram crossed from negative to non-negative on the latest bar.
    pub crossed_up: bool,
    /// Histogram crossed from positive to non-positive on the latest bar.
    pub crossed_down: bool,
}

/// Compute the latest MACD point with the standard (12, 26, 9) parameters or
/// any caller-supplied triple.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<MacdPoint> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return None;
    }

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    if slow_series.is_empty() {
        return None;
    }

    // Align: the slow series starts (slow - fast) steps later than the fast.
    let offset = fast_series.len() - slow_series.len();
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[i + offset] - s)
        .collect();

    let signal_series = ema_series(&macd_line, signal_period);
    if signal_series.len() < 2 {
        return None;
    }

    let hist_last = macd_line[macd_line.len() - 1] - signal_series[signal_series.len() - 1];
    let hist_prev = macd_line[macd_line.len() - 2] - signal_series[signal_series.len() - 2];

    Some(MacdPoint {
        macd: macd_line[macd_line.len() - 1],
        signal: signal_series[signal_series.len() - 1],
        histogram: hist_last,
        crossed_up: hist_prev < 0.0 && hist_last >= 0.0,
        crossed_down: hist_prev > 0.0 && hist_last <= 0.0,
    })
}

/// Standard 12/26/9 MACD.
pub fn macd_standard(closes: &[f64]) -> Option<MacdPoint> {
    macd(closes, 12, 26, 9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_parameters() {
        let closes: Vec<f64> = (0..100).map(f64::from).collect();
        assert!(macd(&closes, 0, 26, 9).is_none());
        assert!(macd(&closes, 26, 12, 9).is_none());
        assert!(macd(&closes, 12, 26, 0).is_none());
    }

    #[test]
    fn needs_enough_history() {
        let closes: Vec<f64> = (0..20).map(f64::from).collect();
        assert!(macd_standard(&closes).is_none());
    }

    #[test]
    fn uptrend_has_positive_macd() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + i as f64 * 0.8).collect();
        let point = macd_standard(&closes).unwrap();
        assert!(point.macd > 0.0, "macd {} should be positive", point.macd);
    }

    #[test]
    fn downtrend_has_negative_macd() {
        let closes: Vec<f64> = (0..120).map(|i| 300.0 - i as f64 * 0.8).collect();
        let point = macd_standard(&closes).unwrap();
        assert!(point.macd < 0.0);
    }

    #[test]
    fn reversal_produces_cross() {
        // Long decline followed by a sharp rally: histogram must flip sign at
        // some point; scan prefixes for the crossing bar.
        let mut closes: Vec<f64> = (0..80).map(|i| 200.0 - i as f64).collect();
        closes.extend((0..40).map(|i| 120.0 + i as f64 * 2.0));

        let mut saw_cross_up = false;
        for end in 60..closes.len() {
            if let Some(p) = macd_standard(&closes[..=end]) {
                if p.crossed_up {
                    saw_cross_up = true;
                    break;
                }
            }
        }
        assert!(saw_cross_up, "expected a bullish histogram cross");
    }

    #[test]
    fn flat_series_is_zero() {
        let closes = vec![100.0; 120];
        let point = macd_standard(&closes).unwrap();
        assert!(point.macd.abs() < 1e-9);
        assert!(point.histogram.abs() < 1e-9);
    }
}
