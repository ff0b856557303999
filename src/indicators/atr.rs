// =============================================================================
// Average True Range — Wilder's smoothing
// =============================================================================
//
// TR  = max(H - L, |H - prevClose|, |L - prevClose|)
// ATR = Wilder-smoothed TR, seeded with the SMA of the first `period` values.
// =============================================================================

use crate::types::Candle;

/// Latest ATR value, or `None` when fewer than `period + 1` candles are
/// supplied, `period` is zero, or any intermediate value is non-finite.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut trs = Vec::with_capacity(candles.len() - 1);
    for pair in candles.windows(2) {
        let prev_close = pair[0].close;
        let hl = pair[1].high - pair[1].low;
        let hc = (pair[1].high - prev_close).abs();
        let lc = (pair[1].low - prev_close).abs();
        trs.push(hl.max(hc).max(lc));
    }

    let period_f = period as f64;
    let mut value = trs[..period].iter().sum::<f64>() / period_f;
    for &tr in &trs[period..] {
        value = (value * (period_f - 1.0) + tr) / period_f;
    }

    value.is_finite().then_some(value)
}

/// ATR as a percentage of the latest close. Comparable across price scales.
pub fn atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let value = atr(candles, period)?;
    let close = candles.last()?.close;
    if close <= 0.0 {
        return None;
    }
    Some(value / close * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(0, open, high, low, close, 100.0, 0)
    }

    #[test]
    fn rejects_zero_period_and_short_input() {
        let candles = vec![bar(100.0, 105.0, 95.0, 102.0); 20];
        assert!(atr(&candles, 0).is_none());
        assert!(atr(&candles[..10], 14).is_none());
    }

    #[test]
    fn minimum_viable_input() {
        let candles = vec![
            bar(100.0, 102.0, 98.0, 101.0),
            bar(101.0, 104.0, 99.0, 103.0),
            bar(103.0, 106.0, 100.0, 105.0),
            bar(105.0, 108.0, 102.0, 107.0),
        ];
        let v = atr(&candles, 3).unwrap();
        assert!(v > 0.0 && v.is_finite());
    }

    #[test]
    fn constant_range_converges_to_range() {
        let mut candles = Vec::new();
        for i in 0..40 {
            let base = 100.0 + i as f64 * 0.05;
            candles.push(bar(base, base + 4.0, base - 4.0, base));
        }
        let v = atr(&candles, 14).unwrap();
        assert!((v - 8.0).abs() < 1.0, "expected ATR near 8, got {v}");
    }

    #[test]
    fn gap_inflates_true_range() {
        let candles = vec![
            bar(100.0, 105.0, 95.0, 95.0),
            // Gap up: |115 - 95| = 20 dominates H-L = 7.
            bar(110.0, 115.0, 108.0, 112.0),
            bar(112.0, 118.0, 110.0, 115.0),
            bar(115.0, 120.0, 113.0, 118.0),
        ];
        assert!(atr(&candles, 3).unwrap() > 7.0);
    }

    #[test]
    fn nan_input_yields_none() {
        let candles = vec![
            bar(100.0, 105.0, 95.0, 100.0),
            bar(100.0, f64::NAN, 95.0, 100.0),
            bar(100.0, 105.0, 95.0, 100.0),
            bar(100.0, 105.0, 95.0, 100.0),
        ];
        assert!(atr(&candles, 3).is_none());
    }

    #[test]
    fn pct_variant_scales_by_close() {
        let mut candles = Vec::new();
        for i in 0..30 {
            let base = 200.0 + i as f64;
            candles.push(bar(base, base + 2.0, base - 2.0, base));
        }
        let abs = atr(&candles, 14).unwrap();
        let pct = atr_pct(&candles, 14).unwrap();
        let close = candles.last().unwrap().close;
        assert!((pct - abs / close * 100.0).abs() < 1e-9);
    }
}
