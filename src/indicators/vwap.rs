// =============================================================================
// Volume-Weighted Average Price over a rolling candle window
// =============================================================================

use crate::types::Candle;

/// VWAP of the last `window` candles using the typical price (H+L+C)/3.
pub fn vwap(candles: &[Candle], window: usize) -> Option<f64> {
    if window == 0 || candles.len() < window {
        return None;
    }

    let slice = &candles[candles.len() - window..];
    let mut pv = 0.0;
    let mut vol = 0.0;
    for c in slice {
        let typical = (c.high + c.low + c.close) / 3.0;
        pv += typical * c.volume;
        vol += c.volume;
    }

    if vol <= 0.0 || !pv.is_finite() {
        return None;
    }
    Some(pv / vol)
}

/// Distance of the latest close from VWAP, as a percentage of VWAP.
/// Positive means price is above VWAP.
pub fn vwap_distance_pct(candles: &[Candle], window: usize) -> Option<f64> {
    let v = vwap(candles, window)?;
    let close = candles.last()?.close;
    if v <= 0.0 {
        return None;
    }
    Some((close - v) / v * 100.0)
}

/// VWAP slope: percentage change between the VWAP over the most recent window
/// and the VWAP over the window shifted back by `shift` bars.
pub fn vwap_slope_pct(candles: &[Candle], window: usize, shift: usize) -> Option<f64> {
    if shift == 0 || candles.len() < window + shift {
        return None;
    }
    let now = vwap(candles, window)?;
    let then = vwap(&candles[..candles.len() - shift], window)?;
    if then <= 0.0 {
        return None;
    }
    Some((now - then) / then * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(price: f64, volume: f64) -> Candle {
        Candle::new(0, price, price + 1.0, price - 1.0, price, volume, 0)
    }

    #[test]
    fn short_input() {
        assert!(vwap(&[bar(100.0, 10.0)], 5).is_none());
        assert!(vwap(&[], 1).is_none());
    }

    #[test]
    fn equal_volume_is_mean_of_typical_prices() {
        let candles = vec![bar(100.0, 10.0), bar(110.0, 10.0)];
        let v = vwap(&candles, 2).unwrap();
        assert!((v - 105.0).abs() < 1e-9);
    }

    #[test]
    fn weighting_pulls_toward_heavy_volume() {
        let candles = vec![bar(100.0, 1.0), bar(110.0, 99.0)];
        let v = vwap(&candles, 2).unwrap();
        assert!(v > 109.0);
    }

    #[test]
    fn zero_volume_window_is_none() {
        let candles = vec![bar(100.0, 0.0), bar(110.0, 0.0)];
        assert!(vwap(&candles, 2).is_none());
    }

    #[test]
    fn distance_sign_tracks_price_side() {
        let mut candles: Vec<Candle> = (0..20).map(|_| bar(100.0, 10.0)).collect();
        candles.push(bar(120.0, 10.0));
        assert!(vwap_distance_pct(&candles, 10).unwrap() > 0.0);

        let mut candles: Vec<Candle> = (0..20).map(|_| bar(100.0, 10.0)).collect();
        candles.push(bar(80.0, 10.0));
        assert!(vwap_distance_pct(&candles, 10).unwrap() < 0.0);
    }

    #[test]
    fn slope_positive_when_vwap_rising() {
        let candles: Vec<Candle> = (0..30).map(|i| bar(100.0 + i as f64, 10.0)).collect();
        assert!(vwap_slope_pct(&candles, 10, 5).unwrap() > 0.0);
    }
}
