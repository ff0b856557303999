pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod vwap;

use crate::types::Candle;

/// Ratio of the latest bar's volume to the average of the preceding `period`
/// bars. Values above 1.0 mean expanding participation.
///
/// Returns `None` when fewer than `period + 1` bars are available or the
/// trailing average is zero.
pub fn volume_ratio(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let last = candles.last()?.volume;
    let window = &candles[candles.len() - 1 - period..candles.len() - 1];
    let avg: f64 = window.iter().map(|c| c.volume).sum::<f64>() / period as f64;
    if avg <= 0.0 || !avg.is_finite() {
        return None;
    }
    Some(last / avg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(volume: f64) -> Candle {
        Candle::new(0, 100.0, 101.0, 99.0, 100.5, volume, 0)
    }

    #[test]
    fn volume_ratio_expanding() {
        let mut candles: Vec<Candle> = (0..10).map(|_| bar(100.0)).collect();
        candles.push(bar(250.0));
        let r = volume_ratio(&candles, 10).unwrap();
        assert!((r - 2.5).abs() < 1e-9);
    }

    #[test]
    fn volume_ratio_insufficient_data() {
        let candles: Vec<Candle> = (0..5).map(|_| bar(100.0)).collect();
        assert!(volume_ratio(&candles, 10).is_none());
    }

    #[test]
    fn volume_ratio_zero_average() {
        let mut candles: Vec<Candle> = (0..10).map(|_| bar(0.0)).collect();
        candles.push(bar(50.0));
        assert!(volume_ratio(&candles, 10).is_none());
    }
}
