// =============================================================================
// Average Directional Index — trend-strength gauge
// =============================================================================
//
// +DM / -DM are Wilder-smoothed alongside TR; DX = |+DI - -DI| / (+DI + -DI);
// ADX is the Wilder-smoothed DX. Values above ~25 indicate a directional
// market.
// =============================================================================

use crate::types::Candle;

/// Latest ADX value in [0, 100]. `None` when fewer than `2 * period + 1`
/// candles are available or a division degenerates.
pub fn adx(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let mut trs = Vec::with_capacity(candles.len() - 1);
    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);

    for pair in candles.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);

        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });

        let hl = cur.high - cur.low;
        let hc = (cur.high - prev.close).abs();
        let lc = (cur.low - prev.close).abs();
        trs.push(hl.max(hc).max(lc));
    }

    let period_f = period as f64;
    let mut tr_s: f64 = trs[..period].iter().sum();
    let mut plus_s: f64 = plus_dm[..period].iter().sum();
    let mut minus_s: f64 = minus_dm[..period].iter().sum();

    let mut dx_values = Vec::new();
    for i in period..trs.len() {
        tr_s = tr_s - tr_s / period_f + trs[i];
        plus_s = plus_s - plus_s / period_f + plus_dm[i];
        minus_s = minus_s - minus_s / period_f + minus_dm[i];

        if tr_s <= 0.0 {
            return None;
        }
        let plus_di = 100.0 * plus_s / tr_s;
        let minus_di = 100.0 * minus_s / tr_s;
        let di_sum = plus_di + minus_di;
        if di_sum <= 0.0 {
            dx_values.push(0.0);
        } else {
            dx_values.push(100.0 * (plus_di - minus_di).abs() / di_sum);
        }
    }

    if dx_values.len() < period {
        return None;
    }

    let mut value = dx_values[..period].iter().sum::<f64>() / period_f;
    for &dx in &dx_values[period..] {
        value = (value * (period_f - 1.0) + dx) / period_f;
    }

    value.is_finite().then_some(value)
}
