// =============================================================================
// Bollinger Bands
// =============================================================================

/// Band values around an SMA midline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Bands {
    /// Band width as a percentage of the midline. A volatility proxy.
    pub fn width_pct(&self) -> f64 {
        if self.middle <= 0.0 {
            return 0.0;
        }
        (self.upper - self.lower) / self.middle * 100.0
    }
}

/// Bands over the last `period` closes at `k` standard deviations.
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<Bands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();

    if !mean.is_finite() || !sd.is_finite() {
        return None;
    }

    Some(Bands {
        upper: mean + k * sd,
        middle: mean,
        lower: mean - k * sd,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input() {
        assert!(bollinger(&[1.0, 2.0], 20, 2.0).is_none());
        assert!(bollinger(&[1.0], 0, 2.0).is_none());
    }

    #[test]
    fn flat_series_collapses_bands() {
        let closes = vec![50.0; 30];
        let bands = bollinger(&closes, 20, 2.0).unwrap();
        assert!((bands.upper - 50.0).abs() < 1e-9);
        assert!((bands.lower - 50.0).abs() < 1e-9);
        assert!(bands.width_pct().abs() < 1e-9);
    }

    #[test]
    fn bands_bracket_the_mean() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i % 5) as f64).collect();
        let bands = bollinger(&closes, 20, 2.0).unwrap();
        assert!(bands.upper > bands.middle);
        assert!(bands.middle > bands.lower);
    }

    #[test]
    fn width_grows_with_volatility() {
        let calm: Vec<f64> = (0..40).map(|i| 100.0 + (i % 2) as f64 * 0.1).collect();
        let wild: Vec<f64> = (0..40).map(|i| 100.0 + (i % 2) as f64 * 10.0).collect();
        let calm_w = bollinger(&calm, 20, 2.0).unwrap().width_pct();
        let wild_w = bollinger(&wild, 20, 2.0).unwrap().width_pct();
        assert!(wild_w > calm_w * 5.0);
    }
}
