// =============================================================================
// Weighted Scorer — regime-aware indicator agreement → 0–100 score
// =============================================================================
//
// Every indicator contributes a direction (+1 bullish / -1 bearish / 0
// neutral) and a confidence in [0, 1]. The weighted sum lands in [-1, 1];
// its magnitude scales onto 0–100 and its sign sets the trade direction.
// Weight tables differ per regime family: trending markets listen to trend
// indicators, ranging markets to mean-reversion ones.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Direction, RegimeFamily};

/// One indicator's vote.
#[derive(Debug, Clone, Serialize)]
pub struct Component {
    pub name: &'static str,
    /// Fallback weight when the regime table has no entry.
    pub weight: f64,
    /// +1.0 bullish, -1.0 bearish, 0.0 neutral.
    pub direction: f64,
    pub confidence: f64,
}

/// Outcome of a scoring pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Weighted agreement in [-1, 1].
    pub raw: f64,
    /// 0–100 magnitude.
    pub score: f64,
    /// `None` when the components cancel out.
    pub direction: Option<Direction>,
    pub contributions: Vec<(String, f64)>,
}

fn weights_for(family: RegimeFamily) -> HashMap<&'static str, f64> {
    let mut w = HashMap::new();
    match family {
        RegimeFamily::Trending => {
            w.insert("ema_trend", 0.22);
            w.insert("macd", 0.18);
            w.insert("adx", 0.15);
            w.insert("long_trend", 0.15);
            w.insert("rsi", 0.08);
            w.insert("bollinger", 0.05);
            w.insert("vwap", 0.07);
            w.insert("volume", 0.10);
        }
        RegimeFamily::Ranging => {
            w.insert("rsi", 0.22);
            w.insert("bollinger", 0.20);
            w.insert("vwap", 0.15);
            w.insert("macd", 0.12);
            w.insert("ema_trend", 0.08);
            w.insert("long_trend", 0.08);
            w.insert("adx", 0.05);
            w.insert("volume", 0.10);
        }
        RegimeFamily::Explosive => {
            w.insert("volume", 0.20);
            w.insert("macd", 0.18);
            w.insert("ema_trend", 0.17);
            w.insert("vwap", 0.12);
            w.insert("long_trend", 0.12);
            w.insert("adx", 0.11);
            w.insert("rsi", 0.05);
            w.insert("bollinger", 0.05);
        }
    }
    w
}

/// Score a component set under the given regime family.
pub fn score(components: &[Component], family: RegimeFamily) -> ScoreBreakdown {
    let table = weights_for(family);

    let mut raw = 0.0;
    let mut contributions = Vec::with_capacity(components.len());

    for c in components {
        let weight = table.get(c.name).copied().unwrap_or(c.weight);
        let contribution = weight * c.confidence.clamp(0.0, 1.0) * c.direction.clamp(-1.0, 1.0);
        raw += contribution;
        contributions.push((c.name.to_string(), contribution));
    }

    raw = raw.clamp(-1.0, 1.0);

    let direction = if raw > 0.0 {
        Some(Direction::Long)
    } else if raw < 0.0 {
        Some(Direction::Short)
    } else {
        None
    };

    ScoreBreakdown {
        raw,
        score: (raw.abs() * 100.0).min(100.0),
        direction,
        contributions,
    }
}
