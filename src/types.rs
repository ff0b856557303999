// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trade direction for a perpetual-futures position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Order side that opens a position in this direction.
    pub fn entry_side(self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }

    /// Order side that reduces a position in this direction.
    pub fn exit_side(self) -> &'static str {
        match self {
            Self::Long => "SELL",
            Self::Short => "BUY",
        }
    }

    /// +1.0 for long, -1.0 for short. Multiplying a price move by this sign
    /// yields the PnL contribution.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Whether a signal follows the higher-timeframe trend or fades it.
/// Each type draws from its own position-slot bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    Trend,
    Reversal,
}

impl Default for SignalType {
    fn default() -> Self {
        Self::Trend
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trend => write!(f, "TREND"),
            Self::Reversal => write!(f, "REVERSAL"),
        }
    }
}

/// Margin mode applied to a symbol before entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginMode {
    Cross,
    Isolated,
}

impl MarginMode {
    /// Wire value expected by the exchange `marginType` parameter.
    pub fn as_api_str(self) -> &'static str {
        match self {
            Self::Cross => "CROSSED",
            Self::Isolated => "ISOLATED",
        }
    }
}

impl std::fmt::Display for MarginMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cross => write!(f, "CROSS"),
            Self::Isolated => write!(f, "ISOLATED"),
        }
    }
}

/// Fine-grained market regime used to select score thresholds and weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    TrendingHighVol,
    TrendingLowVol,
    RangingHighVol,
    RangingLowVol,
    Explosive,
}

/// Coarse regime family carried on emitted signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegimeFamily {
    Trending,
    Ranging,
    Explosive,
}

impl Regime {
    pub fn family(self) -> RegimeFamily {
        match self {
            Self::TrendingHighVol | Self::TrendingLowVol => RegimeFamily::Trending,
            Self::RangingHighVol | Self::RangingLowVol => RegimeFamily::Ranging,
            Self::Explosive => RegimeFamily::Explosive,
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingHighVol => write!(f, "TRENDING_HIGH_VOL"),
            Self::TrendingLowVol => write!(f, "TRENDING_LOW_VOL"),
            Self::RangingHighVol => write!(f, "RANGING_HIGH_VOL"),
            Self::RangingLowVol => write!(f, "RANGING_LOW_VOL"),
            Self::Explosive => write!(f, "EXPLOSIVE"),
        }
    }
}

impl std::fmt::Display for RegimeFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trending => write!(f, "TRENDING"),
            Self::Ranging => write!(f, "RANGING"),
            Self::Explosive => write!(f, "EXPLOSIVE"),
        }
    }
}

/// Which take-profit ladder shape was attached at entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyTag {
    Conservative,
    Fibonacci,
}

impl Default for StrategyTag {
    fn default() -> Self {
        Self::Conservative
    }
}

impl std::fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "CONSERVATIVE"),
            Self::Fibonacci => write!(f, "FIBONACCI"),
        }
    }
}

/// Why a position was fully closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    /// Final take-profit leg (1-based index of the ladder step that finished
    /// the position).
    TakeProfit(u8),
    Trailing,
    Breakeven,
    Time,
    Manual,
    Funding,
    Emergency,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "SL"),
            Self::TakeProfit(n) => write!(f, "TP_{n}"),
            Self::Trailing => write!(f, "TRAILING"),
            Self::Breakeven => write!(f, "BREAKEVEN"),
            Self::Time => write!(f, "TIME"),
            Self::Manual => write!(f, "MANUAL"),
            Self::Funding => write!(f, "FUNDING"),
            Self::Emergency => write!(f, "EMERGENCY"),
        }
    }
}

/// Lifecycle state of the autonomous engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    /// Circuit-broken: admissions rejected, open positions still managed.
    Paused,
    Stopping,
}

impl Default for EngineState {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Stopping => write!(f, "STOPPING"),
        }
    }
}

/// Capital health zone derived from margin utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapitalZone {
    Green,
    Yellow,
    Red,
}

impl std::fmt::Display for CapitalZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "GREEN"),
            Self::Yellow => write!(f, "YELLOW"),
            Self::Red => write!(f, "RED"),
        }
    }
}

/// A single OHLCV candle fetched from the exchange kline endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time in epoch milliseconds. Strictly increasing per series.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl Candle {
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        close_time: i64,
    ) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            close_time,
        }
    }

    /// Return the open-time of every missing bar in `candles` assuming a fixed
    /// `interval_ms` spacing. Gaps are surfaced to callers rather than being
    /// silently zero-filled.
    pub fn gaps_in(candles: &[Candle], interval_ms: i64) -> Vec<i64> {
        let mut gaps = Vec::new();
        if interval_ms <= 0 {
            return gaps;
        }
        for pair in candles.windows(2) {
            let mut expected = pair[0].open_time + interval_ms;
            while expected < pair[1].open_time {
                gaps.push(expected);
                expected += interval_ms;
            }
        }
        gaps
    }

    /// Verify the strictly-increasing open-time invariant.
    pub fn is_monotonic(candles: &[Candle]) -> bool {
        candles.windows(2).all(|w| w[0].open_time < w[1].open_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(t: i64) -> Candle {
        Candle::new(t, 1.0, 2.0, 0.5, 1.5, 10.0, t + 59_999)
    }

    #[test]
    fn direction_sides_and_sign() {
        assert_eq!(Direction::Long.entry_side(), "BUY");
        assert_eq!(Direction::Long.exit_side(), "SELL");
        assert_eq!(Direction::Short.entry_side(), "SELL");
        assert_eq!(Direction::Short.exit_side(), "BUY");
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
        assert_eq!(Direction::Long.opposite(), Direction::Short);
    }

    #[test]
    fn regime_family_mapping() {
        assert_eq!(Regime::TrendingHighVol.family(), RegimeFamily::Trending);
        assert_eq!(Regime::TrendingLowVol.family(), RegimeFamily::Trending);
        assert_eq!(Regime::RangingHighVol.family(), RegimeFamily::Ranging);
        assert_eq!(Regime::RangingLowVol.family(), RegimeFamily::Ranging);
        assert_eq!(Regime::Explosive.family(), RegimeFamily::Explosive);
    }

    #[test]
    fn exit_reason_display() {
        assert_eq!(ExitReason::TakeProfit(2).to_string(), "TP_2");
        assert_eq!(ExitReason::StopLoss.to_string(), "SL");
        assert_eq!(ExitReason::Funding.to_string(), "FUNDING");
    }

    #[test]
    fn signal_type_defaults_to_trend() {
        // Missing position metadata must degrade to the conservative bucket.
        assert_eq!(SignalType::default(), SignalType::Trend);
    }

    #[test]
    fn candle_gap_detection() {
        let series = vec![bar(0), bar(60_000), bar(240_000)];
        let gaps = Candle::gaps_in(&series, 60_000);
        assert_eq!(gaps, vec![120_000, 180_000]);
    }

    #[test]
    fn candle_no_gaps_on_contiguous_series() {
        let series = vec![bar(0), bar(60_000), bar(120_000)];
        assert!(Candle::gaps_in(&series, 60_000).is_empty());
        assert!(Candle::is_monotonic(&series));
    }

    #[test]
    fn candle_monotonicity_violation_detected() {
        let series = vec![bar(60_000), bar(60_000)];
        assert!(!Candle::is_monotonic(&series));
    }

    #[test]
    fn margin_mode_wire_values() {
        assert_eq!(MarginMode::Cross.as_api_str(), "CROSSED");
        assert_eq!(MarginMode::Isolated.as_api_str(), "ISOLATED");
    }
}
