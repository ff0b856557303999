// =============================================================================
// Signal Generator — three-horizon indicator pipeline → scored candidates
// =============================================================================
//
// Pipeline per candidate symbol:
//   1. Fetch klines at the short / medium / long horizons (1m / 5m / 1h).
//   2. Compute the indicator snapshot for each horizon.
//   3. Classify the regime from the medium horizon.
//   4. Run the regime-weighted scorer; resolve direction (RSI extremes lean
//      the direction, subject to MACD/EMA confirmation).
//   5. Derive the ATR stop and reference TP ladder; gate on score and
//      reward-risk minimums for the regime.
//   6. Overlay market intelligence: adjust the score by up to ±20 and
//      hard-block on extreme institutional mis-alignment.
//
// Everything except the fetches is pure: identical klines and config produce
// an identical signal.
// =============================================================================

pub mod intel;
pub mod regime;
pub mod score;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::binance::client::FuturesClient;
use crate::binance::error::GatewayResult;
use crate::config::EngineConfig;
use crate::indicators;
use crate::scanner::Candidate;
use crate::signal::intel::{IntelScout, MarketIntel};
use crate::signal::score::Component;
use crate::types::{Candle, Direction, Regime, SignalType};

// =============================================================================
// Indicator snapshot
// =============================================================================

/// Trading-session flags from the UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    pub asia: bool,
    pub europe: bool,
    pub us: bool,
}

impl SessionFlags {
    pub fn from_utc_hour(hour: u32) -> Self {
        Self {
            asia: hour < 8,
            europe: (7..16).contains(&hour),
            us: (13..22).contains(&hour),
        }
    }
}

/// Indicator readings for one horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonIndicators {
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub ema_slope_pct: f64,
    pub macd_histogram: f64,
    pub macd_crossed_up: bool,
    pub macd_crossed_down: bool,
    pub adx: f64,
    pub bb_width_pct: f64,
    pub atr: f64,
    pub atr_pct: f64,
    pub vwap_distance_pct: f64,
    pub vwap_slope_pct: f64,
    pub volume_ratio: f64,
    pub close: f64,
}

/// Fixed indicator snapshot carried on every signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub short: HorizonIndicators,
    pub medium: HorizonIndicators,
    pub long: HorizonIndicators,
    pub session: SessionFlags,
}

impl HorizonIndicators {
    /// Flat placeholder used by operator-initiated trades that skip the
    /// indicator pipeline.
    pub fn neutral(close: f64) -> Self {
        Self {
            rsi: 50.0,
            ema_fast: close,
            ema_slow: close,
            ema_slope_pct: 0.0,
            macd_histogram: 0.0,
            macd_crossed_up: false,
            macd_crossed_down: false,
            adx: 0.0,
            bb_width_pct: 0.0,
            atr: close * 0.01,
            atr_pct: 1.0,
            vwap_distance_pct: 0.0,
            vwap_slope_pct: 0.0,
            volume_ratio: 1.0,
            close,
        }
    }
}

/// Minimum bars required per horizon.
const MIN_BARS: usize = 60;

/// Compute one horizon's readings. `None` when history is too short or any
/// indicator cannot be produced.
pub fn compute_horizon(candles: &[Candle]) -> Option<HorizonIndicators> {
    if candles.len() < MIN_BARS || !Candle::is_monotonic(candles) {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let close = *closes.last()?;

    let macd = indicators::macd::macd_standard(&closes)?;
    let bands = indicators::bollinger::bollinger(&closes, 20, 2.0)?;

    Some(HorizonIndicators {
        rsi: indicators::rsi::rsi(&closes, 14)?,
        ema_fast: indicators::ema::ema(&closes, 9)?,
        ema_slow: indicators::ema::ema(&closes, 21)?,
        ema_slope_pct: indicators::ema::ema_slope_pct(&closes, 9, 3)?,
        macd_histogram: macd.histogram,
        macd_crossed_up: macd.crossed_up,
        macd_crossed_down: macd.crossed_down,
        adx: indicators::adx::adx(candles, 14)?,
        bb_width_pct: bands.width_pct(),
        atr: indicators::atr::atr(candles, 14)?,
        atr_pct: indicators::atr::atr_pct(candles, 14)?,
        vwap_distance_pct: indicators::vwap::vwap_distance_pct(candles, 20)?,
        vwap_slope_pct: indicators::vwap::vwap_slope_pct(candles, 20, 5).unwrap_or(0.0),
        volume_ratio: indicators::volume_ratio(candles, 20)?,
        close,
    })
}

// =============================================================================
// Signal
// =============================================================================

/// A candidate trade decision. Lives for at most one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    /// 0–100, already including the market-intelligence adjustment.
    pub score: f64,
    pub regime: Regime,
    pub signal_type: SignalType,
    pub entry_price: f64,
    pub stop_price: f64,
    /// Reference TP ladder (conservative ATR multiples), nearest first.
    pub tp_ladder: [f64; 3],
    pub rr_ratio: f64,
    pub snapshot: IndicatorSnapshot,
    pub intel: Option<MarketIntel>,
    pub liquidity_risk: bool,
}

impl Signal {
    /// Operator-initiated trade: no indicator pipeline, conservative tags.
    pub fn manual(symbol: &str, direction: Direction, entry_price: f64, stop_price: f64) -> Self {
        let neutral = HorizonIndicators::neutral(entry_price);
        let atr = neutral.atr;
        Self {
            symbol: symbol.to_string(),
            direction,
            score: 0.0,
            regime: Regime::RangingLowVol,
            signal_type: SignalType::Trend,
            entry_price,
            stop_price,
            tp_ladder: [1.0, 1.5, 2.0].map(|m| entry_price + direction.sign() * atr * m),
            rr_ratio: 0.0,
            snapshot: IndicatorSnapshot {
                short: neutral,
                medium: neutral,
                long: neutral,
                session: SessionFlags::from_utc_hour(0),
            },
            intel: None,
            liquidity_risk: false,
        }
    }
}

/// Outcome of evaluating one candidate.
#[derive(Debug, Clone)]
pub enum SignalVerdict {
    Emitted(Box<Signal>),
    /// No directional edge, or score / reward-risk below the regime minimum.
    BelowThreshold,
    /// Market-intelligence hard block. Wins over any score.
    HardBlocked,
}

// =============================================================================
// Pure signal construction
// =============================================================================

/// Build a signal from already-fetched klines. Deterministic.
pub fn build_signal(
    symbol: &str,
    short_candles: &[Candle],
    medium_candles: &[Candle],
    long_candles: &[Candle],
    session: SessionFlags,
    config: &EngineConfig,
) -> SignalVerdict {
    let (Some(short), Some(medium), Some(long)) = (
        compute_horizon(short_candles),
        compute_horizon(medium_candles),
        compute_horizon(long_candles),
    ) else {
        return SignalVerdict::BelowThreshold;
    };

    let regime = regime::classify(medium.adx, medium.atr_pct, medium.bb_width_pct);
    let snapshot = IndicatorSnapshot {
        short,
        medium,
        long,
        session,
    };

    let components = build_components(&snapshot, config);
    let breakdown = score::score(&components, regime.family());

    let Some(mut direction) = breakdown.direction else {
        return SignalVerdict::BelowThreshold;
    };

    // RSI extremes lean the direction, subject to MACD or EMA confirmation.
    // A reading exactly at the threshold counts as the non-extreme side.
    let sig = &config.signal;
    if medium.rsi < sig.rsi_oversold {
        let confirmed = medium.macd_histogram > 0.0 || medium.ema_fast > medium.ema_slow;
        if confirmed {
            direction = Direction::Long;
        }
    } else if medium.rsi > sig.rsi_overbought {
        let confirmed = medium.macd_histogram < 0.0 || medium.ema_fast < medium.ema_slow;
        if confirmed {
            direction = Direction::Short;
        }
    }

    // Reversal tag: the trade opposes the long-horizon trend and an RSI
    // extreme confirms the fade.
    let long_trend_up = long.ema_fast > long.ema_slow;
    let signal_type = match direction {
        Direction::Long if !long_trend_up && medium.rsi < sig.rsi_oversold => SignalType::Reversal,
        Direction::Short if long_trend_up && medium.rsi > sig.rsi_overbought => {
            SignalType::Reversal
        }
        _ => SignalType::Trend,
    };

    let entry_price = medium.close;
    if entry_price <= 0.0 || medium.atr <= 0.0 {
        return SignalVerdict::BelowThreshold;
    }

    // ATR stop clamped to the configured price-pct band.
    let risk = &config.risk;
    let stop_distance = (medium.atr * risk.atr_stop_multiplier).clamp(
        entry_price * risk.stop_min_pct / 100.0,
        entry_price * risk.stop_max_pct / 100.0,
    );
    let stop_price = entry_price - direction.sign() * stop_distance;

    // Conservative reference ladder; the executor may upgrade to Fibonacci.
    let ladder_mults = [1.0, 1.5, 2.0];
    let tp_ladder = ladder_mults.map(|m| entry_price + direction.sign() * medium.atr * m);

    // Reward measured to the final ladder leg.
    let rr_ratio = (tp_ladder[2] - entry_price).abs() / stop_distance;

    let family = regime.family();
    if breakdown.score < config.min_score_for(family) {
        debug!(
            symbol,
            score = breakdown.score,
            min = config.min_score_for(family),
            regime = %regime,
            "signal below score minimum"
        );
        return SignalVerdict::BelowThreshold;
    }
    if rr_ratio < config.min_rr_for(family) {
        debug!(symbol, rr_ratio, regime = %regime, "signal below reward-risk minimum");
        return SignalVerdict::BelowThreshold;
    }

    SignalVerdict::Emitted(Box::new(Signal {
        symbol: symbol.to_string(),
        direction,
        score: breakdown.score,
        regime,
        signal_type,
        entry_price,
        stop_price,
        tp_ladder,
        rr_ratio,
        snapshot,
        intel: None,
        liquidity_risk: false,
    }))
}

fn build_components(snapshot: &IndicatorSnapshot, config: &EngineConfig) -> Vec<Component> {
    let m = &snapshot.medium;
    let s = &snapshot.short;
    let l = &snapshot.long;
    let sig = &config.signal;
    let mut components = Vec::with_capacity(8);

    // RSI: strictly beyond the thresholds; the exact boundary is neutral.
    let (rsi_dir, rsi_conf) = if m.rsi < sig.rsi_oversold {
        (1.0, ((sig.rsi_oversold - m.rsi) / sig.rsi_oversold).min(1.0))
    } else if m.rsi > sig.rsi_overbought {
        (-1.0, ((m.rsi - sig.rsi_overbought) / (100.0 - sig.rsi_overbought)).min(1.0))
    } else {
        (0.0, 0.0)
    };
    components.push(Component {
        name: "rsi",
        weight: 0.10,
        direction: rsi_dir,
        confidence: rsi_conf,
    });

    // EMA alignment on the medium horizon.
    let bullish = m.ema_fast > m.ema_slow && m.close > m.ema_fast;
    let bearish = m.ema_fast < m.ema_slow && m.close < m.ema_fast;
    let (ema_dir, ema_conf) = if bullish {
        (1.0, 0.8)
    } else if bearish {
        (-1.0, 0.8)
    } else {
        (0.0, 0.2)
    };
    components.push(Component {
        name: "ema_trend",
        weight: 0.15,
        direction: ema_dir,
        confidence: ema_conf,
    });

    // MACD histogram with cross boost.
    let macd_dir = if m.macd_histogram > 0.0 {
        1.0
    } else if m.macd_histogram < 0.0 {
        -1.0
    } else {
        0.0
    };
    let macd_conf = if m.macd_crossed_up || m.macd_crossed_down {
        0.9
    } else {
        0.55
    };
    components.push(Component {
        name: "macd",
        weight: 0.15,
        direction: macd_dir,
        confidence: macd_conf,
    });

    // ADX amplifies whatever direction the EMAs point.
    components.push(Component {
        name: "adx",
        weight: 0.10,
        direction: if m.adx >= 25.0 { ema_dir } else { 0.0 },
        confidence: (m.adx / 50.0).min(1.0),
    });

    // Bollinger mean-reversion.
    let boll_dir = if m.rsi < 50.0 && m.close < m.ema_slow && m.bb_width_pct > 1.0 {
        1.0
    } else if m.rsi > 50.0 && m.close > m.ema_slow && m.bb_width_pct > 1.0 {
        -1.0
    } else {
        0.0
    };
    components.push(Component {
        name: "bollinger",
        weight: 0.08,
        direction: boll_dir,
        confidence: (m.bb_width_pct / 5.0).min(1.0) * 0.5,
    });

    // Short-horizon VWAP positioning.
    let vwap_dir = if s.vwap_distance_pct > 0.05 && s.vwap_slope_pct > 0.0 {
        1.0
    } else if s.vwap_distance_pct < -0.05 && s.vwap_slope_pct < 0.0 {
        -1.0
    } else {
        0.0
    };
    components.push(Component {
        name: "vwap",
        weight: 0.10,
        direction: vwap_dir,
        confidence: (s.vwap_distance_pct.abs() / 1.0).min(1.0),
    });

    // Volume expansion confirms the short-horizon momentum.
    let momentum_dir = if s.ema_slope_pct > 0.0 { 1.0 } else { -1.0 };
    components.push(Component {
        name: "volume",
        weight: 0.10,
        direction: if m.volume_ratio > 1.2 { momentum_dir } else { 0.0 },
        confidence: ((m.volume_ratio - 1.0) / 2.0).clamp(0.0, 1.0),
    });

    // Long-horizon trend context.
    let long_dir = if l.ema_fast > l.ema_slow {
        1.0
    } else if l.ema_fast < l.ema_slow {
        -1.0
    } else {
        0.0
    };
    components.push(Component {
        name: "long_trend",
        weight: 0.12,
        direction: long_dir,
        confidence: (l.adx / 40.0).min(1.0),
    });

    components
}

// =============================================================================
// Async generator
// =============================================================================

pub struct SignalGenerator {
    client: Arc<FuturesClient>,
    config: Arc<RwLock<EngineConfig>>,
    scout: IntelScout,
}

impl SignalGenerator {
    pub fn new(client: Arc<FuturesClient>, config: Arc<RwLock<EngineConfig>>) -> Self {
        let scout = IntelScout::new(client.clone());
        Self {
            client,
            config,
            scout,
        }
    }

    /// Evaluate one scanner candidate end to end.
    pub async fn evaluate(&self, candidate: &Candidate) -> GatewayResult<SignalVerdict> {
        let config = self.config.read().clone();
        let (short_iv, medium_iv, long_iv) = config.signal.intervals.clone();
        let symbol = candidate.symbol.as_str();

        let short = self.client.get_klines(symbol, &short_iv, 120).await?;
        let medium = self.client.get_klines(symbol, &medium_iv, 120).await?;
        let long = self.client.get_klines(symbol, &long_iv, 120).await?;

        let session = {
            use chrono::Timelike;
            SessionFlags::from_utc_hour(chrono::Utc::now().hour())
        };

        let verdict = build_signal(symbol, &short, &medium, &long, session, &config);
        let SignalVerdict::Emitted(mut signal) = verdict else {
            return Ok(verdict);
        };

        // Market-intelligence overlay.
        let intel = self.scout.assess(symbol, config.signal.depth_floor_usd).await?;

        if intel.hard_blocks(signal.direction, config.signal.mi_hard_block_sentiment) {
            info!(
                symbol,
                direction = %signal.direction,
                sentiment = intel.sentiment,
                "signal hard-blocked by market intelligence"
            );
            return Ok(SignalVerdict::HardBlocked);
        }

        let adjusted =
            (signal.score + intel.score_adjustment(signal.direction)).clamp(0.0, 100.0);
        let family = signal.regime.family();
        signal.liquidity_risk = intel.liquidity_risk;
        signal.intel = Some(intel);
        signal.score = adjusted;

        if adjusted < config.min_score_for(family) {
            debug!(symbol, adjusted, "score fell below minimum after intel adjustment");
            return Ok(SignalVerdict::BelowThreshold);
        }

        info!(
            symbol,
            direction = %signal.direction,
            score = signal.score,
            regime = %signal.regime,
            signal_type = %signal.signal_type,
            rr = signal.rr_ratio,
            "signal emitted"
        );

        Ok(SignalVerdict::Emitted(signal))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// Steady uptrend with expanding volume.
    fn uptrend(bars: usize, interval_ms: i64) -> Vec<Candle> {
        (0..bars)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.8;
                Candle::new(
                    i as i64 * interval_ms,
                    base,
                    base + 1.2,
                    base - 0.8,
                    base + 0.9,
                    1000.0 + i as f64 * 25.0,
                    i as i64 * interval_ms + interval_ms - 1,
                )
            })
            .collect()
    }

    fn downtrend(bars: usize, interval_ms: i64) -> Vec<Candle> {
        (0..bars)
            .map(|i| {
                let base = 300.0 - i as f64 * 0.8;
                Candle::new(
                    i as i64 * interval_ms,
                    base,
                    base + 0.8,
                    base - 1.2,
                    base - 0.9,
                    1000.0 + i as f64 * 25.0,
                    i as i64 * interval_ms + interval_ms - 1,
                )
            })
            .collect()
    }

    fn permissive_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.signal.min_score_trending = 10.0;
        cfg.signal.min_score_ranging = 10.0;
        cfg.signal.min_score_explosive = 10.0;
        cfg.signal.min_rr_trend = 0.1;
        cfg.signal.min_rr_range = 0.1;
        cfg
    }

    fn session() -> SessionFlags {
        SessionFlags::from_utc_hour(14)
    }

    #[test]
    fn uptrend_emits_long() {
        let cfg = permissive_config();
        let verdict = build_signal(
            "BTCUSDT",
            &uptrend(120, 60_000),
            &uptrend(120, 300_000),
            &uptrend(120, 3_600_000),
            session(),
            &cfg,
        );
        match verdict {
            SignalVerdict::Emitted(sig) => {
                assert_eq!(sig.direction, Direction::Long);
                assert_eq!(sig.signal_type, SignalType::Trend);
                assert!(sig.score > 10.0);
                assert!(sig.stop_price < sig.entry_price);
                assert!(sig.tp_ladder[0] > sig.entry_price);
                assert!(sig.tp_ladder[0] < sig.tp_ladder[1]);
                assert!(sig.tp_ladder[1] < sig.tp_ladder[2]);
                assert!(sig.rr_ratio > 0.0);
            }
            other => panic!("expected emission, got {other:?}"),
        }
    }

    #[test]
    fn downtrend_emits_short() {
        let cfg = permissive_config();
        let verdict = build_signal(
            "ETHUSDT",
            &downtrend(120, 60_000),
            &downtrend(120, 300_000),
            &downtrend(120, 3_600_000),
            session(),
            &cfg,
        );
        match verdict {
            SignalVerdict::Emitted(sig) => {
                assert_eq!(sig.direction, Direction::Short);
                assert!(sig.stop_price > sig.entry_price);
                assert!(sig.tp_ladder[0] < sig.entry_price);
            }
            other => panic!("expected emission, got {other:?}"),
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let cfg = permissive_config();
        let short = uptrend(120, 60_000);
        let medium = uptrend(120, 300_000);
        let long = uptrend(120, 3_600_000);

        let a = build_signal("BTCUSDT", &short, &medium, &long, session(), &cfg);
        let b = build_signal("BTCUSDT", &short, &medium, &long, session(), &cfg);

        match (a, b) {
            (SignalVerdict::Emitted(x), SignalVerdict::Emitted(y)) => {
                assert_eq!(x.score, y.score);
                assert_eq!(x.direction, y.direction);
                assert_eq!(x.stop_price, y.stop_price);
                assert_eq!(x.tp_ladder, y.tp_ladder);
            }
            other => panic!("expected two emissions, got {other:?}"),
        }
    }

    #[test]
    fn score_threshold_is_inclusive() {
        // Exactly at the minimum admits; epsilon below rejects.
        let short = uptrend(120, 60_000);
        let medium = uptrend(120, 300_000);
        let long = uptrend(120, 3_600_000);

        let mut cfg = permissive_config();
        let base_score = match build_signal("BTCUSDT", &short, &medium, &long, session(), &cfg) {
            SignalVerdict::Emitted(sig) => sig.score,
            other => panic!("expected emission, got {other:?}"),
        };

        cfg.signal.min_score_trending = base_score;
        cfg.signal.min_score_explosive = base_score;
        assert!(matches!(
            build_signal("BTCUSDT", &short, &medium, &long, session(), &cfg),
            SignalVerdict::Emitted(_)
        ));

        cfg.signal.min_score_trending = base_score + 1e-6;
        cfg.signal.min_score_explosive = base_score + 1e-6;
        assert!(matches!(
            build_signal("BTCUSDT", &short, &medium, &long, session(), &cfg),
            SignalVerdict::BelowThreshold
        ));
    }

    #[test]
    fn insufficient_history_never_emits() {
        let cfg = permissive_config();
        let verdict = build_signal(
            "BTCUSDT",
            &uptrend(30, 60_000),
            &uptrend(120, 300_000),
            &uptrend(120, 3_600_000),
            session(),
            &cfg,
        );
        assert!(matches!(verdict, SignalVerdict::BelowThreshold));
    }

    #[test]
    fn rr_gate_rejects() {
        let mut cfg = permissive_config();
        cfg.signal.min_rr_trend = 50.0; // impossible
        cfg.signal.min_rr_range = 50.0;
        let verdict = build_signal(
            "BTCUSDT",
            &uptrend(120, 60_000),
            &uptrend(120, 300_000),
            &uptrend(120, 3_600_000),
            session(),
            &cfg,
        );
        assert!(matches!(verdict, SignalVerdict::BelowThreshold));
    }

    #[test]
    fn stop_distance_respects_clamp() {
        let mut cfg = permissive_config();
        cfg.risk.stop_min_pct = 1.0;
        cfg.risk.stop_max_pct = 2.0;
        match build_signal(
            "BTCUSDT",
            &uptrend(120, 60_000),
            &uptrend(120, 300_000),
            &uptrend(120, 3_600_000),
            session(),
            &cfg,
        ) {
            SignalVerdict::Emitted(sig) => {
                let dist_pct = (sig.entry_price - sig.stop_price) / sig.entry_price * 100.0;
                assert!(dist_pct >= 1.0 - 1e-9 && dist_pct <= 2.0 + 1e-9);
            }
            other => panic!("expected emission, got {other:?}"),
        }
    }

    #[test]
    fn session_flags_from_hour() {
        let asia = SessionFlags::from_utc_hour(2);
        assert!(asia.asia && !asia.us);
        let overlap = SessionFlags::from_utc_hour(14);
        assert!(overlap.europe && overlap.us);
        let us_only = SessionFlags::from_utc_hour(20);
        assert!(!us_only.europe && us_only.us);
    }
}
