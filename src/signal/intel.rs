// =============================================================================
// Market-Intelligence Overlay — funding, positioning, and book depth
// =============================================================================
//
// Aggregates three venue-side readings into a sentiment score in [-50, +50]:
//
//   - Funding rate (contrarian): crowded longs pay shorts and vice versa.
//   - Top-trader long/short accounts ratio (contrarian at extremes).
//   - Order-book depth within ±5% of mid (a liquidity reading — low depth
//     tags the signal as liquidity-risk; it never blocks).
//
// The overlay adjusts a signal's raw score by at most ±20 points, and
// hard-blocks signals whose direction fights institutional positioning beyond
// the configured sentiment threshold. The hard block wins over any score.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::binance::client::FuturesClient;
use crate::binance::error::GatewayResult;
use crate::types::Direction;

/// Half-width of the order book band considered "near the touch".
const DEPTH_BAND_PCT: f64 = 5.0;

/// Largest score adjustment the overlay may apply.
const MAX_SCORE_ADJUST: f64 = 20.0;

/// Sentiment scale bound.
const SENTIMENT_BOUND: f64 = 50.0;

/// Aggregated overlay attached to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketIntel {
    /// Net sentiment in [-50, +50]; positive is bullish.
    pub sentiment: f64,
    /// Current funding rate, pct per period (0.01 = 0.01%).
    pub funding_rate_pct: f64,
    /// Epoch ms of the next funding event.
    pub next_funding_time: i64,
    /// Top-trader long/short accounts ratio.
    pub long_short_ratio: f64,
    /// USD depth within ±5% of mid.
    pub depth_usd: f64,
    /// Depth below the configured floor. Consumed by the executor, warn-only.
    pub liquidity_risk: bool,
}

impl MarketIntel {
    /// Score adjustment in [-20, +20] for a trade in `direction`. Sentiment
    /// aligned with the trade adds points; opposing sentiment subtracts.
    pub fn score_adjustment(&self, direction: Direction) -> f64 {
        let aligned = direction.sign() * self.sentiment;
        (aligned / SENTIMENT_BOUND * MAX_SCORE_ADJUST).clamp(-MAX_SCORE_ADJUST, MAX_SCORE_ADJUST)
    }

    /// Extreme institutional mis-alignment blocks the signal outright.
    pub fn hard_blocks(&self, direction: Direction, sentiment_threshold: f64) -> bool {
        direction.sign() * self.sentiment <= -sentiment_threshold
    }
}

/// Fold the raw readings into a sentiment score. Pure and deterministic.
pub fn combine(
    funding_rate_pct: f64,
    next_funding_time: i64,
    long_short_ratio: f64,
    depth_usd: f64,
    depth_floor_usd: f64,
) -> MarketIntel {
    // Funding: contrarian bands. Crowded longs (positive funding) lean
    // bearish; crowded shorts lean bullish.
    let funding_component: f64 = if funding_rate_pct >= 0.05 {
        -20.0
    } else if funding_rate_pct >= 0.03 {
        -10.0
    } else if funding_rate_pct <= -0.05 {
        20.0
    } else if funding_rate_pct <= -0.03 {
        12.0
    } else {
        0.0
    };

    // Long/short accounts ratio: contrarian at extremes, confirming inside.
    let ls_component = if long_short_ratio >= 3.0 {
        -15.0
    } else if long_short_ratio >= 2.0 {
        -8.0
    } else if long_short_ratio > 0.0 && long_short_ratio <= 0.33 {
        15.0
    } else if long_short_ratio > 0.0 && long_short_ratio <= 0.5 {
        8.0
    } else {
        0.0
    };

    // Depth contributes confidence, not direction: thin books damp sentiment.
    let liquidity_risk = depth_usd < depth_floor_usd;
    let depth_scale = if liquidity_risk { 0.7 } else { 1.0 };

    let sentiment: f64 =
        ((funding_component + ls_component) * depth_scale).clamp(-SENTIMENT_BOUND, SENTIMENT_BOUND);

    MarketIntel {
        sentiment,
        funding_rate_pct,
        next_funding_time,
        long_short_ratio,
        depth_usd,
        liquidity_risk,
    }
}

/// Fetches the overlay inputs through the gateway.
pub struct IntelScout {
    client: Arc<FuturesClient>,
}

impl IntelScout {
    pub fn new(client: Arc<FuturesClient>) -> Self {
        Self { client }
    }

    /// Assess one symbol. Individual reading failures degrade to neutral
    /// values rather than failing the signal.
    pub async fn assess(&self, symbol: &str, depth_floor_usd: f64) -> GatewayResult<MarketIntel> {
        let funding = self.client.get_funding(symbol).await?;

        let long_short_ratio = match self.client.get_long_short_ratio(symbol).await {
            Ok(r) => r,
            Err(e) => {
                debug!(symbol, error = %e, "long/short ratio unavailable — neutral");
                1.0
            }
        };

        let depth_usd = match self.client.get_order_book(symbol).await {
            Ok(book) => book.depth_usd_within_pct(DEPTH_BAND_PCT),
            Err(e) => {
                debug!(symbol, error = %e, "order book unavailable — assuming deep");
                depth_floor_usd
            }
        };

        let intel = combine(
            funding.rate * 100.0,
            funding.next_funding_time,
            long_short_ratio,
            depth_usd,
            depth_floor_usd,
        );

        debug!(
            symbol,
            sentiment = intel.sentiment,
            funding_pct = intel.funding_rate_pct,
            ls_ratio = intel.long_short_ratio,
            depth_usd = intel.depth_usd,
            liquidity_risk = intel.liquidity_risk,
            "market intel assessed"
        );

        Ok(intel)
    }
}
