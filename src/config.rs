// =============================================================================
// Engine Configuration — Hot-reloadable settings with atomic save
// =============================================================================
//
// Every threshold the engine consults lives here as a named, typed, defaulted
// knob. The whole struct is held behind an `Arc<RwLock<EngineConfig>>` so the
// control surface can hot-reload values at runtime.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry serde defaults so adding new knobs never breaks
// loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_cycle_interval_secs() -> u64 {
    180
}

fn default_signal_deadline_secs() -> u64 {
    10
}

fn default_universe_top_n() -> usize {
    800
}

fn default_max_symbols() -> usize {
    80
}

fn default_min_quote_volume_usd() -> f64 {
    5_000_000.0
}

fn default_dynamic_whitelist_top_k() -> usize {
    3
}

fn default_intervals() -> (String, String, String) {
    ("1m".to_string(), "5m".to_string(), "1h".to_string())
}

fn default_min_score_trending() -> f64 {
    70.0
}

fn default_min_score_ranging() -> f64 {
    75.0
}

fn default_min_score_explosive() -> f64 {
    80.0
}

fn default_min_rr_trend() -> f64 {
    1.3
}

fn default_min_rr_range() -> f64 {
    1.1
}

fn default_rsi_oversold() -> f64 {
    30.0
}

fn default_rsi_overbought() -> f64 {
    70.0
}

fn default_mi_hard_block_sentiment() -> f64 {
    35.0
}

fn default_depth_floor_usd() -> f64 {
    100_000.0
}

fn default_risk_per_trade_pct() -> f64 {
    1.4
}

fn default_max_positions() -> u32 {
    5
}

fn default_reversal_extra_pct() -> f64 {
    0.5
}

fn default_dca_reserve_pct() -> f64 {
    20.0
}

fn default_max_margin_per_position_pct() -> f64 {
    15.0
}

fn default_max_portfolio_risk_pct() -> f64 {
    10.0
}

fn default_leverage() -> u32 {
    5
}

fn default_cross_margin_min_score() -> f64 {
    85.0
}

fn default_high_priority_score() -> f64 {
    85.0
}

fn default_atr_stop_multiplier() -> f64 {
    1.5
}

fn default_stop_min_pct() -> f64 {
    0.5
}

fn default_stop_max_pct() -> f64 {
    3.0
}

fn default_daily_loss_limit_pct() -> f64 {
    5.0
}

fn default_max_consecutive_stops() -> u32 {
    3
}

fn default_cooldown_hours() -> f64 {
    4.0
}

fn default_order_timeout_sec() -> u64 {
    8
}

fn default_entry_attempts() -> u32 {
    3
}

fn default_price_buffer_bps() -> f64 {
    2.0
}

fn default_headroom_min_pct() -> f64 {
    20.0
}

fn default_reduce_step_pct() -> f64 {
    20.0
}

fn default_margin_retry_limit() -> u32 {
    3
}

fn default_taker_fee_pct() -> f64 {
    0.05
}

fn default_monitor_interval_secs() -> u64 {
    3
}

fn default_breakeven_threshold_pct() -> f64 {
    8.0
}

fn default_trailing_activation_pct() -> f64 {
    15.0
}

fn default_trailing_callback_min_pct() -> f64 {
    0.5
}

fn default_trailing_callback_max_pct() -> f64 {
    3.0
}

fn default_tp_ladder_levels() -> Vec<f64> {
    vec![20.0, 40.0, 60.0]
}

fn default_tp_ladder_fractions() -> Vec<f64> {
    vec![0.30, 0.40, 0.30]
}

fn default_dca_levels() -> Vec<f64> {
    vec![-3.0, -6.0, -10.0]
}

fn default_dca_fractions() -> Vec<f64> {
    vec![0.30, 0.40, 0.30]
}

fn default_funding_exit_window_min() -> i64 {
    30
}

fn default_funding_exit_min_rate_pct() -> f64 {
    0.08
}

fn default_funding_exit_min_profit_pct() -> f64 {
    0.5
}

fn default_time_exit_hours() -> f64 {
    6.0
}

fn default_time_exit_pnl_floor_pct() -> f64 {
    -5.0
}

fn default_time_exit_pnl_ceil_pct() -> f64 {
    -2.0
}

fn default_emergency_loss_pct() -> f64 {
    25.0
}

fn default_heartbeat_stale_secs() -> u64 {
    90
}

fn default_max_restarts_per_window() -> u32 {
    3
}

fn default_restart_window_min() -> u64 {
    30
}

// =============================================================================
// Config sections
// =============================================================================

/// Universe screening knobs consumed by the market scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Rank the top-N symbols by 24h quote volume before any other filter.
    #[serde(default = "default_universe_top_n")]
    pub universe_top_n: usize,

    /// Hard cap on candidates handed to a single cycle.
    #[serde(default = "default_max_symbols")]
    pub max_symbols: usize,

    /// Minimum 24h quote volume in USD to be considered at all.
    #[serde(default = "default_min_quote_volume_usd")]
    pub min_quote_volume_usd: f64,

    /// Static whitelist. Empty means "everything that passes the filters".
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Whitelist applied instead of `whitelist` when running on testnet.
    #[serde(default)]
    pub testnet_whitelist: Vec<String>,

    /// Symbols that scored 100 earn a volume-floor exemption for the day.
    #[serde(default = "default_true")]
    pub dynamic_whitelist: bool,

    /// How many score-100 symbols may be admitted per UTC day.
    #[serde(default = "default_dynamic_whitelist_top_k")]
    pub dynamic_whitelist_top_k: usize,

    /// Symbols never traded regardless of any other rule.
    #[serde(default)]
    pub blacklist: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            universe_top_n: default_universe_top_n(),
            max_symbols: default_max_symbols(),
            min_quote_volume_usd: default_min_quote_volume_usd(),
            whitelist: Vec::new(),
            testnet_whitelist: Vec::new(),
            dynamic_whitelist: true,
            dynamic_whitelist_top_k: default_dynamic_whitelist_top_k(),
            blacklist: Vec::new(),
        }
    }
}

/// Signal generation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// (short, medium, long) kline horizons.
    #[serde(default = "default_intervals")]
    pub intervals: (String, String, String),

    /// Minimum score per regime family.
    #[serde(default = "default_min_score_trending")]
    pub min_score_trending: f64,
    #[serde(default = "default_min_score_ranging")]
    pub min_score_ranging: f64,
    #[serde(default = "default_min_score_explosive")]
    pub min_score_explosive: f64,

    /// Minimum reward-risk ratio for trend-following entries.
    #[serde(default = "default_min_rr_trend")]
    pub min_rr_trend: f64,

    /// Minimum reward-risk ratio for range / reversal entries.
    #[serde(default = "default_min_rr_range")]
    pub min_rr_range: f64,

    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,

    /// Sentiment magnitude (against the trade direction) that hard-blocks a
    /// signal regardless of its score.
    #[serde(default = "default_mi_hard_block_sentiment")]
    pub mi_hard_block_sentiment: f64,

    /// Order-book depth within ±5% of mid below which the signal carries a
    /// liquidity-risk tag. Warn-only; never blocks.
    #[serde(default = "default_depth_floor_usd")]
    pub depth_floor_usd: f64,

    /// Per-symbol signal computation deadline.
    #[serde(default = "default_signal_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            intervals: default_intervals(),
            min_score_trending: default_min_score_trending(),
            min_score_ranging: default_min_score_ranging(),
            min_score_explosive: default_min_score_explosive(),
            min_rr_trend: default_min_rr_trend(),
            min_rr_range: default_min_rr_range(),
            rsi_oversold: default_rsi_oversold(),
            rsi_overbought: default_rsi_overbought(),
            mi_hard_block_sentiment: default_mi_hard_block_sentiment(),
            depth_floor_usd: default_depth_floor_usd(),
            deadline_secs: default_signal_deadline_secs(),
        }
    }
}

/// Capital, sizing, and circuit-breaker knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of balance risked per trade, as a percentage.
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: f64,

    /// Trend-bucket position limit.
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,

    /// Reversal bucket size as a fraction of `max_positions` (floored).
    #[serde(default = "default_reversal_extra_pct")]
    pub reversal_extra_pct: f64,

    /// Capital share reserved for DCA re-entries, as a percentage.
    #[serde(default = "default_dca_reserve_pct")]
    pub dca_reserve_pct: f64,

    /// Maximum margin a single position may consume, pct of wallet.
    #[serde(default = "default_max_margin_per_position_pct")]
    pub max_margin_per_position_pct: f64,

    /// Maximum aggregate open risk, pct of wallet.
    #[serde(default = "default_max_portfolio_risk_pct")]
    pub max_portfolio_risk_pct: f64,

    #[serde(default = "default_leverage")]
    pub default_leverage: u32,

    /// Scores at or above this use cross margin; below use isolated.
    #[serde(default = "default_cross_margin_min_score")]
    pub cross_margin_min_score: f64,

    /// Minimum score admitted while the capital zone is YELLOW.
    #[serde(default = "default_high_priority_score")]
    pub high_priority_score: f64,

    /// ATR multiple used for the stop distance.
    #[serde(default = "default_atr_stop_multiplier")]
    pub atr_stop_multiplier: f64,

    /// Stop distance clamp as a percentage of price.
    #[serde(default = "default_stop_min_pct")]
    pub stop_min_pct: f64,
    #[serde(default = "default_stop_max_pct")]
    pub stop_max_pct: f64,

    /// Daily loss (realized + unrealized) that trips the breaker, pct of
    /// day-start balance.
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: f64,

    /// Consecutive stop-outs that trip the breaker.
    #[serde(default = "default_max_consecutive_stops")]
    pub max_consecutive_stops: u32,

    /// How long the engine stays paused after a breaker trip.
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: f64,

    /// Same-direction exposure cap per correlation group.
    #[serde(default)]
    pub correlation_groups: Vec<Vec<String>>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_pct: default_risk_per_trade_pct(),
            max_positions: default_max_positions(),
            reversal_extra_pct: default_reversal_extra_pct(),
            dca_reserve_pct: default_dca_reserve_pct(),
            max_margin_per_position_pct: default_max_margin_per_position_pct(),
            max_portfolio_risk_pct: default_max_portfolio_risk_pct(),
            default_leverage: default_leverage(),
            cross_margin_min_score: default_cross_margin_min_score(),
            high_priority_score: default_high_priority_score(),
            atr_stop_multiplier: default_atr_stop_multiplier(),
            stop_min_pct: default_stop_min_pct(),
            stop_max_pct: default_stop_max_pct(),
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            max_consecutive_stops: default_max_consecutive_stops(),
            cooldown_hours: default_cooldown_hours(),
            correlation_groups: Vec::new(),
        }
    }
}

/// Order placement knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Seconds to wait for a limit fill before cancelling and re-quoting.
    #[serde(default = "default_order_timeout_sec")]
    pub order_timeout_sec: u64,

    /// Limit attempts before the market fallback.
    #[serde(default = "default_entry_attempts")]
    pub entry_attempts: u32,

    /// Post-only (GTX) limit entries.
    #[serde(default = "default_true")]
    pub post_only: bool,

    /// Whether the final attempt may fall back to a market order.
    #[serde(default = "default_true")]
    pub allow_market_fallback: bool,

    /// Limit-price buffer in basis points from the touch.
    #[serde(default = "default_price_buffer_bps")]
    pub price_buffer_bps: f64,

    /// Minimum distance from entry to estimated liquidation, pct.
    #[serde(default = "default_headroom_min_pct")]
    pub headroom_min_pct: f64,

    /// Size reduction step used by headroom and margin-error retries, pct.
    #[serde(default = "default_reduce_step_pct")]
    pub reduce_step_pct: f64,

    /// Retries after an insufficient-margin rejection.
    #[serde(default = "default_margin_retry_limit")]
    pub margin_retry_limit: u32,

    /// Taker fee per side, pct of notional. Used for breakeven math.
    #[serde(default = "default_taker_fee_pct")]
    pub taker_fee_pct: f64,

    /// Enable momentum-gated Fibonacci TP ladder.
    #[serde(default = "default_true")]
    pub dynamic_tp: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            order_timeout_sec: default_order_timeout_sec(),
            entry_attempts: default_entry_attempts(),
            post_only: true,
            allow_market_fallback: true,
            price_buffer_bps: default_price_buffer_bps(),
            headroom_min_pct: default_headroom_min_pct(),
            reduce_step_pct: default_reduce_step_pct(),
            margin_retry_limit: default_margin_retry_limit(),
            taker_fee_pct: default_taker_fee_pct(),
            dynamic_tp: true,
        }
    }
}

/// Position-monitor thresholds. All `*_pct` profit values are ROI on margin
/// (price move × leverage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_breakeven_threshold_pct")]
    pub breakeven_threshold_pct: f64,

    #[serde(default = "default_trailing_activation_pct")]
    pub trailing_activation_pct: f64,

    /// Trailing callback clamp bounds, pct of price.
    #[serde(default = "default_trailing_callback_min_pct")]
    pub trailing_callback_min_pct: f64,
    #[serde(default = "default_trailing_callback_max_pct")]
    pub trailing_callback_max_pct: f64,

    /// Profit levels (ROI pct) at which ladder legs fire.
    #[serde(default = "default_tp_ladder_levels")]
    pub tp_ladder_levels: Vec<f64>,

    /// Fraction of the position realized at each ladder leg.
    #[serde(default = "default_tp_ladder_fractions")]
    pub tp_ladder_fractions: Vec<f64>,

    /// Drawdown levels (ROI pct, negative) at which DCA rungs fire.
    #[serde(default = "default_dca_levels")]
    pub dca_levels: Vec<f64>,

    /// Fraction of the *original* size added at each DCA rung.
    #[serde(default = "default_dca_fractions")]
    pub dca_fractions: Vec<f64>,

    #[serde(default = "default_funding_exit_window_min")]
    pub funding_exit_window_min: i64,

    /// Adversarial funding rate that justifies an early exit, pct.
    #[serde(default = "default_funding_exit_min_rate_pct")]
    pub funding_exit_min_rate_pct: f64,

    #[serde(default = "default_funding_exit_min_profit_pct")]
    pub funding_exit_min_profit_pct: f64,

    #[serde(default = "default_time_exit_hours")]
    pub time_exit_hours: f64,

    /// Stale positions inside [floor, ceil] ROI are closed by the time exit.
    #[serde(default = "default_time_exit_pnl_floor_pct")]
    pub time_exit_pnl_floor_pct: f64,
    #[serde(default = "default_time_exit_pnl_ceil_pct")]
    pub time_exit_pnl_ceil_pct: f64,

    /// Unrealized loss (ROI pct) that forces an immediate market close.
    #[serde(default = "default_emergency_loss_pct")]
    pub emergency_loss_pct: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_monitor_interval_secs(),
            breakeven_threshold_pct: default_breakeven_threshold_pct(),
            trailing_activation_pct: default_trailing_activation_pct(),
            trailing_callback_min_pct: default_trailing_callback_min_pct(),
            trailing_callback_max_pct: default_trailing_callback_max_pct(),
            tp_ladder_levels: default_tp_ladder_levels(),
            tp_ladder_fractions: default_tp_ladder_fractions(),
            dca_levels: default_dca_levels(),
            dca_fractions: default_dca_fractions(),
            funding_exit_window_min: default_funding_exit_window_min(),
            funding_exit_min_rate_pct: default_funding_exit_min_rate_pct(),
            funding_exit_min_profit_pct: default_funding_exit_min_profit_pct(),
            time_exit_hours: default_time_exit_hours(),
            time_exit_pnl_floor_pct: default_time_exit_pnl_floor_pct(),
            time_exit_pnl_ceil_pct: default_time_exit_pnl_ceil_pct(),
            emergency_loss_pct: default_emergency_loss_pct(),
        }
    }
}

/// Watchdog knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_heartbeat_stale_secs")]
    pub heartbeat_stale_secs: u64,

    #[serde(default = "default_max_restarts_per_window")]
    pub max_restarts_per_window: u32,

    #[serde(default = "default_restart_window_min")]
    pub restart_window_min: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_stale_secs: default_heartbeat_stale_secs(),
            max_restarts_per_window: default_max_restarts_per_window(),
            restart_window_min: default_restart_window_min(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Meridian engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run against the futures testnet instead of production.
    #[serde(default = "default_true")]
    pub testnet: bool,

    /// Dry-run: full pipeline, no orders reach the exchange.
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Seconds between orchestrator cycles.
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub signal: SignalConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            testnet: true,
            dry_run: true,
            cycle_interval_secs: default_cycle_interval_secs(),
            scanner: ScannerConfig::default(),
            signal: SignalConfig::default(),
            risk: RiskConfig::default(),
            executor: ExecutorConfig::default(),
            monitor: MonitorConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// Partial update applied by the control surface. Only present fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub cycle_interval_secs: Option<u64>,
    pub min_score_trending: Option<f64>,
    pub min_score_ranging: Option<f64>,
    pub max_positions: Option<u32>,
    pub max_symbols: Option<usize>,
    pub symbols: Option<Vec<String>>,
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            testnet = config.testnet,
            dry_run = config.dry_run,
            cycle_interval_secs = config.cycle_interval_secs,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Apply a control-surface patch in place. Returns `true` if any field
    /// changed. Patched knobs never require protection orders to be re-armed,
    /// so the update takes effect on the next cycle / monitor tick.
    pub fn apply_patch(&mut self, patch: &ConfigPatch) -> bool {
        let mut changed = false;

        if let Some(v) = patch.cycle_interval_secs {
            changed |= self.cycle_interval_secs != v;
            self.cycle_interval_secs = v;
        }
        if let Some(v) = patch.min_score_trending {
            changed |= self.signal.min_score_trending != v;
            self.signal.min_score_trending = v;
        }
        if let Some(v) = patch.min_score_ranging {
            changed |= self.signal.min_score_ranging != v;
            self.signal.min_score_ranging = v;
        }
        if let Some(v) = patch.max_positions {
            changed |= self.risk.max_positions != v;
            self.risk.max_positions = v;
        }
        if let Some(v) = patch.max_symbols {
            changed |= self.scanner.max_symbols != v;
            self.scanner.max_symbols = v;
        }
        if let Some(syms) = &patch.symbols {
            changed |= &self.scanner.whitelist != syms;
            self.scanner.whitelist = syms.clone();
        }

        changed
    }

    /// Minimum score for the given regime family.
    pub fn min_score_for(&self, family: crate::types::RegimeFamily) -> f64 {
        match family {
            crate::types::RegimeFamily::Trending => self.signal.min_score_trending,
            crate::types::RegimeFamily::Ranging => self.signal.min_score_ranging,
            crate::types::RegimeFamily::Explosive => self.signal.min_score_explosive,
        }
    }

    /// Minimum reward-risk for the given regime family.
    pub fn min_rr_for(&self, family: crate::types::RegimeFamily) -> f64 {
        match family {
            crate::types::RegimeFamily::Trending | crate::types::RegimeFamily::Explosive => {
                self.signal.min_rr_trend
            }
            crate::types::RegimeFamily::Ranging => self.signal.min_rr_range,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegimeFamily;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert!(cfg.testnet);
        assert!(cfg.dry_run);
        assert_eq!(cfg.scanner.universe_top_n, 800);
        assert_eq!(cfg.scanner.max_symbols, 80);
        assert!((cfg.risk.risk_per_trade_pct - 1.4).abs() < f64::EPSILON);
        assert_eq!(cfg.risk.max_positions, 5);
        assert!((cfg.risk.reversal_extra_pct - 0.5).abs() < f64::EPSILON);
        assert!((cfg.risk.dca_reserve_pct - 20.0).abs() < f64::EPSILON);
        assert_eq!(cfg.risk.max_consecutive_stops, 3);
        assert!((cfg.monitor.breakeven_threshold_pct - 8.0).abs() < f64::EPSILON);
        assert!((cfg.monitor.trailing_activation_pct - 15.0).abs() < f64::EPSILON);
        assert_eq!(cfg.monitor.funding_exit_window_min, 30);
        assert!((cfg.monitor.time_exit_hours - 6.0).abs() < f64::EPSILON);
        assert_eq!(cfg.monitor.tp_ladder_levels, vec![20.0, 40.0, 60.0]);
        assert_eq!(cfg.monitor.dca_levels, vec![-3.0, -6.0, -10.0]);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.dry_run);
        assert_eq!(cfg.cycle_interval_secs, 180);
        assert_eq!(cfg.executor.entry_attempts, 3);
        assert_eq!(cfg.executor.order_timeout_sec, 8);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "dry_run": false, "risk": { "max_positions": 2 } }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert!(!cfg.dry_run);
        assert_eq!(cfg.risk.max_positions, 2);
        assert!((cfg.risk.risk_per_trade_pct - 1.4).abs() < f64::EPSILON);
        assert_eq!(cfg.scanner.max_symbols, 80);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.cycle_interval_secs, cfg2.cycle_interval_secs);
        assert_eq!(cfg.monitor.tp_ladder_levels, cfg2.monitor.tp_ladder_levels);
        assert_eq!(cfg.risk.max_positions, cfg2.risk.max_positions);
    }

    #[test]
    fn patch_applies_only_present_fields() {
        let mut cfg = EngineConfig::default();
        let patch = ConfigPatch {
            max_positions: Some(3),
            min_score_trending: Some(65.0),
            ..ConfigPatch::default()
        };
        assert!(cfg.apply_patch(&patch));
        assert_eq!(cfg.risk.max_positions, 3);
        assert!((cfg.signal.min_score_trending - 65.0).abs() < f64::EPSILON);
        // Untouched knobs keep their defaults.
        assert_eq!(cfg.scanner.max_symbols, 80);
    }

    #[test]
    fn patch_with_no_fields_reports_unchanged() {
        let mut cfg = EngineConfig::default();
        assert!(!cfg.apply_patch(&ConfigPatch::default()));
    }

    #[test]
    fn regime_thresholds_resolve_by_family() {
        let cfg = EngineConfig::default();
        assert!(cfg.min_score_for(RegimeFamily::Ranging) > cfg.min_score_for(RegimeFamily::Trending));
        assert!(cfg.min_rr_for(RegimeFamily::Trending) > cfg.min_rr_for(RegimeFamily::Ranging));
    }
}
