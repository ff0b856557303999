// =============================================================================
// Position Monitor — per-position state machine on a fixed cadence
// =============================================================================
//
// Polls every open position and drives one prioritized action per tick:
//
//   1. Emergency close        — unrealized loss beyond the hard maximum.
//   2. Funding-aware exit     — adversarial funding imminent while in profit.
//   3. Stop-hit safety net    — mark crossed the stop (simulated fills in
//                               dry-run; a backstop for the real stop order).
//   4. Protection repair      — coverage shortfall re-issues the stop.
//   5. Breakeven arm          — move SL to fee-adjusted breakeven; once
//                               armed it never retracts.
//   6. Trailing stop (ATR)    — callback recomputed on new bars, peak
//                               monotonic in the position's favour.
//   7. TP ladder              — realize 30/40/30 at the profit levels.
//   8. DCA                    — add 30/40/30 of the original size at the
//                               drawdown rungs, bounded by the DCA reserve.
//   9. Time exit              — stale positions in the slightly-red band.
//
// Trailing watermarks are updated before the decision pass, so a single tick
// observes the freshest peak. All exchange mutations go through the executor
// under the symbol lock; a transition is place-new → confirm → cancel-old.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::binance::client::FuturesClient;
use crate::config::{EngineConfig, MonitorConfig};
use crate::executor::OrderExecutor;
use crate::indicators::atr::atr;
use crate::position::{Position, PositionBook, TrailingState};
use crate::risk::RiskManager;
use crate::supervisor::Heartbeat;
use crate::telemetry::{Notification, Telemetry};
use crate::types::{Direction, ExitReason};

/// Funding interval on the venue.
const FUNDING_PERIOD_HOURS: f64 = 8.0;

// ---------------------------------------------------------------------------
// Tick inputs and decisions
// ---------------------------------------------------------------------------

/// Everything `decide` needs about the world outside the position.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub mark: f64,
    /// Medium-horizon ATR, when bars were available this tick.
    pub atr: Option<f64>,
    /// Funding rate, pct per period.
    pub funding_rate_pct: f64,
    /// Epoch ms of the next funding event.
    pub next_funding_time: i64,
    pub now: DateTime<Utc>,
    /// Taker fee per side, pct.
    pub taker_fee_pct: f64,
    /// Margin still available in the DCA reserve.
    pub dca_reserve_remaining: f64,
}

/// One prioritized action for one position.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorAction {
    CloseFull(ExitReason),
    RestoreProtection { stop: f64 },
    ArmBreakeven { stop: f64 },
    TrailingExit,
    TakeProfitLeg { leg: u8, qty: f64, final_leg: bool },
    Dca { rung: u8, qty: f64 },
    DcaSkipMargin { rung: u8 },
    Hold,
}

/// Fee-adjusted breakeven price: entry shifted by the round-trip cost in the
/// position's favour.
pub fn breakeven_price(direction: Direction, entry: f64, taker_fee_pct: f64) -> f64 {
    entry * (1.0 + direction.sign() * 2.0 * taker_fee_pct / 100.0)
}

/// Trailing callback: clamp(2·ATR / price, min%, max%).
pub fn trailing_callback_pct(atr_value: f64, price: f64, cfg: &MonitorConfig) -> f64 {
    if price <= 0.0 {
        return cfg.trailing_callback_min_pct;
    }
    (2.0 * atr_value / price * 100.0)
        .clamp(cfg.trailing_callback_min_pct, cfg.trailing_callback_max_pct)
}

/// Margin already consumed by a position's filled DCA rungs.
pub fn dca_margin_used(pos: &Position, cfg: &MonitorConfig) -> f64 {
    let filled = (pos.dca_filled as usize).min(cfg.dca_fractions.len());
    let fraction_sum: f64 = cfg.dca_fractions[..filled].iter().sum();
    fraction_sum * pos.original_quantity * pos.entry_price / pos.leverage as f64
}

/// Update trailing activation, peak, and callback. Runs before `decide` each
/// tick. The peak never moves against the position.
pub fn update_trailing(pos: &mut Position, ctx: &TickContext, cfg: &MonitorConfig) {
    let pnl = pos.pnl_pct(ctx.mark);

    match &mut pos.trailing {
        None => {
            if pnl >= cfg.trailing_activation_pct {
                let callback = ctx
                    .atr
                    .map(|a| trailing_callback_pct(a, ctx.mark, cfg))
                    .unwrap_or(cfg.trailing_callback_min_pct);
                info!(
                    symbol = %pos.symbol,
                    pnl_pct = pnl,
                    callback_pct = callback,
                    "trailing stop activated"
                );
                pos.trailing = Some(TrailingState {
                    peak_price: ctx.mark,
                    callback_pct: callback,
                });
            }
        }
        Some(state) => {
            let improved = match pos.direction {
                Direction::Long => ctx.mark > state.peak_price,
                Direction::Short => ctx.mark < state.peak_price,
            };
            if improved {
                state.peak_price = ctx.mark;
            }
            if let Some(a) = ctx.atr {
                state.callback_pct = trailing_callback_pct(a, ctx.mark, cfg);
            }
        }
    }
}

/// The prioritized decision for one position. Pure.
pub fn decide(pos: &Position, ctx: &TickContext, cfg: &MonitorConfig) -> MonitorAction {
    let pnl = pos.pnl_pct(ctx.mark);

    // 1. Emergency.
    if pnl <= -cfg.emergency_loss_pct {
        return MonitorAction::CloseFull(ExitReason::Emergency);
    }

    // 2. Funding-aware exit: adversarial rate, event inside the window, and
    //    enough profit to be worth protecting.
    let minutes_to_funding = (ctx.next_funding_time - ctx.now.timestamp_millis()) / 60_000;
    let adversarial = match pos.direction {
        Direction::Long => ctx.funding_rate_pct >= cfg.funding_exit_min_rate_pct,
        Direction::Short => ctx.funding_rate_pct <= -cfg.funding_exit_min_rate_pct,
    };
    if adversarial
        && (0..=cfg.funding_exit_window_min).contains(&minutes_to_funding)
        && pnl >= cfg.funding_exit_min_profit_pct
    {
        return MonitorAction::CloseFull(ExitReason::Funding);
    }

    // 3. Stop-hit safety net.
    let stop_hit = match pos.direction {
        Direction::Long => pos.stop_price > 0.0 && ctx.mark <= pos.stop_price,
        Direction::Short => pos.stop_price > 0.0 && ctx.mark >= pos.stop_price,
    };
    if stop_hit {
        let breakeven_stop = pos.breakeven_armed
            && match pos.direction {
                Direction::Long => pos.stop_price >= pos.entry_price,
                Direction::Short => pos.stop_price <= pos.entry_price,
            };
        let reason = if breakeven_stop {
            ExitReason::Breakeven
        } else {
            ExitReason::StopLoss
        };
        return MonitorAction::CloseFull(reason);
    }

    // 4. Protection repair (protocol violation path).
    if !pos.is_fully_protected() {
        return MonitorAction::RestoreProtection {
            stop: pos.stop_price,
        };
    }

    // 5. Breakeven arm. Once armed it never retracts.
    if !pos.breakeven_armed && pnl >= cfg.breakeven_threshold_pct {
        return MonitorAction::ArmBreakeven {
            stop: breakeven_price(pos.direction, pos.entry_price, ctx.taker_fee_pct),
        };
    }

    // 6. Trailing exit.
    if let Some(state) = &pos.trailing {
        let retraced = match pos.direction {
            Direction::Long => ctx.mark <= state.peak_price * (1.0 - state.callback_pct / 100.0),
            Direction::Short => ctx.mark >= state.peak_price * (1.0 + state.callback_pct / 100.0),
        };
        if retraced {
            return MonitorAction::TrailingExit;
        }
    }

    // 7. TP ladder.
    let levels = &cfg.tp_ladder_levels;
    let fractions = &cfg.tp_ladder_fractions;
    let next_leg = pos.tp_filled as usize;
    if next_leg < levels.len() && pnl >= levels[next_leg] {
        let final_leg = next_leg == levels.len() - 1;
        let qty = if final_leg {
            pos.quantity
        } else {
            (fractions[next_leg] * pos.original_quantity).min(pos.quantity)
        };
        return MonitorAction::TakeProfitLeg {
            leg: next_leg as u8 + 1,
            qty,
            final_leg,
        };
    }

    // 8. DCA rungs.
    let rung = pos.dca_filled as usize;
    if rung < cfg.dca_levels.len() && pnl <= cfg.dca_levels[rung] {
        let qty = cfg.dca_fractions[rung] * pos.original_quantity;
        let margin_required = qty * ctx.mark / pos.leverage as f64;
        if margin_required > ctx.dca_reserve_remaining {
            return MonitorAction::DcaSkipMargin {
                rung: rung as u8 + 1,
            };
        }
        return MonitorAction::Dca {
            rung: rung as u8 + 1,
            qty,
        };
    }

    // 9. Time exit: stale and slightly red.
    if pos.age_hours(ctx.now) > cfg.time_exit_hours
        && pnl >= cfg.time_exit_pnl_floor_pct
        && pnl <= cfg.time_exit_pnl_ceil_pct
    {
        return MonitorAction::CloseFull(ExitReason::Time);
    }

    MonitorAction::Hold
}

// ---------------------------------------------------------------------------
// Monitor loop
// ---------------------------------------------------------------------------

pub struct PositionMonitor {
    client: Arc<FuturesClient>,
    book: Arc<PositionBook>,
    executor: Arc<OrderExecutor>,
    risk: Arc<RiskManager>,
    config: Arc<RwLock<EngineConfig>>,
    telemetry: Arc<Telemetry>,
    heartbeat: Arc<Heartbeat>,
}

impl PositionMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<FuturesClient>,
        book: Arc<PositionBook>,
        executor: Arc<OrderExecutor>,
        risk: Arc<RiskManager>,
        config: Arc<RwLock<EngineConfig>>,
        telemetry: Arc<Telemetry>,
        heartbeat: Arc<Heartbeat>,
    ) -> Self {
        Self {
            client,
            book,
            executor,
            risk,
            config,
            telemetry,
            heartbeat,
        }
    }

    /// Run forever. Spawn as a background task.
    pub async fn run(self: Arc<Self>) {
        let poll_secs = self.config.read().monitor.poll_interval_secs.max(1);
        info!(interval_secs = poll_secs, "position monitor started");

        let mut ticker = interval(Duration::from_secs(poll_secs));
        loop {
            ticker.tick().await;
            self.heartbeat.beat();
            self.tick().await;
        }
    }

    /// One full evaluation pass over all open positions.
    pub async fn tick(&self) {
        let positions = self.book.open_positions();
        if positions.is_empty() {
            return;
        }
        let config = self.config.read().clone();
        debug!(count = positions.len(), "monitor tick");

        for position in positions {
            if let Err(e) = self.evaluate_position(&position.symbol, &config).await {
                error!(symbol = %position.symbol, error = %e, "monitor evaluation failed");
            }
        }
    }

    async fn evaluate_position(&self, symbol: &str, config: &EngineConfig) -> anyhow::Result<()> {
        // World state for this symbol.
        let funding = self.client.get_funding(symbol).await?;
        let mark = funding.mark_price;
        if mark <= 0.0 {
            warn!(symbol, "invalid mark price — skipping evaluation");
            return Ok(());
        }

        let atr_value = match self
            .client
            .get_klines(symbol, &config.signal.intervals.1, 60)
            .await
        {
            Ok(candles) => atr(&candles, 14),
            Err(e) => {
                debug!(symbol, error = %e, "klines unavailable for trailing recompute");
                None
            }
        };

        let capital = self.risk.capital();
        let reserve_total = capital.total_wallet * config.risk.dca_reserve_pct / 100.0;
        let reserve_used: f64 = self
            .book
            .open_positions()
            .iter()
            .map(|p| dca_margin_used(p, &config.monitor))
            .sum();
        let dca_reserve_remaining = (reserve_total - reserve_used).min(capital.available).max(0.0);

        let ctx = TickContext {
            mark,
            atr: atr_value,
            funding_rate_pct: funding.rate * 100.0,
            next_funding_time: funding.next_funding_time,
            now: Utc::now(),
            taker_fee_pct: config.executor.taker_fee_pct,
            dca_reserve_remaining,
        };

        // Watermarks, funding accrual, and trailing state first.
        self.book.update(symbol, |p| {
            p.update_mark(mark);
            accrue_funding(p, &ctx);
            update_trailing(p, &ctx, &config.monitor);
        });

        let Some(position) = self.book.get(symbol) else {
            return Ok(());
        };

        let action = decide(&position, &ctx, &config.monitor);
        if action != MonitorAction::Hold {
            debug!(symbol, action = ?action, pnl_pct = position.pnl_pct(mark), "monitor action");
        }
        self.apply(symbol, &position, action, &ctx).await
    }

    async fn apply(
        &self,
        symbol: &str,
        position: &Position,
        action: MonitorAction,
        ctx: &TickContext,
    ) -> anyhow::Result<()> {
        match action {
            MonitorAction::Hold => {}

            MonitorAction::CloseFull(reason) => {
                let meta = self.executor.persisted_meta(symbol);
                if let Some(record) = self.executor.close_full_market(symbol, reason).await? {
                    self.risk.register_close(meta.signal_type, &record);
                }
            }

            MonitorAction::RestoreProtection { stop } => {
                warn!(symbol, stop, "protection coverage shortfall — re-issuing stop");
                self.executor.replace_stop(symbol, stop).await?;
            }

            MonitorAction::ArmBreakeven { stop } => {
                self.executor.replace_stop(symbol, stop).await?;
                self.book.update(symbol, |p| p.breakeven_armed = true);
                self.telemetry.notify(Notification::BreakevenArmed {
                    symbol: symbol.to_string(),
                    stop_price: stop,
                });
                info!(symbol, stop, "breakeven armed");
            }

            MonitorAction::TrailingExit => {
                // The trailing close supersedes the final ladder leg.
                let final_leg = self.config.read().monitor.tp_ladder_levels.len() as u8;
                self.executor.cancel_tp_leg(symbol, final_leg).await?;
                let meta = self.executor.persisted_meta(symbol);
                if let Some(record) = self
                    .executor
                    .close_full_market(symbol, ExitReason::Trailing)
                    .await?
                {
                    self.risk.register_close(meta.signal_type, &record);
                }
            }

            MonitorAction::TakeProfitLeg { leg, qty, final_leg } => {
                if final_leg {
                    let meta = self.executor.persisted_meta(symbol);
                    if let Some(record) = self
                        .executor
                        .close_full_market(symbol, ExitReason::TakeProfit(leg))
                        .await?
                    {
                        self.risk.register_close(meta.signal_type, &record);
                    }
                } else {
                    let pnl = self.executor.partial_close_market(symbol, qty, ctx.mark).await?;
                    self.executor.cancel_tp_leg(symbol, leg).await?;
                    info!(symbol, leg, qty, pnl, "take-profit leg realized");
                }
            }

            MonitorAction::Dca { rung, qty } => {
                self.executor.dca_add(symbol, qty, ctx.mark).await?;
                info!(symbol, rung, qty, "dca rung filled");
            }

            MonitorAction::DcaSkipMargin { rung } => {
                warn!(symbol, rung, "dca_skipped_margin — reserve exhausted");
                self.telemetry.notify(Notification::DcaSkipped {
                    symbol: symbol.to_string(),
                    rung,
                    reason: "margin reserve exhausted".to_string(),
                });
                // The rung is consumed: the position continues under its
                // existing stop rather than re-requesting every tick.
                self.book.update(symbol, |p| p.dca_filled = rung);
            }
        }

        let _ = position;
        Ok(())
    }
}

/// Accrue funding periods and estimated funding cost from position age.
fn accrue_funding(pos: &mut Position, ctx: &TickContext) {
    let expected = (pos.age_hours(ctx.now) / FUNDING_PERIOD_HOURS) as u32;
    if expected > pos.funding_periods {
        let periods = expected - pos.funding_periods;
        let notional = pos.quantity * ctx.mark;
        // Longs pay positive funding; shorts receive it.
        let cost = pos.direction.sign() * ctx.funding_rate_pct / 100.0 * notional * periods as f64;
        pos.funding_paid += cost;
        pos.funding_periods = expected;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{OpenParams, PositionBook, ProtectionKind, ProtectionOrder};
    use crate::types::{MarginMode, SignalType, StrategyTag};

    /// Leverage-1 long at 100 so price pct == ROI pct.
    fn long_position() -> Position {
        let book = PositionBook::new();
        let mut pos = book
            .open(OpenParams {
                symbol: "BTCUSDT".into(),
                direction: Direction::Long,
                entry_price: 100.0,
                quantity: 10.0,
                leverage: 1,
                margin_mode: MarginMode::Isolated,
                signal_type: SignalType::Trend,
                strategy_tag: StrategyTag::Conservative,
                stop_price: 98.0,
                entry_fee: 0.0,
            })
            .unwrap();
        pos.protection.push(ProtectionOrder {
            order_id: 1,
            kind: ProtectionKind::StopLoss,
            trigger_price: 98.0,
            quantity: 10.0,
        });
        pos
    }

    fn ctx(mark: f64) -> TickContext {
        TickContext {
            mark,
            atr: Some(1.0),
            funding_rate_pct: 0.01,
            next_funding_time: i64::MAX / 2,
            now: Utc::now(),
            taker_fee_pct: 0.05,
            dca_reserve_remaining: 10_000.0,
        }
    }

    fn cfg() -> MonitorConfig {
        MonitorConfig::default()
    }

    #[test]
    fn emergency_close_on_hard_loss() {
        let pos = long_position();
        let action = decide(&pos, &ctx(74.0), &cfg());
        assert_eq!(action, MonitorAction::CloseFull(ExitReason::Emergency));
    }

    #[test]
    fn funding_exit_when_adversarial_and_profitable() {
        // Long at +0.8%, funding in 18 minutes at 0.09%.
        let mut pos = long_position();
        pos.stop_price = 90.0; // keep the stop out of the way
        let mut c = ctx(100.8);
        c.funding_rate_pct = 0.09;
        c.next_funding_time = c.now.timestamp_millis() + 18 * 60_000;
        assert_eq!(
            decide(&pos, &c, &cfg()),
            MonitorAction::CloseFull(ExitReason::Funding)
        );
    }

    #[test]
    fn funding_exit_requires_profit_floor() {
        let mut pos = long_position();
        pos.stop_price = 90.0;
        let mut c = ctx(100.2); // +0.2% < 0.5% floor
        c.funding_rate_pct = 0.09;
        c.next_funding_time = c.now.timestamp_millis() + 18 * 60_000;
        assert_ne!(
            decide(&pos, &c, &cfg()),
            MonitorAction::CloseFull(ExitReason::Funding)
        );
    }

    #[test]
    fn funding_exit_ignores_favourable_rate() {
        // Shorts collect positive funding: no exit.
        let mut pos = long_position();
        pos.direction = Direction::Short;
        pos.stop_price = 110.0;
        let mut c = ctx(99.0); // short in profit
        c.funding_rate_pct = 0.09;
        c.next_funding_time = c.now.timestamp_millis() + 10 * 60_000;
        assert_ne!(
            decide(&pos, &c, &cfg()),
            MonitorAction::CloseFull(ExitReason::Funding)
        );
    }

    #[test]
    fn breakeven_arms_at_threshold_with_fee_adjustment() {
        let pos = long_position();
        // +8% ROI at leverage 1.
        match decide(&pos, &ctx(108.0), &cfg()) {
            MonitorAction::ArmBreakeven { stop } => {
                // 2 × 0.05% fees above entry.
                assert!((stop - 100.1).abs() < 1e-9);
                assert!(stop > pos.entry_price);
            }
            other => panic!("expected breakeven arm, got {other:?}"),
        }
    }

    #[test]
    fn breakeven_never_retracts() {
        // Armed with stop at breakeven; price falls back and recovers — no
        // action may lower the stop.
        let mut pos = long_position();
        pos.breakeven_armed = true;
        pos.stop_price = 100.1;
        pos.protection[0].trigger_price = 100.1;

        for mark in [104.0, 102.0, 107.0] {
            match decide(&pos, &ctx(mark), &cfg()) {
                MonitorAction::ArmBreakeven { .. } => panic!("re-arm must not happen"),
                MonitorAction::RestoreProtection { stop } => {
                    assert!(stop >= 100.1)
                }
                _ => {}
            }
        }
    }

    #[test]
    fn breakeven_stop_hit_reports_breakeven() {
        let mut pos = long_position();
        pos.breakeven_armed = true;
        pos.stop_price = 100.1;
        assert_eq!(
            decide(&pos, &ctx(100.0), &cfg()),
            MonitorAction::CloseFull(ExitReason::Breakeven)
        );
    }

    #[test]
    fn plain_stop_hit_reports_stop_loss() {
        let pos = long_position();
        assert_eq!(
            decide(&pos, &ctx(97.9), &cfg()),
            MonitorAction::CloseFull(ExitReason::StopLoss)
        );
    }

    #[test]
    fn coverage_shortfall_restores_protection() {
        let mut pos = long_position();
        pos.protection[0].quantity = 3.0; // only 3 of 10 covered
        assert_eq!(
            decide(&pos, &ctx(101.0), &cfg()),
            MonitorAction::RestoreProtection { stop: 98.0 }
        );
    }

    #[test]
    fn trailing_activates_and_peak_is_monotonic() {
        let mut pos = long_position();
        let c = cfg();

        update_trailing(&mut pos, &ctx(115.0), &c);
        let state = pos.trailing.expect("trailing should activate at +15%");
        assert!((state.peak_price - 115.0).abs() < 1e-9);

        // Price backs off: peak must not move down.
        update_trailing(&mut pos, &ctx(112.0), &c);
        assert!((pos.trailing.unwrap().peak_price - 115.0).abs() < 1e-9);

        // New high raises it.
        update_trailing(&mut pos, &ctx(118.0), &c);
        assert!((pos.trailing.unwrap().peak_price - 118.0).abs() < 1e-9);
    }

    #[test]
    fn trailing_callback_clamped() {
        let c = cfg();
        // 2·ATR/price = 2*0.1/100 = 0.2% → clamps up to 0.5%.
        assert!((trailing_callback_pct(0.1, 100.0, &c) - 0.5).abs() < 1e-9);
        // 2*3/100 = 6% → clamps down to 3%.
        assert!((trailing_callback_pct(3.0, 100.0, &c) - 3.0).abs() < 1e-9);
        // In-band value passes through: 2*1/100 = 2%.
        assert!((trailing_callback_pct(1.0, 100.0, &c) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn trailing_exit_on_retracement() {
        let mut pos = long_position();
        // Breakeven armed long ago; stop parked at breakeven.
        pos.breakeven_armed = true;
        pos.stop_price = 100.1;
        let c = cfg();

        update_trailing(&mut pos, &ctx(120.0), &c);
        let callback = pos.trailing.unwrap().callback_pct;

        // Retrace beyond the callback from the 120 peak.
        let trigger = 120.0 * (1.0 - callback / 100.0) - 0.01;
        assert_eq!(decide(&pos, &ctx(trigger), &c), MonitorAction::TrailingExit);

        // A shallower pullback holds (trailing beats the TP ladder check
        // here because pnl is far above the remaining ladder levels anyway).
        let shallow = 120.0 * (1.0 - callback / 200.0);
        assert_ne!(decide(&pos, &ctx(shallow), &c), MonitorAction::TrailingExit);
    }

    #[test]
    fn tp_ladder_legs_fire_in_order() {
        let mut pos = long_position();
        pos.breakeven_armed = true;
        pos.stop_price = 100.1;
        let c = cfg();

        // +20% → first leg, 30% of the original size.
        match decide(&pos, &ctx(120.0), &c) {
            MonitorAction::TakeProfitLeg { leg, qty, final_leg } => {
                assert_eq!(leg, 1);
                assert!(!final_leg);
                assert!((qty - 3.0).abs() < 1e-9);
            }
            other => panic!("expected TP leg 1, got {other:?}"),
        }

        // After two legs, +60% closes the remainder.
        pos.tp_filled = 2;
        pos.quantity = 3.0;
        match decide(&pos, &ctx(160.0), &c) {
            MonitorAction::TakeProfitLeg { leg, qty, final_leg } => {
                assert_eq!(leg, 3);
                assert!(final_leg);
                assert!((qty - 3.0).abs() < 1e-9);
            }
            other => panic!("expected final TP leg, got {other:?}"),
        }
    }

    #[test]
    fn dca_rungs_fill_with_reserve() {
        let mut pos = long_position();
        pos.stop_price = 80.0;
        let c = cfg();

        // -3% → rung 1 at 30% of original size.
        match decide(&pos, &ctx(97.0), &c) {
            MonitorAction::Dca { rung, qty } => {
                assert_eq!(rung, 1);
                assert!((qty - 3.0).abs() < 1e-9);
            }
            other => panic!("expected DCA rung 1, got {other:?}"),
        }

        // -6% with rung 1 done → rung 2 at 40%.
        pos.dca_filled = 1;
        match decide(&pos, &ctx(94.0), &c) {
            MonitorAction::Dca { rung, qty } => {
                assert_eq!(rung, 2);
                assert!((qty - 4.0).abs() < 1e-9);
            }
            other => panic!("expected DCA rung 2, got {other:?}"),
        }
    }

    #[test]
    fn dca_skipped_when_reserve_exhausted() {
        let mut pos = long_position();
        pos.stop_price = 80.0;
        pos.dca_filled = 2;
        let mut c = ctx(90.0); // -10% → rung 3
        c.dca_reserve_remaining = 1.0; // needs 3 × 90 / 1 = 270

        assert_eq!(
            decide(&pos, &c, &cfg()),
            MonitorAction::DcaSkipMargin { rung: 3 }
        );
    }

    #[test]
    fn no_fourth_dca_rung() {
        let mut pos = long_position();
        pos.stop_price = 50.0;
        pos.dca_filled = 3;
        let action = decide(&pos, &ctx(85.0), &cfg());
        assert!(!matches!(action, MonitorAction::Dca { .. }));
        assert!(!matches!(action, MonitorAction::DcaSkipMargin { .. }));
    }

    #[test]
    fn time_exit_only_in_band() {
        let mut pos = long_position();
        pos.stop_price = 90.0;
        pos.opened_at = Utc::now() - chrono::Duration::hours(7);
        let c = cfg();

        // -3% and stale → time exit.
        assert_eq!(
            decide(&pos, &ctx(97.0), &c),
            MonitorAction::CloseFull(ExitReason::Time)
        );
        // -3% but young → DCA path instead.
        pos.opened_at = Utc::now() - chrono::Duration::hours(1);
        assert!(matches!(decide(&pos, &ctx(97.0), &c), MonitorAction::Dca { .. }));

        // Stale but only -1% (inside neither band) → hold.
        pos.opened_at = Utc::now() - chrono::Duration::hours(7);
        assert_eq!(decide(&pos, &ctx(99.0), &c), MonitorAction::Hold);

        // Stale and -7%: too deep for the time exit; DCA rung 2 region.
        pos.dca_filled = 3;
        assert_eq!(decide(&pos, &ctx(93.0), &c), MonitorAction::Hold);
    }

    #[test]
    fn funding_accrual_estimates_periods() {
        let mut pos = long_position();
        pos.opened_at = Utc::now() - chrono::Duration::hours(17);
        let mut c = ctx(100.0);
        c.funding_rate_pct = 0.05;

        accrue_funding(&mut pos, &c);
        assert_eq!(pos.funding_periods, 2);
        // Long paying 0.05% on 1000 notional twice.
        assert!((pos.funding_paid - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dca_margin_used_tracks_fractions() {
        let mut pos = long_position();
        let c = cfg();
        assert_eq!(dca_margin_used(&pos, &c), 0.0);
        pos.dca_filled = 2;
        // (0.3 + 0.4) × 10 × 100 / 1 = 700.
        assert!((dca_margin_used(&pos, &c) - 700.0).abs() < 1e-9);
    }
}
