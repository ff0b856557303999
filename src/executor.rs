// =============================================================================
// Order Executor — filter-aware entry placement with attached protection
// =============================================================================
//
// Entry procedure (per symbol, under the symbol lock):
//   1. Pre-trade checks: filter-adjust quantity, min-notional, depth floor
//      (warn-only), duplicate-position guard.
//   2. Idempotently set margin mode and leverage (rejected with a typed
//      failure when the symbol already holds a position).
//   3. Up to `entry_attempts` post-only limit attempts, each with a fresh
//      quote and an `order_timeout_sec` fill wait; then a market fallback
//      (unless policy forbids it).
//   4. Post-fill headroom check against the estimated liquidation price,
//      reducing the position stepwise until headroom is satisfied.
//   5. Attach protection: stop-market SL plus a TP ladder whose shape is
//      momentum-gated (Fibonacci extensions vs conservative ATR multiples).
//   6. Persist position metadata (signal type + strategy tag) before
//      reporting success.
//
// Every exchange failure maps to the gateway taxonomy; -2019 triggers a
// size-reduction retry, -1111 a filter refresh + single retry (inside the
// client), -4061 is terminal for the intent.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::binance::client::{FuturesClient, OrderAck, OrderRequest};
use crate::binance::error::GatewayError;
use crate::binance::filters::SymbolFilters;
use crate::config::EngineConfig;
use crate::position::{OpenParams, Position, PositionBook, ProtectionKind, ProtectionOrder, TradeRecord};
use crate::risk::Admission;
use crate::signal::Signal;
use crate::store::{meta_or_default, PositionMeta, StateStore, TradeStore};
use crate::symbol_lock::SymbolLocks;
use crate::telemetry::{Notification, Telemetry};
use crate::types::{Direction, ExitReason, StrategyTag};

/// Fill-poll cadence while waiting on a limit order.
const FILL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Bounded headroom-reduction iterations.
const HEADROOM_REDUCE_LIMIT: u32 = 3;

/// Conservative TP ladder, ATR multiples.
const LADDER_CONSERVATIVE: [f64; 3] = [1.0, 1.5, 2.0];

/// Fibonacci-extension TP ladder, ATR multiples.
const LADDER_FIBONACCI: [f64; 3] = [1.618, 2.618, 4.236];

/// TP quantity split across the ladder.
const LADDER_SPLIT: [f64; 3] = [0.30, 0.40, 0.30];

/// Outcome of one entry intent.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Entered and protected; the position is live.
    Filled(Box<Position>),
    /// Dry-run simulation; the position is tracked locally only.
    Simulated(Box<Position>),
    /// All attempts exhausted or the position was abandoned post-fill.
    Abandoned(String),
    /// Terminal gateway failure.
    Failed(GatewayError),
}

pub struct OrderExecutor {
    client: Arc<FuturesClient>,
    book: Arc<PositionBook>,
    state_store: Arc<dyn StateStore>,
    trade_store: Arc<dyn TradeStore>,
    locks: Arc<SymbolLocks>,
    telemetry: Arc<Telemetry>,
    config: Arc<RwLock<EngineConfig>>,
    meta_version: AtomicU64,
}

impl OrderExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<FuturesClient>,
        book: Arc<PositionBook>,
        state_store: Arc<dyn StateStore>,
        trade_store: Arc<dyn TradeStore>,
        locks: Arc<SymbolLocks>,
        telemetry: Arc<Telemetry>,
        config: Arc<RwLock<EngineConfig>>,
    ) -> Self {
        Self {
            client,
            book,
            state_store,
            trade_store,
            locks,
            telemetry,
            config,
            meta_version: AtomicU64::new(1),
        }
    }

    // -------------------------------------------------------------------------
    // Entry
    // -------------------------------------------------------------------------

    /// Open a position for an admitted signal.
    pub async fn open_position(&self, signal: &Signal, admission: &Admission) -> ExecutionOutcome {
        let _guard = self.locks.acquire(&signal.symbol).await;
        let config = self.config.read().clone();
        let symbol = signal.symbol.as_str();

        if self.book.contains(symbol) {
            return ExecutionOutcome::Abandoned(format!("{symbol}: position already open"));
        }

        // Pre-trade: depth floor is warn-only.
        if signal.liquidity_risk {
            warn!(
                symbol,
                depth_floor_usd = config.signal.depth_floor_usd,
                "entering with thin order book depth"
            );
        }

        let filters = match self.client.symbol_filters(symbol).await {
            Ok(f) => f,
            Err(e) => return ExecutionOutcome::Failed(e),
        };
        let quantity = match filters.adjust_quantity(admission.quantity, signal.entry_price) {
            Ok(q) => q,
            Err(e) => return ExecutionOutcome::Failed(e),
        };

        if config.dry_run {
            return self.simulate_entry(signal, admission, quantity, &config);
        }

        // Leverage and margin mode are set before the first order touches the
        // symbol; with an existing exchange position these must not change.
        if let Err(e) = self.client.set_margin_mode(symbol, admission.margin_mode).await {
            return ExecutionOutcome::Failed(e);
        }
        if let Err(e) = self.client.set_leverage(symbol, admission.leverage).await {
            return ExecutionOutcome::Failed(e);
        }

        // Limit attempts, then market fallback.
        let fill = match self.try_entry_attempts(signal, quantity, &config).await {
            Ok(Some(fill)) => fill,
            Ok(None) => {
                return ExecutionOutcome::Abandoned(format!(
                    "{symbol}: {} entry attempts exhausted",
                    config.executor.entry_attempts
                ))
            }
            Err(e) => return ExecutionOutcome::Failed(e),
        };

        let entry_fee = fill.avg_price * fill.executed_qty * config.executor.taker_fee_pct / 100.0;

        // Headroom: distance from entry to the estimated liquidation price.
        let final_qty = match self
            .enforce_headroom(symbol, signal.direction, fill.executed_qty, &config)
            .await
        {
            Ok(q) => q,
            Err(e) => return ExecutionOutcome::Failed(e),
        };
        if final_qty <= 0.0 {
            return ExecutionOutcome::Abandoned(format!("{symbol}: abandoned by headroom check"));
        }

        let Some(mut position) = self.book.open(OpenParams {
            symbol: symbol.to_string(),
            direction: signal.direction,
            entry_price: fill.avg_price,
            quantity: final_qty,
            leverage: admission.leverage,
            margin_mode: admission.margin_mode,
            signal_type: signal.signal_type,
            strategy_tag: ladder_for(signal, &config).0,
            stop_price: signal.stop_price,
            entry_fee,
        }) else {
            return ExecutionOutcome::Abandoned(format!("{symbol}: book rejected duplicate"));
        };

        // Attached protection. A failure here re-tries once, then closes the
        // naked position rather than leaving it unprotected.
        if let Err(e) = self.attach_protection(signal, &mut position, &filters, &config).await {
            warn!(symbol, error = %e, "failed to attach protection — closing position");
            let _ = self.close_full_market_unlocked(symbol, ExitReason::Emergency).await;
            return ExecutionOutcome::Failed(e);
        }

        self.persist_meta(symbol, signal, position.strategy_tag);
        self.telemetry.notify(Notification::TradeOpened {
            symbol: symbol.to_string(),
            direction: signal.direction.to_string(),
            quantity: position.quantity,
            entry_price: position.entry_price,
            leverage: position.leverage,
        });

        info!(
            symbol,
            entry = position.entry_price,
            qty = position.quantity,
            strategy = %position.strategy_tag,
            "entry complete with protection attached"
        );
        ExecutionOutcome::Filled(Box::new(position))
    }

    fn simulate_entry(
        &self,
        signal: &Signal,
        admission: &Admission,
        quantity: f64,
        config: &EngineConfig,
    ) -> ExecutionOutcome {
        let (tag, ladder) = ladder_for(signal, config);
        let Some(mut position) = self.book.open(OpenParams {
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: signal.entry_price,
            quantity,
            leverage: admission.leverage,
            margin_mode: admission.margin_mode,
            signal_type: signal.signal_type,
            strategy_tag: tag,
            stop_price: signal.stop_price,
            entry_fee: 0.0,
        }) else {
            return ExecutionOutcome::Abandoned(format!("{}: book rejected duplicate", signal.symbol));
        };

        // Synthetic protection entries so the monitor sees full coverage.
        position.protection.push(ProtectionOrder {
            order_id: 0,
            kind: ProtectionKind::StopLoss,
            trigger_price: signal.stop_price,
            quantity,
        });
        for (i, price) in ladder.iter().enumerate() {
            position.protection.push(ProtectionOrder {
                order_id: 0,
                kind: ProtectionKind::TakeProfit(i as u8 + 1),
                trigger_price: *price,
                quantity: quantity * LADDER_SPLIT[i],
            });
        }
        self.book.update(&signal.symbol, |p| *p = position.clone());

        self.persist_meta(&signal.symbol, signal, tag);
        info!(symbol = %signal.symbol, qty = quantity, "dry-run entry simulated");
        ExecutionOutcome::Simulated(Box::new(position))
    }

    /// Limit attempts with fresh quotes; `Ok(None)` when every attempt failed
    /// and the market fallback is disabled or skipped.
    async fn try_entry_attempts(
        &self,
        signal: &Signal,
        quantity: f64,
        config: &EngineConfig,
    ) -> Result<Option<OrderAck>, GatewayError> {
        let symbol = signal.symbol.as_str();
        let side = signal.direction.entry_side();
        let mut qty = quantity;
        let mut margin_retries = 0;

        for attempt in 1..=config.executor.entry_attempts {
            let quote = self.client.get_book_ticker(symbol).await?;
            let filters = self.client.symbol_filters(symbol).await?;
            let price = limit_entry_price(
                signal.direction,
                quote.bid,
                quote.ask,
                config.executor.price_buffer_bps,
                &filters,
            );

            let req = OrderRequest::limit(symbol, side, qty, price, config.executor.post_only);
            let ack = match self.client.place_order(&req).await {
                Ok(ack) => ack,
                Err(GatewayError::InsufficientMargin(msg))
                    if margin_retries < config.executor.margin_retry_limit =>
                {
                    margin_retries += 1;
                    qty = reduce_quantity(qty, config.executor.reduce_step_pct, &filters);
                    warn!(
                        symbol,
                        attempt,
                        retry = margin_retries,
                        qty,
                        reason = %msg,
                        "insufficient margin — reducing size and retrying"
                    );
                    if qty <= 0.0 {
                        return Ok(None);
                    }
                    continue;
                }
                Err(GatewayError::PositionClosed(msg)) => {
                    // Terminal for this intent.
                    warn!(symbol, reason = %msg, "intent terminal");
                    return Ok(None);
                }
                Err(e) if e.is_retryable() => {
                    warn!(symbol, attempt, error = %e, "placement failed — next attempt");
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Maker rejection (GTX would have crossed) comes back EXPIRED.
            if ack.status == "EXPIRED" {
                debug!(symbol, attempt, "post-only rejected — re-quoting");
                continue;
            }

            if let Some(fill) = self.await_fill(symbol, ack.order_id, config).await? {
                info!(symbol, attempt, price = fill.avg_price, "limit entry filled");
                return Ok(Some(fill));
            }

            // Timeout: cancel and re-quote.
            if let Err(e) = self.client.cancel_order(symbol, ack.order_id).await {
                debug!(symbol, order_id = ack.order_id, error = %e, "cancel after timeout failed");
            }
        }

        if !config.executor.allow_market_fallback {
            return Ok(None);
        }

        info!(symbol, "limit attempts exhausted — market fallback");
        let req = OrderRequest::market(symbol, side, qty);
        let ack = self.client.place_order(&req).await?;
        let fill = self
            .await_fill(symbol, ack.order_id, config)
            .await?
            .unwrap_or(ack);
        Ok(Some(fill))
    }

    /// Poll the order until it fills or `order_timeout_sec` elapses.
    async fn await_fill(
        &self,
        symbol: &str,
        order_id: u64,
        config: &EngineConfig,
    ) -> Result<Option<OrderAck>, GatewayError> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(config.executor.order_timeout_sec);

        loop {
            let ack = self.client.query_order(symbol, order_id).await?;
            if ack.is_filled() {
                return Ok(Some(ack));
            }
            if matches!(ack.status.as_str(), "CANCELED" | "EXPIRED" | "REJECTED") {
                return Ok(None);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(FILL_POLL_INTERVAL).await;
        }
    }

    /// Reduce the fresh position until liquidation headroom is acceptable.
    /// Returns the surviving quantity (0 when abandoned).
    async fn enforce_headroom(
        &self,
        symbol: &str,
        direction: Direction,
        mut quantity: f64,
        config: &EngineConfig,
    ) -> Result<f64, GatewayError> {
        for _ in 0..HEADROOM_REDUCE_LIMIT {
            let positions = self.client.get_positions().await?;
            let Some(pos) = positions.iter().find(|p| p.symbol == symbol) else {
                return Ok(quantity);
            };
            let headroom = headroom_pct(pos.entry_price, pos.liquidation_price);

            if headroom >= config.executor.headroom_min_pct {
                return Ok(quantity);
            }

            let filters = self.client.symbol_filters(symbol).await?;
            let cut = reduce_quantity(quantity, config.executor.reduce_step_pct, &filters);
            let step = quantity - cut;
            warn!(
                symbol,
                headroom_pct = headroom,
                required = config.executor.headroom_min_pct,
                reducing = step,
                "liquidation headroom too small — reducing position"
            );
            if step <= 0.0 {
                break;
            }

            let req = OrderRequest::reduce_only_market(symbol, direction.exit_side(), step);
            self.client.place_order(&req).await?;
            quantity = cut;
        }

        // Could not reach the floor: abandon entirely.
        if quantity > 0.0 {
            let req = OrderRequest::reduce_only_market(symbol, direction.exit_side(), quantity);
            self.client.place_order(&req).await?;
        }
        Ok(0.0)
    }

    /// Place SL then TP ladder, recording each order on the position.
    async fn attach_protection(
        &self,
        signal: &Signal,
        position: &mut Position,
        filters: &SymbolFilters,
        config: &EngineConfig,
    ) -> Result<(), GatewayError> {
        let symbol = position.symbol.as_str();
        let exit_side = position.direction.exit_side();

        // Stop-loss first: the position must never sit unprotected.
        let sl_price = filters.round_price(signal.stop_price);
        let sl_req = OrderRequest::stop_market(symbol, exit_side, sl_price, position.quantity);
        let sl_ack = self.client.place_order(&sl_req).await?;
        position.protection.push(ProtectionOrder {
            order_id: sl_ack.order_id,
            kind: ProtectionKind::StopLoss,
            trigger_price: sl_price,
            quantity: position.quantity,
        });
        position.stop_price = sl_price;

        // Momentum-gated ladder shape.
        let (tag, ladder) = ladder_for(signal, config);
        position.strategy_tag = tag;

        let mut remaining = position.quantity;
        for (i, target) in ladder.iter().enumerate() {
            let price = filters.round_price(*target);
            let raw_qty = if i == ladder.len() - 1 {
                remaining
            } else {
                position.quantity * LADDER_SPLIT[i]
            };
            let qty = match filters.adjust_quantity(raw_qty, price) {
                Ok(q) => q.min(remaining),
                Err(_) => {
                    // Leg too small for the lot grid; fold it into the last leg.
                    debug!(symbol, leg = i + 1, raw_qty, "TP leg below lot grid — skipped");
                    continue;
                }
            };
            if qty <= 0.0 {
                continue;
            }

            let req = OrderRequest::take_profit_market(symbol, exit_side, price, qty);
            let ack = self.client.place_order(&req).await?;
            position.protection.push(ProtectionOrder {
                order_id: ack.order_id,
                kind: ProtectionKind::TakeProfit(i as u8 + 1),
                trigger_price: price,
                quantity: qty,
            });
            remaining -= qty;
        }

        self.book.update(symbol, |p| *p = position.clone());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Protection maintenance (used by the monitor)
    // -------------------------------------------------------------------------

    /// Move the stop: place the replacement, confirm, then cancel the old
    /// order. The position is never left without a stop.
    pub async fn replace_stop(&self, symbol: &str, new_stop: f64) -> Result<(), GatewayError> {
        let _guard = self.locks.acquire(symbol).await;
        let config = self.config.read().clone();

        let Some(position) = self.book.get(symbol) else {
            return Err(GatewayError::PositionClosed(format!("{symbol}: no tracked position")));
        };

        let old_order = position
            .protection
            .iter()
            .find(|p| p.kind == ProtectionKind::StopLoss)
            .copied();

        let new_id = if config.dry_run {
            0
        } else {
            let filters = self.client.symbol_filters(symbol).await?;
            let req = OrderRequest::stop_market(
                symbol,
                position.direction.exit_side(),
                filters.round_price(new_stop),
                position.quantity,
            );
            let ack = self.client.place_order(&req).await?;

            if let Some(old) = old_order {
                if let Err(e) = self.client.cancel_order(symbol, old.order_id).await {
                    debug!(symbol, order_id = old.order_id, error = %e, "old stop cancel failed");
                }
            }
            ack.order_id
        };

        self.book.update(symbol, |p| {
            p.stop_price = new_stop;
            p.protection.retain(|o| o.kind != ProtectionKind::StopLoss);
            p.protection.push(ProtectionOrder {
                order_id: new_id,
                kind: ProtectionKind::StopLoss,
                trigger_price: new_stop,
                quantity: p.quantity,
            });
        });

        debug!(symbol, new_stop, "stop replaced");
        Ok(())
    }

    /// Cancel one TP leg (trailing takeover cancels the final leg).
    pub async fn cancel_tp_leg(&self, symbol: &str, leg: u8) -> Result<(), GatewayError> {
        let _guard = self.locks.acquire(symbol).await;
        let config = self.config.read().clone();

        let order = self.book.get(symbol).and_then(|p| {
            p.protection
                .iter()
                .find(|o| o.kind == ProtectionKind::TakeProfit(leg))
                .copied()
        });
        let Some(order) = order else { return Ok(()) };

        if !config.dry_run && order.order_id != 0 {
            self.client.cancel_order(symbol, order.order_id).await?;
        }
        self.book.update(symbol, |p| {
            p.protection.retain(|o| o.kind != ProtectionKind::TakeProfit(leg));
        });
        Ok(())
    }

    /// Realize a slice of the position at market (TP ladder leg).
    pub async fn partial_close_market(
        &self,
        symbol: &str,
        qty: f64,
        mark: f64,
    ) -> Result<f64, GatewayError> {
        let _guard = self.locks.acquire(symbol).await;
        let config = self.config.read().clone();

        let Some(position) = self.book.get(symbol) else {
            return Err(GatewayError::PositionClosed(format!("{symbol}: no tracked position")));
        };

        let (price, fee) = if config.dry_run {
            (mark, 0.0)
        } else {
            let req = OrderRequest::reduce_only_market(symbol, position.direction.exit_side(), qty);
            let ack = self.client.place_order(&req).await?;
            let price = if ack.avg_price > 0.0 { ack.avg_price } else { mark };
            (price, price * qty * config.executor.taker_fee_pct / 100.0)
        };

        let pnl = self
            .book
            .realize_partial(symbol, qty, price, fee)
            .unwrap_or(0.0);
        Ok(pnl)
    }

    /// Add to the position at market (DCA rung), then re-cover the stop for
    /// the grown quantity.
    pub async fn dca_add(&self, symbol: &str, qty: f64, mark: f64) -> Result<(), GatewayError> {
        let _guard = self.locks.acquire(symbol).await;
        let config = self.config.read().clone();

        let Some(position) = self.book.get(symbol) else {
            return Err(GatewayError::PositionClosed(format!("{symbol}: no tracked position")));
        };

        let fill_price = if config.dry_run {
            mark
        } else {
            let req = OrderRequest::market(symbol, position.direction.entry_side(), qty);
            let ack = self.client.place_order(&req).await?;
            if ack.avg_price > 0.0 {
                ack.avg_price
            } else {
                mark
            }
        };

        self.book.update(symbol, |p| p.apply_dca_fill(fill_price, qty));

        // The stop must cover the grown quantity.
        let stop = self.book.get(symbol).map(|p| p.stop_price).unwrap_or(0.0);
        if stop > 0.0 {
            self.replace_stop_unlocked(symbol, stop).await?;
        }
        Ok(())
    }

    async fn replace_stop_unlocked(&self, symbol: &str, new_stop: f64) -> Result<(), GatewayError> {
        // Same body as replace_stop but callable while the symbol lock is
        // already held by the current task.
        let config = self.config.read().clone();
        let Some(position) = self.book.get(symbol) else {
            return Ok(());
        };
        let old_order = position
            .protection
            .iter()
            .find(|p| p.kind == ProtectionKind::StopLoss)
            .copied();

        let new_id = if config.dry_run {
            0
        } else {
            let filters = self.client.symbol_filters(symbol).await?;
            let req = OrderRequest::stop_market(
                symbol,
                position.direction.exit_side(),
                filters.round_price(new_stop),
                position.quantity,
            );
            let ack = self.client.place_order(&req).await?;
            if let Some(old) = old_order {
                let _ = self.client.cancel_order(symbol, old.order_id).await;
            }
            ack.order_id
        };

        self.book.update(symbol, |p| {
            p.stop_price = new_stop;
            p.protection.retain(|o| o.kind != ProtectionKind::StopLoss);
            p.protection.push(ProtectionOrder {
                order_id: new_id,
                kind: ProtectionKind::StopLoss,
                trigger_price: new_stop,
                quantity: p.quantity,
            });
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Full close
    // -------------------------------------------------------------------------

    /// Cancel the whole protection set, close at market, record the trade.
    pub async fn close_full_market(
        &self,
        symbol: &str,
        reason: ExitReason,
    ) -> Result<Option<TradeRecord>, GatewayError> {
        let _guard = self.locks.acquire(symbol).await;
        self.close_full_market_unlocked(symbol, reason).await
    }

    async fn close_full_market_unlocked(
        &self,
        symbol: &str,
        reason: ExitReason,
    ) -> Result<Option<TradeRecord>, GatewayError> {
        let config = self.config.read().clone();
        let Some(position) = self.book.get(symbol) else {
            return Ok(None);
        };

        let (exit_price, exit_fee) = if config.dry_run {
            let price = if position.mark_price > 0.0 {
                position.mark_price
            } else {
                position.entry_price
            };
            (price, 0.0)
        } else {
            // Manual-close policy: pending protection (SL, TP legs, DCA
            // limits) is cancelled before the reduce-only close.
            self.client.cancel_all_orders(symbol).await?;
            let req = OrderRequest::reduce_only_market(
                symbol,
                position.direction.exit_side(),
                position.quantity,
            );
            let ack = self.client.place_order(&req).await?;
            let price = if ack.avg_price > 0.0 {
                ack.avg_price
            } else {
                position.mark_price
            };
            (price, price * position.quantity * config.executor.taker_fee_pct / 100.0)
        };

        let record = self.book.close(symbol, exit_price, exit_fee, reason);
        if let Some(record) = &record {
            if let Err(e) = self.trade_store.append(record) {
                warn!(symbol, error = %e, "trade store append failed");
            }
            let _ = self.state_store.delete_meta(symbol);
            self.telemetry.notify(Notification::TradeClosed {
                symbol: symbol.to_string(),
                exit_reason: reason,
                net_pnl: record.net_pnl,
            });
        }
        Ok(record)
    }

    /// Signal type recorded for `symbol`, from persisted metadata.
    pub fn persisted_meta(&self, symbol: &str) -> PositionMeta {
        meta_or_default(self.state_store.as_ref(), symbol)
    }

    fn persist_meta(&self, symbol: &str, signal: &Signal, tag: StrategyTag) {
        let meta = PositionMeta {
            signal_type: signal.signal_type,
            strategy_tag: tag,
            version: self.meta_version.fetch_add(1, Ordering::SeqCst),
        };
        if let Err(e) = self.state_store.put_meta(symbol, &meta) {
            warn!(symbol, error = %e, "metadata persist failed — slot accounting may degrade");
        }
    }
}

impl std::fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("book", &self.book)
            .finish()
    }
}

// =============================================================================
// Pure helpers
// =============================================================================

/// Passive limit price for an entry: longs quote at/below the bid, shorts
/// at/above the ask, nudged by the configured buffer and snapped to the tick.
pub fn limit_entry_price(
    direction: Direction,
    bid: f64,
    ask: f64,
    buffer_bps: f64,
    filters: &SymbolFilters,
) -> f64 {
    let buffered = match direction {
        Direction::Long => bid * (1.0 - buffer_bps / 10_000.0),
        Direction::Short => ask * (1.0 + buffer_bps / 10_000.0),
    };
    filters.round_price(buffered)
}

/// Cut `qty` by `step_pct` and re-snap to the lot grid. Returns 0 when the
/// remainder can no longer satisfy the filters.
pub fn reduce_quantity(qty: f64, step_pct: f64, filters: &SymbolFilters) -> f64 {
    let cut = qty * (1.0 - step_pct / 100.0);
    match filters.adjust_quantity(cut, f64::MAX) {
        Ok(q) => q,
        Err(_) => 0.0,
    }
}

/// Distance from entry to the liquidation price, pct of entry.
pub fn headroom_pct(entry_price: f64, liquidation_price: f64) -> f64 {
    if entry_price <= 0.0 || liquidation_price <= 0.0 {
        // No liquidation price reported (cross with huge margin): plenty.
        return 100.0;
    }
    (entry_price - liquidation_price).abs() / entry_price * 100.0
}

/// Momentum-gated ladder selection: strong momentum earns the Fibonacci
/// extension ladder, everything else the conservative one.
pub fn ladder_for(signal: &Signal, config: &EngineConfig) -> (StrategyTag, [f64; 3]) {
    let m = &signal.snapshot.medium;
    let momentum = m.rsi > 65.0 && m.volume_ratio > 1.5;
    let mults = if config.executor.dynamic_tp && momentum {
        LADDER_FIBONACCI
    } else {
        LADDER_CONSERVATIVE
    };
    let tag = if config.executor.dynamic_tp && momentum {
        StrategyTag::Fibonacci
    } else {
        StrategyTag::Conservative
    };
    let ladder =
        mults.map(|mult| signal.entry_price + signal.direction.sign() * m.atr * mult);
    (tag, ladder)
}
