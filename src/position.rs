// =============================================================================
// Position Book — open positions and closed trade records
// =============================================================================
//
// One-way position mode: at most one position per symbol. The monitor owns
// protection-state mutation; the executor creates positions on first fill and
// the book turns a full close into an immutable `TradeRecord`.
//
// All profit percentages are ROI on margin (price move × leverage), matching
// the thresholds in `MonitorConfig`.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Direction, ExitReason, MarginMode, SignalType, StrategyTag};

// ---------------------------------------------------------------------------
// Protection orders
// ---------------------------------------------------------------------------

/// Role of an exchange order protecting an open position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProtectionKind {
    StopLoss,
    /// 1-based ladder leg.
    TakeProfit(u8),
}

/// A live reduce-only order attached to a position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtectionOrder {
    pub order_id: u64,
    pub kind: ProtectionKind,
    pub trigger_price: f64,
    pub quantity: f64,
}

// ---------------------------------------------------------------------------
// Trailing state
// ---------------------------------------------------------------------------

/// ATR trailing-stop state. Peak is monotonic in the position's favour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingState {
    pub peak_price: f64,
    /// Retracement tolerance from peak, pct of price.
    pub callback_pct: f64,
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    /// Effective entry price (weighted by DCA fills).
    pub entry_price: f64,
    /// Remaining open quantity. Always > 0 while the position exists.
    pub quantity: f64,
    /// Quantity at entry, before DCA adds and TP reductions.
    pub original_quantity: f64,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub signal_type: SignalType,
    pub strategy_tag: StrategyTag,
    pub opened_at: DateTime<Utc>,

    pub mark_price: f64,
    /// Best ROI pct seen since open.
    pub peak_pnl_pct: f64,
    /// Worst ROI pct seen since open.
    pub trough_pnl_pct: f64,

    pub stop_price: f64,
    pub breakeven_armed: bool,
    pub trailing: Option<TrailingState>,

    /// DCA rungs already filled (0..=3).
    pub dca_filled: u8,
    /// TP ladder legs already realized.
    pub tp_filled: u8,

    pub funding_periods: u32,
    pub entry_fee: f64,
    pub fees_paid: f64,
    pub funding_paid: f64,
    /// Realized PnL accumulated by partial closes.
    pub realized_pnl: f64,

    pub protection: Vec<ProtectionOrder>,
}

impl Position {
    /// ROI percentage at `mark`: signed price move relative to entry,
    /// multiplied by leverage.
    pub fn pnl_pct(&self, mark: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.direction.sign() * (mark - self.entry_price) / self.entry_price
            * 100.0
            * self.leverage as f64
    }

    /// Unrealized PnL in quote currency at `mark`.
    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.direction.sign() * (mark - self.entry_price) * self.quantity
    }

    /// Update the mark price and the peak/trough ROI watermarks.
    pub fn update_mark(&mut self, mark: f64) {
        self.mark_price = mark;
        let pnl = self.pnl_pct(mark);
        if pnl > self.peak_pnl_pct {
            self.peak_pnl_pct = pnl;
        }
        if pnl < self.trough_pnl_pct {
            self.trough_pnl_pct = pnl;
        }
    }

    /// Total reduce-only quantity across live protection orders. Must cover
    /// `quantity` at all times (trailing is monitor-managed, so the stop and
    /// TP legs carry the coverage).
    pub fn protection_coverage(&self) -> f64 {
        self.protection.iter().map(|p| p.quantity).sum()
    }

    /// Whether the SL + TP set covers the whole open quantity.
    pub fn is_fully_protected(&self) -> bool {
        let sl: f64 = self
            .protection
            .iter()
            .filter(|p| p.kind == ProtectionKind::StopLoss)
            .map(|p| p.quantity)
            .sum();
        sl + 1e-9 >= self.quantity
    }

    /// Position age in hours.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.opened_at).num_seconds() as f64 / 3600.0
    }

    /// Fold a DCA fill into the effective entry price and size.
    pub fn apply_dca_fill(&mut self, fill_price: f64, fill_qty: f64) {
        let old_notional = self.entry_price * self.quantity;
        let add_notional = fill_price * fill_qty;
        self.quantity += fill_qty;
        self.entry_price = (old_notional + add_notional) / self.quantity;
        self.dca_filled += 1;
    }
}

// ---------------------------------------------------------------------------
// Trade record
// ---------------------------------------------------------------------------

/// Immutable outcome of a fully closed position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub signal_type: SignalType,
    pub strategy_tag: StrategyTag,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub peak_pnl_pct: f64,
    pub trough_pnl_pct: f64,
    pub dca_used: u8,
    pub entry_fee: f64,
    pub exit_fee: f64,
    pub funding_cost: f64,
    pub realized_pnl: f64,
    pub net_pnl: f64,
    pub exit_reason: ExitReason,
}

// ---------------------------------------------------------------------------
// Position book
// ---------------------------------------------------------------------------

/// Thread-safe owner of open positions (keyed by symbol) and the in-memory
/// tail of closed trades.
pub struct PositionBook {
    open: RwLock<HashMap<String, Position>>,
    closed: RwLock<Vec<TradeRecord>>,
}

/// Parameters for opening a new position.
#[derive(Debug, Clone)]
pub struct OpenParams {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub signal_type: SignalType,
    pub strategy_tag: StrategyTag,
    pub stop_price: f64,
    pub entry_fee: f64,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(HashMap::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    /// Open a position on first fill. Returns `None` if the symbol already
    /// has one (one-way mode).
    pub fn open(&self, params: OpenParams) -> Option<Position> {
        let mut open = self.open.write();
        if open.contains_key(&params.symbol) {
            return None;
        }

        let position = Position {
            id: Uuid::new_v4().to_string(),
            symbol: params.symbol.clone(),
            direction: params.direction,
            entry_price: params.entry_price,
            quantity: params.quantity,
            original_quantity: params.quantity,
            leverage: params.leverage,
            margin_mode: params.margin_mode,
            signal_type: params.signal_type,
            strategy_tag: params.strategy_tag,
            opened_at: Utc::now(),
            mark_price: params.entry_price,
            peak_pnl_pct: 0.0,
            trough_pnl_pct: 0.0,
            stop_price: params.stop_price,
            breakeven_armed: false,
            trailing: None,
            dca_filled: 0,
            tp_filled: 0,
            funding_periods: 0,
            entry_fee: params.entry_fee,
            fees_paid: params.entry_fee,
            funding_paid: 0.0,
            realized_pnl: 0.0,
            protection: Vec::new(),
        };

        info!(
            id = %position.id,
            symbol = %position.symbol,
            direction = %position.direction,
            entry_price = position.entry_price,
            quantity = position.quantity,
            leverage = position.leverage,
            margin_mode = %position.margin_mode,
            signal_type = %position.signal_type,
            "position opened"
        );

        open.insert(params.symbol, position.clone());
        Some(position)
    }

    /// Apply a closure to the symbol's position in place.
    pub fn update<R>(&self, symbol: &str, f: impl FnOnce(&mut Position) -> R) -> Option<R> {
        let mut open = self.open.write();
        open.get_mut(symbol).map(f)
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.open.read().get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.open.read().contains_key(symbol)
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.open.read().values().cloned().collect()
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.open.read().keys().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }

    /// Realize part of the position (TP leg). Returns the realized PnL of the
    /// slice, or `None` if the symbol is unknown.
    pub fn realize_partial(&self, symbol: &str, qty: f64, price: f64, fee: f64) -> Option<f64> {
        let mut open = self.open.write();
        let pos = open.get_mut(symbol)?;

        let closed_qty = qty.min(pos.quantity);
        let pnl = pos.direction.sign() * (price - pos.entry_price) * closed_qty;
        pos.quantity -= closed_qty;
        pos.realized_pnl += pnl;
        pos.fees_paid += fee;
        pos.tp_filled += 1;

        debug!(
            symbol,
            closed_qty,
            remaining = pos.quantity,
            partial_pnl = pnl,
            "partial close realized"
        );
        Some(pnl)
    }

    /// Fully close the position, producing a `TradeRecord`.
    pub fn close(
        &self,
        symbol: &str,
        exit_price: f64,
        exit_fee: f64,
        reason: ExitReason,
    ) -> Option<TradeRecord> {
        let mut open = self.open.write();
        let mut pos = open.remove(symbol)?;

        let final_pnl = pos.direction.sign() * (exit_price - pos.entry_price) * pos.quantity;
        pos.realized_pnl += final_pnl;
        pos.fees_paid += exit_fee;

        let record = TradeRecord {
            id: pos.id.clone(),
            symbol: pos.symbol.clone(),
            direction: pos.direction,
            signal_type: pos.signal_type,
            strategy_tag: pos.strategy_tag,
            leverage: pos.leverage,
            margin_mode: pos.margin_mode,
            entry_price: pos.entry_price,
            exit_price,
            quantity: pos.original_quantity,
            opened_at: pos.opened_at,
            closed_at: Utc::now(),
            peak_pnl_pct: pos.peak_pnl_pct,
            trough_pnl_pct: pos.trough_pnl_pct,
            dca_used: pos.dca_filled,
            entry_fee: pos.entry_fee,
            exit_fee,
            funding_cost: pos.funding_paid,
            realized_pnl: pos.realized_pnl,
            net_pnl: pos.realized_pnl - pos.fees_paid - pos.funding_paid,
            exit_reason: reason,
        };

        info!(
            symbol,
            exit_price,
            reason = %reason,
            realized_pnl = record.realized_pnl,
            net_pnl = record.net_pnl,
            "position closed"
        );

        self.closed.write().push(record.clone());
        Some(record)
    }

    pub fn recent_closed(&self, count: usize) -> Vec<TradeRecord> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PositionBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionBook")
            .field("open", &self.open.read().len())
            .field("closed", &self.closed.read().len())
            .finish()
    }
}
