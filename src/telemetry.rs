// =============================================================================
// Telemetry — notification bus and cycle counters, fire-and-forget
// =============================================================================
//
// Notifications fan out on a broadcast channel to whoever cares (control
// surface, operator alerting). A send with no subscribers, or to a lagged
// subscriber, is silently dropped: telemetry failure must never block
// trading.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::ExitReason;

/// Operator-facing event.
#[derive(Debug, Clone, Serialize)]
pub enum Notification {
    TradeOpened {
        symbol: String,
        direction: String,
        quantity: f64,
        entry_price: f64,
        leverage: u32,
    },
    TradeClosed {
        symbol: String,
        exit_reason: ExitReason,
        net_pnl: f64,
    },
    BreakevenArmed {
        symbol: String,
        stop_price: f64,
    },
    CircuitBreakerTripped {
        reason: String,
        cooldown_until: String,
    },
    SupervisorIntervention {
        task: String,
        restarts_in_window: u32,
    },
    DcaSkipped {
        symbol: String,
        rung: u8,
        reason: String,
    },
}

/// Per-cycle pipeline counters, reset at cycle start.
#[derive(Debug, Default)]
pub struct CycleCounters {
    pub scanned: AtomicU64,
    pub signals: AtomicU64,
    pub admitted: AtomicU64,
    pub executed: AtomicU64,
    pub rejected: AtomicU64,
}

impl CycleCounters {
    pub fn reset(&self) {
        self.scanned.store(0, Ordering::Relaxed);
        self.signals.store(0, Ordering::Relaxed);
        self.admitted.store(0, Ordering::Relaxed);
        self.executed.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
    }
}

pub struct Telemetry {
    tx: broadcast::Sender<Notification>,
    pub counters: CycleCounters,
    cycles_completed: AtomicU64,
}

impl Telemetry {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            counters: CycleCounters::default(),
            cycles_completed: AtomicU64::new(0),
        }
    }

    /// Emit a notification. Never fails, never blocks.
    pub fn notify(&self, event: Notification) {
        debug!(event = ?event, "notification");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn record_cycle_complete(&self) -> u64 {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("cycles_completed", &self.cycles_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_without_subscribers_does_not_panic() {
        let telemetry = Telemetry::new();
        telemetry.notify(Notification::BreakevenArmed {
            symbol: "BTCUSDT".into(),
            stop_price: 50_100.0,
        });
    }

    #[tokio::test]
    async fn subscriber_receives_events() {
        let telemetry = Telemetry::new();
        let mut rx = telemetry.subscribe();
        telemetry.notify(Notification::TradeClosed {
            symbol: "ETHUSDT".into(),
            exit_reason: ExitReason::Trailing,
            net_pnl: 42.0,
        });
        match rx.recv().await.unwrap() {
            Notification::TradeClosed { symbol, net_pnl, .. } => {
                assert_eq!(symbol, "ETHUSDT");
                assert!((net_pnl - 42.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn counters_reset() {
        let telemetry = Telemetry::new();
        telemetry.counters.scanned.store(80, Ordering::Relaxed);
        telemetry.counters.admitted.store(3, Ordering::Relaxed);
        telemetry.counters.reset();
        assert_eq!(telemetry.counters.scanned.load(Ordering::Relaxed), 0);
        assert_eq!(telemetry.counters.admitted.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn cycle_counter_increments() {
        let telemetry = Telemetry::new();
        assert_eq!(telemetry.record_cycle_complete(), 1);
        assert_eq!(telemetry.record_cycle_complete(), 2);
        assert_eq!(telemetry.cycles_completed(), 2);
    }
}
