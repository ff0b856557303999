// =============================================================================
// Persistence traits — durable trade store + ephemeral state store
// =============================================================================
//
// Two logical stores back the engine:
//   - `TradeStore`: append-only trade records with read-by-symbol and
//     read-by-time-range queries.
//   - `StateStore`: versioned key-value records (position metadata, capital
//     snapshots, cycle metrics).
//
// The engine must keep running when the state store is unavailable: metadata
// reads degrade to a conservative TREND default and capital accounting falls
// back to the exchange as source of truth.
// =============================================================================

pub mod memory;
pub mod trade_log;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::position::TradeRecord;
use crate::types::{SignalType, StrategyTag};

/// Versioned metadata that associates an open position with its signal type
/// so slot accounting survives process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionMeta {
    pub signal_type: SignalType,
    pub strategy_tag: StrategyTag,
    /// Monotonically increasing write version. Stale writes are rejected.
    pub version: u64,
}

impl Default for PositionMeta {
    fn default() -> Self {
        Self {
            signal_type: SignalType::Trend,
            strategy_tag: StrategyTag::Conservative,
            version: 0,
        }
    }
}

/// Append-only store of closed trades.
pub trait TradeStore: Send + Sync {
    fn append(&self, record: &TradeRecord) -> Result<()>;
    fn by_symbol(&self, symbol: &str) -> Result<Vec<TradeRecord>>;
    fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TradeRecord>>;
}

/// Ephemeral key-value store with last-writer-wins versioning per symbol.
pub trait StateStore: Send + Sync {
    /// Write metadata for `symbol`. Returns `Ok(false)` (and does not write)
    /// when `meta.version` is not strictly newer than the stored version.
    fn put_meta(&self, symbol: &str, meta: &PositionMeta) -> Result<bool>;

    fn get_meta(&self, symbol: &str) -> Result<Option<PositionMeta>>;

    fn delete_meta(&self, symbol: &str) -> Result<()>;

    /// Free-form structured records (capital snapshots, cycle metrics).
    fn put_record(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    fn get_record(&self, key: &str) -> Result<Option<serde_json::Value>>;
}

/// Read metadata with graceful degradation: store failures and missing keys
/// both resolve to the conservative default (TREND).
pub fn meta_or_default(store: &dyn StateStore, symbol: &str) -> PositionMeta {
    match store.get_meta(symbol) {
        Ok(Some(meta)) => meta,
        Ok(None) => PositionMeta::default(),
        Err(e) => {
            warn!(symbol, error = %e, "state store unavailable — defaulting metadata to TREND");
            PositionMeta::default()
        }
    }
}
