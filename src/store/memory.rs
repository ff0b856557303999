// =============================================================================
// In-memory store implementations
// =============================================================================
//
// Default backing when no external store is configured, and the fixture for
// engine tests. Metadata writes honour the version token: a write with a
// version not strictly greater than the stored one is rejected as stale.
// =============================================================================

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::position::TradeRecord;
use crate::store::{PositionMeta, StateStore, TradeStore};

#[derive(Default)]
pub struct MemoryStateStore {
    meta: RwLock<HashMap<String, PositionMeta>>,
    records: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn put_meta(&self, symbol: &str, meta: &PositionMeta) -> Result<bool> {
        let mut map = self.meta.write();
        if let Some(existing) = map.get(symbol) {
            if meta.version <= existing.version {
                return Ok(false);
            }
        }
        map.insert(symbol.to_string(), *meta);
        Ok(true)
    }

    fn get_meta(&self, symbol: &str) -> Result<Option<PositionMeta>> {
        Ok(self.meta.read().get(symbol).copied())
    }

    fn delete_meta(&self, symbol: &str) -> Result<()> {
        self.meta.write().remove(symbol);
        Ok(())
    }

    fn put_record(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.records.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get_record(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.records.read().get(key).cloned())
    }
}

#[derive(Default)]
pub struct MemoryTradeStore {
    records: RwLock<Vec<TradeRecord>>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl TradeStore for MemoryTradeStore {
    fn append(&self, record: &TradeRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    fn by_symbol(&self, symbol: &str) -> Result<Vec<TradeRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.symbol == symbol)
            .cloned()
            .collect())
    }

    fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.closed_at >= from && r.closed_at <= to)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, ExitReason, MarginMode, SignalType, StrategyTag};

    fn record(symbol: &str, closed_at: DateTime<Utc>) -> TradeRecord {
        TradeRecord {
            id: "t1".into(),
            symbol: symbol.into(),
            direction: Direction::Long,
            signal_type: SignalType::Trend,
            strategy_tag: StrategyTag::Conservative,
            leverage: 5,
            margin_mode: MarginMode::Isolated,
            entry_price: 100.0,
            exit_price: 105.0,
            quantity: 1.0,
            opened_at: closed_at,
            closed_at,
            peak_pnl_pct: 25.0,
            trough_pnl_pct: -2.0,
            dca_used: 0,
            entry_fee: 0.05,
            exit_fee: 0.05,
            funding_cost: 0.0,
            realized_pnl: 5.0,
            net_pnl: 4.9,
            exit_reason: ExitReason::TakeProfit(3),
        }
    }

    #[test]
    fn stale_meta_write_rejected() {
        let store = MemoryStateStore::new();
        let v2 = PositionMeta {
            version: 2,
            ..PositionMeta::default()
        };
        assert!(store.put_meta("BTCUSDT", &v2).unwrap());

        // A delayed task writing version 1 must lose.
        let v1 = PositionMeta {
            version: 1,
            signal_type: SignalType::Reversal,
            ..PositionMeta::default()
        };
        assert!(!store.put_meta("BTCUSDT", &v1).unwrap());
        assert_eq!(
            store.get_meta("BTCUSDT").unwrap().unwrap().signal_type,
            SignalType::Trend
        );

        // Equal version is also stale.
        assert!(!store.put_meta("BTCUSDT", &v2).unwrap());

        let v3 = PositionMeta {
            version: 3,
            signal_type: SignalType::Reversal,
            ..PositionMeta::default()
        };
        assert!(store.put_meta("BTCUSDT", &v3).unwrap());
    }

    #[test]
    fn delete_then_get_is_none() {
        let store = MemoryStateStore::new();
        store
            .put_meta("BTCUSDT", &PositionMeta { version: 1, ..Default::default() })
            .unwrap();
        store.delete_meta("BTCUSDT").unwrap();
        assert!(store.get_meta("BTCUSDT").unwrap().is_none());
    }

    #[test]
    fn trade_queries_filter_correctly() {
        let store = MemoryTradeStore::new();
        let t0 = Utc::now();
        store.append(&record("BTCUSDT", t0)).unwrap();
        store.append(&record("ETHUSDT", t0 + chrono::Duration::hours(1))).unwrap();

        assert_eq!(store.by_symbol("BTCUSDT").unwrap().len(), 1);
        assert_eq!(store.by_symbol("XRPUSDT").unwrap().len(), 0);

        let in_first_hour = store
            .in_range(t0 - chrono::Duration::minutes(1), t0 + chrono::Duration::minutes(30))
            .unwrap();
        assert_eq!(in_first_hour.len(), 1);
        assert_eq!(in_first_hour[0].symbol, "BTCUSDT");
    }

    #[test]
    fn record_roundtrip() {
        let store = MemoryStateStore::new();
        let value = serde_json::json!({"scanned": 80, "admitted": 2});
        store.put_record("cycle:metrics:latest", &value).unwrap();
        assert_eq!(store.get_record("cycle:metrics:latest").unwrap().unwrap(), value);
        assert!(store.get_record("missing").unwrap().is_none());
    }
}
