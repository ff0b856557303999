// =============================================================================
// JSONL Trade Log — durable append-only store on local disk
// =============================================================================
//
// One JSON object per line. Appends are flushed per record; queries scan the
// file. Suited for the trade volumes this engine produces (tens per day).
// =============================================================================

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::position::TradeRecord;
use crate::store::TradeStore;

pub struct JsonTradeLog {
    path: PathBuf,
    /// Serialises appends; reads open the file independently.
    write_lock: Mutex<()>,
}

impl JsonTradeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<Vec<TradeRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("open trade log {}", self.path.display()))
            }
        };

        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("read trade log line")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    // A torn final line from a crash must not poison history.
                    warn!(line = line_no + 1, error = %e, "skipping corrupt trade log line");
                }
            }
        }
        Ok(records)
    }
}

impl TradeStore for JsonTradeLog {
    fn append(&self, record: &TradeRecord) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open trade log {} for append", self.path.display()))?;

        let line = serde_json::to_string(record).context("serialise trade record")?;
        writeln!(file, "{line}").context("append trade record")?;
        file.flush().context("flush trade log")?;

        debug!(id = %record.id, symbol = %record.symbol, "trade record appended");
        Ok(())
    }

    fn by_symbol(&self, symbol: &str) -> Result<Vec<TradeRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.symbol == symbol)
            .collect())
    }

    fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.closed_at >= from && r.closed_at <= to)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, ExitReason, MarginMode, SignalType, StrategyTag};

    fn scratch_path() -> PathBuf {
        std::env::temp_dir().join(format!("meridian-trades-{}.jsonl", uuid::Uuid::new_v4()))
    }

    fn record(symbol: &str) -> TradeRecord {
        TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            direction: Direction::Short,
            signal_type: SignalType::Reversal,
            strategy_tag: StrategyTag::Fibonacci,
            leverage: 3,
            margin_mode: MarginMode::Cross,
            entry_price: 3000.0,
            exit_price: 2900.0,
            quantity: 2.0,
            opened_at: Utc::now(),
            closed_at: Utc::now(),
            peak_pnl_pct: 12.0,
            trough_pnl_pct: -1.0,
            dca_used: 1,
            entry_fee: 3.0,
            exit_fee: 2.9,
            funding_cost: 0.4,
            realized_pnl: 200.0,
            net_pnl: 193.7,
            exit_reason: ExitReason::Funding,
        }
    }

    #[test]
    fn append_and_query_roundtrip() {
        let path = scratch_path();
        let log = JsonTradeLog::new(&path);

        log.append(&record("ETHUSDT")).unwrap();
        log.append(&record("BTCUSDT")).unwrap();
        log.append(&record("ETHUSDT")).unwrap();

        let eth = log.by_symbol("ETHUSDT").unwrap();
        assert_eq!(eth.len(), 2);
        assert_eq!(eth[0].exit_reason, ExitReason::Funding);

        let all = log
            .in_range(Utc::now() - chrono::Duration::hours(1), Utc::now())
            .unwrap();
        assert_eq!(all.len(), 3);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_reads_empty() {
        let log = JsonTradeLog::new(scratch_path());
        assert!(log.by_symbol("BTCUSDT").unwrap().is_empty());
    }

    #[test]
    fn corrupt_line_does_not_poison_history() {
        let path = scratch_path();
        let log = JsonTradeLog::new(&path);
        log.append(&record("BTCUSDT")).unwrap();

        // Simulate a torn write from a crash.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"id\": \"torn").unwrap();
        drop(file);

        log.append(&record("BTCUSDT")).unwrap();
        assert_eq!(log.by_symbol("BTCUSDT").unwrap().len(), 2);

        std::fs::remove_file(path).ok();
    }
}
