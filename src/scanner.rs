// =============================================================================
// Market Scanner — universe screening by volume, whitelist, and rank
// =============================================================================
//
// Each cycle the scanner turns the full 24h ticker set into a bounded,
// deterministically-ordered candidate list:
//
//   1. USDT-quoted perpetuals only, minus the blacklist.
//   2. Whitelist (per venue mode) if configured, else the volume floor.
//   3. Dynamic whitelist: symbols that scored 100 earlier today bypass the
//      volume floor (top-K per UTC day).
//   4. Rank by descending 24h quote volume, tie-broken lexicographically.
//   5. Truncate to universe_top_n, then max_symbols — surplus is dropped
//      lowest-rank first.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::binance::client::{FuturesClient, Ticker24h};
use crate::binance::error::GatewayResult;
use crate::config::EngineConfig;

/// Coarse directional tag derived from the 24h change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoarseTrend {
    Up,
    Down,
    Flat,
}

/// One scan result, ordered by rank.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    pub last_price: f64,
    pub quote_volume: f64,
    pub change_24h_pct: f64,
    pub trend: CoarseTrend,
}

/// Score-100 symbols admitted today irrespective of the volume floor.
#[derive(Debug, Default)]
struct DynamicWhitelist {
    date: String,
    symbols: Vec<String>,
}

pub struct MarketScanner {
    client: Arc<FuturesClient>,
    config: Arc<RwLock<EngineConfig>>,
    dynamic: RwLock<DynamicWhitelist>,
}

impl MarketScanner {
    pub fn new(client: Arc<FuturesClient>, config: Arc<RwLock<EngineConfig>>) -> Self {
        Self {
            client,
            config,
            dynamic: RwLock::new(DynamicWhitelist::default()),
        }
    }

    /// Produce the candidate list for one cycle.
    pub async fn scan(&self) -> GatewayResult<Vec<Candidate>> {
        let tickers = self.client.get_ticker_24h_all().await?;
        let config = self.config.read().clone();
        let dynamic = self.dynamic_symbols_today();

        let candidates = rank_candidates(&tickers, &config, &dynamic);
        info!(
            universe = tickers.len(),
            candidates = candidates.len(),
            "scan complete"
        );
        Ok(candidates)
    }

    /// Record a score-100 symbol for today's dynamic whitelist. Capacity is
    /// `dynamic_whitelist_top_k` per UTC day.
    pub fn admit_dynamic(&self, symbol: &str) {
        let config = self.config.read();
        if !config.scanner.dynamic_whitelist {
            return;
        }
        let top_k = config.scanner.dynamic_whitelist_top_k;
        drop(config);

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut dynamic = self.dynamic.write();

        if dynamic.date != today {
            dynamic.date = today;
            dynamic.symbols.clear();
        }
        if dynamic.symbols.iter().any(|s| s == symbol) {
            return;
        }
        if dynamic.symbols.len() >= top_k {
            debug!(symbol, top_k, "dynamic whitelist full for today");
            return;
        }
        info!(symbol, "symbol admitted to dynamic whitelist");
        dynamic.symbols.push(symbol.to_string());
    }

    fn dynamic_symbols_today(&self) -> Vec<String> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let dynamic = self.dynamic.read();
        if dynamic.date == today {
            dynamic.symbols.clone()
        } else {
            Vec::new()
        }
    }
}

/// Pure ranking pass over the raw ticker set.
pub fn rank_candidates(
    tickers: &[Ticker24h],
    config: &EngineConfig,
    dynamic_whitelist: &[String],
) -> Vec<Candidate> {
    let scanner = &config.scanner;
    let whitelist = if config.testnet {
        &scanner.testnet_whitelist
    } else {
        &scanner.whitelist
    };
    let whitelist: HashSet<&str> = whitelist.iter().map(|s| s.as_str()).collect();
    let blacklist: HashSet<&str> = scanner.blacklist.iter().map(|s| s.as_str()).collect();
    let dynamic: HashSet<&str> = dynamic_whitelist.iter().map(|s| s.as_str()).collect();

    let mut rows: Vec<&Ticker24h> = tickers
        .iter()
        .filter(|t| t.symbol.ends_with("USDT"))
        .filter(|t| t.last_price > 0.0)
        .filter(|t| !blacklist.contains(t.symbol.as_str()))
        .filter(|t| {
            if !whitelist.is_empty() {
                return whitelist.contains(t.symbol.as_str());
            }
            t.quote_volume >= scanner.min_quote_volume_usd || dynamic.contains(t.symbol.as_str())
        })
        .collect();

    // Deterministic: volume descending, then lexicographic symbol.
    rows.sort_by(|a, b| {
        b.quote_volume
            .partial_cmp(&a.quote_volume)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    rows.truncate(scanner.universe_top_n);
    rows.truncate(scanner.max_symbols);

    rows.into_iter()
        .map(|t| Candidate {
            symbol: t.symbol.clone(),
            last_price: t.last_price,
            quote_volume: t.quote_volume,
            change_24h_pct: t.price_change_pct,
            trend: if t.price_change_pct > 1.0 {
                CoarseTrend::Up
            } else if t.price_change_pct < -1.0 {
                CoarseTrend::Down
            } else {
                CoarseTrend::Flat
            },
        })
        .collect()
}
