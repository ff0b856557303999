// =============================================================================
// Engine Context — explicit wiring of every subsystem
// =============================================================================
//
// One value constructed at startup and passed by reference; no process-wide
// singletons. Tests build their own instances with in-memory stores.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::binance::client::FuturesClient;
use crate::config::EngineConfig;
use crate::executor::OrderExecutor;
use crate::position::PositionBook;
use crate::risk::RiskManager;
use crate::scanner::MarketScanner;
use crate::signal::SignalGenerator;
use crate::store::memory::{MemoryStateStore, MemoryTradeStore};
use crate::store::trade_log::JsonTradeLog;
use crate::store::{StateStore, TradeStore};
use crate::symbol_lock::SymbolLocks;
use crate::telemetry::Telemetry;

pub struct EngineContext {
    pub config: Arc<RwLock<EngineConfig>>,
    pub client: Arc<FuturesClient>,
    pub book: Arc<PositionBook>,
    pub risk: Arc<RiskManager>,
    pub locks: Arc<SymbolLocks>,
    pub telemetry: Arc<Telemetry>,
    pub state_store: Arc<dyn StateStore>,
    pub trade_store: Arc<dyn TradeStore>,
    pub scanner: Arc<MarketScanner>,
    pub generator: Arc<SignalGenerator>,
    pub executor: Arc<OrderExecutor>,
    pub start_time: Instant,
}

impl EngineContext {
    /// Production wiring: JSONL trade log plus in-memory ephemeral state.
    pub fn new(config: EngineConfig, api_key: String, api_secret: String) -> Arc<Self> {
        let trade_store: Arc<dyn TradeStore> = Arc::new(JsonTradeLog::new("trades.jsonl"));
        let state_store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        Self::with_stores(config, api_key, api_secret, trade_store, state_store)
    }

    /// Test wiring with fully in-memory stores.
    pub fn in_memory(config: EngineConfig) -> Arc<Self> {
        Self::with_stores(
            config,
            String::new(),
            String::new(),
            Arc::new(MemoryTradeStore::new()),
            Arc::new(MemoryStateStore::new()),
        )
    }

    fn with_stores(
        config: EngineConfig,
        api_key: String,
        api_secret: String,
        trade_store: Arc<dyn TradeStore>,
        state_store: Arc<dyn StateStore>,
    ) -> Arc<Self> {
        let testnet = config.testnet;
        let config = Arc::new(RwLock::new(config));
        let client = Arc::new(FuturesClient::new(api_key, api_secret, testnet));
        let book = Arc::new(PositionBook::new());
        let risk = Arc::new(RiskManager::new(config.clone()));
        let locks = Arc::new(SymbolLocks::new());
        let telemetry = Arc::new(Telemetry::new());

        let scanner = Arc::new(MarketScanner::new(client.clone(), config.clone()));
        let generator = Arc::new(SignalGenerator::new(client.clone(), config.clone()));
        let executor = Arc::new(OrderExecutor::new(
            client.clone(),
            book.clone(),
            state_store.clone(),
            trade_store.clone(),
            locks.clone(),
            telemetry.clone(),
            config.clone(),
        ));

        Arc::new(Self {
            config,
            client,
            book,
            risk,
            locks,
            telemetry,
            state_store,
            trade_store,
            scanner,
            generator,
            executor,
            start_time: Instant::now(),
        })
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("book", &self.book)
            .field("risk", &self.risk)
            .finish()
    }
}
