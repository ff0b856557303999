// =============================================================================
// Symbol Lock Table — per-symbol serialization of order mutations
// =============================================================================
//
// The executor and the position monitor must never act on the same symbol
// concurrently. Each symbol maps to one async mutex; locks are acquired in a
// single global order (symbol only), so no lock cycle can form.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct SymbolLocks {
    inner: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// The lock for `symbol`, created on first use.
    pub fn lock_for(&self, symbol: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.inner.read().get(symbol) {
            return lock.clone();
        }
        let mut map = self.inner.write();
        map.entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the symbol's lock, holding it across await points.
    pub async fn acquire(&self, symbol: &str) -> OwnedMutexGuard<()> {
        self.lock_for(symbol).lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl Default for SymbolLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn same_symbol_is_exclusive() {
        let locks = Arc::new(SymbolLocks::new());
        let concurrent = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("BTCUSDT").await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Never more than one task inside the same symbol's critical section.
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_symbols_run_in_parallel() {
        let locks = Arc::new(SymbolLocks::new());

        // Hold BTC; ETH must still be acquirable immediately.
        let _btc = locks.acquire("BTCUSDT").await;
        let eth = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            locks.acquire("ETHUSDT"),
        )
        .await;
        assert!(eth.is_ok());
    }

    #[test]
    fn lock_instances_are_stable_per_symbol() {
        let locks = SymbolLocks::new();
        let a = locks.lock_for("BTCUSDT");
        let b = locks.lock_for("BTCUSDT");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 1);
    }
}
