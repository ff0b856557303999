// =============================================================================
// Symbol Filter Cache — LOT_SIZE / MIN_NOTIONAL / PRICE_FILTER per symbol
// =============================================================================
//
// Filters are immutable per symbol and refreshed from exchangeInfo at gateway
// startup, and again whenever an order is rejected with a precision error.
// The cache is read-mostly; a refresh holds the write lock only for the swap.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::binance::error::{GatewayError, GatewayResult};

/// Order-validation rules for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub min_qty: f64,
    pub step_size: f64,
    pub min_notional: f64,
    pub tick_size: f64,
}

/// Tolerance for float grid arithmetic.
const GRID_EPS: f64 = 1e-9;

impl SymbolFilters {
    /// Parse one `symbols[i]` entry of the exchangeInfo payload.
    pub fn parse(symbol_info: &serde_json::Value) -> Option<Self> {
        let filters = symbol_info.get("filters")?.as_array()?;

        let mut min_qty = None;
        let mut step_size = None;
        let mut min_notional = None;
        let mut tick_size = None;

        for f in filters {
            match f.get("filterType").and_then(|t| t.as_str()) {
                Some("LOT_SIZE") => {
                    min_qty = parse_field(f, "minQty");
                    step_size = parse_field(f, "stepSize");
                }
                Some("MIN_NOTIONAL") => {
                    min_notional = parse_field(f, "notional").or_else(|| parse_field(f, "minNotional"));
                }
                Some("PRICE_FILTER") => {
                    tick_size = parse_field(f, "tickSize");
                }
                _ => {}
            }
        }

        Some(Self {
            min_qty: min_qty?,
            step_size: step_size?,
            min_notional: min_notional.unwrap_or(0.0),
            tick_size: tick_size.unwrap_or(0.0),
        })
    }

    /// Round `desired_qty` down onto the `min_qty + k * step_size` grid and
    /// verify the notional floor against `reference_price`.
    ///
    /// Exactly `min_qty` and exactly `min_notional` are valid.
    pub fn adjust_quantity(&self, desired_qty: f64, reference_price: f64) -> GatewayResult<f64> {
        if desired_qty <= 0.0 || !desired_qty.is_finite() {
            return Err(GatewayError::Precision(format!(
                "quantity {desired_qty} is not positive"
            )));
        }

        if desired_qty + GRID_EPS < self.min_qty {
            return Err(GatewayError::Precision(format!(
                "quantity {desired_qty} below minQty {}",
                self.min_qty
            )));
        }

        let adjusted = if self.step_size > 0.0 {
            let steps = ((desired_qty - self.min_qty) / self.step_size + GRID_EPS).floor();
            self.min_qty + steps * self.step_size
        } else {
            desired_qty
        };

        let notional = adjusted * reference_price;
        if notional + GRID_EPS < self.min_notional {
            return Err(GatewayError::Precision(format!(
                "notional {notional:.4} below minNotional {} (qty {adjusted} @ {reference_price})",
                self.min_notional
            )));
        }

        Ok(adjusted)
    }

    /// Snap a price onto the tick grid (round toward zero).
    pub fn round_price(&self, price: f64) -> f64 {
        if self.tick_size <= 0.0 {
            return price;
        }
        (price / self.tick_size + GRID_EPS).floor() * self.tick_size
    }
}

/// Thread-safe symbol → filters map.
pub struct FilterCache {
    inner: RwLock<HashMap<String, SymbolFilters>>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<SymbolFilters> {
        self.inner.read().get(symbol).copied()
    }

    /// Replace the entire cache in one swap (used on refresh).
    pub fn replace_all(&self, filters: HashMap<String, SymbolFilters>) {
        let count = filters.len();
        *self.inner.write() = filters;
        debug!(symbols = count, "symbol filter cache refreshed");
    }

    pub fn insert(&self, symbol: impl Into<String>, filters: SymbolFilters) {
        self.inner.write().insert(symbol.into(), filters);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_field(value: &serde_json::Value, key: &str) -> Option<f64> {
    value.get(key)?.as_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc_filters() -> SymbolFilters {
        SymbolFilters {
            min_qty: 0.001,
            step_size: 0.001,
            min_notional: 100.0,
            tick_size: 0.1,
        }
    }

    #[test]
    fn parse_exchange_info_entry() {
        let info = serde_json::json!({
            "symbol": "BTCUSDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "tickSize": "0.10"},
                {"filterType": "LOT_SIZE", "minQty": "0.001", "stepSize": "0.001"},
                {"filterType": "MIN_NOTIONAL", "notional": "100"}
            ]
        });
        let f = SymbolFilters::parse(&info).unwrap();
        assert!((f.min_qty - 0.001).abs() < 1e-12);
        assert!((f.step_size - 0.001).abs() < 1e-12);
        assert!((f.min_notional - 100.0).abs() < 1e-12);
        assert!((f.tick_size - 0.1).abs() < 1e-12);
    }

    #[test]
    fn quantity_floors_to_step_grid() {
        let f = btc_filters();
        let q = f.adjust_quantity(0.0057, 50_000.0).unwrap();
        assert!((q - 0.005).abs() < 1e-9);
    }

    #[test]
    fn exact_min_qty_and_min_notional_succeed() {
        // Boundary: qty exactly minQty, notional exactly minNotional.
        let f = SymbolFilters {
            min_qty: 0.001,
            step_size: 0.001,
            min_notional: 100.0,
            tick_size: 0.1,
        };
        let q = f.adjust_quantity(0.001, 100_000.0).unwrap();
        assert!((q - 0.001).abs() < 1e-12);
        assert!((q * 100_000.0 - 100.0).abs() < 1e-6);
    }

    #[test]
    fn below_min_qty_is_precision_error() {
        let f = btc_filters();
        // stepSize 0.001: 0.00015 cannot be represented.
        let err = f.adjust_quantity(0.00015, 50_000.0).unwrap_err();
        assert!(matches!(err, GatewayError::Precision(_)));
        assert!(err.to_string().contains("minQty"));
    }

    #[test]
    fn below_min_notional_is_precision_error() {
        let f = btc_filters();
        let err = f.adjust_quantity(0.001, 10.0).unwrap_err();
        assert!(matches!(err, GatewayError::Precision(_)));
        assert!(err.to_string().contains("minNotional"));
    }

    #[test]
    fn zero_quantity_rejected() {
        let f = btc_filters();
        assert!(f.adjust_quantity(0.0, 50_000.0).is_err());
    }

    #[test]
    fn price_rounds_to_tick() {
        let f = btc_filters();
        assert!((f.round_price(50_000.1234) - 50_000.1).abs() < 1e-6);
    }

    #[test]
    fn cache_replace_swaps_everything() {
        let cache = FilterCache::new();
        cache.insert("ETHUSDT", btc_filters());
        assert_eq!(cache.len(), 1);

        let mut fresh = HashMap::new();
        fresh.insert("BTCUSDT".to_string(), btc_filters());
        fresh.insert("SOLUSDT".to_string(), btc_filters());
        cache.replace_all(fresh);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("ETHUSDT").is_none());
        assert!(cache.get("BTCUSDT").is_some());
    }
}
