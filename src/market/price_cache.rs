// Price Cache - latest observed price per symbol
// Written by the tick fan-in handler; read at signal expiry by the tracker.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use parking_lot::RwLock;

use crate::core::types::Tick;

/// Latest price observation for one symbol.
#[derive(Debug, Clone, Copy)]
pub struct CachedPrice {
    pub price: f64,
    pub epoch: i64,
}

/// Per-symbol latest-price map. Single writer (the tick handler); readers
/// tolerate snapshots stale by up to one tick interval.
pub struct PriceCache {
    prices: RwLock<HashMap<String, CachedPrice>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, tick: &Tick) {
        if !tick.is_valid() {
            return;
        }
        self.prices.write().insert(
            tick.symbol.clone(),
            CachedPrice {
                price: tick.price,
                epoch: tick.epoch,
            },
        );
    }

    pub fn latest(&self, symbol: &str) -> Option<CachedPrice> {
        self.prices.read().get(symbol).copied()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.prices.read().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.prices.write().clear();
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_PRICE_CACHE: OnceLock<Arc<PriceCache>> = OnceLock::new();

/// Get global price cache instance (singleton).
pub fn get_price_cache() -> Arc<PriceCache> {
    Arc::clone(GLOBAL_PRICE_CACHE.get_or_init(|| Arc::new(PriceCache::new())))
}
