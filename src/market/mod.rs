// Market Module - Candle aggregation and price state

pub mod aggregator;
pub mod price_cache;

pub use aggregator::{CandleAggregator, SeriesKey, SeriesStats};
pub use price_cache::{CachedPrice, PriceCache, get_price_cache};
