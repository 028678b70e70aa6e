// Signal Foundry - streaming candle aggregation and trade signal engine
//
// Layering, leaves first:
//   core      - types, config, logging, typed event bus, status snapshots
//   feed      - websocket market-data boundary (ticks, candle history)
//   market    - candle aggregation and the latest-price cache
//   analytics - indicators, patterns, features, ML ensemble, gates, the
//               advanced brain, and the signal engine
//   session   - session manager and the win/loss tracker
//
// Control flow: feed -> aggregator -> (session manager on candle close)
// -> signal engine -> publish -> win/loss tracker -> ML/threshold update.

pub mod core;
pub mod feed;
pub mod market;
pub mod analytics;
pub mod session;

pub use crate::core::events::get_event_bus;
pub use crate::core::logger::setup_logging;
