// Feed - upstream market data boundary

pub mod client;

pub use client::{FeedAdapter, FeedError, WsFeedClient};
