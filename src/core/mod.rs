// Core Module - Foundational types, config, logging, events, status

pub mod types;
pub mod config;
pub mod logger;
pub mod events;
pub mod status;

// Re-export commonly used items for convenience
pub use types::*;
pub use config::{
    AppConfig, ConfigError, ConfigManager, ConfigSummary, EngineConfig, FeedConfig,
    MonitoringConfig, SessionOptions, get_config,
};
pub use logger::setup_logging;
pub use events::{
    CandleCloseSignal, CandleEvent, CandlePhase, Channel, EventBus, EventBusStats, FeedEvent,
    SessionLifecycle, TradeResult, VolatilityWarning, WarningKind, get_event_bus,
};
pub use status::{BotStatus, HealthStatus, VolatilityStatusEntry};
