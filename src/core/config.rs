// Configuration Management for Signal Foundry
// JSON file sections plus environment overrides, served from a singleton

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unknown option key: {0}")]
    UnknownOption(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub ws_url: String,
    pub api_token: String,

    // Connection settings
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_seconds: u64,
    pub reconnect_backoff_multiplier: f64,
    pub reconnect_delay_cap_seconds: u64,
    pub ping_interval_seconds: u64,
    pub request_timeout_seconds: u64,

    // History fetch
    pub history_candle_count: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://feed.invalid/ws".to_string(),
            api_token: String::new(),
            max_reconnect_attempts: 10,
            reconnect_delay_seconds: 5,
            reconnect_backoff_multiplier: 1.5,
            reconnect_delay_cap_seconds: 30,
            ping_interval_seconds: 30,
            request_timeout_seconds: 30,
            history_candle_count: 300,
        }
    }
}

/// Constants governing the analytics pipeline. Indicator periods are fixed
/// by the strategy definitions; the values here are the tunable gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // Candle storage
    pub candle_capacity: usize,
    pub min_closed_candles: usize,

    // Signal validation
    pub quality_rejection_floor: f64,
    pub max_conflict_ratio: f64,
    pub min_aligned_indicators: u32,
    pub min_direction_strength: f64,
    pub confirmation_factor_floor: f64,

    // Base thresholds seeded into the adaptive gate
    pub base_min_confidence: f64,
    pub base_max_conflict_ratio: f64,
    pub base_min_trend_strength: f64,
    pub base_min_aligned_indicators: u32,

    // Volatility
    pub volatility_score_threshold: f64,

    // Generation deadline
    pub generation_deadline_secs: u64,

    // Per-indicator weight multipliers (0.7 - 1.5)
    pub indicator_weights: HashMap<String, f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut indicator_weights = HashMap::new();
        for (name, weight) in [
            ("ema_cross", 1.3),
            ("macd", 1.2),
            ("rsi", 1.1),
            ("stochastic", 0.9),
            ("supertrend", 1.5),
            ("bollinger", 1.0),
            ("keltner", 0.8),
            ("adx", 1.0),
            ("cci", 0.8),
            ("williams_r", 0.7),
            ("psar", 0.9),
            ("roc", 0.8),
            ("momentum", 1.0),
            ("donchian", 0.8),
            ("obv", 0.7),
            ("ultimate", 0.8),
            ("zscore", 0.9),
            ("linreg", 1.0),
            ("fisher", 0.9),
            ("ema_ribbon", 1.1),
            ("hull", 0.9),
            ("range_percentile", 0.7),
        ] {
            indicator_weights.insert(name.to_string(), weight);
        }

        Self {
            candle_capacity: 300,
            min_closed_candles: 50,
            quality_rejection_floor: 45.0,
            max_conflict_ratio: 0.32,
            min_aligned_indicators: 4,
            min_direction_strength: 0.12,
            confirmation_factor_floor: 2.5,
            base_min_confidence: 72.0,
            base_max_conflict_ratio: 0.32,
            base_min_trend_strength: 0.42,
            base_min_aligned_indicators: 4,
            volatility_score_threshold: 0.4,
            generation_deadline_secs: 5,
            indicator_weights,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_json: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            log_json: false,
        }
    }
}

/// Process-level settings sourced from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub session_secret: Option<String>,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            session_secret: None,
            port: 5000,
        }
    }
}

// ============================================================================
// Session Options
// ============================================================================

/// Per-session feature toggles and overrides passed in at session start.
/// Unknown keys are rejected rather than ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionOptions {
    #[serde(default)]
    pub enabled_indicators: Option<HashSet<String>>,
    #[serde(default)]
    pub custom_weights: HashMap<String, f64>,
    #[serde(default)]
    pub volatility_threshold: Option<f64>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub confidence_filter: Option<u8>,
}

impl SessionOptions {
    /// Parse options from loose JSON, rejecting unknown keys.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::UnknownOption(e.to_string()))
    }

    /// Indicator enabled check against the optional enable-list.
    pub fn indicator_enabled(&self, name: &str) -> bool {
        match &self.enabled_indicators {
            Some(set) => set.contains(name),
            None => true,
        }
    }

    /// Per-indicator multiplier: custom override or the engine default.
    pub fn weight_for(&self, name: &str, engine: &EngineConfig) -> f64 {
        self.custom_weights
            .get(name)
            .copied()
            .or_else(|| engine.indicator_weights.get(name).copied())
            .unwrap_or(1.0)
    }
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub ws_url: String,
    pub port: u16,
    pub log_level: String,
    pub candle_capacity: usize,
    pub min_closed_candles: usize,
    pub base_min_confidence: f64,
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    feed: Arc<RwLock<FeedConfig>>,
    engine: Arc<RwLock<EngineConfig>>,
    monitoring: Arc<RwLock<MonitoringConfig>>,
    app: Arc<RwLock<AppConfig>>,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut manager = Self {
            feed: Arc::new(RwLock::new(FeedConfig::default())),
            engine: Arc::new(RwLock::new(EngineConfig::default())),
            monitoring: Arc::new(RwLock::new(MonitoringConfig::default())),
            app: Arc::new(RwLock::new(AppConfig::default())),
        };

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();

        info!("Configuration initialized");
        Ok(manager)
    }

    /// Load configuration from JSON file with one object per section.
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        let config_data: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        if let Some(feed_data) = config_data.get("feed") {
            if let Ok(feed) = serde_json::from_value::<FeedConfig>(feed_data.clone()) {
                *self.feed.write() = feed;
            }
        }

        if let Some(engine_data) = config_data.get("engine") {
            if let Ok(engine) = serde_json::from_value::<EngineConfig>(engine_data.clone()) {
                *self.engine.write() = engine;
            }
        }

        if let Some(monitoring_data) = config_data.get("monitoring") {
            if let Ok(monitoring) =
                serde_json::from_value::<MonitoringConfig>(monitoring_data.clone())
            {
                *self.monitoring.write() = monitoring;
            }
        }

        if let Some(app_data) = config_data.get("app") {
            if let Ok(app) = serde_json::from_value::<AppConfig>(app_data.clone()) {
                *self.app.write() = app;
            }
        }

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    /// Load sensitive values from environment variables.
    pub fn load_from_env(&mut self) {
        if let Ok(token) = std::env::var("FEED_API_TOKEN") {
            self.feed.write().api_token = token;
        }
        if let Ok(url) = std::env::var("FEED_WS_URL") {
            self.feed.write().ws_url = url;
        }
        if let Ok(db) = std::env::var("DATABASE_URL") {
            self.app.write().database_url = db;
        }
        if let Ok(secret) = std::env::var("SESSION_SECRET") {
            self.app.write().session_secret = Some(secret);
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.app.write().port = port;
            }
        }
    }

    /// Validate configuration; returns false (with warnings) when invalid.
    pub fn validate(&self) -> Result<bool, ConfigError> {
        let mut errors = Vec::new();
        let feed = self.feed.read();
        let engine = self.engine.read();

        if feed.api_token.is_empty() {
            errors.push("feed api token is required".to_string());
        }
        if engine.min_closed_candles < 2 {
            errors.push("min_closed_candles must be at least 2".to_string());
        }
        if engine.candle_capacity < engine.min_closed_candles {
            errors.push("candle_capacity must cover min_closed_candles".to_string());
        }
        if !(0.0..=1.0).contains(&engine.volatility_score_threshold) {
            errors.push("volatility_score_threshold must be within [0, 1]".to_string());
        }
        for (name, weight) in &engine.indicator_weights {
            if !(0.0..=3.0).contains(weight) {
                errors.push(format!("indicator weight out of range: {} = {}", name, weight));
            }
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return Ok(false);
        }

        info!("Configuration validated successfully");
        Ok(true)
    }

    pub fn get_summary(&self) -> ConfigSummary {
        let feed = self.feed.read();
        let engine = self.engine.read();
        let monitoring = self.monitoring.read();
        let app = self.app.read();

        ConfigSummary {
            ws_url: feed.ws_url.clone(),
            port: app.port,
            log_level: monitoring.log_level.clone(),
            candle_capacity: engine.candle_capacity,
            min_closed_candles: engine.min_closed_candles,
            base_min_confidence: engine.base_min_confidence,
        }
    }

    // Getters for each config section
    pub fn feed(&self) -> FeedConfig {
        self.feed.read().clone()
    }

    pub fn engine(&self) -> EngineConfig {
        self.engine.read().clone()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.monitoring.read().clone()
    }

    pub fn app(&self) -> AppConfig {
        self.app.read().clone()
    }
}

// Global config instance (thread-safe singleton)
static GLOBAL_CONFIG: OnceLock<Arc<RwLock<ConfigManager>>> = OnceLock::new();

/// Get global configuration instance (singleton).
pub fn get_config() -> Arc<RwLock<ConfigManager>> {
    Arc::clone(GLOBAL_CONFIG.get_or_init(|| {
        Arc::new(RwLock::new(
            ConfigManager::new(None).expect("Failed to create default config"),
        ))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let feed = FeedConfig::default();
        assert_eq!(feed.max_reconnect_attempts, 10);
        assert_eq!(feed.reconnect_delay_seconds, 5);
        assert_eq!(feed.ping_interval_seconds, 30);
        assert_eq!(feed.request_timeout_seconds, 30);
        assert_eq!(feed.history_candle_count, 300);

        let engine = EngineConfig::default();
        assert_eq!(engine.min_closed_candles, 50);
        assert_eq!(engine.base_min_confidence, 72.0);
        assert_eq!(engine.base_min_aligned_indicators, 4);

        let app = AppConfig::default();
        assert_eq!(app.port, 5000);
    }

    #[test]
    fn test_indicator_weight_range() {
        let engine = EngineConfig::default();
        for weight in engine.indicator_weights.values() {
            assert!((0.7..=1.5).contains(weight));
        }
    }

    #[test]
    fn test_config_manager_validation() {
        let manager = ConfigManager::new(None).unwrap();
        // Default config has an empty feed token, so it is invalid.
        let result = manager.validate();
        assert!(result.is_ok());
    }

    #[test]
    fn test_session_options_rejects_unknown_keys() {
        let bad = serde_json::json!({ "confidence_filter": 90, "bogus": true });
        assert!(SessionOptions::from_json(bad).is_err());

        let good = serde_json::json!({ "confidence_filter": 90 });
        let options = SessionOptions::from_json(good).unwrap();
        assert_eq!(options.confidence_filter, Some(90));
    }

    #[test]
    fn test_session_options_weight_lookup() {
        let engine = EngineConfig::default();
        let mut options = SessionOptions::default();
        options
            .custom_weights
            .insert("macd".to_string(), 0.75);

        assert_eq!(options.weight_for("macd", &engine), 0.75);
        assert_eq!(
            options.weight_for("supertrend", &engine),
            *engine.indicator_weights.get("supertrend").unwrap()
        );
        assert_eq!(options.weight_for("unknown", &engine), 1.0);
    }

    #[test]
    fn test_session_options_enable_list() {
        let mut options = SessionOptions::default();
        assert!(options.indicator_enabled("rsi"));

        let mut set = HashSet::new();
        set.insert("rsi".to_string());
        options.enabled_indicators = Some(set);
        assert!(options.indicator_enabled("rsi"));
        assert!(!options.indicator_enabled("macd"));
    }
}
