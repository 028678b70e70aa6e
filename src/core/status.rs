// Status Snapshots for the HTTP boundary
// The external API layer serializes these directly; the core only fills them.

use serde::Serialize;
use std::fmt;

// ============================================================================
// Bot Status
// ============================================================================

/// One per-symbol volatility entry in the status payload.
#[derive(Debug, Clone, Serialize)]
pub struct VolatilityStatusEntry {
    pub symbol: String,
    pub volatility_score: f64,
    pub is_stable: bool,
    pub severity: String,
}

/// Full bot status served by `GET /api/bot/status`.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub status: String,
    pub uptime_seconds: u64,
    pub total_users: u64,
    pub active_sessions: usize,
    pub signals_generated: u64,
    pub users_accepted_terms: u64,
    pub last_volatility_update: Option<i64>,
    pub volatility_data: Vec<VolatilityStatusEntry>,
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BotStatus(status={}, uptime={}s, sessions={}, signals={})",
            self.status, self.uptime_seconds, self.active_sessions, self.signals_generated
        )
    }
}

/// Liveness payload served by `GET /api/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: i64,
    pub uptime: u64,
}

impl HealthStatus {
    pub fn ok(uptime: u64) -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            uptime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status() {
        let health = HealthStatus::ok(120);
        assert_eq!(health.status, "ok");
        assert_eq!(health.uptime, 120);
        assert!(health.timestamp > 0);
    }

    #[test]
    fn test_bot_status_serializes() {
        let status = BotStatus {
            status: "running".to_string(),
            uptime_seconds: 10,
            total_users: 3,
            active_sessions: 1,
            signals_generated: 7,
            users_accepted_terms: 2,
            last_volatility_update: Some(1_700_000_000),
            volatility_data: vec![VolatilityStatusEntry {
                symbol: "EURUSD".to_string(),
                volatility_score: 0.25,
                is_stable: true,
                severity: "low".to_string(),
            }],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["active_sessions"], 1);
        assert_eq!(json["volatility_data"][0]["symbol"], "EURUSD");
    }
}
