//! Backend health vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last known connection state of a backend client.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected = 0,
    Disconnected = 1,
    Failed = 2,
}

impl ConnectionState {
    /// Only `Connected` backends receive routed traffic.
    pub fn is_healthy(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl From<u8> for ConnectionState {
    fn from(val: u8) -> Self {
        match val {
            0 => ConnectionState::Connected,
            1 => ConnectionState::Disconnected,
            _ => ConnectionState::Failed,
        }
    }
}

/// Result of one health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Whether the backend answered as healthy
    pub healthy: bool,

    /// Round-trip time of the probe
    pub latency_ms: u64,

    /// State the probe implies for routing
    pub state: ConnectionState,

    /// Probe failure detail, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// When the probe finished
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms,
            state: ConnectionState::Connected,
            detail: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(state: ConnectionState, latency_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms,
            state,
            detail: Some(detail.into()),
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrips_through_u8() {
        for state in [
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Failed,
        ] {
            assert_eq!(ConnectionState::from(state as u8), state);
        }
    }

    #[test]
    fn test_only_connected_is_healthy() {
        assert!(ConnectionState::Connected.is_healthy());
        assert!(!ConnectionState::Disconnected.is_healthy());
        assert!(!ConnectionState::Failed.is_healthy());
    }

    #[test]
    fn test_unhealthy_report_carries_detail() {
        let report = HealthReport::unhealthy(ConnectionState::Failed, 12, "503");
        assert!(!report.healthy);
        assert_eq!(report.detail.as_deref(), Some("503"));
    }
}
