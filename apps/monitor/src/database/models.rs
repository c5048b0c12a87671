use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::monitoring::types::{HealthStatus, Protocol};

/// Default expected HTTP status when a target does not set one
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Default quiet period between alerts, in minutes
pub const DEFAULT_ALERT_INTERVAL_MINUTES: u32 = 60;

/// Target model - a monitored endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub expected_status: u16,
    /// Minutes between two consecutive alerts
    pub alert_interval: u32,
    /// Per-target probe timeout, falls back to the configured default
    pub timeout_seconds: Option<u64>,
    pub contacts: Vec<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub last_status: Option<HealthStatus>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl Target {
    /// Create a new active target that has never been checked
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16, protocol: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            host: host.into(),
            port,
            protocol: protocol.into(),
            expected_status: DEFAULT_EXPECTED_STATUS,
            alert_interval: DEFAULT_ALERT_INTERVAL_MINUTES,
            timeout_seconds: None,
            contacts: Vec::new(),
            description: None,
            is_active: true,
            last_status: None,
            last_checked_at: None,
            last_alert_at: None,
        }
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::parse(&self.protocol)
    }

    /// Short reference used in logs and notifications
    pub fn reference(&self) -> String {
        self.id.to_string()
    }
}

/// Kind of monitor event written to the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AlertSent,
    AlertFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AlertSent => "alert_sent",
            EventKind::AlertFailed => "alert_failed",
        }
    }
}

/// Monitor event - one row of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub target_id: Uuid,
    pub kind: EventKind,
    pub message: String,
    pub contacts: Vec<String>,
    pub status: Option<HealthStatus>,
    pub response: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Convert a timestamp to the stored unix-millisecond form
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert a stored unix-millisecond value back to a timestamp
pub fn i64_to_timestamp(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}
