use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol used to probe a target
///
/// Resolved once per target from the stored protocol string. Anything we do
/// not know how to probe is kept as `Unsupported` so the probe can report it
/// instead of silently doing nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Icmp,
    Unsupported(String),
}

impl Protocol {
    /// Parse a stored protocol value, ignoring case and surrounding whitespace
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            "icmp" => Protocol::Icmp,
            _ => Protocol::Unsupported(value.to_string()),
        }
    }

    /// URL scheme for the HTTP family
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            Protocol::Http => Some("http"),
            Protocol::Https => Some("https"),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::Unsupported(raw) => write!(f, "{}", raw),
        }
    }
}

/// Health recorded in `last_status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Ok,
    Fail,
}

impl HealthStatus {
    pub fn from_success(success: bool) -> Self {
        if success { HealthStatus::Ok } else { HealthStatus::Fail }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "OK",
            HealthStatus::Fail => "FAIL",
        }
    }

    /// Parse the stored representation; unknown values read as unset
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OK" => Some(HealthStatus::Ok),
            "FAIL" => Some(HealthStatus::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic detail attached to a probe outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProbeDetail {
    /// HTTP status code that was received, matching or not
    StatusCode(u16),
    /// Average ICMP round-trip time in milliseconds
    RoundTripMs(f64),
    /// Error text from a failed probe
    Error(String),
}

impl fmt::Display for ProbeDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeDetail::StatusCode(code) => write!(f, "{}", code),
            ProbeDetail::RoundTripMs(rtt) => write!(f, "{:.2}", rtt),
            ProbeDetail::Error(message) => f.write_str(message),
        }
    }
}

/// Result of a single probe
///
/// Lives for one cycle only: the scheduler hands it to the alert policy and
/// keeps nothing but the summary in `last_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub detail: ProbeDetail,
}

impl ProbeOutcome {
    pub fn new(success: bool, detail: ProbeDetail) -> Self {
        Self { success, detail }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, detail: ProbeDetail::Error(message.into()) }
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_success(self.success)
    }
}
