//! Alert throttling.
//!
//! Decides, once per probe, whether the target's contacts must be notified.
//! Alerts are rate-limited by the target's `alert_interval` (the quiet
//! period, in minutes).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::ProbeOutcome;
use crate::database::models::Target;

/// Which outcomes are eligible for an alert once the quiet period is over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPolicy {
    /// Alert whenever the quiet period has elapsed, whatever the outcome.
    ///
    /// A target that has never alerted alerts on its first check, even a
    /// passing one.
    #[default]
    Elapsed,
    /// Alert only while the target is failing, repeating at most once per
    /// quiet period.
    WhileFailing,
}

impl AlertPolicy {
    /// Decide whether an alert fires for `target` at `now`
    pub fn should_alert(&self, target: &Target, now: DateTime<Utc>, outcome: &ProbeOutcome) -> bool {
        let gate_open = quiet_period_elapsed(target, now);

        match self {
            AlertPolicy::Elapsed => gate_open,
            AlertPolicy::WhileFailing => gate_open && !outcome.success,
        }
    }
}

/// True when no alert was ever sent, or strictly more than `alert_interval`
/// minutes passed since the last one
pub fn quiet_period_elapsed(target: &Target, now: DateTime<Utc>) -> bool {
    match target.last_alert_at {
        None => true,
        Some(last_alert) => now - last_alert > Duration::minutes(i64::from(target.alert_interval)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::ProbeDetail;

    fn target(alert_interval: u32, last_alert_at: Option<DateTime<Utc>>) -> Target {
        let mut target = Target::new("api", "x", 80, "http");
        target.alert_interval = alert_interval;
        target.last_alert_at = last_alert_at;
        target
    }

    fn passing() -> ProbeOutcome {
        ProbeOutcome::new(true, ProbeDetail::StatusCode(200))
    }

    fn failing() -> ProbeOutcome {
        ProbeOutcome::failure("connection refused")
    }

    #[test]
    fn test_first_check_always_alerts() {
        let now = Utc::now();
        let t = target(60, None);

        assert!(AlertPolicy::Elapsed.should_alert(&t, now, &passing()));
        assert!(AlertPolicy::Elapsed.should_alert(&t, now, &failing()));
    }

    #[test]
    fn test_exact_interval_is_still_quiet() {
        let now = Utc::now();
        let t = target(60, Some(now - Duration::minutes(60)));

        assert!(!AlertPolicy::Elapsed.should_alert(&t, now, &failing()));
    }

    #[test]
    fn test_one_second_past_interval_alerts() {
        let now = Utc::now();
        let t = target(60, Some(now - Duration::minutes(60) - Duration::seconds(1)));

        assert!(AlertPolicy::Elapsed.should_alert(&t, now, &failing()));
    }

    #[test]
    fn test_elapsed_policy_ignores_outcome() {
        let now = Utc::now();
        let open = target(5, Some(now - Duration::minutes(10)));
        let closed = target(60, Some(now - Duration::minutes(10)));

        assert!(AlertPolicy::Elapsed.should_alert(&open, now, &passing()));
        assert!(AlertPolicy::Elapsed.should_alert(&open, now, &failing()));
        assert!(!AlertPolicy::Elapsed.should_alert(&closed, now, &passing()));
        assert!(!AlertPolicy::Elapsed.should_alert(&closed, now, &failing()));
    }

    #[test]
    fn test_while_failing_policy() {
        let now = Utc::now();
        let never_alerted = target(60, None);
        let recently_alerted = target(60, Some(now - Duration::minutes(10)));

        assert!(AlertPolicy::WhileFailing.should_alert(&never_alerted, now, &failing()));
        assert!(!AlertPolicy::WhileFailing.should_alert(&never_alerted, now, &passing()));
        assert!(!AlertPolicy::WhileFailing.should_alert(&recently_alerted, now, &failing()));
    }

    #[test]
    fn test_policy_config_names() {
        let policy: AlertPolicy = serde_json::from_str("\"while_failing\"").unwrap();
        assert_eq!(policy, AlertPolicy::WhileFailing);
        assert_eq!(AlertPolicy::default(), AlertPolicy::Elapsed);
    }
}
