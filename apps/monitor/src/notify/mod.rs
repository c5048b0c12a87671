//! Alert delivery.
//!
//! The scheduler hands a rendered alert to a [`Notifier`]. Two transports
//! exist: SMTP email when configured, and a log-only fallback.

pub mod email;

pub use email::EmailNotifier;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use tracing::warn;

use crate::database::models::Target;
use crate::error::NotifyError;
use crate::monitoring::types::ProbeDetail;

/// Timestamp layout used in alert bodies
const ALERT_DATE_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Delivers an alert to a list of contacts
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        contacts: &[String],
        subject: &str,
        body: &str,
        target_ref: &str,
    ) -> Result<(), NotifyError>;
}

/// Notifier used when no SMTP server is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        contacts: &[String],
        subject: &str,
        body: &str,
        target_ref: &str,
    ) -> Result<(), NotifyError> {
        warn!(
            target_ref,
            contacts = %contacts.join(", "),
            "{}\n{}",
            subject,
            body
        );
        Ok(())
    }
}

pub fn alert_subject(target: &Target) -> String {
    format!("Server Alert: {}", target.name)
}

/// Render the alert body for a target and the probe detail that triggered it
pub fn alert_body(target: &Target, detail: &ProbeDetail, now: DateTime<Utc>, timezone: FixedOffset) -> String {
    let date = now.with_timezone(&timezone).format(ALERT_DATE_FORMAT);

    format!(
        "Server Alert!\n\
         \n\
         Date: {date}\n\
         \n\
         Server Name: {name}\n\
         IP / Host: {host}\n\
         Protocol: {protocol}\n\
         Port: {port}\n\
         Expected Status: {expected}\n\
         Last Check Result: {detail}\n\
         Description: {description}\n\
         \n\
         Please check the server.",
        name = target.name,
        host = target.host,
        protocol = target.protocol,
        port = target.port,
        expected = target.expected_status,
        description = target.description.as_deref().unwrap_or("-"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_alert_body_layout() {
        let mut target = Target::new("billing", "10.1.2.3", 8443, "https");
        target.expected_status = 204;
        target.description = Some("billing api".to_string());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 21, 30, 5).unwrap();
        let timezone = FixedOffset::east_opt(3 * 3600).unwrap();

        let body = alert_body(&target, &ProbeDetail::StatusCode(502), now, timezone);

        assert!(body.starts_with("Server Alert!\n\nDate: 02.03.2024 00:30:05\n"));
        assert!(body.contains("Server Name: billing\n"));
        assert!(body.contains("IP / Host: 10.1.2.3\n"));
        assert!(body.contains("Protocol: https\n"));
        assert!(body.contains("Port: 8443\n"));
        assert!(body.contains("Expected Status: 204\n"));
        assert!(body.contains("Last Check Result: 502\n"));
        assert!(body.contains("Description: billing api\n"));
        assert!(body.ends_with("Please check the server."));
    }

    #[test]
    fn test_alert_body_without_description() {
        let target = Target::new("edge", "edge.example.com", 0, "icmp");
        let body = alert_body(
            &target,
            &ProbeDetail::Error("request timed out".into()),
            Utc::now(),
            FixedOffset::east_opt(0).unwrap(),
        );

        assert!(body.contains("Last Check Result: request timed out\n"));
        assert!(body.contains("Description: -\n"));
    }

    #[test]
    fn test_alert_subject() {
        let target = Target::new("billing", "10.1.2.3", 443, "https");
        assert_eq!(alert_subject(&target), "Server Alert: billing");
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let result = LogNotifier
            .notify(&["ops@example.com".to_string()], "subject", "body", "ref")
            .await;
        assert!(result.is_ok());
    }
}
