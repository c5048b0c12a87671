/// Monitoring engine module
///
/// This module is responsible for:
/// - Probing targets over HTTP, HTTPS and ICMP
/// - Deciding when an alert is due
/// - Running the fixed-cadence check cycle and writing results back
pub mod alert;
pub mod checker;
pub mod scheduler;
pub mod types;


pub use alert::AlertPolicy;
pub use checker::{ProbeEngine, Prober};
pub use scheduler::{CycleSummary, MonitoringScheduler, SchedulerSettings};
pub use types::{HealthStatus, ProbeDetail, ProbeOutcome, Protocol};
