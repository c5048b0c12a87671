//! Beacon - reachability monitor.
//!
//! Periodically probes every active target over HTTP, HTTPS or ICMP,
//! records the outcome on the target and notifies its contacts when an
//! alert is due.

pub mod config;
pub mod database;
pub mod error;
pub mod monitoring;
pub mod notify;
pub mod pool;
