use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::alert::AlertPolicy;
use super::checker::Prober;
use super::types::{HealthStatus, ProbeOutcome};
use crate::config::MonitorSettings;
use crate::database::models::{EventKind, MonitorEvent, Target};
use crate::database::{EventLog, TargetStore};
use crate::notify::{Notifier, alert_body, alert_subject};

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Idle time after a cycle completes, not compensated for cycle duration
    pub tick_interval: Duration,
    /// Upper bound on targets processed at once; `None` fans out to all
    pub max_concurrent_probes: Option<usize>,
    pub alert_policy: AlertPolicy,
    pub alert_timezone: FixedOffset,
}

impl From<&MonitorSettings> for SchedulerSettings {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            tick_interval: settings.tick_interval(),
            max_concurrent_probes: settings.max_concurrent_probes,
            alert_policy: settings.alert_policy,
            alert_timezone: settings.alert_timezone(),
        }
    }
}

/// What happened to the targets of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub checked: usize,
    pub failing: usize,
    pub alerts_fired: usize,
    pub alert_failures: usize,
    pub store_failures: usize,
    /// Per-target tasks that died before reporting back
    pub aborted: usize,
}

impl CycleSummary {
    fn record(&mut self, report: &TargetReport) {
        self.checked += 1;
        if report.status == HealthStatus::Fail {
            self.failing += 1;
        }
        if report.alerted {
            self.alerts_fired += 1;
        }
        if report.alert_failed {
            self.alert_failures += 1;
        }
        if !report.persisted {
            self.store_failures += 1;
        }
    }
}

#[derive(Debug)]
struct TargetReport {
    status: HealthStatus,
    alerted: bool,
    alert_failed: bool,
    persisted: bool,
}

/// Does the work for one target: probe, alert decision, notification, write-back
struct TargetWorker {
    store: Arc<dyn TargetStore>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    events: Arc<dyn EventLog>,
    alert_policy: AlertPolicy,
    alert_timezone: FixedOffset,
}

impl TargetWorker {
    async fn process(&self, target: Target) -> TargetReport {
        let outcome = self.probe(&target).await;

        // Never move last_checked_at backwards, even if the wall clock does
        let now = target.last_checked_at.map_or(Utc::now(), |last| Utc::now().max(last));
        let status = outcome.status();
        let mut alert_at = target.last_alert_at;
        let mut report = TargetReport { status, alerted: false, alert_failed: false, persisted: false };

        if self.alert_policy.should_alert(&target, now, &outcome) {
            report.alerted = true;
            report.alert_failed = !self.send_alert(&target, &outcome, now).await;
            alert_at = Some(now);
        }

        match self.store.update_target_status(target.id, status, now, alert_at).await {
            Ok(()) => report.persisted = true,
            Err(e) => error!("Failed to persist status of {} ({}): {:#}", target.name, target.id, e),
        }

        debug!(
            "Checked {} ({}://{}:{}): {} [{}]",
            target.name, target.protocol, target.host, target.port, status, outcome.detail
        );
        report
    }

    /// Run the probe, turning a panic into a failed outcome
    async fn probe(&self, target: &Target) -> ProbeOutcome {
        match AssertUnwindSafe(self.prober.probe(target)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Probe of {} ({}) panicked: {}", target.name, target.id, message);
                ProbeOutcome::failure(format!("probe panicked: {}", message))
            }
        }
    }

    /// Deliver one alert; returns false when delivery failed
    async fn send_alert(&self, target: &Target, outcome: &ProbeOutcome, now: DateTime<Utc>) -> bool {
        if target.contacts.is_empty() {
            warn!("Alert for {} ({}) has no contacts, skipping delivery", target.name, target.id);
            return true;
        }

        let subject = alert_subject(target);
        let body = alert_body(target, &outcome.detail, now, self.alert_timezone);

        let (kind, message, delivered) = match self
            .notifier
            .notify(&target.contacts, &subject, &body, &target.reference())
            .await
        {
            Ok(()) => {
                info!("Alert sent for {} to {} contact(s)", target.name, target.contacts.len());
                (EventKind::AlertSent, subject, true)
            }
            Err(e) => {
                warn!("Failed to deliver alert for {} ({}): {}", target.name, target.id, e);
                (EventKind::AlertFailed, e.to_string(), false)
            }
        };

        self.record_event(MonitorEvent {
            target_id: target.id,
            kind,
            message,
            contacts: target.contacts.clone(),
            status: Some(outcome.status()),
            response: Some(outcome.detail.to_string()),
            timestamp: now,
        })
        .await;

        delivered
    }

    async fn record_event(&self, event: MonitorEvent) {
        if let Err(e) = self.events.log_event(&event).await {
            error!("Failed to write {} event for {}: {:#}", event.kind.as_str(), event.target_id, e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Monitoring scheduler - runs fixed-cadence cycles over all active targets
pub struct MonitoringScheduler {
    worker: Arc<TargetWorker>,
    limiter: Option<Arc<Semaphore>>,
    tick_interval: Duration,
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler
    pub fn new(
        store: Arc<dyn TargetStore>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventLog>,
        settings: SchedulerSettings,
    ) -> Self {
        let worker = TargetWorker {
            store,
            prober,
            notifier,
            events,
            alert_policy: settings.alert_policy,
            alert_timezone: settings.alert_timezone,
        };

        Self {
            worker: Arc::new(worker),
            limiter: settings.max_concurrent_probes.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            tick_interval: settings.tick_interval,
        }
    }

    /// Run one cycle and wait for every target in it
    ///
    /// Fails only when the target snapshot cannot be read; in that case no
    /// target is touched. Everything else is isolated per target and shows up
    /// in the summary.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let targets = self
            .worker
            .store
            .list_active_targets()
            .await
            .context("failed to read active targets")?;

        debug!("Cycle started over {} active targets", targets.len());

        let mut tasks = JoinSet::new();
        for target in targets {
            let worker = Arc::clone(&self.worker);
            let limiter = self.limiter.clone();

            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                worker.process(target).await
            });
        }

        let mut summary = CycleSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => summary.record(&report),
                Err(e) => {
                    error!("Target task aborted: {}", e);
                    summary.aborted += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Cycle until `shutdown` resolves
    ///
    /// Shutdown is only observed while idle, so an in-flight cycle always
    /// completes and persists its results.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("Monitoring scheduler started (tick interval {:?})", self.tick_interval);

        loop {
            match self.run_cycle().await {
                Ok(summary) => info!(
                    "Cycle complete: {} checked, {} failing, {} alerts ({} failed), {} store failures",
                    summary.checked,
                    summary.failing,
                    summary.alerts_fired,
                    summary.alert_failures,
                    summary.store_failures
                ),
                Err(e) => warn!("Skipping cycle: {:#}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = &mut shutdown => {
                    info!("Monitoring scheduler stopped");
                    return;
                }
            }
        }
    }
}
