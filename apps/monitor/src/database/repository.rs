use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use uuid::Uuid;

use super::models::{MonitorEvent, Target, i64_to_timestamp, timestamp_to_i64};
use crate::monitoring::types::HealthStatus;
use crate::pool::{LibsqlManager, LibsqlPool};

const TARGET_COLUMNS: &str = "id, name, host, port, protocol, expected_status, alert_interval, \
    timeout_seconds, contacts, description, is_active, last_status, last_checked_at, last_alert_at";

/// Target store - the records the scheduler reads and updates
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Snapshot of every target with `is_active` set
    async fn list_active_targets(&self) -> Result<Vec<Target>>;

    /// Write the scheduler-owned fields of one target, leaving the rest untouched
    async fn update_target_status(
        &self,
        id: Uuid,
        status: HealthStatus,
        checked_at: DateTime<Utc>,
        alert_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Best-effort event log for alert deliveries
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn log_event(&self, event: &MonitorEvent) -> Result<()>;
}

/// LibSQL implementation of the target store and event log
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Create a new store from a pool
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    /// Get a target by id
    pub async fn get_target(&self, id: Uuid) -> Result<Option<Target>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {} FROM targets WHERE id = ?", TARGET_COLUMNS),
                params![id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(target_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a full target record
    pub async fn save_target(&self, target: &Target) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO targets ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                TARGET_COLUMNS
            ),
            params![
                target.id.to_string(),
                target.name.clone(),
                target.host.clone(),
                i64::from(target.port),
                target.protocol.clone(),
                i64::from(target.expected_status),
                i64::from(target.alert_interval),
                target.timeout_seconds.map(|v| v as i64),
                serde_json::to_string(&target.contacts)?,
                target.description.clone(),
                if target.is_active { 1 } else { 0 },
                target.last_status.map(|s| s.as_str().to_string()),
                target.last_checked_at.map(timestamp_to_i64),
                target.last_alert_at.map(timestamp_to_i64)
            ],
        )
        .await?;
        Ok(())
    }

    /// Most recent events for a target, newest first
    pub async fn recent_events(&self, target_id: Uuid, limit: usize) -> Result<Vec<MonitorEvent>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT target_id, kind, message, contacts, status, response, timestamp FROM monitor_logs WHERE target_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
                params![target_id.to_string(), limit as i64],
            )
            .await?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            let target_id: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let contacts: String = row.get(3)?;
            let timestamp: i64 = row.get(6)?;

            events.push(MonitorEvent {
                target_id: Uuid::parse_str(&target_id)?,
                kind: serde_json::from_value(serde_json::Value::String(kind))?,
                message: row.get(2)?,
                contacts: serde_json::from_str(&contacts)?,
                status: row.get::<Option<String>>(4)?.as_deref().and_then(HealthStatus::parse),
                response: row.get(5)?,
                timestamp: i64_to_timestamp(timestamp).context("event timestamp out of range")?,
            });
        }

        Ok(events)
    }
}

#[async_trait]
impl TargetStore for LibsqlStore {
    async fn list_active_targets(&self) -> Result<Vec<Target>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {} FROM targets WHERE is_active = 1", TARGET_COLUMNS), ())
            .await?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(target_from_row(&row)?);
        }

        Ok(targets)
    }

    async fn update_target_status(
        &self,
        id: Uuid,
        status: HealthStatus,
        checked_at: DateTime<Utc>,
        alert_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE targets SET last_status = ?, last_checked_at = ?, last_alert_at = ? WHERE id = ?",
                params![
                    status.as_str(),
                    timestamp_to_i64(checked_at),
                    alert_at.map(timestamp_to_i64),
                    id.to_string()
                ],
            )
            .await?;

        if changed == 0 {
            bail!("target {} not found", id);
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for LibsqlStore {
    async fn log_event(&self, event: &MonitorEvent) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO monitor_logs (target_id, kind, message, contacts, status, response, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                event.target_id.to_string(),
                event.kind.as_str(),
                event.message.clone(),
                serde_json::to_string(&event.contacts)?,
                event.status.map(|s| s.as_str().to_string()),
                event.response.clone(),
                timestamp_to_i64(event.timestamp)
            ],
        )
        .await?;
        Ok(())
    }
}

fn target_from_row(row: &Row) -> Result<Target> {
    let id: String = row.get(0)?;
    let contacts: String = row.get(8)?;

    Ok(Target {
        id: Uuid::parse_str(&id)?,
        name: row.get(1)?,
        host: row.get(2)?,
        port: u16::try_from(row.get::<i64>(3)?).context("port out of range")?,
        protocol: row.get(4)?,
        expected_status: u16::try_from(row.get::<i64>(5)?).context("expected_status out of range")?,
        alert_interval: u32::try_from(row.get::<i64>(6)?).context("alert_interval out of range")?,
        timeout_seconds: row.get::<Option<i64>>(7)?.map(|v| v.max(0) as u64),
        contacts: serde_json::from_str(&contacts)?,
        description: row.get(9)?,
        is_active: row.get::<i64>(10)? != 0,
        last_status: row.get::<Option<String>>(11)?.as_deref().and_then(HealthStatus::parse),
        last_checked_at: row.get::<Option<i64>>(12)?.and_then(i64_to_timestamp),
        last_alert_at: row.get::<Option<i64>>(13)?.and_then(i64_to_timestamp),
    })
}
