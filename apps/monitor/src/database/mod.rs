/// Database layer
///
/// Targets and the monitor event log live in a local libsql database. The
/// scheduler only talks to the [`TargetStore`] and [`EventLog`] traits.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{EventLog, LibsqlStore, TargetStore};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
