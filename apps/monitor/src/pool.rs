use std::time::Duration;

use deadpool::managed::{self, Pool, PoolConfig, RecycleError, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};
use tracing::debug;

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadpool manager handing out connections to one libsql database
///
/// A connection is checked with a trivial query before reuse; a broken one
/// is dropped by the pool and a fresh connection is opened in its place.
pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.database.connect()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        let row = conn.query("SELECT 1", ()).await?.next().await?;
        if row.is_none() {
            debug!("Discarding libsql connection that failed its health check");
            return Err(RecycleError::Message("connection health check returned no rows".into()));
        }
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Open (or create) the local database file and wrap it in a pool
pub async fn open_pool(path: &str, max_connections: usize) -> anyhow::Result<LibsqlPool> {
    let database = libsql::Builder::new_local(path).build().await?;
    let pool = Pool::builder(LibsqlManager::new(database))
        .config(PoolConfig::new(max_connections.max(1)))
        .build()?;

    // Readers no longer block the per-target writers of a cycle
    let conn: managed::Object<LibsqlManager> = pool.get().await?;
    conn.query("PRAGMA journal_mode=WAL", ()).await?;
    drop(conn);

    Ok(pool)
}
