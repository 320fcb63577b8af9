use crate::exec::{query_error, ActiveQuery, Worker};
use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use sluice_query::{
    Capability, DataError, Driver, Meta, QueryContext, Result, ResultStream, ResultStreamBuilder,
    Structure, StructureType, Value,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CATALOG_QUERY: &str = "SELECT name, type FROM sqlite_master \
     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
     ORDER BY name";

/// Where a driver's connections point
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub path: String,
    pub flags: OpenFlags,
}

impl Target {
    /// Resolve a connection string
    ///
    /// `:memory:` becomes a uniquely named shared-cache database so that every
    /// connection of one driver sees the same data. `sqlite://` and `sqlite:`
    /// prefixes are stripped; `file:` URIs pass through.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let path = connection_string
            .strip_prefix("sqlite://")
            .or_else(|| connection_string.strip_prefix("sqlite:"))
            .unwrap_or(connection_string)
            .trim();

        if path.is_empty() {
            return Err(DataError::ConnectionFailed(
                "database path cannot be empty".to_string(),
            ));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let path = if path == ":memory:" {
            format!(
                "file:sluice-{}?mode=memory&cache=shared",
                uuid::Uuid::new_v4().simple()
            )
        } else {
            path.to_string()
        };

        Ok(Self { path, flags })
    }

    pub fn open(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|e| {
            error!("Failed to open SQLite database {}: {}", self.path, e);
            DataError::ConnectionFailed(format!("unable to open database: {}", e))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(query_error)?;
        Ok(conn)
    }
}

/// Live SQLite session
///
/// A keeper connection lives as long as the driver; each query runs on a
/// connection and worker thread of its own that the returned stream releases.
pub struct SqliteDriver {
    target: Target,
    keeper: Mutex<Option<Connection>>,
    active: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl SqliteDriver {
    pub fn open(connection_string: &str) -> Result<Self> {
        let target = Target::parse(connection_string)?;
        let keeper = target.open()?;
        debug!("Opened SQLite database {}", target.path);

        Ok(Self {
            target,
            keeper: Mutex::new(Some(keeper)),
            active: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        })
    }

    /// Queries whose worker still holds a connection
    pub fn active_queries(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DataError::ConnectionFailed("connection closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn source_type(&self) -> &'static str {
        "sqlite"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Sql]
    }

    async fn query(&self, ctx: &QueryContext, query: &str) -> Result<ResultStream> {
        self.ensure_open()?;
        ctx.check()?;

        let conn = self.target.open()?;
        let (worker, cursor, ready) = Worker::spawn(
            conn,
            query.to_string(),
            ActiveQuery::new(self.active.clone()),
        )?;

        let header = ctx
            .run(async {
                ready.await.map_err(|_| {
                    error!("SQLite worker exited without a result");
                    DataError::Internal("query worker exited".to_string())
                })?
            })
            .await;

        let header = match header {
            Ok(header) => header,
            Err(e) => {
                if e.is_cancelled() {
                    debug!("Interrupting cancelled SQLite query");
                }
                drop(worker);
                return Err(e);
            }
        };

        Ok(ResultStreamBuilder::new()
            .with_sequence(cursor)
            .with_header(header)
            .with_meta(Meta::typed())
            .with_cleanup(move || worker.stop())
            .build())
    }

    async fn structure(&self) -> Result<Vec<Structure>> {
        let mut stream = self.query(&QueryContext::new(), CATALOG_QUERY).await?;

        let mut structure = Vec::new();
        while stream.has_next() {
            let row = stream.next()?;
            let name = row
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| DataError::malformed_reply("catalog name is not text"))?;

            let mut entry = Structure::table(name);
            if row.get(1).and_then(Value::as_str) == Some("view") {
                entry.structure_type = StructureType::View;
            }
            structure.push(entry);
        }

        Ok(structure)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Closing SQLite driver for {}", self.target.path);
        if let Some(keeper) = self.keeper.lock().await.take() {
            if let Err((_, e)) = keeper.close() {
                warn!("Failed to close SQLite keeper connection: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_targets_are_unique_and_shared() {
        let a = Target::parse(":memory:").unwrap();
        let b = Target::parse(":memory:").unwrap();
        assert_ne!(a.path, b.path);
        assert!(a.path.starts_with("file:sluice-"));
        assert!(a.path.ends_with("?mode=memory&cache=shared"));
    }

    #[test]
    fn test_target_prefixes() {
        assert_eq!(Target::parse("sqlite:///tmp/x.db").unwrap().path, "/tmp/x.db");
        assert_eq!(Target::parse("sqlite:data.db").unwrap().path, "data.db");
        assert_eq!(Target::parse("file:data.db?mode=ro").unwrap().path, "file:data.db?mode=ro");
        assert!(Target::parse("  ").is_err());
        assert!(Target::parse("sqlite://").is_err());
    }

    #[tokio::test]
    async fn test_per_query_connections_share_memory_database() {
        let driver = SqliteDriver::open(":memory:").unwrap();
        let ctx = QueryContext::new();

        driver.query(&ctx, "CREATE TABLE t (x INTEGER)").await.unwrap();
        driver.query(&ctx, "INSERT INTO t VALUES (42)").await.unwrap();

        let mut stream = driver.query(&ctx, "SELECT x FROM t").await.unwrap();
        assert_eq!(stream.next().unwrap()[0].as_i64(), Some(42));
    }

    #[tokio::test]
    async fn test_exhausted_stream_releases_connection() {
        let driver = SqliteDriver::open(":memory:").unwrap();
        let ctx = QueryContext::new();

        let mut stream = driver.query(&ctx, "SELECT 1 UNION ALL SELECT 2").await.unwrap();
        assert_eq!(stream.rows().count(), 2);
        assert!(stream.is_closed());
        assert_eq!(driver.active_queries(), 0);
    }

    #[tokio::test]
    async fn test_separate_memory_drivers_are_isolated() {
        let a = SqliteDriver::open(":memory:").unwrap();
        let b = SqliteDriver::open(":memory:").unwrap();
        let ctx = QueryContext::new();

        a.query(&ctx, "CREATE TABLE only_a (x)").await.unwrap();
        assert_eq!(a.structure().await.unwrap().len(), 1);
        assert!(b.structure().await.unwrap().is_empty());
    }
}
