//! SQLite backend for sluice-query
//!
//! Runs SQL against an embedded SQLite database. Connection strings are file
//! paths, `sqlite://` URLs, `file:` URIs or `:memory:`.
//!
//! Every query gets a connection and a worker thread of its own. The worker
//! steps the statement and hands rows over a bounded channel, so pulling from
//! the stream may block until the next row is ready. Cancelling the
//! [`QueryContext`](sluice_query::QueryContext) before the first row arrives
//! interrupts the statement; closing or dropping the stream interrupts it
//! later on and waits for the worker to close the connection.
//!
//! Statements that produce no columns (DDL, `INSERT`, `UPDATE`, ...) return a
//! single `Rows Affected` row.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sluice_query::{AdapterRegistry, QueryContext};
//!
//! # async fn example() -> sluice_query::Result<()> {
//! let registry = AdapterRegistry::new();
//! sluice_query_sqlite::register(&registry).await?;
//!
//! let driver = registry.connect("sqlite", ":memory:").await?;
//! let ctx = QueryContext::new();
//! driver.query(&ctx, "CREATE TABLE users (id INTEGER, name TEXT)").await?;
//!
//! let mut stream = driver.query(&ctx, "SELECT id, name FROM users").await?;
//! for row in stream.rows() {
//!     println!("{:?}", row?);
//! }
//! # Ok(())
//! # }
//! ```

mod driver;
mod exec;

pub use driver::SqliteDriver;
pub use exec::ROWS_AFFECTED;

use async_trait::async_trait;
use sluice_query::{Adapter, AdapterRegistry, Driver, Result};
use std::sync::Arc;

/// Identifier the adapter is registered under
pub const ADAPTER_NAME: &str = "sqlite";

/// Register the SQLite adapter as `sqlite` (alias `sqlite3`)
pub async fn register(registry: &AdapterRegistry) -> Result<()> {
    registry
        .register(Arc::new(SqliteAdapter), ADAPTER_NAME, &["sqlite3"])
        .await
}

/// Connection factory for SQLite databases
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteAdapter;

#[async_trait]
impl Adapter for SqliteAdapter {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn Driver>> {
        let target = connection_string.to_string();
        let driver = tokio::task::spawn_blocking(move || SqliteDriver::open(&target))
            .await
            .map_err(|e| {
                sluice_query::DataError::Internal(format!("connect worker failed: {}", e))
            })??;
        Ok(Box::new(driver))
    }
}
