//! MongoDB backend for sluice-query
//!
//! Queries are database commands written as extended JSON and executed with
//! `runCommand` against the current database:
//!
//! ```json
//! { "find": "users", "filter": { "age": { "$gt": 30 } } }
//! ```
//!
//! Cursor replies are flattened into one row per document; any other reply is
//! a single row. Rows have one `Reply` column holding the BSON value.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sluice_query::{AdapterRegistry, QueryContext};
//!
//! # async fn example() -> sluice_query::Result<()> {
//! let registry = AdapterRegistry::new();
//! sluice_query_mongodb::register(&registry).await?;
//!
//! let driver = registry.connect("mongo", "mongodb://localhost:27017/app").await?;
//! let mut stream = driver
//!     .query(&QueryContext::new(), r#"{"find": "users"}"#)
//!     .await?;
//! while stream.has_next() {
//!     println!("{}", stream.next()?[0]);
//! }
//! # Ok(())
//! # }
//! ```

mod reply;

pub use reply::{parse_command, register_types, reply_stream, REPLY_COLUMN};

use async_trait::async_trait;
use mongodb::{bson::doc, options::ClientOptions, Client};
use sluice_query::{
    Adapter, AdapterRegistry, Capability, DataError, DatabaseSwitcher, Driver, QueryContext,
    Result, ResultStream, Structure, TypeRegistry,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Identifier the adapter is registered under
pub const ADAPTER_NAME: &str = "mongo";

/// Register the MongoDB adapter as `mongo` (alias `mongodb`) and its value
/// types with the global [`TypeRegistry`]
pub async fn register(registry: &AdapterRegistry) -> Result<()> {
    register_types(TypeRegistry::global())?;
    registry
        .register(Arc::new(MongoAdapter), ADAPTER_NAME, &["mongodb"])
        .await
}

/// Connection factory for MongoDB URLs
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoAdapter;

#[async_trait]
impl Adapter for MongoAdapter {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn Driver>> {
        Ok(Box::new(MongoDriver::new(connection_string).await?))
    }
}

/// Live MongoDB session
///
/// The client connects lazily, so constructing a driver never touches the
/// network.
pub struct MongoDriver {
    client: Client,
    database: RwLock<Option<String>>,
    closed: AtomicBool,
}

impl MongoDriver {
    /// Create a driver from a MongoDB URL
    ///
    /// The database named in the URL path, if any, becomes the current database.
    pub async fn new(url: &str) -> Result<Self> {
        debug!("Creating MongoDB driver");

        let options = ClientOptions::parse(url).await.map_err(|e| {
            error!("Failed to parse MongoDB URL: {}", e);
            DataError::ConnectionFailed(format!("invalid url: {}", e))
        })?;
        let database = options.default_database.clone();

        let client = Client::with_options(options).map_err(|e| {
            error!("Failed to create MongoDB client: {}", e);
            DataError::ConnectionFailed(format!("Failed to create MongoDB client: {}", e))
        })?;

        Ok(Self {
            client,
            database: RwLock::new(database),
            closed: AtomicBool::new(false),
        })
    }

    /// Name of the current database
    ///
    /// Without one in the URL, the first database the server lists is selected
    /// and remembered.
    pub async fn current_database(&self) -> Result<String> {
        if let Some(name) = self.database.read().await.as_ref() {
            return Ok(name.clone());
        }

        let names = self.client.list_database_names().await.map_err(|e| {
            error!("Failed to list databases: {}", e);
            DataError::QueryFailed(format!("failed to select default database: {}", e))
        })?;

        let mut database = self.database.write().await;
        // another caller may have selected one meanwhile
        if let Some(name) = database.as_ref() {
            return Ok(name.clone());
        }
        let first = names
            .into_iter()
            .next()
            .ok_or_else(|| DataError::not_found("no databases found"))?;
        debug!("Selected default database {}", first);
        *database = Some(first.clone());
        Ok(first)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DataError::ConnectionFailed("connection closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for MongoDriver {
    fn source_type(&self) -> &'static str {
        "mongodb"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Document, Capability::DatabaseSwitching]
    }

    async fn query(&self, ctx: &QueryContext, query: &str) -> Result<ResultStream> {
        self.ensure_open()?;
        let command = parse_command(query)?;
        let db_name = ctx.run(self.current_database()).await?;
        debug!("Running command on database {}", db_name);

        let db = self.client.database(&db_name);
        let reply = ctx
            .run(async move {
                db.run_command(command).await.map_err(|e| {
                    error!("MongoDB command failed: {}", e);
                    DataError::QueryFailed(e.to_string())
                })
            })
            .await?;

        Ok(reply_stream(reply))
    }

    async fn structure(&self) -> Result<Vec<Structure>> {
        self.ensure_open()?;
        let db_name = self.current_database().await?;

        let collections = self
            .client
            .database(&db_name)
            .list_collection_names()
            .await
            .map_err(|e| {
                error!("Failed to list collections in database {}: {}", db_name, e);
                DataError::QueryFailed(format!("Failed to list collections: {}", e))
            })?;

        debug!(
            "Found {} collections in database {}",
            collections.len(),
            db_name
        );
        Ok(collections.into_iter().map(Structure::table).collect())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Closing MongoDB driver");
        self.client.clone().shutdown().await;
    }

    fn as_database_switcher(&self) -> Option<&dyn DatabaseSwitcher> {
        Some(self)
    }
}

#[async_trait]
impl DatabaseSwitcher for MongoDriver {
    async fn list_databases(&self) -> Result<(String, Vec<String>)> {
        self.ensure_open()?;
        let current = self.current_database().await?;

        let pattern = format!("^{}$", regex::escape(&current));
        let others = self
            .client
            .list_database_names()
            .filter(doc! { "name": { "$not": { "$regex": pattern } } })
            .await
            .map_err(|e| {
                error!("Failed to list databases: {}", e);
                DataError::QueryFailed(format!("failed to retrieve database names: {}", e))
            })?;

        Ok((current, others))
    }

    async fn select_database(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(DataError::InvalidQuery(
                "database name cannot be empty".to_string(),
            ));
        }
        debug!("Switching to database {}", name);
        *self.database.write().await = Some(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_from_url() {
        let driver = MongoDriver::new("mongodb://localhost:27017/app").await.unwrap();
        assert_eq!(driver.current_database().await.unwrap(), "app");
        assert!(driver.supports(Capability::DatabaseSwitching));
        assert!(driver.supports(Capability::Document));
        assert!(!driver.supports(Capability::Sql));
    }

    #[tokio::test]
    async fn test_select_database() {
        let driver = MongoDriver::new("mongodb://localhost:27017/app").await.unwrap();
        let switcher = driver.as_database_switcher().unwrap();

        switcher.select_database("logs").await.unwrap();
        assert_eq!(driver.current_database().await.unwrap(), "logs");
        assert!(switcher.select_database("").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_url_fails_to_connect() {
        let err = MongoAdapter
            .connect("postgres://localhost/app")
            .await
            .err()
            .expect("connect should fail");
        assert!(matches!(err, DataError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_invalid_command_fails_before_network() {
        let driver = MongoDriver::new("mongodb://localhost:27017/app").await.unwrap();
        let err = driver
            .query(&QueryContext::new(), "db.users.find()")
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_closed_driver_rejects_queries() {
        let driver = MongoDriver::new("mongodb://localhost:27017/app").await.unwrap();
        driver.close().await;
        driver.close().await;

        let err = driver
            .query(&QueryContext::new(), r#"{"ping": 1}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_register_adapter_and_aliases() {
        let registry = AdapterRegistry::new();
        register(&registry).await.unwrap();

        assert_eq!(
            registry.list_adapters().await,
            vec!["mongo".to_string(), "mongodb".to_string()]
        );
        assert!(matches!(
            register(&registry).await,
            Err(DataError::AlreadyRegistered(_))
        ));

        let driver = registry
            .connect("mongodb", "mongodb://localhost:27017/app")
            .await
            .unwrap();
        assert_eq!(driver.source_type(), "mongodb");
        assert!(driver.downcast_ref::<MongoDriver>().is_some());
        assert!(TypeRegistry::global().is_registered::<bson::Document>());
    }
}
