use crate::context::QueryContext;
use crate::error::Result;
use crate::stream::ResultStream;
use crate::types::{Capability, Structure};
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};

/// Connection factory for one backend
///
/// Adapters are stateless; they are registered once in an
/// [`AdapterRegistry`](crate::AdapterRegistry) under one or more identifiers.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Open a session from a backend-specific connection string
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn Driver>>;
}

/// A live connection or session to a backend
#[async_trait]
pub trait Driver: Send + Sync + Downcast {
    /// Get the type name of this driver's backend
    fn source_type(&self) -> &'static str;

    /// Get all capabilities supported by this driver
    fn capabilities(&self) -> Vec<Capability>;

    /// Check if a specific capability is supported
    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Run `query` and return its rows as a stream
    ///
    /// Backend calls are raced against `ctx`; if it is cancelled first the
    /// call returns [`DataError::Cancelled`](crate::DataError::Cancelled).
    async fn query(&self, ctx: &QueryContext, query: &str) -> Result<ResultStream>;

    /// List the catalog entries (tables, collections, views) of the current database
    async fn structure(&self) -> Result<Vec<Structure>>;

    /// Close the session; safe to call more than once, or on a session that
    /// never fully connected
    async fn close(&self);

    /// Database switching, if this driver supports it
    fn as_database_switcher(&self) -> Option<&dyn DatabaseSwitcher> {
        None
    }
}

impl_downcast!(Driver);

/// Optional capability: list and switch the active database
#[async_trait]
pub trait DatabaseSwitcher: Send + Sync {
    /// Returns the current database and the other available ones
    async fn list_databases(&self) -> Result<(String, Vec<String>)>;

    async fn select_database(&self, name: &str) -> Result<()>;
}
