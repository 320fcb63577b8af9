use crate::config::ConnectionParams;
use crate::error::{DataError, Result};
use crate::traits::{Adapter, Driver};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

static GLOBAL_ADAPTERS: Lazy<AdapterRegistry> = Lazy::new(AdapterRegistry::new);

/// Append-only table of adapters keyed by backend identifier
///
/// Identifiers are case-sensitive. An identifier can be registered once;
/// there is no overwrite and no removal.
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static AdapterRegistry {
        &GLOBAL_ADAPTERS
    }

    /// Register `adapter` under `name` and every alias
    ///
    /// Fails without registering anything if one of the identifiers is taken.
    pub async fn register(
        &self,
        adapter: Arc<dyn Adapter>,
        name: &str,
        aliases: &[&str],
    ) -> Result<()> {
        let mut adapters = self.adapters.write().await;

        let mut identifiers = Vec::with_capacity(aliases.len() + 1);
        for id in std::iter::once(name).chain(aliases.iter().copied()) {
            if adapters.contains_key(id) || identifiers.contains(&id) {
                error!("Adapter identifier already registered: {}", id);
                return Err(DataError::AlreadyRegistered(id.to_string()));
            }
            identifiers.push(id);
        }

        for id in identifiers {
            adapters.insert(id.to_string(), adapter.clone());
        }
        debug!("Registered adapter {} (aliases: {:?})", name, aliases);
        Ok(())
    }

    /// Connect through the adapter registered as `adapter`
    pub async fn connect(
        &self,
        adapter: &str,
        connection_string: &str,
    ) -> Result<Box<dyn Driver>> {
        let factory = self
            .adapters
            .read()
            .await
            .get(adapter)
            .cloned()
            .ok_or_else(|| DataError::UnknownAdapter(adapter.to_string()))?;

        debug!("Connecting with adapter: {}", adapter);

        factory.connect(connection_string).await.map_err(|e| {
            error!("Adapter {} failed to connect: {}", adapter, e);
            DataError::in_adapter(adapter, e)
        })
    }

    /// Connect using a stored connection record, expanding its URL first
    pub async fn connect_params(&self, params: &ConnectionParams) -> Result<Box<dyn Driver>> {
        let url = params.expanded_url()?;
        self.connect(&params.adapter, &url).await
    }

    /// List registered identifiers, sorted
    pub async fn list_adapters(&self) -> Vec<String> {
        let adapters = self.adapters.read().await;
        let mut names: Vec<String> = adapters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if an identifier is registered
    pub async fn has_adapter(&self, adapter: &str) -> bool {
        self.adapters.read().await.contains_key(adapter)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
