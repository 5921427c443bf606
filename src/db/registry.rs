//! Registry of routable data sources.
//!
//! Maps routing keys to `(provider, dialect)` pairs and tracks one designated
//! default entry. Mutation is an administrative operation: it is not atomic with
//! concurrent routing, which always works on a [`RegistrySnapshot`].

use crate::db::connection::{ConnectionProvider, detect_dialect};
use crate::db::decrypt::{Base64Decryptor, CredentialDecryptor};
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Options for registering a data source.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    /// Explicit dialect. Detected from the provider URL when `None`.
    pub dialect: Option<DatabaseType>,
    /// Run the registry's decryptor over the provider's credentials.
    pub decrypt: bool,
}

impl Registration {
    pub fn dialect(dialect: DatabaseType) -> Self {
        Self {
            dialect: Some(dialect),
            ..Self::default()
        }
    }

    pub fn without_decrypt(mut self) -> Self {
        self.decrypt = false;
        self
    }
}

impl Default for Registration {
    fn default() -> Self {
        Self {
            dialect: None,
            decrypt: true,
        }
    }
}

/// One registered data source.
#[derive(Clone)]
pub struct DataSourceEntry {
    pub key: String,
    pub provider: Arc<dyn ConnectionProvider>,
    pub dialect: DatabaseType,
}

impl std::fmt::Debug for DataSourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceEntry")
            .field("key", &self.key)
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of the registry.
#[derive(Clone)]
pub struct RegistrySnapshot {
    providers: HashMap<String, Arc<dyn ConnectionProvider>>,
    dialects: HashMap<String, DatabaseType>,
    default: DataSourceEntry,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn ConnectionProvider>> {
        self.providers.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.providers.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn providers(&self) -> &HashMap<String, Arc<dyn ConnectionProvider>> {
        &self.providers
    }

    pub fn dialects(&self) -> &HashMap<String, DatabaseType> {
        &self.dialects
    }

    pub fn dialect_of(&self, key: &str) -> Option<DatabaseType> {
        self.dialects.get(key).copied()
    }

    pub fn default_entry(&self) -> &DataSourceEntry {
        &self.default
    }

    /// The provider of a registry holding exactly one entry.
    pub fn sole_provider(&self) -> Option<&Arc<dyn ConnectionProvider>> {
        if self.providers.len() == 1 {
            self.providers.values().next()
        } else {
            None
        }
    }
}

impl std::fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("dialects", &self.dialects)
            .field("default_key", &self.default.key)
            .finish()
    }
}

struct RegistryState {
    providers: HashMap<String, Arc<dyn ConnectionProvider>>,
    dialects: HashMap<String, DatabaseType>,
    default: DataSourceEntry,
}

/// Builder for a [`Registry`] with a custom credential decryptor.
pub struct RegistryBuilder {
    decryptor: Arc<dyn CredentialDecryptor>,
}

impl RegistryBuilder {
    pub fn decryptor(mut self, decryptor: Arc<dyn CredentialDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    /// Build the registry from its first entry, which becomes the default.
    pub fn build(
        self,
        key: impl Into<String>,
        provider: Arc<dyn ConnectionProvider>,
        options: Registration,
    ) -> DbResult<Registry> {
        let key = key.into();
        let dialect = prepare(&*self.decryptor, &key, &provider, options)?;

        let default = DataSourceEntry {
            key: key.clone(),
            provider: Arc::clone(&provider),
            dialect,
        };

        info!(key = %key, dialect = %dialect, "Registry created with default data source");

        Ok(Registry {
            state: RwLock::new(RegistryState {
                providers: HashMap::from([(key.clone(), provider)]),
                dialects: HashMap::from([(key, dialect)]),
                default,
            }),
            decryptor: self.decryptor,
        })
    }
}

pub struct Registry {
    state: RwLock<RegistryState>,
    decryptor: Arc<dyn CredentialDecryptor>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            decryptor: Arc::new(Base64Decryptor),
        }
    }

    /// Create a registry whose first entry is also the default.
    pub fn new(
        key: impl Into<String>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> DbResult<Self> {
        Self::builder().build(key, provider, Registration::default())
    }

    /// Register a data source, replacing any entry with the same key.
    ///
    /// Replacing the default key's entry does not touch the default triple;
    /// call [`Registry::set_default`] to pick up the new provider.
    pub fn add(
        &self,
        key: impl Into<String>,
        provider: Arc<dyn ConnectionProvider>,
        options: Registration,
    ) -> DbResult<()> {
        let key = key.into();
        let dialect = prepare(&*self.decryptor, &key, &provider, options)?;

        let replaced = {
            let mut state = self.write();
            state.dialects.insert(key.clone(), dialect);
            state.providers.insert(key.clone(), provider).is_some()
        };

        info!(key = %key, dialect = %dialect, replaced, "Data source registered");
        Ok(())
    }

    /// Remove a data source. Leases already handed out are unaffected.
    ///
    /// Removing the default key leaves the default triple in place.
    pub fn remove(&self, key: &str) -> Option<Arc<dyn ConnectionProvider>> {
        let (removed, was_default) = {
            let mut state = self.write();
            state.dialects.remove(key);
            (state.providers.remove(key), state.default.key == key)
        };

        if removed.is_some() {
            info!(key = %key, "Data source removed");
            if was_default {
                warn!(key = %key, "Removed the default data source; default is not reassigned");
            }
        }
        removed
    }

    /// Make a registered key the default.
    pub fn set_default(&self, key: &str) -> DbResult<()> {
        let mut state = self.write();
        let provider = state
            .providers
            .get(key)
            .cloned()
            .ok_or_else(|| DbError::not_found(key))?;

        let dialect = match state.dialects.get(key) {
            Some(dialect) => *dialect,
            None => detect_dialect(provider.as_ref()),
        };

        state.default = DataSourceEntry {
            key: key.to_string(),
            provider,
            dialect,
        };
        drop(state);

        info!(key = %key, dialect = %dialect, "Default data source changed");
        Ok(())
    }

    pub fn default_key(&self) -> String {
        self.read().default.key.clone()
    }

    pub fn default_provider(&self) -> Arc<dyn ConnectionProvider> {
        Arc::clone(&self.read().default.provider)
    }

    pub fn default_dialect(&self) -> DatabaseType {
        self.read().default.dialect
    }

    pub fn default_entry(&self) -> DataSourceEntry {
        self.read().default.clone()
    }

    /// Connection URL of the default data source.
    pub fn default_url(&self) -> Option<String> {
        self.default_provider().url()
    }

    pub fn dialect_of(&self, key: &str) -> Option<DatabaseType> {
        self.read().dialects.get(key).copied()
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ConnectionProvider>> {
        self.read().providers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().providers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().providers.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().providers.keys().cloned().collect()
    }

    /// Copy of the current state. Later mutation does not affect it.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.read();
        RegistrySnapshot {
            providers: state.providers.clone(),
            dialects: state.dialects.clone(),
            default: state.default.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Registry")
            .field("dialects", &state.dialects)
            .field("default_key", &state.default.key)
            .finish_non_exhaustive()
    }
}

/// Decrypt (if requested) and resolve the dialect of a provider about to be registered.
fn prepare(
    decryptor: &dyn CredentialDecryptor,
    key: &str,
    provider: &Arc<dyn ConnectionProvider>,
    options: Registration,
) -> DbResult<DatabaseType> {
    if options.decrypt {
        debug!(key = %key, "Decrypting data source credentials");
        provider
            .decrypt_credentials(decryptor)
            .map_err(|e| match e {
                DbError::Decrypt { .. } => e,
                other => DbError::decrypt(key, other.to_string()),
            })?;
    }
    Ok(options
        .dialect
        .unwrap_or_else(|| detect_dialect(provider.as_ref())))
}
