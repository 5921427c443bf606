//! Routing-key resolution.
//!
//! Picks the provider serving the current call from a [`RegistrySnapshot`]:
//!
//! 1. A registry with exactly one entry always wins; the routing key is not read.
//! 2. No routing key routes to the default entry.
//! 3. A key ending in [`LOAD_BALANCE_SUFFIX`] draws uniformly among all keys
//!    sharing the prefix, with a fresh draw on every call.
//! 4. Any other key is an exact lookup.
//!
//! Unresolved keys are offered to the [`MissingHandler`] once before failing
//! with [`DbError::Routing`]. The router never mutates the registry.

use crate::context::ContextSource;
use crate::db::connection::ConnectionProvider;
use crate::db::registry::{Registry, RegistrySnapshot};
use crate::error::{DbError, DbResult};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Trailing marker turning a routing key into a load-balanced prefix.
pub const LOAD_BALANCE_SUFFIX: char = '*';

/// Supplemental provider lookup consulted when a routing key is unresolved.
///
/// The returned mapping is used for the current resolution only. A handler that
/// wants the mapping to stick registers it in the [`Registry`] itself.
pub trait MissingHandler: Send + Sync {
    fn handle(
        &self,
        key: &str,
        snapshot: &RegistrySnapshot,
    ) -> Option<HashMap<String, Arc<dyn ConnectionProvider>>>;
}

/// Source of the index drawn for load-balanced keys.
pub trait KeyPicker: Send + Sync {
    /// Return an index in `0..candidates`. `candidates` is never zero.
    fn pick(&self, candidates: usize) -> usize;
}

/// Uniform draw from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPicker;

impl KeyPicker for RandomPicker {
    fn pick(&self, candidates: usize) -> usize {
        rand::thread_rng().gen_range(0..candidates)
    }
}

#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
    missing_handler: Option<Arc<dyn MissingHandler>>,
    picker: Arc<dyn KeyPicker>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            missing_handler: None,
            picker: Arc::new(RandomPicker),
        }
    }

    pub fn with_missing_handler(mut self, handler: Arc<dyn MissingHandler>) -> Self {
        self.missing_handler = Some(handler);
        self
    }

    pub fn with_picker(mut self, picker: Arc<dyn KeyPicker>) -> Self {
        self.picker = picker;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Resolve using the routing key of `context`, read only when it matters.
    pub fn route(&self, context: &dyn ContextSource) -> DbResult<Arc<dyn ConnectionProvider>> {
        let snapshot = self.registry.snapshot();
        if let Some(provider) = snapshot.sole_provider() {
            return Ok(Arc::clone(provider));
        }
        let key = context.routing_key();
        self.resolve_in(&snapshot, key.as_deref())
    }

    /// Resolve an explicit routing key against the current registry.
    pub fn resolve(&self, key: Option<&str>) -> DbResult<Arc<dyn ConnectionProvider>> {
        let snapshot = self.registry.snapshot();
        if let Some(provider) = snapshot.sole_provider() {
            return Ok(Arc::clone(provider));
        }
        self.resolve_in(&snapshot, key)
    }

    fn resolve_in(
        &self,
        snapshot: &RegistrySnapshot,
        key: Option<&str>,
    ) -> DbResult<Arc<dyn ConnectionProvider>> {
        let key = match key {
            Some(key) if !key.is_empty() => key,
            _ => return Ok(Arc::clone(&snapshot.default_entry().provider)),
        };

        match key.strip_suffix(LOAD_BALANCE_SUFFIX) {
            Some(prefix) => self.balance(snapshot, key, prefix),
            None => self.exact(snapshot, key),
        }
    }

    fn balance(
        &self,
        snapshot: &RegistrySnapshot,
        key: &str,
        prefix: &str,
    ) -> DbResult<Arc<dyn ConnectionProvider>> {
        let mut candidates = matching(snapshot.providers(), prefix);

        if candidates.is_empty() {
            if let Some(supplement) = self.consult(key, snapshot) {
                candidates = matching(&supplement, prefix);
            }
        }

        if candidates.is_empty() {
            warn!(routing_key = %key, "No data source matches load-balance prefix");
            return Err(DbError::routing(
                key,
                format!("no data source key starts with \"{}\"", prefix),
            ));
        }

        let index = self.picker.pick(candidates.len()) % candidates.len();
        let (chosen, provider) = candidates.swap_remove(index);
        debug!(
            routing_key = %key,
            chosen = %chosen,
            candidates = candidates.len() + 1,
            "Load-balanced data source selected"
        );
        Ok(provider)
    }

    fn exact(
        &self,
        snapshot: &RegistrySnapshot,
        key: &str,
    ) -> DbResult<Arc<dyn ConnectionProvider>> {
        if let Some(provider) = snapshot.get(key) {
            return Ok(Arc::clone(provider));
        }

        let supplemented = self
            .consult(key, snapshot)
            .and_then(|mut supplement| supplement.remove(key));

        supplemented.ok_or_else(|| {
            warn!(routing_key = %key, "No data source registered for routing key");
            DbError::routing(key, "no data source registered under this key")
        })
    }

    fn consult(
        &self,
        key: &str,
        snapshot: &RegistrySnapshot,
    ) -> Option<HashMap<String, Arc<dyn ConnectionProvider>>> {
        let handler = self.missing_handler.as_ref()?;
        debug!(routing_key = %key, "Consulting missing data source handler");
        handler
            .handle(key, snapshot)
            .filter(|supplement| !supplement.is_empty())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("registry", &self.registry)
            .field("has_missing_handler", &self.missing_handler.is_some())
            .finish_non_exhaustive()
    }
}

/// Keys starting with `prefix`, sorted so index draws are reproducible.
fn matching(
    providers: &HashMap<String, Arc<dyn ConnectionProvider>>,
    prefix: &str,
) -> Vec<(String, Arc<dyn ConnectionProvider>)> {
    let mut matched: Vec<_> = providers
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(key, provider)| (key.clone(), Arc::clone(provider)))
        .collect();
    matched.sort_by(|a, b| a.0.cmp(&b.0));
    matched
}
