use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::clock::Clock;
use super::database::Database;

/// Keyed services handed to plugins: the object store, the clock, and any
/// shared read-only resources registered by name.
#[derive(Clone)]
pub struct ServiceRegistry {
    database: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    resources: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    /// Registry holding only the object store and the clock.
    pub fn new(database: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self {
            database,
            clock,
            resources: HashMap::new(),
        }
    }

    /// The object store.
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    /// Time source; all stored timestamps come from it.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Register a shared resource, e.g. a bad-channel map.
    pub fn register<T: Any + Send + Sync>(&mut self, key: impl Into<String>, resource: T) {
        self.resources.insert(key.into(), Arc::new(resource));
    }

    /// Look up a resource by key and type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.resources
            .get(key)
            .cloned()
            .and_then(|resource| resource.downcast::<T>().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resources.contains_key(key)
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
