//! Named, process-wide store instances.
//!
//! Every feature area asks the registry for its store by name, so all views
//! of the same area share one cache and one in-flight fetch.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::debug;

use super::Store;
use crate::error::RegistryError;

/// Type-erased handle so the registry can reset or rebind every store.
trait ManagedStore: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn reset(&self);
    fn bind_session(&self, session: Option<String>);
    fn item_type(&self) -> &'static str;
}

impl<T: Send + Sync + 'static> ManagedStore for Store<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reset(&self) {
        Store::reset(self);
    }

    fn bind_session(&self, session: Option<String>) {
        Store::bind_session(self, session);
    }

    fn item_type(&self) -> &'static str {
        type_name::<T>()
    }
}

#[derive(Default)]
pub struct StoreRegistry {
    stores: Mutex<HashMap<String, Arc<dyn ManagedStore>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static StoreRegistry {
        static GLOBAL: OnceLock<StoreRegistry> = OnceLock::new();
        GLOBAL.get_or_init(StoreRegistry::new)
    }

    fn stores(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn ManagedStore>>> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the store registered under `name`, creating it with `init` on
    /// first use. `init` runs at most once per name.
    pub fn get_or_init<T, F>(&self, name: &str, init: F) -> Result<Store<T>, RegistryError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Store<T>,
    {
        let mut stores = self.stores();
        if let Some(existing) = stores.get(name) {
            return downcast(name, existing.as_ref());
        }

        let store = init();
        debug!(store = name, item_type = type_name::<T>(), "Store registered");
        stores.insert(name.to_string(), Arc::new(store.clone()));
        Ok(store)
    }

    /// Look up an already registered store.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Option<Store<T>>, RegistryError> {
        let stores = self.stores();
        stores
            .get(name)
            .map(|existing| downcast(name, existing.as_ref()))
            .transpose()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop the cached items of every store (e.g. on sign-out).
    pub fn reset_all(&self) {
        let stores: Vec<_> = self.stores().values().cloned().collect();
        for store in stores {
            store.reset();
        }
    }

    /// Bind every store to the given session.
    pub fn bind_session_all(&self, session: Option<String>) {
        let stores: Vec<_> = self.stores().values().cloned().collect();
        for store in stores {
            store.bind_session(session.clone());
        }
    }
}

fn downcast<T: Send + Sync + 'static>(
    name: &str,
    existing: &dyn ManagedStore,
) -> Result<Store<T>, RegistryError> {
    existing
        .as_any()
        .downcast_ref::<Store<T>>()
        .cloned()
        .ok_or_else(|| RegistryError::TypeMismatch {
            name: name.to_string(),
            registered: existing.item_type(),
            requested: type_name::<T>(),
        })
}
