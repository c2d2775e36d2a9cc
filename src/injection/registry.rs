use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

use super::provider::{Instance, Lifetime, Registration};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DependencyError {
    #[error("No registered instance for {type_name}")]
    NotRegistered { type_name: &'static str },
    #[error("Provider for {type_name} produced a different type")]
    TypeMismatch { type_name: &'static str },
}

/// Type-keyed container of singleton and factory providers.
#[derive(Default)]
pub struct DependencyRegistry {
    registry: RwLock<HashMap<TypeId, Registration>>,
    cache: Mutex<HashMap<TypeId, Arc<OnceLock<Instance>>>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite providers. The last registration of a type wins and
    /// evicts any instance cached for it.
    pub fn register(&self, entries: impl IntoIterator<Item = Registration>) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        for entry in entries {
            debug!(dependency = entry.type_name, lifetime = ?entry.lifetime, "Dependency registered");
            cache.remove(&entry.key);
            registry.insert(entry.key, entry);
        }
    }

    /// Resolve `T`. Singletons are computed once and cached; factories run on
    /// every call.
    pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>, DependencyError> {
        let key = TypeId::of::<T>();
        let (lifetime, provider) = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let registration = registry.get(&key).ok_or(DependencyError::NotRegistered {
                type_name: type_name::<T>(),
            })?;
            (registration.lifetime, Arc::clone(&registration.provider))
        };

        let instance = match lifetime {
            Lifetime::Singleton => {
                // The map lock is released before the provider runs so that
                // providers can resolve their own dependencies.
                let cell = {
                    let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
                    Arc::clone(cache.entry(key).or_default())
                };
                Arc::clone(cell.get_or_init(|| provider(self)))
            }
            Lifetime::Factory => provider(self),
        };

        instance
            .downcast::<T>()
            .map_err(|_| DependencyError::TypeMismatch {
                type_name: type_name::<T>(),
            })
    }

    /// Immediate resolution, same as [`DependencyRegistry::get`].
    pub fn using<T: Any + Send + Sync>(&self) -> Result<Arc<T>, DependencyError> {
        self.get::<T>()
    }

    /// Handle that resolves `T` on first use.
    pub fn inject<T: Any + Send + Sync>(self: &Arc<Self>) -> Inject<T> {
        Inject {
            registry: Arc::clone(self),
            value: OnceLock::new(),
            _type: PhantomData,
        }
    }

    /// Clear cached singletons, keeping every registration. Returns whether
    /// the cache is empty afterwards.
    pub fn unload(&self) -> bool {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.clear();
        cache.is_empty()
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<T>())
    }

    pub fn lifetime_of<T: Any>(&self) -> Option<Lifetime> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .map(Registration::lifetime)
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of singletons currently cached.
    pub fn cached(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }
}

impl fmt::Debug for DependencyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("DependencyRegistry")
            .field("registrations", &registry.values().collect::<Vec<_>>())
            .field("cached", &self.cached())
            .finish()
    }
}

/// Build a shared registry pre-populated with `entries`.
pub fn registry_of(entries: impl IntoIterator<Item = Registration>) -> Arc<DependencyRegistry> {
    let registry = Arc::new(DependencyRegistry::new());
    registry.register(entries);
    registry
}

/// Lazily resolved dependency.
pub struct Inject<T> {
    registry: Arc<DependencyRegistry>,
    value: OnceLock<Arc<T>>,
    _type: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Inject<T> {
    /// Resolve on first call, then keep returning the same instance.
    pub fn get(&self) -> Result<Arc<T>, DependencyError> {
        if let Some(value) = self.value.get() {
            return Ok(Arc::clone(value));
        }
        let resolved = self.registry.get::<T>()?;
        Ok(Arc::clone(self.value.get_or_init(|| resolved)))
    }

    pub fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<T> fmt::Debug for Inject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inject")
            .field("type", &type_name::<T>())
            .field("resolved", &self.value.get().is_some())
            .finish()
    }
}
