// Provider descriptors for the dependency registry

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use super::registry::DependencyRegistry;

pub(crate) type Instance = Arc<dyn Any + Send + Sync>;
pub(crate) type ProviderFn = Arc<dyn Fn(&DependencyRegistry) -> Instance + Send + Sync>;

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Computed once and cached until [`DependencyRegistry::unload`].
    Singleton,
    /// Computed on every resolution.
    Factory,
}

/// A provider registered under the type it produces.
#[derive(Clone)]
pub struct Registration {
    pub(crate) key: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) lifetime: Lifetime,
    pub(crate) provider: ProviderFn,
}

impl Registration {
    fn new<T, P>(lifetime: Lifetime, provider: P) -> Self
    where
        T: Any + Send + Sync,
        P: Fn(&DependencyRegistry) -> T + Send + Sync + 'static,
    {
        Self {
            key: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            lifetime,
            provider: Arc::new(move |registry| Arc::new(provider(registry)) as Instance),
        }
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn key(&self) -> TypeId {
        self.key
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("type", &self.type_name)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// Register `T` as a lazily computed, cached instance.
pub fn singleton<T, P>(provider: P) -> Registration
where
    T: Any + Send + Sync,
    P: Fn(&DependencyRegistry) -> T + Send + Sync + 'static,
{
    Registration::new(Lifetime::Singleton, provider)
}

/// Register `T` as a fresh instance per resolution.
pub fn factory<T, P>(provider: P) -> Registration
where
    T: Any + Send + Sync,
    P: Fn(&DependencyRegistry) -> T + Send + Sync + 'static,
{
    Registration::new(Lifetime::Factory, provider)
}
