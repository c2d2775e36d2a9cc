// Dependency injection module
//
// Type-keyed container of singleton and factory providers, shared through an
// Arc and resolved either immediately or lazily through `Inject<T>`.

pub mod provider;
pub mod registry;


pub use provider::{factory, singleton, Lifetime, Registration};
pub use registry::{registry_of, DependencyError, DependencyRegistry, Inject};
