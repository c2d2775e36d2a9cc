// Process-scoped context
//
// Owns the dependency registry the rest of an application resolves its shared
// services from. Built once at startup and passed to collaborators. The event
// bus and configuration are singletons; every resolution of a `StateMachine`
// yields a fresh machine.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::FeatureFlowConfig;
use crate::events::EventBus;
use crate::injection::{factory, registry_of, singleton, DependencyRegistry, Registration};
use crate::state::StateMachine;

pub struct Core {
    registry: Arc<DependencyRegistry>,
}

impl Core {
    pub fn new(config: FeatureFlowConfig) -> Self {
        Self {
            registry: registry_of(default_registrations(config)),
        }
    }

    pub fn registry(&self) -> &Arc<DependencyRegistry> {
        &self.registry
    }

    pub fn config(&self) -> Result<Arc<FeatureFlowConfig>> {
        Ok(self.registry.get::<FeatureFlowConfig>()?)
    }

    pub fn event_bus(&self) -> Result<Arc<EventBus>> {
        Ok(self.registry.get::<EventBus>()?)
    }

    /// A new machine sized from the configuration.
    pub fn state_machine(&self) -> Result<Arc<StateMachine>> {
        Ok(self.registry.get::<StateMachine>()?)
    }

    /// Drop cached singletons. Registrations stay, so the next resolution
    /// builds fresh instances.
    pub fn shutdown(&self) -> bool {
        if let Ok(bus) = self.registry.get::<EventBus>() {
            info!(
                subscribers = bus.subscriber_count(),
                dropped = bus.dropped(),
                "Releasing event bus"
            );
        }
        let cleared = self.registry.unload();
        info!(cleared, "Core context unloaded");
        cleared
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core").field("registry", &self.registry).finish()
    }
}

fn default_registrations(config: FeatureFlowConfig) -> Vec<Registration> {
    let bus_capacity = config.event_bus.capacity;
    let machine_config = config.state_machine.clone();

    vec![
        singleton(move |_| config.clone()),
        singleton(move |_| EventBus::with_capacity(bus_capacity)),
        factory(move |_| StateMachine::with_config(&machine_config)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registrations() {
        let core = Core::new(FeatureFlowConfig::default());
        let registry = core.registry();

        assert_eq!(registry.len(), 3);
        assert!(registry.contains::<EventBus>());
        assert!(registry.contains::<StateMachine>());
        assert!(registry.contains::<FeatureFlowConfig>());
    }

    #[test]
    fn test_event_bus_is_shared() {
        let mut config = FeatureFlowConfig::default();
        config.event_bus.capacity = 5;
        let core = Core::new(config);

        let first = core.event_bus().unwrap();
        let second = core.event_bus().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.capacity(), 5);
    }

    #[test]
    fn test_state_machines_are_fresh() {
        let core = Core::new(FeatureFlowConfig::default());
        let first = core.state_machine().unwrap();
        let second = core.state_machine().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_shutdown_releases_singletons() {
        let core = Core::new(FeatureFlowConfig::default());
        let before = core.event_bus().unwrap();

        assert!(core.shutdown());

        let after = core.event_bus().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
