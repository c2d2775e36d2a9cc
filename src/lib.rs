// FeatureFlow Library - Reactive Feature Workflows
// This exposes the engine components for applications and integration tests

pub mod config;
pub mod core;
pub mod events;
pub mod injection;
pub mod observability;
pub mod state;
pub mod telemetry;

// Re-export key types for easy access
pub use crate::config::{config, init_config, FeatureFlowConfig};
pub use crate::core::Core;
pub use events::{EventBus, EventSubscription, Parcel};
pub use injection::{factory, registry_of, singleton, DependencyError, DependencyRegistry, Inject};
pub use observability::{ActivationTimer, EngineMetrics, EngineStats};
pub use state::{
    complete_event, EmptyState, Event, Feature, FeatureContext, FeatureError, ProgressEvent,
    ResponseData, StateEvent, StateMachine, StateType, TransitionRegistry, WorkflowError,
    WorkflowStream,
};
pub use telemetry::{create_run_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
