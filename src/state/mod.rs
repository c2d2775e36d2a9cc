// Workflow state module
//
// Features, the transition graph between them and the machine that drives a
// run from one feature to the next.

pub mod error;
pub mod event;
pub mod feature;
pub mod machine;
pub mod response;
pub mod scope;
pub mod transition;

pub use error::{CancelReason, FeatureError, WorkflowError, EXPECTED_CANCELLATION_MESSAGE};
pub use event::{EmptyState, Event, Payload, ProgressEvent, StateEvent, StateType};
pub use feature::{ActiveFeature, Feature, FeatureContext};
pub use machine::{complete_event, StateMachine, WorkflowStream};
pub use response::{ResponseChannel, ResponseData};
pub use scope::FeatureScope;
pub use transition::{RegisteredState, StartingFeature, StatePair, Transition, TransitionRegistry};
