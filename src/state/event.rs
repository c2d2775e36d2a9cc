// Core types for workflow events
//
// Events select transitions, StateType identifies a feature by its static type,
// and StateEvent carries a payload between the active feature and the machine.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Type-erased data carried by a [`StateEvent`].
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Signals that drive the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Start,
    Success,
    Fail,
    Progress,
    Retry,
    /// Terminal marker synthesized by the machine. Features never emit it.
    Complete,
    /// Implementor-defined event kind, compared by name.
    Custom(&'static str),
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Complete)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Start => write!(f, "Event::START"),
            Event::Success => write!(f, "Event::SUCCESS"),
            Event::Fail => write!(f, "Event::FAIL"),
            Event::Progress => write!(f, "Event::PROGRESS"),
            Event::Retry => write!(f, "Event::RETRY"),
            Event::Complete => write!(f, "COMPLETE"),
            Event::Custom(name) => write!(f, "Event::{name}"),
        }
    }
}

/// Stable identity of a feature type. Equality only considers the `TypeId`.
#[derive(Clone, Copy)]
pub struct StateType {
    id: TypeId,
    name: &'static str,
}

impl StateType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path, e.g. `CaptureFeature`.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for StateType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for StateType {}

impl Hash for StateType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateType({})", self.short_name())
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Sentinel state the machine reports before a run has activated anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyState;

/// Envelope produced by a feature, by the machine, or injected from outside.
#[derive(Clone)]
pub struct StateEvent {
    state: StateType,
    payload: Payload,
    event: Event,
}

impl StateEvent {
    pub fn new(state: StateType, payload: Payload, event: Event) -> Self {
        Self {
            state,
            payload,
            event,
        }
    }

    /// Result reported by feature `F`.
    pub fn for_feature<F: 'static, D: Any + Send + Sync>(data: D, event: Event) -> Self {
        Self::new(StateType::of::<F>(), Arc::new(data), event)
    }

    /// Envelope addressed to a feature type from outside the workflow.
    pub fn external<D: Any + Send + Sync>(state: StateType, data: D, event: Event) -> Self {
        Self::new(state, Arc::new(data), event)
    }

    /// Seed envelope for a run: `data` tagged `Success` from [`EmptyState`].
    pub fn initial<D: Any + Send + Sync>(data: D) -> Self {
        Self::new(StateType::of::<EmptyState>(), Arc::new(data), Event::Success)
    }

    pub fn state(&self) -> StateType {
        self.state
    }

    pub fn event(&self) -> Event {
        self.event
    }

    pub fn raw_payload(&self) -> &Payload {
        &self.payload
    }

    /// Typed view of the payload, `None` when it holds another type.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Same envelope re-tagged, used when the machine forwards or completes.
    pub fn with_event(&self, event: Event) -> Self {
        Self {
            state: self.state,
            payload: Arc::clone(&self.payload),
            event,
        }
    }

    pub(crate) fn with_state(&self, state: StateType) -> Self {
        Self {
            state,
            payload: Arc::clone(&self.payload),
            event: self.event,
        }
    }
}

impl fmt::Debug for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateEvent")
            .field("state", &self.state)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "State: {} $ Event: {}", self.state, self.event)
    }
}

/// Progress report a feature may attach to an `Event::Progress` result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent<P> {
    pub current: P,
    pub max: P,
}

impl<P> ProgressEvent<P> {
    pub fn new(current: P, max: P) -> Self {
        Self { current, max }
    }
}

impl<P: Into<f64> + Copy> ProgressEvent<P> {
    /// Completed fraction in `0.0..=1.0`; zero when `max` is zero.
    pub fn fraction(&self) -> f64 {
        let max: f64 = self.max.into();
        if max <= 0.0 {
            return 0.0;
        }
        (self.current.into() / max).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Capture;

    #[test]
    fn test_state_type_identity_and_names() {
        let a = StateType::of::<Capture>();
        let b = StateType::of::<Capture>();
        assert_eq!(a, b);
        assert_ne!(a, StateType::of::<EmptyState>());
        assert_eq!(a.short_name(), "Capture");
        assert!(a.is::<Capture>());
        assert_eq!(format!("{a}"), "Capture");
    }

    #[test]
    fn test_event_display() {
        assert_eq!(Event::Success.to_string(), "Event::SUCCESS");
        assert_eq!(Event::Complete.to_string(), "COMPLETE");
        assert_eq!(Event::Custom("TIMEOUT").to_string(), "Event::TIMEOUT");
        assert_eq!(Event::Custom("A"), Event::Custom("A"));
        assert_ne!(Event::Custom("A"), Event::Custom("B"));
        assert!(Event::Complete.is_terminal());
        assert!(!Event::Fail.is_terminal());
    }

    #[test]
    fn test_state_event_payload_access() {
        let event = StateEvent::for_feature::<Capture, _>(42u32, Event::Progress);
        assert_eq!(event.payload::<u32>(), Some(&42));
        assert_eq!(event.payload::<String>(), None);
        assert!(event.state().is::<Capture>());

        let completed = event.with_event(Event::Complete);
        assert_eq!(completed.event(), Event::Complete);
        assert_eq!(completed.payload::<u32>(), Some(&42));
        assert!(Arc::ptr_eq(completed.raw_payload(), event.raw_payload()));
    }

    #[test]
    fn test_initial_event_comes_from_empty_state() {
        let initial = StateEvent::initial("seed");
        assert!(initial.state().is::<EmptyState>());
        assert_eq!(initial.event(), Event::Success);
        assert_eq!(initial.payload::<&str>(), Some(&"seed"));
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(ProgressEvent::new(5u32, 10u32).fraction(), 0.5);
        assert_eq!(ProgressEvent::new(3u32, 0u32).fraction(), 0.0);
        assert_eq!(ProgressEvent::new(12u32, 10u32).fraction(), 1.0);
    }
}
