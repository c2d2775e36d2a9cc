// Transition graph
//
// States are registered as factories so that each activation gets a fresh
// instance. Edges are keyed by (state type, event); the first matching edge
// wins when duplicates were registered.

use async_trait::async_trait;
use std::any::{type_name, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::error::WorkflowError;
use super::event::{Event, Payload, StateType};
use super::feature::{activate, ActiveFeature, Channels, Feature, FeatureContext};

/// Directed edge between two feature types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transition {
    from: StateType,
    to: StateType,
    on: Event,
}

impl Transition {
    pub fn new(from: StateType, to: StateType, on: Event) -> Self {
        Self { from, to, on }
    }

    pub fn source(&self) -> StateType {
        self.from
    }

    pub fn target(&self) -> StateType {
        self.to
    }

    pub fn event(&self) -> Event {
        self.on
    }

    pub fn matches(&self, current: StateType, event: Event) -> bool {
        self.from == current && self.on == event
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transition from: {} || to: {} || after: {}",
            self.from, self.to, self.on
        )
    }
}

type Spawner = Arc<dyn Fn(Payload, u64, &Channels) -> ActiveFeature + Send + Sync>;

/// A feature type known to the registry, with the factory for its instances.
#[derive(Clone)]
pub struct RegisteredState {
    state: StateType,
    input: TypeId,
    input_name: &'static str,
    spawner: Spawner,
}

impl RegisteredState {
    fn new<F, M>(factory: M) -> Self
    where
        F: Feature,
        M: Fn() -> F + Send + Sync + 'static,
    {
        Self {
            state: StateType::of::<F>(),
            input: TypeId::of::<F::Input>(),
            input_name: type_name::<F::Input>(),
            spawner: Arc::new(move |input, activation, channels| {
                activate(factory(), input, activation, channels)
            }),
        }
    }

    pub fn state(&self) -> StateType {
        self.state
    }

    /// Check that a payload of type `D` can start this state.
    pub fn accepts<D: 'static>(&self) -> Result<(), WorkflowError> {
        if TypeId::of::<D>() == self.input {
            return Ok(());
        }
        Err(WorkflowError::InputMismatch {
            state: self.state,
            expected: self.input_name,
            actual: type_name::<D>(),
        })
    }

    pub(crate) fn activate(&self, input: Payload, activation: u64, channels: &Channels) -> ActiveFeature {
        (self.spawner)(input, activation, channels)
    }
}

impl fmt::Debug for RegisteredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RegisteredState").field(&self.state).finish()
    }
}

/// Synthetic zero-input source every run starts from.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartingFeature;

#[async_trait]
impl Feature for StartingFeature {
    type Input = ();
    type Output = ();

    async fn process(&self, _input: (), _ctx: FeatureContext<()>) {}
}

/// Two registered states waiting for the event that connects them.
pub struct StatePair<'r, A, B> {
    registry: &'r mut TransitionRegistry,
    _states: PhantomData<fn() -> (A, B)>,
}

impl<A: Feature, B: Feature> StatePair<'_, A, B> {
    /// Store the edge `A -> B` taken when `A` reports `event`.
    pub fn after(self, event: Event) -> Transition {
        let transition = Transition::new(StateType::of::<A>(), StateType::of::<B>(), event);
        self.registry.edges.push(transition);
        transition
    }
}

#[derive(Default)]
pub struct TransitionRegistry {
    states: Vec<RegisteredState>,
    edges: Vec<Transition>,
}

impl TransitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a registration closure against this registry.
    pub fn register(&mut self, registration: impl FnOnce(&mut Self)) {
        registration(self);
    }

    /// Register a single state. The first registration of a type is kept.
    pub fn state<F, M>(&mut self, factory: M) -> StateType
    where
        F: Feature,
        M: Fn() -> F + Send + Sync + 'static,
    {
        let state = StateType::of::<F>();
        if !self.contains(state) {
            self.states.push(RegisteredState::new(factory));
        }
        state
    }

    /// Register `A` and `B` and pair them for an edge. `B` must accept what
    /// `A` produces.
    pub fn connect<A, B, FA, FB>(&mut self, from: FA, to: FB) -> StatePair<'_, A, B>
    where
        A: Feature,
        B: Feature<Input = A::Output>,
        FA: Fn() -> A + Send + Sync + 'static,
        FB: Fn() -> B + Send + Sync + 'static,
    {
        self.state(from);
        self.state(to);
        StatePair {
            registry: self,
            _states: PhantomData,
        }
    }

    /// Resolve `state` and synthesize the source and unconditional `Success`
    /// edge that start a run. The edge belongs to the run, not the registry.
    pub fn starting_feature_for(
        &self,
        state: StateType,
    ) -> Result<(StartingFeature, Transition), WorkflowError> {
        let registered = self.get_state(state)?;
        let edge = Transition::new(
            StateType::of::<StartingFeature>(),
            registered.state(),
            Event::Success,
        );
        Ok((StartingFeature, edge))
    }

    pub fn get_edge_or_null(&self, current: StateType, event: Event) -> Option<&Transition> {
        self.edges.iter().find(|edge| edge.matches(current, event))
    }

    pub fn get_state(&self, state: StateType) -> Result<&RegisteredState, WorkflowError> {
        self.states
            .iter()
            .find(|registered| registered.state() == state)
            .ok_or(WorkflowError::UnregisteredFeature { state })
    }

    pub fn contains(&self, state: StateType) -> bool {
        self.states.iter().any(|registered| registered.state() == state)
    }

    pub fn states(&self) -> impl Iterator<Item = StateType> + '_ {
        self.states.iter().map(RegisteredState::state)
    }

    pub fn edges(&self) -> &[Transition] {
        &self.edges
    }
}

impl fmt::Display for TransitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for edge in &self.edges {
            writeln!(f, "{edge}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TransitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionRegistry")
            .field("states", &self.states)
            .field("edges", &self.edges)
            .finish()
    }
}
