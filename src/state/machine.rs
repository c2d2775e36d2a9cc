// Workflow State Machine
//
// Drives the active feature of a run: every result event is matched against
// the transition graph and either starts the next feature, completes the run,
// or is forwarded to the caller while the same feature stays active.

use futures::stream::{self, BoxStream, StreamExt};
use futures::Stream;
use std::any::Any;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn, Instrument};

use super::error::{CancelReason, WorkflowError};
use super::event::{EmptyState, Event, StateEvent, StateType};
use super::feature::{ActiveFeature, Channels, Feature, ResultEnvelope};
use super::response::{ResponseChannel, ResponseData};
use super::transition::{StartingFeature, Transition, TransitionRegistry};
use crate::config::StateMachineConfig;
use crate::observability::{ActivationTimer, EngineMetrics};
use crate::telemetry::{create_run_span, generate_correlation_id};

/// Activation id of the synthetic starting feature in every run.
const STARTING_ACTIVATION: u64 = 0;

/// Active feature of every run in flight, keyed by run id.
type SharedActive = Arc<Mutex<HashMap<u64, Arc<ActiveFeature>>>>;

pub struct StateMachine {
    transitions: Arc<RwLock<TransitionRegistry>>,
    external_events: broadcast::Sender<StateEvent>,
    responses: ResponseChannel,
    current_state: watch::Sender<StateType>,
    active: SharedActive,
    runs: AtomicU64,
    activations: Arc<AtomicU64>,
    metrics: Arc<EngineMetrics>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::with_config(&StateMachineConfig::default())
    }

    pub fn with_config(config: &StateMachineConfig) -> Self {
        let (external_events, _) = broadcast::channel(config.external_event_capacity.max(1));
        let (current_state, _) = watch::channel(StateType::of::<EmptyState>());

        Self {
            transitions: Arc::new(RwLock::new(TransitionRegistry::new())),
            external_events,
            responses: ResponseChannel::new(config.response_capacity),
            current_state,
            active: Arc::new(Mutex::new(HashMap::new())),
            runs: AtomicU64::new(0),
            activations: Arc::new(AtomicU64::new(STARTING_ACTIVATION)),
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Build a machine and declare its graph in one go.
    pub fn of(builder: impl FnOnce(&mut TransitionRegistry)) -> Self {
        let machine = Self::new();
        machine.register(builder);
        machine
    }

    /// Declare states and edges. Not meant to run while a workflow is in flight.
    pub fn register(&self, registration: impl FnOnce(&mut TransitionRegistry)) {
        let mut transitions = self
            .transitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        transitions.register(registration);
    }

    pub fn transitions(&self) -> RwLockReadGuard<'_, TransitionRegistry> {
        read_transitions(&self.transitions)
    }

    /// Type of the feature that is currently active.
    pub fn current_state(&self) -> StateType {
        *self.current_state.borrow()
    }

    /// The current state followed by every later change.
    pub fn flow_of_states(&self) -> BoxStream<'static, StateType> {
        let receiver = self.current_state.subscribe();
        stream::unfold((receiver, true), |(mut receiver, first)| async move {
            if !first && receiver.changed().await.is_err() {
                return None;
            }
            let state = *receiver.borrow_and_update();
            Some((state, (receiver, false)))
        })
        .boxed()
    }

    /// Start a run at feature `S`.
    pub fn start_with<S: Feature>(&self, data: S::Input) -> Result<WorkflowStream, WorkflowError> {
        self.start_with_state(StateType::of::<S>(), data)
    }

    /// Start a run at the registered feature `state`. Fails with
    /// [`WorkflowError::InputMismatch`] unless `D` is the input type of that
    /// feature.
    pub fn start_with_state<D: Any + Send + Sync>(
        &self,
        state: StateType,
        data: D,
    ) -> Result<WorkflowStream, WorkflowError> {
        let starting_edge = {
            let transitions = self.transitions();
            let (_source, starting_edge) = transitions.starting_feature_for(state)?;
            transitions.get_state(state)?.accepts::<D>()?;
            starting_edge
        };

        self.current_state.send_replace(StateType::of::<EmptyState>());

        let (results_sender, results) = mpsc::unbounded_channel();
        let _ = results_sender.send(ResultEnvelope {
            activation: STARTING_ACTIVATION,
            event: StateEvent::initial(data),
        });

        let context = StateContext {
            channels: Channels {
                results: results_sender,
                external: self.external_events.clone(),
                responses: self.responses.clone(),
                metrics: Arc::clone(&self.metrics),
            },
            results,
        };

        let correlation_id = generate_correlation_id();
        let span = create_run_span(state.short_name(), &correlation_id);
        self.metrics.record_run_started();
        info!(parent: &span, start = %state, "Workflow run created");

        let run = RunLoop {
            run: self.runs.fetch_add(1, Ordering::Relaxed),
            transitions: Arc::clone(&self.transitions),
            starting_edge,
            context,
            active_type: StateType::of::<StartingFeature>(),
            active_activation: STARTING_ACTIVATION,
            active: None,
            timer: None,
            complete: false,
            current_state: self.current_state.clone(),
            shared_active: Arc::clone(&self.active),
            activations: Arc::clone(&self.activations),
            metrics: Arc::clone(&self.metrics),
        };

        Ok(WorkflowStream::new(run, span, correlation_id))
    }

    /// Deliver an external event to the active feature of type `feature`.
    /// Only a feature that is active right now observes it.
    pub fn send_event_for_feature<D: Any + Send + Sync>(
        &self,
        data: D,
        feature: StateType,
        event: Event,
    ) {
        let envelope = StateEvent::external(feature, data, event);
        match self.external_events.send(envelope) {
            Ok(receivers) => debug!(%feature, %event, receivers, "External event sent"),
            Err(_) => debug!(%feature, %event, "External event sent with no active listener"),
        }
    }

    pub fn send_event_for<F: Feature, D: Any + Send + Sync>(&self, data: D, event: Event) {
        self.send_event_for_feature(data, StateType::of::<F>(), event);
    }

    /// Side-channel responses of type `T`, starting with the latest one.
    pub fn subscribe_to_response<T: ResponseData>(&self) -> BoxStream<'static, Arc<T>> {
        self.responses.subscribe::<T>()
    }

    /// Cancel the active feature of every run in flight as an external
    /// shutdown. Their tasks report the cancellation through `on_task_error`.
    pub fn shutdown(&self) {
        let active: Vec<_> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (run, active) in active {
            warn!(run, state = %active.state(), "Shutting down active workflow state");
            active.close_with(CancelReason::Shutdown);
        }
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current_state", &self.current_state())
            .field("transitions", &*self.transitions())
            .finish_non_exhaustive()
    }
}

fn read_transitions(transitions: &RwLock<TransitionRegistry>) -> RwLockReadGuard<'_, TransitionRegistry> {
    transitions.read().unwrap_or_else(PoisonError::into_inner)
}

/// Channels owned by a single run.
struct StateContext {
    channels: Channels,
    results: mpsc::UnboundedReceiver<ResultEnvelope>,
}

struct RunLoop {
    run: u64,
    transitions: Arc<RwLock<TransitionRegistry>>,
    starting_edge: Transition,
    context: StateContext,
    active_type: StateType,
    active_activation: u64,
    active: Option<Arc<ActiveFeature>>,
    timer: Option<ActivationTimer>,
    complete: bool,
    current_state: watch::Sender<StateType>,
    shared_active: SharedActive,
    activations: Arc<AtomicU64>,
    metrics: Arc<EngineMetrics>,
}

impl RunLoop {
    async fn next_event(&mut self) -> Option<StateEvent> {
        if self.complete {
            return None;
        }

        loop {
            let envelope = self.context.results.recv().await?;
            if let Some(output) = self.step(envelope) {
                if output.event() == Event::Complete {
                    self.complete = true;
                    self.finish(CancelReason::Completed);
                }
                return Some(output);
            }
        }
    }

    /// Evaluate one result event. Returns the item to hand to the caller.
    fn step(&mut self, envelope: ResultEnvelope) -> Option<StateEvent> {
        if envelope.activation != self.active_activation {
            self.metrics.record_stale_result();
            debug!(
                state = %envelope.event.state(),
                event = %envelope.event.event(),
                "Result from superseded feature skipped"
            );
            return None;
        }

        let result = envelope.event;
        let source = self.active_type;
        let event = result.event();

        match self.edge_for(source, event) {
            Some(edge) => {
                self.advance(edge, &result);
                if source.is::<StartingFeature>() {
                    None
                } else {
                    Some(result.with_state(source))
                }
            }
            None if event == Event::Success => {
                info!(state = %source, "Workflow complete");
                self.metrics.record_completion();
                Some(result.with_state(source).with_event(Event::Complete))
            }
            None => {
                debug!(state = %source, %event, "No transition, forwarding event");
                self.metrics.record_forwarded();
                Some(result.with_state(source))
            }
        }
    }

    fn edge_for(&self, source: StateType, event: Event) -> Option<Transition> {
        if self.starting_edge.matches(source, event) {
            return Some(self.starting_edge);
        }
        read_transitions(&self.transitions)
            .get_edge_or_null(source, event)
            .copied()
    }

    /// Close the active feature, then start the target of `edge`.
    fn advance(&mut self, edge: Transition, result: &StateEvent) {
        let target = match read_transitions(&self.transitions).get_state(edge.target()) {
            Ok(target) => target.clone(),
            Err(err) => {
                warn!(error = %err, "Transition target is not registered");
                return;
            }
        };

        self.close_active(CancelReason::Superseded);

        let activation = self.activations.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            from = %edge.source(),
            to = %edge.target(),
            event = %edge.event(),
            activation,
            "Workflow transition"
        );

        let active = Arc::new(target.activate(
            Arc::clone(result.raw_payload()),
            activation,
            &self.context.channels,
        ));

        self.active_type = edge.target();
        self.active_activation = activation;
        self.active = Some(Arc::clone(&active));
        self.timer = Some(ActivationTimer::new(edge.target()));
        self.shared_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.run, active);
        self.current_state.send_replace(edge.target());

        self.metrics.record_activation();
        if !edge.source().is::<StartingFeature>() {
            self.metrics.record_transition();
        }
    }

    fn close_active(&mut self, reason: CancelReason) {
        if let Some(active) = self.active.take() {
            active.close_with(reason);

            let mut shared = self
                .shared_active
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if shared
                .get(&self.run)
                .is_some_and(|current| Arc::ptr_eq(current, &active))
            {
                shared.remove(&self.run);
            }
        }
        if let Some(timer) = self.timer.take() {
            timer.finish(&self.metrics);
        }
    }

    fn finish(&mut self, reason: CancelReason) {
        self.close_active(reason);
    }
}

impl Drop for RunLoop {
    fn drop(&mut self) {
        if self.active.is_some() {
            debug!(state = %self.active_type, "Workflow run dropped while a feature was active");
            self.finish(CancelReason::Shutdown);
        }
    }
}

/// Lazily driven, finite sequence of [`StateEvent`]s for one run. It ends
/// right after the first `Complete` item and cannot be restarted.
pub struct WorkflowStream {
    inner: BoxStream<'static, StateEvent>,
    correlation_id: String,
}

impl WorkflowStream {
    fn new(run: RunLoop, span: tracing::Span, correlation_id: String) -> Self {
        let inner = stream::unfold(run, move |mut run| {
            let span = span.clone();
            async move {
                let event = run.next_event().instrument(span).await?;
                Some((event, run))
            }
        })
        .boxed();

        Self {
            inner,
            correlation_id,
        }
    }

    /// Identifier attached to every log line of this run.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Drain the run up to its `Complete` item.
    pub async fn completion(self) -> Option<StateEvent> {
        complete_event(self).await
    }
}

impl Stream for WorkflowStream {
    type Item = StateEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for WorkflowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStream")
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

/// First `Complete` item of a workflow stream, `None` if the stream ends
/// without one.
pub async fn complete_event<S>(events: S) -> Option<StateEvent>
where
    S: Stream<Item = StateEvent>,
{
    let mut events = std::pin::pin!(events);
    while let Some(event) = events.next().await {
        if event.event() == Event::Complete {
            return Some(event);
        }
    }
    None
}
