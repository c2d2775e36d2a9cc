// Feature abstraction
//
// A feature is one step of a workflow. It receives the previous step's output,
// does its work inside its own scope and reports results tagged with an Event.

use async_trait::async_trait;
use std::any::{type_name, Any};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{CancelReason, FeatureError};
use super::event::{Event, Payload, StateEvent, StateType};
use super::response::{ResponseChannel, ResponseData};
use super::scope::FeatureScope;
use crate::observability::EngineMetrics;

/// A unit of workflow logic.
///
/// `process` must eventually call [`FeatureContext::result_event`] to advance
/// the workflow; the engine never times a feature out.
#[async_trait]
pub trait Feature: Send + Sync + 'static {
    type Input: Any + Send + Sync + Clone;
    type Output: Any + Send + Sync;

    async fn process(&self, input: Self::Input, ctx: FeatureContext<Self::Output>);

    /// Runs synchronously before `process` is launched.
    fn on_start(&self, _input: &Self::Input) {}

    /// Filter or reshape inbound external events before any handler sees
    /// them. Returning `None` drops the event.
    fn transform_event(&self, event: StateEvent) -> Option<StateEvent> {
        Some(event)
    }

    /// External events addressed to this feature type while it is active.
    fn on_event(&self, _event: &StateEvent) {}

    /// The feature was superseded or its run ended.
    fn on_close(&self) {}

    /// Faults raised inside this feature's scope.
    fn on_task_error(&self, _error: &FeatureError) {}
}

/// Result event tagged with the activation that produced it.
#[derive(Debug)]
pub(crate) struct ResultEnvelope {
    pub activation: u64,
    pub event: StateEvent,
}

/// Channels shared by every feature of one run.
#[derive(Clone)]
pub(crate) struct Channels {
    pub results: mpsc::UnboundedSender<ResultEnvelope>,
    pub external: broadcast::Sender<StateEvent>,
    pub responses: ResponseChannel,
    pub metrics: Arc<EngineMetrics>,
}

pub(crate) type EventTransform = Arc<dyn Fn(StateEvent) -> Option<StateEvent> + Send + Sync>;

/// Handle a feature uses to talk to the machine during one activation.
pub struct FeatureContext<O> {
    state: StateType,
    activation: u64,
    scope: FeatureScope,
    channels: Channels,
    transform: EventTransform,
    _output: PhantomData<fn(O)>,
}

impl<O> Clone for FeatureContext<O> {
    fn clone(&self) -> Self {
        Self {
            state: self.state,
            activation: self.activation,
            scope: self.scope.clone(),
            channels: self.channels.clone(),
            transform: Arc::clone(&self.transform),
            _output: PhantomData,
        }
    }
}

impl<O: Any + Send + Sync> FeatureContext<O> {
    pub(crate) fn new(
        state: StateType,
        activation: u64,
        scope: FeatureScope,
        channels: Channels,
    ) -> Self {
        Self {
            state,
            activation,
            scope,
            channels,
            transform: Arc::new(Some::<StateEvent>),
            _output: PhantomData,
        }
    }

    pub(crate) fn with_transform(mut self, transform: EventTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Report a result. May be called repeatedly, e.g. `Progress` before a
    /// terminal `Success` or `Fail`. Ignored once the feature was closed.
    /// `Complete` belongs to the machine and is dropped.
    pub fn result_event(&self, data: O, event: Event) {
        if event.is_terminal() {
            warn!(state = %self.state, %event, "Features cannot report the terminal event, result dropped");
            return;
        }
        if self.scope.is_cancelled() {
            debug!(state = %self.state, %event, "Result from closed feature ignored");
            return;
        }

        let envelope = ResultEnvelope {
            activation: self.activation,
            event: StateEvent::new(self.state, Arc::new(data), event),
        };
        if self.channels.results.send(envelope).is_err() {
            debug!(state = %self.state, %event, "Workflow run ended before result was delivered");
        }
    }

    /// Publish a side-channel value for observers without touching the
    /// transition flow.
    pub fn emit_response_data<R: ResponseData>(&self, data: R) {
        if self.scope.is_cancelled() {
            return;
        }
        self.channels.responses.emit(data);
    }

    /// Observe external events addressed to this feature type until the
    /// feature is closed. Events pass through [`Feature::transform_event`]
    /// first.
    pub fn handle_events<H>(&self, handler: H) -> JoinHandle<()>
    where
        H: Fn(StateEvent) + Send + Sync + 'static,
    {
        let mut receiver = self.channels.external.subscribe();
        let state = self.state;
        let transform = Arc::clone(&self.transform);

        self.scope.launch(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.state() == state => {
                        if let Some(event) = transform(event) {
                            handler(event);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(%state, skipped, "External events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        })
    }

    /// Run `work` as a child task of this feature.
    pub fn launch<F>(&self, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), FeatureError>> + Send + 'static,
    {
        self.scope.launch(work)
    }

    pub fn scope(&self) -> &FeatureScope {
        &self.scope
    }

    pub fn state(&self) -> StateType {
        self.state
    }

    pub fn is_active(&self) -> bool {
        !self.scope.is_cancelled()
    }
}

/// A started feature as seen by the machine.
pub struct ActiveFeature {
    state: StateType,
    activation: u64,
    scope: FeatureScope,
    on_close: Box<dyn Fn() + Send + Sync>,
    closed: AtomicBool,
}

impl ActiveFeature {
    pub fn state(&self) -> StateType {
        self.state
    }

    pub fn activation(&self) -> u64 {
        self.activation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Cancel the feature's scope because the workflow moved on.
    pub fn close(&self) {
        self.close_with(CancelReason::Superseded);
    }

    pub(crate) fn close_with(&self, reason: CancelReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(state = %self.state, activation = self.activation, %reason, "Closing workflow state");
        self.scope.cancel(reason);
        (self.on_close)();
    }
}

impl std::fmt::Debug for ActiveFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveFeature")
            .field("state", &self.state)
            .field("activation", &self.activation)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Start a fresh instance of `F` with `input`.
pub(crate) fn activate<F: Feature>(
    feature: F,
    input: Payload,
    activation: u64,
    channels: &Channels,
) -> ActiveFeature {
    let feature = Arc::new(feature);
    let state = StateType::of::<F>();

    let error_feature = Arc::clone(&feature);
    let metrics = Arc::clone(&channels.metrics);
    let scope = FeatureScope::new(
        state,
        Arc::new(move |err: &FeatureError| {
            metrics.record_feature_error();
            error_feature.on_task_error(err);
        }),
    );

    let closing_feature = Arc::clone(&feature);
    let active = ActiveFeature {
        state,
        activation,
        scope: scope.clone(),
        on_close: Box::new(move || closing_feature.on_close()),
        closed: AtomicBool::new(false),
    };

    let input = match input.downcast::<F::Input>() {
        Ok(input) => F::Input::clone(&input),
        Err(_) => {
            scope.report(&FeatureError::InputMismatch {
                state,
                expected: type_name::<F::Input>(),
            });
            return active;
        }
    };

    let transformer = Arc::clone(&feature);
    let ctx = FeatureContext::<F::Output>::new(state, activation, scope.clone(), channels.clone())
        .with_transform(Arc::new(move |event| transformer.transform_event(event)));

    feature.on_start(&input);

    let observer = Arc::clone(&feature);
    ctx.handle_events(move |event| observer.on_event(&event));

    scope.launch(async move {
        feature.process(input, ctx).await;
        Ok(())
    });

    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Echo {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Feature for Echo {
        type Input = String;
        type Output = String;

        async fn process(&self, input: String, ctx: FeatureContext<String>) {
            ctx.result_event(format!("{input}!"), Event::Success);
        }

        fn on_start(&self, input: &String) {
            self.log.lock().unwrap().push(format!("start:{input}"));
        }

        fn on_close(&self) {
            self.log.lock().unwrap().push("close".to_string());
        }

        fn on_task_error(&self, error: &FeatureError) {
            self.log.lock().unwrap().push(format!("error:{error}"));
        }
    }

    fn channels() -> (Channels, mpsc::UnboundedReceiver<ResultEnvelope>) {
        let (results, receiver) = mpsc::unbounded_channel();
        let (external, _) = broadcast::channel(8);
        let channels = Channels {
            results,
            external,
            responses: ResponseChannel::new(8),
            metrics: Arc::new(EngineMetrics::new()),
        };
        (channels, receiver)
    }

    #[tokio::test]
    async fn test_activation_runs_hooks_and_reports_result() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (channels, mut results) = channels();

        let active = activate(
            Echo { log: Arc::clone(&log) },
            Arc::new("frame".to_string()),
            7,
            &channels,
        );

        let envelope = results.recv().await.unwrap();
        assert_eq!(envelope.activation, 7);
        assert_eq!(envelope.event.event(), Event::Success);
        assert_eq!(envelope.event.payload::<String>().unwrap(), "frame!");
        assert!(envelope.event.state().is::<Echo>());

        active.close();
        active.close();
        assert!(active.is_closed());
        assert_eq!(*log.lock().unwrap(), vec!["start:frame", "close"]);
    }

    #[tokio::test]
    async fn test_input_of_wrong_type_is_reported() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (channels, mut results) = channels();

        let _active = activate(Echo { log: Arc::clone(&log) }, Arc::new(5u8), 1, &channels);

        assert!(results.try_recv().is_err());
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("error:input for Echo"));
        assert_eq!(channels.metrics.get_stats().feature_errors, 1);
    }

    #[tokio::test]
    async fn test_terminal_event_from_feature_is_dropped() {
        let (channels, mut results) = channels();
        let scope = FeatureScope::new(StateType::of::<Echo>(), Arc::new(|_: &FeatureError| {}));
        let ctx = FeatureContext::<u32>::new(StateType::of::<Echo>(), 1, scope, channels);

        ctx.result_event(1, Event::Complete);
        ctx.result_event(2, Event::Success);

        let envelope = results.recv().await.unwrap();
        assert_eq!(envelope.event.event(), Event::Success);
        assert_eq!(envelope.event.payload::<u32>(), Some(&2));
        assert!(results.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_events_applies_transform() {
        let (channels, _results) = channels();
        let external = channels.external.clone();
        let state = StateType::of::<Echo>();
        let scope = FeatureScope::new(state, Arc::new(|_: &FeatureError| {}));
        let ctx = FeatureContext::<u32>::new(state, 1, scope.clone(), channels).with_transform(
            Arc::new(|event: StateEvent| {
                (event.event() != Event::Progress).then(|| event.with_event(Event::Retry))
            }),
        );

        let (seen, mut seen_events) = mpsc::unbounded_channel();
        ctx.handle_events(move |event| {
            let _ = seen.send((event.payload::<u32>().copied(), event.event()));
        });

        external.send(StateEvent::external(state, 1u32, Event::Progress)).unwrap();
        external.send(StateEvent::external(state, 2u32, Event::Start)).unwrap();

        assert_eq!(seen_events.recv().await.unwrap(), (Some(2), Event::Retry));
        scope.cancel(CancelReason::Superseded);
        assert!(seen_events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_results_after_close_are_ignored() {
        let (channels, mut results) = channels();
        let scope = FeatureScope::new(StateType::of::<Echo>(), Arc::new(|_: &FeatureError| {}));
        let ctx = FeatureContext::<u32>::new(StateType::of::<Echo>(), 3, scope.clone(), channels);

        ctx.result_event(1, Event::Progress);
        scope.cancel(CancelReason::Superseded);
        ctx.result_event(2, Event::Progress);

        assert_eq!(results.recv().await.unwrap().event.payload::<u32>(), Some(&1));
        assert!(results.try_recv().is_err());
        assert!(!ctx.is_active());
    }
}
