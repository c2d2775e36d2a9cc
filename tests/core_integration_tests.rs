// Core context wiring: features resolving shared services and publishing on the bus

use async_trait::async_trait;
use featureflow::injection::{factory, singleton, Inject};
use featureflow::{
    complete_event, Core, DependencyError, Event, EventBus, Feature, FeatureContext,
    FeatureFlowConfig,
};
use std::any::TypeId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq)]
struct UploadFinished {
    bytes: usize,
}

#[derive(Debug, PartialEq)]
struct UploadStarted;

struct Upload {
    bus: Inject<EventBus>,
}

#[async_trait]
impl Feature for Upload {
    type Input = usize;
    type Output = usize;

    async fn process(&self, bytes: usize, ctx: FeatureContext<usize>) {
        let bus = match self.bus.get() {
            Ok(bus) => bus,
            Err(_) => {
                ctx.result_event(0, Event::Fail);
                return;
            }
        };
        bus.send_async_event(UploadStarted).await;
        bus.send_event(UploadFinished { bytes });
        ctx.result_event(bytes, Event::Success);
    }
}

#[tokio::test]
async fn test_feature_publishes_through_the_shared_bus() {
    let core = Core::new(FeatureFlowConfig::default());
    let bus = core.event_bus().unwrap();
    let mut finished = bus.subscribe_to::<UploadFinished>();
    let mut everything = bus.subscribe_to_types(&[
        TypeId::of::<UploadStarted>(),
        TypeId::of::<UploadFinished>(),
    ]);

    let machine = core.state_machine().unwrap();
    let registry = Arc::clone(core.registry());
    machine.register(move |transitions| {
        transitions.state(move || Upload {
            bus: registry.inject::<EventBus>(),
        });
    });

    let run = machine.start_with::<Upload>(2048).unwrap();
    let complete = timeout(WAIT, complete_event(run)).await.unwrap().unwrap();
    assert_eq!(complete.payload::<usize>(), Some(&2048));

    let event = timeout(WAIT, finished.next()).await.unwrap().unwrap();
    assert_eq!(*event, UploadFinished { bytes: 2048 });

    let first = timeout(WAIT, everything.next()).await.unwrap().unwrap();
    let second = timeout(WAIT, everything.next()).await.unwrap().unwrap();
    assert!(first.downcast_ref::<UploadStarted>().is_some());
    assert!(second.downcast_ref::<UploadFinished>().is_some());
}

#[tokio::test]
async fn test_configured_capacity_bounds_the_bus() {
    let mut config = FeatureFlowConfig::default();
    config.event_bus.capacity = 2;
    let core = Core::new(config);
    let bus = core.event_bus().unwrap();

    let mut slow = bus.subscribe_to::<UploadFinished>();
    let accepted: usize = (0..5)
        .map(|bytes| bus.send_event(UploadFinished { bytes }))
        .sum();

    assert_eq!(accepted, 2);
    assert_eq!(bus.dropped(), 3);
    assert_eq!(slow.try_next().unwrap().bytes, 0);
    assert_eq!(slow.try_next().unwrap().bytes, 1);
    assert!(slow.try_next().is_none());
}

#[test]
fn test_registry_overrides_and_unload() {
    let core = Core::new(FeatureFlowConfig::default());
    let registry = core.registry();
    let built = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&built);
    registry.register([singleton(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        EventBus::with_capacity(7)
    })]);

    assert_eq!(core.event_bus().unwrap().capacity(), 7);
    assert_eq!(core.event_bus().unwrap().capacity(), 7);
    assert_eq!(built.load(Ordering::SeqCst), 1);

    assert!(core.shutdown());
    core.event_bus().unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 2);

    registry.register([factory(|_| UploadStarted)]);
    assert_eq!(*registry.using::<UploadStarted>().unwrap(), UploadStarted);
    assert_eq!(
        registry.get::<UploadFinished>().unwrap_err(),
        DependencyError::NotRegistered {
            type_name: std::any::type_name::<UploadFinished>()
        }
    );
}
