// Broadcast publish/subscribe bus
//
// Each subscription owns a bounded queue. `send_event` never waits: when a
// subscriber's queue is full the envelope is dropped for that subscriber and
// counted. `send_async_event` waits for room in every matching queue instead.

use futures::Stream;
use std::any::{type_name, Any, TypeId};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

/// Type-erased envelope carried by the bus.
pub type Parcel = Arc<dyn Any + Send + Sync>;

pub const DEFAULT_CAPACITY: usize = 64;

enum Filter {
    Type(TypeId),
    Types(Vec<TypeId>),
}

impl Filter {
    fn accepts(&self, type_id: TypeId) -> bool {
        match self {
            Filter::Type(expected) => *expected == type_id,
            Filter::Types(expected) => expected.contains(&type_id),
        }
    }
}

struct Subscriber {
    id: u64,
    filter: Filter,
    sender: mpsc::Sender<Parcel>,
}

pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` is the number of undelivered envelopes each subscriber may
    /// hold before the non-suspending path starts dropping.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Best-effort, non-suspending send. Returns how many subscribers accepted
    /// the envelope.
    pub fn send_event<E: Any + Send + Sync>(&self, event: E) -> usize {
        let type_id = TypeId::of::<E>();
        let parcel: Parcel = Arc::new(event);
        let mut delivered = 0;

        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|subscriber| {
            if !subscriber.filter.accepts(type_id) {
                return !subscriber.sender.is_closed();
            }
            match subscriber.sender.try_send(Arc::clone(&parcel)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(
                        subscriber = subscriber.id,
                        event = type_name::<E>(),
                        "Subscriber queue full, event dropped"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });

        delivered
    }

    /// Suspends until every matching subscriber accepted the envelope.
    pub async fn send_async_event<E: Any + Send + Sync>(&self, event: E) -> usize {
        let type_id = TypeId::of::<E>();
        let parcel: Parcel = Arc::new(event);

        let senders: Vec<mpsc::Sender<Parcel>> = {
            let mut subscribers = self.lock_subscribers();
            subscribers.retain(|subscriber| !subscriber.sender.is_closed());
            subscribers
                .iter()
                .filter(|subscriber| subscriber.filter.accepts(type_id))
                .map(|subscriber| subscriber.sender.clone())
                .collect()
        };

        let mut delivered = 0;
        for sender in senders {
            if sender.send(Arc::clone(&parcel)).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Subscribe to envelopes whose payload is a `T`. Only envelopes sent after
    /// this call are observed.
    pub fn subscribe_to<T: Any + Send + Sync>(&self) -> EventSubscription<T> {
        let receiver = self.add_subscriber(Filter::Type(TypeId::of::<T>()));
        EventSubscription::new(receiver, |parcel| parcel.downcast::<T>().ok())
    }

    /// Subscribe to any of `types`. Consumers still have to downcast each parcel.
    pub fn subscribe_to_types(&self, types: &[TypeId]) -> EventSubscription<dyn Any + Send + Sync> {
        let receiver = self.add_subscriber(Filter::Types(types.to_vec()));
        EventSubscription::new(receiver, Some)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers()
            .iter()
            .filter(|subscriber| !subscriber.sender.is_closed())
            .count()
    }

    /// Deliveries dropped by [`EventBus::send_event`] so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn add_subscriber(&self, filter: Filter) -> mpsc::Receiver<Parcel> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_subscribers().push(Subscriber { id, filter, sender });
        debug!(subscriber = id, "Event bus subscriber added");
        receiver
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Infinite stream of envelopes for one subscriber. Dropping it unsubscribes.
pub struct EventSubscription<T: ?Sized> {
    receiver: mpsc::Receiver<Parcel>,
    convert: fn(Parcel) -> Option<Arc<T>>,
}

impl<T: ?Sized> EventSubscription<T> {
    fn new(receiver: mpsc::Receiver<Parcel>, convert: fn(Parcel) -> Option<Arc<T>>) -> Self {
        Self { receiver, convert }
    }

    /// Receive the next envelope. Returns `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<Arc<T>> {
        while let Some(parcel) = self.receiver.recv().await {
            if let Some(event) = (self.convert)(parcel) {
                return Some(event);
            }
        }
        None
    }

    /// Take an already queued envelope without waiting.
    pub fn try_next(&mut self) -> Option<Arc<T>> {
        while let Ok(parcel) = self.receiver.try_recv() {
            if let Some(event) = (self.convert)(parcel) {
                return Some(event);
            }
        }
        None
    }

    /// Stop receiving; queued envelopes can still be drained.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl<T: ?Sized> Stream for EventSubscription<T> {
    type Item = Arc<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.receiver.poll_recv(cx) {
                Poll::Ready(Some(parcel)) => {
                    if let Some(event) = (self.convert)(parcel) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
