// Response side-channel
//
// Rich payloads features publish for observers (UI, tooling) independently of
// the transition flow. The latest value of each response type is retained and
// replayed once to subscribers that attach after it was emitted.

use futures::stream::{self, BoxStream, StreamExt};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::trace;

use super::event::ProgressEvent;
use crate::events::broadcast_stream;

/// Marker for payloads published through [`ResponseChannel`].
pub trait ResponseData: Any + Send + Sync {}

impl<P: Any + Send + Sync> ResponseData for ProgressEvent<P> {}

type Response = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
pub struct ResponseChannel {
    inner: Arc<ResponseInner>,
}

struct ResponseInner {
    latest: Mutex<HashMap<TypeId, Response>>,
    live: broadcast::Sender<(TypeId, Response)>,
}

impl ResponseChannel {
    pub fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(ResponseInner {
                latest: Mutex::new(HashMap::new()),
                live,
            }),
        }
    }

    pub fn emit<R: ResponseData>(&self, data: R) {
        let key = TypeId::of::<R>();
        let response: Response = Arc::new(data);

        // Publishing under the lock keeps replay and live delivery disjoint.
        let mut latest = self.inner.latest.lock().unwrap_or_else(PoisonError::into_inner);
        latest.insert(key, Arc::clone(&response));
        let receivers = self.inner.live.send((key, response)).unwrap_or(0);
        trace!(response = std::any::type_name::<R>(), receivers, "Response emitted");
    }

    /// Latest retained value of `T`, if any was emitted.
    pub fn latest<T: ResponseData>(&self) -> Option<Arc<T>> {
        let latest = self.inner.latest.lock().unwrap_or_else(PoisonError::into_inner);
        latest
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|response| response.downcast::<T>().ok())
    }

    /// Stream of `T` responses, starting with the retained value if present.
    pub fn subscribe<T: ResponseData>(&self) -> BoxStream<'static, Arc<T>> {
        let key = TypeId::of::<T>();
        let (replay, receiver) = {
            let latest = self.inner.latest.lock().unwrap_or_else(PoisonError::into_inner);
            (latest.get(&key).cloned(), self.inner.live.subscribe())
        };

        let live = broadcast_stream(receiver).filter_map(move |(type_id, response)| async move {
            if type_id == key {
                Some(response)
            } else {
                None
            }
        });

        stream::iter(replay)
            .chain(live)
            .filter_map(|response| async move { response.downcast::<T>().ok() })
            .boxed()
    }

    /// Drop all retained values.
    pub fn clear(&self) {
        self.inner
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for ResponseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseChannel").finish_non_exhaustive()
    }
}
