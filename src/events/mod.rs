// Event bus for cross-cutting notifications outside the transition graph

pub mod bus;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tracing::warn;

pub use bus::{EventBus, EventSubscription, Parcel};

/// Adapt a broadcast receiver into a stream. Lagged receivers skip the lost
/// values and keep going; the stream ends when the sender is gone.
pub(crate) fn broadcast_stream<T>(receiver: broadcast::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
{
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(value) => return Some((value, receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Broadcast subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
