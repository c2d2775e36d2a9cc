// Per-feature cancellation scope
//
// Every activation owns one scope. Tasks launched through it stop when the
// scope (or any ancestor) is cancelled, and faults are routed to the owning
// feature's error hook instead of the orchestrator.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::error::{CancelReason, FeatureError};
use super::event::StateType;

pub(crate) type ErrorHandler = Arc<dyn Fn(&FeatureError) + Send + Sync>;

#[derive(Clone)]
pub struct FeatureScope {
    state: StateType,
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
    parent: Option<Box<FeatureScope>>,
    on_error: ErrorHandler,
}

impl FeatureScope {
    pub(crate) fn new(state: StateType, on_error: ErrorHandler) -> Self {
        Self {
            state,
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
            parent: None,
            on_error,
        }
    }

    /// Nested scope cancelled together with this one.
    pub fn child(&self) -> FeatureScope {
        Self {
            state: self.state,
            token: self.token.child_token(),
            reason: Arc::new(OnceLock::new()),
            parent: Some(Box::new(self.clone())),
            on_error: Arc::clone(&self.on_error),
        }
    }

    pub fn state(&self) -> StateType {
        self.state
    }

    /// The first reason recorded wins.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason of this scope's cancellation, inherited from the ancestor that
    /// was cancelled when this scope was not cancelled directly.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        if !self.token.is_cancelled() {
            return None;
        }
        self.reason
            .get()
            .copied()
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.cancel_reason()))
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn `work` under this scope. Errors, panics and non-expected
    /// cancellations are reported through the feature's error hook.
    pub fn launch<F>(&self, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), FeatureError>> + Send + 'static,
    {
        let scope = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = scope.token.cancelled() => Err(FeatureError::Cancelled(
                    scope.cancel_reason().unwrap_or(CancelReason::Shutdown),
                )),
                result = AssertUnwindSafe(work).catch_unwind() => match result {
                    Ok(result) => result,
                    Err(panic) => Err(FeatureError::Panicked(panic_message(panic.as_ref()))),
                },
            };

            if let Err(err) = outcome {
                scope.report(&err);
            }
        })
    }

    pub(crate) fn report(&self, err: &FeatureError) {
        if err.is_expected_cancellation() {
            debug!(state = %self.state, "Expected cancellation in feature scope");
            return;
        }

        error!(state = %self.state, error = %err, "Unhandled error in feature scope");
        (self.on_error)(err);
    }
}

impl std::fmt::Debug for FeatureScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureScope")
            .field("state", &self.state)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Probe;

    fn recording_scope() -> (FeatureScope, Arc<Mutex<Vec<String>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let scope = FeatureScope::new(
            StateType::of::<Probe>(),
            Arc::new(move |err: &FeatureError| sink.lock().unwrap().push(err.to_string())),
        );
        (scope, errors)
    }

    #[tokio::test]
    async fn test_superseded_cancellation_is_not_reported() {
        let (scope, errors) = recording_scope();
        let handle = scope.launch(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        scope.cancel(CancelReason::Superseded);
        handle.await.unwrap();

        assert!(errors.lock().unwrap().is_empty());
        assert_eq!(scope.cancel_reason(), Some(CancelReason::Superseded));
    }

    #[tokio::test]
    async fn test_shutdown_cancellation_is_reported() {
        let (scope, errors) = recording_scope();
        let handle = scope.launch(futures::future::pending());

        scope.cancel(CancelReason::Shutdown);
        handle.await.unwrap();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Workflow shutdown"));
    }

    #[tokio::test]
    async fn test_child_scope_inherits_parent_cancellation() {
        let (scope, errors) = recording_scope();
        let child = scope.child();
        let grandchild = child.child();
        let handle = grandchild.launch(futures::future::pending());

        scope.cancel(CancelReason::Superseded);
        handle.await.unwrap();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(grandchild.cancel_reason(), Some(CancelReason::Superseded));
        assert!(errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_running() {
        let (scope, _errors) = recording_scope();
        let child = scope.child();
        child.cancel(CancelReason::Completed);

        assert!(child.is_cancelled());
        assert!(!scope.is_cancelled());
        assert_eq!(scope.cancel_reason(), None);
    }

    #[tokio::test]
    async fn test_panics_and_failures_reach_error_hook() {
        let (scope, errors) = recording_scope();
        scope
            .launch(async { panic!("camera unavailable") })
            .await
            .unwrap();
        scope
            .launch(async { Err(anyhow::anyhow!("upload rejected").into()) })
            .await
            .unwrap();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("camera unavailable"));
        assert_eq!(errors[1], "upload rejected");
    }

    #[tokio::test]
    async fn test_first_cancel_reason_wins() {
        let (scope, _errors) = recording_scope();
        scope.cancel(CancelReason::Superseded);
        scope.cancel(CancelReason::Shutdown);
        assert_eq!(scope.cancel_reason(), Some(CancelReason::Superseded));
    }
}
