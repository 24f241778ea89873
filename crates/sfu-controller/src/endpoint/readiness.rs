//! One-shot readiness signal for asynchronously built endpoints.

use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState<T> {
    Pending,
    Ready(T),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    TimedOut,
    Failed(String),
}

/// Single-assignment cell that any number of tasks can wait on.
///
/// The first `complete` or `fail` wins; later calls are ignored.
pub struct Readiness<T> {
    tx: watch::Sender<ReadyState<T>>,
}

impl<T: Clone> Default for Readiness<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Readiness<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ReadyState::Pending);
        Self { tx }
    }

    /// Returns `true` if this call resolved the signal.
    pub fn complete(&self, value: T) -> bool {
        self.resolve(ReadyState::Ready(value))
    }

    /// Returns `true` if this call resolved the signal.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.resolve(ReadyState::Failed(reason.into()))
    }

    fn resolve(&self, state: ReadyState<T>) -> bool {
        let mut next = Some(state);
        self.tx.send_if_modified(|current| {
            if matches!(current, ReadyState::Pending) {
                if let Some(state) = next.take() {
                    *current = state;
                    return true;
                }
            }
            false
        })
    }

    pub fn peek(&self) -> ReadyState<T> {
        self.tx.borrow().clone()
    }

    pub fn ready(&self) -> Option<T> {
        match &*self.tx.borrow() {
            ReadyState::Ready(value) => Some(value.clone()),
            ReadyState::Pending | ReadyState::Failed(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.tx.borrow(), ReadyState::Pending)
    }

    /// Wait until the signal resolves or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// `ReadinessError::TimedOut` if nothing resolved the signal in time,
    /// `ReadinessError::Failed` if it resolved to a failure.
    pub async fn wait(&self, timeout: Duration) -> Result<T, ReadinessError> {
        let mut rx = self.tx.subscribe();
        let resolved = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| !matches!(state, ReadyState::Pending)),
        )
        .await;

        match resolved {
            Err(_) => Err(ReadinessError::TimedOut),
            // The sender lives in `self`, so the channel cannot close while we wait.
            Ok(Err(_)) => Err(ReadinessError::Failed("readiness channel closed".to_string())),
            Ok(Ok(state)) => match &*state {
                ReadyState::Ready(value) => Ok(value.clone()),
                ReadyState::Failed(reason) => Err(ReadinessError::Failed(reason.clone())),
                ReadyState::Pending => Err(ReadinessError::TimedOut),
            },
        }
    }
}
