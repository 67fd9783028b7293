//! Single-flight coalescing.
//!
//! Concurrent requests for the same prompt hash collapse into one
//! outstanding generation: the first caller leads and executes, later
//! callers wait and receive a clone of the leader's result. A leader
//! dropped without completing (cancellation, panic) wakes its waiters
//! with [`FlightError::LeaderCancelled`] so they can retry.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use quillcast_prompt::PromptHash;
use thiserror::Error;
use tokio::sync::broadcast;

/// Why a waiter did not receive a value.
#[derive(Debug, Clone, Error)]
pub enum FlightError {
    /// The leader was dropped before producing a result. Retriable.
    #[error("coalesced leader was cancelled")]
    LeaderCancelled,

    /// The leader's call failed; the message is its error rendering.
    #[error("coalesced leader failed: {0}")]
    LeaderFailed(String),
}

type FlightResult<T> = Result<T, FlightError>;
type FlightMap<T> = Mutex<HashMap<PromptHash, broadcast::Sender<FlightResult<T>>>>;

/// Coalesces concurrent calls keyed by prompt hash.
pub struct SingleFlight<T> {
    inflight: Arc<FlightMap<T>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Joins the flight for `key`: the first caller becomes the leader
    /// and receives a guard, later callers receive a waiting receiver.
    pub fn join(&self, key: &PromptHash) -> Flight<T> {
        let mut inflight = self.inflight.lock();
        if let Some(sender) = inflight.get(key) {
            Flight::Wait(sender.subscribe())
        } else {
            // One result per flight; capacity 1 is enough.
            let (tx, _rx) = broadcast::channel(1);
            inflight.insert(key.clone(), tx);
            Flight::Lead(FlightGuard {
                inflight: Arc::clone(&self.inflight),
                key: key.clone(),
                done: false,
            })
        }
    }

    /// Number of flights currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Role assigned by [`SingleFlight::join`].
pub enum Flight<T> {
    /// This caller executes the work and must resolve the guard.
    Lead(FlightGuard<T>),
    /// Another caller is executing; await the shared result.
    Wait(broadcast::Receiver<FlightResult<T>>),
}

/// Receives the shared result on a waiter's receiver.
pub async fn wait<T: Clone>(mut rx: broadcast::Receiver<FlightResult<T>>) -> FlightResult<T> {
    match rx.recv().await {
        Ok(result) => result,
        // Sender dropped without broadcasting.
        Err(broadcast::error::RecvError::Closed) => Err(FlightError::LeaderCancelled),
        Err(broadcast::error::RecvError::Lagged(_)) => Err(FlightError::LeaderCancelled),
    }
}

/// Leadership of one flight. Must be resolved with
/// [`FlightGuard::complete`] or [`FlightGuard::fail`]; dropping it
/// unresolved cancels the flight.
pub struct FlightGuard<T> {
    inflight: Arc<FlightMap<T>>,
    key: PromptHash,
    done: bool,
}

impl<T: Clone> FlightGuard<T> {
    /// Publishes a successful result to every waiter and ends the
    /// flight.
    pub fn complete(mut self, value: T) {
        self.resolve(Ok(value));
    }

    /// Publishes a failure to every waiter and ends the flight.
    pub fn fail(mut self, reason: impl Into<String>) {
        self.resolve(Err(FlightError::LeaderFailed(reason.into())));
    }

    fn resolve(&mut self, result: FlightResult<T>) {
        self.done = true;
        if let Some(sender) = self.inflight.lock().remove(&self.key) {
            // No waiters is fine; ignore the send error.
            let _ = sender.send(result);
        }
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        if !self.done {
            // Dropping the sender closes waiter receivers, which read
            // as LeaderCancelled.
            self.inflight.lock().remove(&self.key);
        }
    }
}
