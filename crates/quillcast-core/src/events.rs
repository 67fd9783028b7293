//! Engine-wide event listener registry.
//!
//! Components (cache, pipeline) emit typed events; operators register
//! listeners through the component config builders. Listeners are
//! observability hooks only: a panicking listener is isolated and
//! logged so it cannot take the emitting component down with it.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Trait implemented by every component event type.
pub trait EngineEvent: Send + Sync + fmt::Debug {
    /// Short machine-readable tag, e.g. `"cache_hit"` or `"job_failed"`.
    fn event_type(&self) -> &'static str;

    /// When the event occurred.
    fn timestamp(&self) -> Instant;

    /// Name of the component instance that emitted the event.
    fn component(&self) -> &str;
}

/// Trait for receiving component events.
pub trait EventListener<E: EngineEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

/// A set of listeners for one event type.
#[derive(Clone)]
pub struct EventListeners<E: EngineEvent> {
    listeners: Vec<Arc<dyn EventListener<E>>>,
}

impl<E: EngineEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits `event` to every listener. A panicking listener is caught
    /// and logged; the remaining listeners still run.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
            if outcome.is_err() {
                tracing::warn!(
                    component = event.component(),
                    event_type = event.event_type(),
                    "event listener panicked"
                );
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: EngineEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Closure-based listener.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _marker: std::marker::PhantomData<fn(&E)>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: EngineEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}
