//! Engine health surface.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Starting,
    Running,
    /// Running, but some component reported an error since its last
    /// success.
    Degraded,
    Draining,
    Stopped,
}

/// Snapshot returned by [`EngineHandle::health`](crate::EngineHandle).
/// Serializable so an HTTP layer can expose it directly.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub state: EngineState,
    pub uptime: Duration,
    pub active_tenants: usize,
    pub workers_busy: usize,
    pub bucket_remaining_by_key: BTreeMap<String, f64>,
    pub last_error_by_component: BTreeMap<String, String>,
}

/// Shared mutable health state, written by every background task.
pub(crate) struct HealthBoard {
    state: RwLock<EngineState>,
    errors: RwLock<BTreeMap<String, String>>,
}

impl HealthBoard {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(EngineState::Starting),
            errors: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        *self.state.write() = state;
    }

    /// Records a component failure; a Running engine reads Degraded
    /// until the component succeeds again.
    pub(crate) fn record_error(&self, component: &str, message: String) {
        self.errors.write().insert(component.to_string(), message);
        let mut state = self.state.write();
        if *state == EngineState::Running {
            *state = EngineState::Degraded;
        }
    }

    /// Clears a component's error; the last clear restores Running.
    pub(crate) fn record_ok(&self, component: &str) {
        let mut errors = self.errors.write();
        errors.remove(component);
        if errors.is_empty() {
            let mut state = self.state.write();
            if *state == EngineState::Degraded {
                *state = EngineState::Running;
            }
        }
    }

    pub(crate) fn errors(&self) -> BTreeMap<String, String> {
        self.errors.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degrades_and_recovers_with_component_errors() {
        let board = HealthBoard::new();
        board.set_state(EngineState::Running);

        board.record_error("reconciler", "repo down".into());
        assert_eq!(board.state(), EngineState::Degraded);
        assert_eq!(board.errors().get("reconciler").unwrap(), "repo down");

        board.record_ok("reconciler");
        assert_eq!(board.state(), EngineState::Running);
        assert!(board.errors().is_empty());
    }

    #[test]
    fn draining_is_not_overwritten_by_recovery() {
        let board = HealthBoard::new();
        board.set_state(EngineState::Running);
        board.record_error("sweeper", "oops".into());
        board.set_state(EngineState::Draining);

        board.record_ok("sweeper");
        assert_eq!(board.state(), EngineState::Draining);
    }

    #[test]
    fn snapshot_serializes() {
        let snapshot = HealthSnapshot {
            state: EngineState::Running,
            uptime: Duration::from_secs(12),
            active_tenants: 3,
            workers_busy: 1,
            bucket_remaining_by_key: BTreeMap::from([("llm:day:global".to_string(), 9_950.0)]),
            last_error_by_component: BTreeMap::new(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["active_tenants"], 3);
    }
}
