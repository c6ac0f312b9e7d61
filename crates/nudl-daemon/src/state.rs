//! Scheduler state, published on a watch channel

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning,
    Merging,
    Patching,
    /// Terminal; no transition leaves it
    ShuttingDown,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Scanning => "scanning",
            SchedulerState::Merging => "merging",
            SchedulerState::Patching => "patching",
            SchedulerState::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Shared handle to the current state
#[derive(Clone)]
pub struct StateHandle {
    tx: Arc<watch::Sender<SchedulerState>>,
}

impl StateHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SchedulerState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> SchedulerState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.tx.subscribe()
    }

    /// Move to `next` unless shutdown has already begun
    pub fn set(&self, next: SchedulerState) {
        self.tx.send_if_modified(|current| {
            if *current == SchedulerState::ShuttingDown || *current == next {
                return false;
            }
            trace!(from = %current, to = %next, "State transition");
            *current = next;
            true
        });
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}
