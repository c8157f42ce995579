//! Per-instance table mapping a target status to the function that reaches it.

use std::collections::BTreeMap;
use std::fmt;

use taskhost_common::error::{Result, TaskhostError};
use taskhost_common::status::ResourceStatus;

use crate::tracker::StatusTracker;

/// A function moving resource `R` to one status.
pub type Transition<R> = fn(&R) -> Result<()>;

/// Dispatch table built once when a resource is constructed or initialized.
pub struct TransitionTable<R> {
    entries: BTreeMap<ResourceStatus, Transition<R>>,
}

impl<R> TransitionTable<R> {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registers `transition` as the way to reach `status`.
    #[must_use]
    pub fn with(mut self, status: ResourceStatus, transition: Transition<R>) -> Self {
        let _ = self.entries.insert(status, transition);
        self
    }

    /// Returns whether a transition to `status` is registered.
    #[must_use]
    pub fn contains(&self, status: ResourceStatus) -> bool {
        self.entries.contains_key(&status)
    }

    /// Returns the statuses reachable through this table, in order.
    pub fn statuses(&self) -> impl Iterator<Item = ResourceStatus> + '_ {
        self.entries.keys().copied()
    }

    /// Runs the transition registered for `target` against `resource`.
    ///
    /// Holds the tracker's transition lock for the whole call. Status reads
    /// and writes on the tracker stay available while the transition runs.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::StateTransition`] if nothing is registered for
    /// `target`, recording it as the terminal reason. Otherwise returns the
    /// transition's own result.
    pub fn apply(
        &self,
        resource: &R,
        tracker: &StatusTracker,
        target: ResourceStatus,
    ) -> Result<()> {
        let _guard = tracker.begin_transition();
        let Some(transition) = self.entries.get(&target) else {
            let err = TaskhostError::StateTransition {
                resource: tracker.resource().to_string(),
                status: target.to_string(),
            };
            let _ = tracker.set_terminal_reason(err.to_string());
            return Err(err);
        };
        tracing::debug!(resource = tracker.resource(), %target, "applying transition");
        transition(resource)
    }
}

impl<R> Default for TransitionTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for TransitionTable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
