//! Concurrency-safe status tracking shared by every resource type.
//!
//! Lock discipline:
//! - `fields` guards the desired/known/applied triple and the creation
//!   timestamp. It is only ever held for the duration of a single read or
//!   update, so readers always observe a fully applied value.
//! - `transition` serializes [`StatusTracker::begin_transition`] callers. A
//!   resource holds it for the whole of a dispatched transition, which keeps
//!   at most one `create` in flight per instance without blocking status
//!   reads on that instance.
//! - `terminal_reason` is a write-once cell, independent of both locks.
//!
//! No lock is shared between resource instances.

use std::sync::{
    Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskhost_common::status::ResourceStatus;

/// The mutable status fields of a resource, as persisted in task state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFields {
    /// Status the task engine wants the resource to reach.
    pub desired: ResourceStatus,
    /// Last status confirmed by the task engine.
    pub known: ResourceStatus,
    /// Status of the transition currently in flight, `None` when idle.
    pub applied: ResourceStatus,
    /// When the resource was first observed as created.
    pub created_at: Option<DateTime<Utc>>,
}

/// Holder of a resource's status triple and terminal reason.
#[derive(Debug)]
pub struct StatusTracker {
    resource: &'static str,
    owner: String,
    fields: RwLock<StatusFields>,
    transition: Mutex<()>,
    terminal_reason: OnceLock<String>,
}

impl StatusTracker {
    /// Creates a tracker with every status set to `None`.
    #[must_use]
    pub fn new(resource: &'static str, owner: impl Into<String>) -> Self {
        Self::with_fields(resource, owner, StatusFields::default())
    }

    /// Creates a tracker from previously persisted status fields.
    #[must_use]
    pub fn with_fields(
        resource: &'static str,
        owner: impl Into<String>,
        fields: StatusFields,
    ) -> Self {
        Self {
            resource,
            owner: owner.into(),
            fields: RwLock::new(fields),
            transition: Mutex::new(()),
            terminal_reason: OnceLock::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StatusFields> {
        self.fields.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StatusFields> {
        self.fields.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of all status fields.
    #[must_use]
    pub fn snapshot(&self) -> StatusFields {
        *self.read()
    }

    /// Sets the desired status.
    pub fn set_desired_status(&self, status: ResourceStatus) {
        self.write().desired = status;
    }

    /// Returns the desired status.
    #[must_use]
    pub fn desired_status(&self) -> ResourceStatus {
        self.read().desired
    }

    /// Sets the known status and ends the in-flight transition once the
    /// known status has reached it.
    ///
    /// The known status never moves backwards; a lower value is ignored.
    pub fn set_known_status(&self, status: ResourceStatus) {
        let mut fields = self.write();
        if status < fields.known {
            tracing::warn!(
                resource = self.resource,
                owner = %self.owner,
                current = %fields.known,
                requested = %status,
                "ignoring attempt to move known status backwards"
            );
            return;
        }
        fields.known = status;
        if fields.applied != ResourceStatus::None && fields.applied <= status {
            fields.applied = ResourceStatus::None;
        }
    }

    /// Returns the known status.
    #[must_use]
    pub fn known_status(&self) -> ResourceStatus {
        self.read().known
    }

    /// Marks `status` as the transition in flight.
    ///
    /// Returns `false`, without changing anything, if another transition is
    /// already in flight.
    pub fn set_applied_status(&self, status: ResourceStatus) -> bool {
        let mut fields = self.write();
        if fields.applied != ResourceStatus::None {
            return false;
        }
        fields.applied = status;
        true
    }

    /// Returns the status of the transition in flight.
    #[must_use]
    pub fn applied_status(&self) -> ResourceStatus {
        self.read().applied
    }

    /// Returns the status after the known status.
    #[must_use]
    pub fn next_known_state(&self) -> ResourceStatus {
        self.known_status().next()
    }

    /// Returns whether the resource is desired to be removed.
    #[must_use]
    pub fn desired_terminal(&self) -> bool {
        self.desired_status() == ResourceStatus::TERMINAL
    }

    /// Returns whether the known status is `Created`.
    #[must_use]
    pub fn known_created(&self) -> bool {
        self.known_status() == ResourceStatus::Created
    }

    /// Records the creation time. Ignores the Unix epoch and any later call
    /// once a time has been recorded.
    pub fn set_created_at(&self, created_at: DateTime<Utc>) {
        if created_at == DateTime::<Utc>::UNIX_EPOCH {
            return;
        }
        let mut fields = self.write();
        if fields.created_at.is_none() {
            fields.created_at = Some(created_at);
        }
    }

    /// Returns the creation time, if recorded.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.read().created_at
    }

    /// Records why the resource failed. Only the first reason is kept;
    /// returns whether this call recorded it.
    pub fn set_terminal_reason(&self, reason: impl Into<String>) -> bool {
        let mut recorded = false;
        let _ = self.terminal_reason.get_or_init(|| {
            recorded = true;
            tracing::info!(
                resource = self.resource,
                owner = %self.owner,
                "setting terminal reason"
            );
            reason.into()
        });
        recorded
    }

    /// Returns the terminal reason, if one has been recorded.
    #[must_use]
    pub fn terminal_reason(&self) -> Option<&str> {
        self.terminal_reason.get().map(String::as_str)
    }

    /// Acquires the per-instance transition lock.
    ///
    /// Blocks while another transition on the same instance is running.
    pub fn begin_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the resource type name this tracker belongs to.
    #[must_use]
    pub const fn resource(&self) -> &'static str {
        self.resource
    }
}
