//! Lookup of short-lived task credentials.
//!
//! Issuing credentials is the job of the host agent; resources only query
//! them by the execution-credentials ID carried in the task definition.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Temporary credentials of an IAM role.
#[derive(Clone, PartialEq, Eq)]
pub struct RoleCredentials {
    /// Access key ID.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token, present for temporary credentials.
    pub session_token: Option<String>,
}

impl fmt::Debug for RoleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Credentials handed to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCredentials {
    /// ARN of the task the credentials belong to.
    pub task_arn: String,
    /// The role credentials themselves.
    pub role: RoleCredentials,
}

/// Resolves execution-credentials IDs to task credentials.
pub trait CredentialsManager: Send + Sync {
    /// Returns the credentials registered under `id`, if any.
    fn task_credentials(&self, id: &str) -> Option<TaskCredentials>;
}

/// In-memory [`CredentialsManager`] fed by the host agent.
#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    entries: RwLock<HashMap<String, TaskCredentials>>,
}

impl InMemoryCredentials {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the credentials for `id`.
    pub fn set(&self, id: impl Into<String>, credentials: TaskCredentials) {
        let _ = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), credentials);
    }

    /// Removes the credentials for `id`.
    pub fn remove(&self, id: &str) {
        let _ = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

impl CredentialsManager for InMemoryCredentials {
    fn task_credentials(&self, id: &str) -> Option<TaskCredentials> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}
