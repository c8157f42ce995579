//! Unified error types for the taskhost workspace.
//!
//! Every failure raised while provisioning or tearing down a task resource
//! maps onto one variant of [`TaskhostError`]. Stages that need to say
//! *where* a failure happened wrap the underlying error with
//! [`ResultExt::context`], which keeps the original variant reachable
//! through [`TaskhostError::root`].

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum TaskhostError {
    /// An I/O operation failed outside of resource provisioning.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An option value or option combination is invalid.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Description of the invalid configuration.
        message: String,
    },

    /// No transition is registered for the requested status.
    #[error("resource [{resource}]: impossible to transition to {status}")]
    StateTransition {
        /// Name of the resource type.
        resource: String,
        /// Requested target status.
        status: String,
    },

    /// A directory or file could not be created, written, or moved into place.
    #[error("{action} {path}: {source}")]
    Provisioning {
        /// What was being attempted.
        action: &'static str,
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Task credentials could not be resolved.
    #[error("credentials unavailable: {message}")]
    Credential {
        /// Description of the lookup failure.
        message: String,
    },

    /// A storage locator could not be resolved into a bucket and key.
    #[error("invalid storage address {locator}: {message}")]
    Address {
        /// The locator as supplied by the task definition.
        locator: String,
        /// Reason the locator was rejected.
        message: String,
    },

    /// Client construction, transfer, or timeout failure while fetching an object.
    #[error("download failed: {message}")]
    Download {
        /// Description of the failure.
        message: String,
    },

    /// A network plugin was missing, failed, or produced unusable output.
    #[error("network plugin {plugin}: {message}")]
    NetworkPlugin {
        /// Plugin name or type.
        plugin: String,
        /// Description of the failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// An error annotated with the stage it occurred in.
    #[error("{context}: {source}")]
    Context {
        /// Description of the failing stage.
        context: String,
        /// The wrapped error.
        source: Box<TaskhostError>,
    },
}

impl TaskhostError {
    /// Wraps this error with a description of the failing stage.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping every [`TaskhostError::Context`] layer.
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }
}

/// Adds stage context to a [`Result`].
pub trait ResultExt<T> {
    /// Wraps the error, if any, with `context`.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`TaskhostError::Context`].
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Like [`ResultExt::context`], but builds the message lazily.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`TaskhostError::Context`].
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TaskhostError>;
