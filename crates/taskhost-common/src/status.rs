//! Lifecycle status shared by every task resource type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TaskhostError;

/// Lifecycle status of a task resource.
///
/// The variants are totally ordered: `None < Created < Removed`.
/// `Removed` is terminal and `Created` is the steady state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceStatus {
    /// Nothing has been provisioned yet.
    #[default]
    None,
    /// The resource has been provisioned.
    Created,
    /// The resource has been torn down.
    Removed,
}

impl ResourceStatus {
    /// The status a resource is considered ready in.
    pub const STEADY_STATE: Self = Self::Created;

    /// The last status a resource can reach.
    pub const TERMINAL: Self = Self::Removed;

    /// Returns the status following `self`. `Removed` is its own successor.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::None => Self::Created,
            Self::Created | Self::Removed => Self::Removed,
        }
    }

    /// Returns whether this is the terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Removed)
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Created => "CREATED",
            Self::Removed => "REMOVED",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = TaskhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "CREATED" => Ok(Self::Created),
            "REMOVED" => Ok(Self::Removed),
            other => Err(TaskhostError::Configuration {
                message: format!("unknown resource status: {other}"),
            }),
        }
    }
}
