//! Log-router (firelens) resource.
//!
//! Provisions `<dataDir>/firelens/<taskID>/` for a task's log router
//! container: a `config/` directory holding the rendered `fluent.conf` and,
//! optionally, an `external.conf` fetched from S3, plus an empty `socket/`
//! directory the router creates its unix socket in.
//!
//! - [`options`]: Parsing of the router container's firelens options.
//! - [`config`]: Configuration model and the fluentd / fluent-bit renderers.
//! - [`resource`]: The [`FirelensResource`] itself.

pub mod config;
pub mod options;
pub mod resource;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use taskhost_common::error::TaskhostError;

pub use resource::{FirelensParams, FirelensResource, FirelensState};

/// Name of the resource type.
pub const RESOURCE_NAME: &str = "firelens";

/// Path of the unix socket inside the router container.
pub const SOCKET_PATH: &str = "/var/run/fluent.sock";

/// Log router implementation a configuration is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirelensConfigType {
    /// Fluentd.
    Fluentd,
    /// Fluent Bit.
    Fluentbit,
}

impl FirelensConfigType {
    /// Returns the name used in task definitions.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fluentd => "fluentd",
            Self::Fluentbit => "fluentbit",
        }
    }

    /// Returns where `external.conf` is mounted inside the router container.
    #[must_use]
    pub const fn external_config_mount(self) -> &'static str {
        match self {
            Self::Fluentd => "/fluentd/etc/external.conf",
            Self::Fluentbit => "/fluent-bit/etc/external.conf",
        }
    }
}

impl fmt::Display for FirelensConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FirelensConfigType {
    type Err = TaskhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fluentd" => Ok(Self::Fluentd),
            "fluentbit" => Ok(Self::Fluentbit),
            other => Err(TaskhostError::Configuration {
                message: format!("invalid firelens configuration type: {other}"),
            }),
        }
    }
}

/// Where a user-supplied configuration fragment comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalConfigType {
    /// An object in S3, downloaded into the config directory.
    S3,
    /// A file already present inside the router container's image.
    File,
}

impl ExternalConfigType {
    /// Returns the option value naming this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::File => "file",
        }
    }
}

impl fmt::Display for ExternalConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-supplied configuration fragment to include.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalConfig {
    /// Where the fragment comes from.
    #[serde(rename = "type")]
    pub kind: ExternalConfigType,
    /// S3 ARN or in-container path, depending on `kind`.
    pub value: String,
}
