//! Network configuration of a container namespace.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use taskhost_common::constants::CNI_SPEC_VERSION;
use taskhost_common::error::{Result, TaskhostError};
use taskhost_common::types::ContainerId;

/// Networks to attach to one container's namespace, in attach order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Container owning the namespace.
    pub container_id: ContainerId,
    /// Path of the namespace, e.g. `/proc/<pid>/ns/net`.
    pub netns_path: PathBuf,
    /// Networks, added first to last and deleted last to first.
    pub networks: Vec<NetworkEntry>,
}

/// One network attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    /// Interface name inside the namespace.
    pub if_name: String,
    /// Configuration handed to the plugin on stdin.
    pub plugin: PluginConfig,
}

impl NetworkEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(if_name: impl Into<String>, plugin: PluginConfig) -> Self {
        Self {
            if_name: if_name.into(),
            plugin,
        }
    }
}

/// A CNI network configuration object.
///
/// The JSON object is kept as given; only `name`, `type`, `cniVersion`, and
/// `ipam.type` are interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct PluginConfig {
    name: String,
    plugin_type: String,
    raw: Map<String, Value>,
}

impl PluginConfig {
    /// Parses a network configuration.
    ///
    /// `cniVersion` defaults to the supported specification version.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::Configuration`] if `json` is not an object
    /// with a string `type`.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::try_from(value)
    }

    /// Returns the network name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the plugin executable name.
    #[must_use]
    pub fn plugin_type(&self) -> &str {
        &self.plugin_type
    }

    /// Returns the IPAM plugin named in the `ipam` section, if any.
    #[must_use]
    pub fn ipam_type(&self) -> Option<&str> {
        self.raw.get("ipam")?.get("type")?.as_str()
    }

    /// Returns this configuration addressed to its IPAM plugin.
    #[must_use]
    pub fn ipam_config(&self) -> Option<Self> {
        let ipam_type = self.ipam_type()?.to_string();
        let mut raw = self.raw.clone();
        let _ = raw.insert("type".into(), Value::String(ipam_type.clone()));
        Some(Self {
            name: self.name.clone(),
            plugin_type: ipam_type,
            raw,
        })
    }

    /// Serializes the configuration for a plugin's stdin.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.raw)?)
    }
}

impl TryFrom<Value> for PluginConfig {
    type Error = TaskhostError;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(mut raw) = value else {
            return Err(TaskhostError::Configuration {
                message: "network configuration is not a JSON object".into(),
            });
        };
        let Some(plugin_type) = raw.get("type").and_then(Value::as_str).map(str::to_string)
        else {
            return Err(TaskhostError::Configuration {
                message: "network configuration has no plugin type".into(),
            });
        };
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&plugin_type)
            .to_string();
        let _ = raw
            .entry("cniVersion")
            .or_insert_with(|| Value::String(CNI_SPEC_VERSION.into()));
        Ok(Self {
            name,
            plugin_type,
            raw,
        })
    }
}

impl From<PluginConfig> for Value {
    fn from(config: PluginConfig) -> Self {
        Self::Object(config.raw)
    }
}
