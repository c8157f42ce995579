//! Plugin version and capability probe output.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Output of a plugin's version probe.
///
/// Linux plugins report `dirty`, Windows plugins report `built`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginVersion {
    /// Release version.
    pub version: String,
    /// Short hash of the commit the plugin was built from.
    pub git_short_hash: String,
    /// Whether the build tree had uncommitted changes.
    #[serde(default)]
    pub dirty: bool,
    /// Build timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built: Option<String>,
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dirty {
            f.write_str("*")?;
        }
        write!(f, "{}-{}", self.git_short_hash, self.version)
    }
}

/// Output of a plugin's capability probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCapabilities {
    /// Capabilities the plugin supports.
    #[serde(default)]
    pub capabilities: Vec<String>,
}
