//! Agent configuration model.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskhostError};

/// Host-level settings consumed when building task resources and the
/// network namespace manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base directory for per-task resource directories.
    pub data_dir: PathBuf,
    /// Directory holding the CNI plugin executables.
    pub cni_plugins_path: PathBuf,
    /// Log level handed to CNI plugins on every invocation.
    pub cni_log_level: String,
    /// Object storage endpoint override, e.g. for S3-compatible stores.
    pub s3_endpoint: Option<String>,
    /// Cluster the host is registered to.
    pub cluster: String,
    /// Identifier of the host instance.
    pub instance_id: String,
    /// Region the host runs in.
    pub region: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(crate::constants::DEFAULT_DATA_DIR),
            cni_plugins_path: PathBuf::from(crate::constants::DEFAULT_CNI_PLUGINS_PATH),
            cni_log_level: crate::constants::DEFAULT_CNI_LOG_LEVEL.to_string(),
            s3_endpoint: None,
            cluster: "default".to_string(),
            instance_id: String::new(),
            region: String::new(),
        }
    }
}

impl AgentConfig {
    /// Loads a configuration from a JSON file. Missing fields take their
    /// default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TaskhostError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), data_dir = %config.data_dir.display(), "loaded agent config");
        Ok(config)
    }
}
