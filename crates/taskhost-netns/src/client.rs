//! Deadline-bounded network namespace manager.
//!
//! Every operation runs its plugins one at a time. A single deadline,
//! fixed when the operation starts, bounds all of them; when it passes,
//! the in-flight plugin future is dropped, which kills the plugin process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskhost_common::config::AgentConfig;
use taskhost_common::constants::{CNI_CAPABILITIES_ARG, CNI_VERSION_ARG};
use taskhost_common::error::{Result, ResultExt, TaskhostError};
use tokio::time::Instant;

use crate::config::{NetworkConfig, NetworkEntry, PluginConfig};
use crate::exec::{ExecOutput, PluginExecutor, ProcessExecutor};
use crate::result::{AddResult, CniErrorResponse};
use crate::version::{PluginCapabilities, PluginVersion};

/// Log level variable read by the ECS plugins.
pub const ECS_CNI_LOG_LEVEL_ENV: &str = "ECS_CNI_LOGLEVEL";
/// Log level variable read by the VPC plugins.
pub const VPC_CNI_LOG_LEVEL_ENV: &str = "VPC_CNI_LOG_LEVEL";

/// Sets up and tears down container network namespaces.
#[async_trait]
pub trait NetworkNamespaceManager: Send + Sync {
    /// Adds every network of `config`, first to last.
    ///
    /// Returns the result of the first network, which carries the address
    /// assigned to the task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::Configuration`] if `config` has no networks
    /// and [`TaskhostError::NetworkPlugin`] if a plugin fails or `timeout`
    /// elapses. Networks added before the failure stay attached.
    async fn setup_ns(&self, config: &NetworkConfig, timeout: Duration) -> Result<AddResult>;

    /// Deletes every network of `config`, last to first, stopping at the
    /// first failure.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::NetworkPlugin`] if a plugin fails or
    /// `timeout` elapses.
    async fn cleanup_ns(&self, config: &NetworkConfig, timeout: Duration) -> Result<()>;

    /// Releases the addresses held for `config` by each network's IPAM plugin.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::NetworkPlugin`] if a plugin fails or
    /// `timeout` elapses.
    async fn release_ip_resource(&self, config: &NetworkConfig, timeout: Duration) -> Result<()>;

    /// Returns a plugin's version as `[*]<gitShortHash>-<version>`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::NetworkPlugin`] if the plugin is missing,
    /// fails, or prints malformed output.
    async fn version(&self, plugin: &str) -> Result<String>;

    /// Returns the capabilities a plugin supports.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::NetworkPlugin`] if the plugin is missing,
    /// fails, or prints malformed output.
    async fn capabilities(&self, plugin: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy)]
enum CniCommand {
    Add,
    Del,
}

impl CniCommand {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Del => "DEL",
        }
    }
}

/// [`NetworkNamespaceManager`] executing plugins from one directory.
#[derive(Clone)]
pub struct CniClient {
    plugins_path: PathBuf,
    log_level: String,
    executor: Arc<dyn PluginExecutor>,
}

impl CniClient {
    /// Creates a client running plugins from `plugins_path` as child processes.
    #[must_use]
    pub fn new(plugins_path: impl Into<PathBuf>, log_level: impl Into<String>) -> Self {
        Self {
            plugins_path: plugins_path.into(),
            log_level: log_level.into(),
            executor: Arc::new(ProcessExecutor),
        }
    }

    /// Creates a client from the host configuration.
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(&config.cni_plugins_path, &config.cni_log_level)
    }

    /// Replaces the executor plugins are run with.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn PluginExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Returns the path of the plugin named `name`.
    #[must_use]
    pub fn plugin_path(&self, name: &str) -> PathBuf {
        self.plugins_path.join(name)
    }

    fn log_env(&self) -> Vec<(String, String)> {
        vec![
            (ECS_CNI_LOG_LEVEL_ENV.to_string(), self.log_level.clone()),
            (VPC_CNI_LOG_LEVEL_ENV.to_string(), self.log_level.clone()),
        ]
    }

    fn runtime_env(
        &self,
        command: CniCommand,
        config: &NetworkConfig,
        entry: &NetworkEntry,
    ) -> Vec<(String, String)> {
        let mut env = vec![
            ("CNI_COMMAND".to_string(), command.as_str().to_string()),
            ("CNI_CONTAINERID".to_string(), config.container_id.to_string()),
            ("CNI_NETNS".to_string(), config.netns_path.display().to_string()),
            ("CNI_IFNAME".to_string(), entry.if_name.clone()),
            ("CNI_PATH".to_string(), self.plugins_path.display().to_string()),
        ];
        env.extend(self.log_env());
        env
    }

    /// Runs `plugin` for one network entry before `deadline`.
    async fn invoke(
        &self,
        command: CniCommand,
        config: &NetworkConfig,
        entry: &NetworkEntry,
        plugin: &PluginConfig,
        deadline: Instant,
    ) -> Result<ExecOutput> {
        let name = plugin.plugin_type();
        let path = self.plugin_path(name);
        let env = self.runtime_env(command, config, entry);
        let stdin = plugin.to_bytes()?;

        tracing::debug!(
            container_id = %config.container_id,
            network = plugin.name(),
            plugin = name,
            command = command.as_str(),
            "invoking network plugin"
        );

        let run = self.executor.run(&path, &[], &env, Some(&stdin));
        let output = tokio::time::timeout_at(deadline, run)
            .await
            .map_err(|_| TaskhostError::NetworkPlugin {
                plugin: name.to_string(),
                message: format!("{} timed out", command.as_str()),
            })??;
        check_exit(name, output)
    }

    /// Runs a probe against the plugin named `name` and returns its stdout.
    async fn probe(&self, name: &str, arg: &str) -> Result<String> {
        let path = self.plugin_path(name);
        if !self.executor.exists(&path).await {
            return Err(TaskhostError::NetworkPlugin {
                plugin: name.to_string(),
                message: format!("no plugin found at {}", path.display()),
            });
        }
        let output = self.executor.run(&path, &[arg], &self.log_env(), None).await?;
        Ok(check_exit(name, output)?.stdout)
    }

    async fn add(
        &self,
        config: &NetworkConfig,
        entry: &NetworkEntry,
        deadline: Instant,
    ) -> Result<ExecOutput> {
        self.invoke(CniCommand::Add, config, entry, &entry.plugin, deadline)
            .await
            .with_context(|| format!("add network {} failed", entry.plugin.name()))
    }

    fn deadline(timeout: Duration) -> Instant {
        Instant::now() + timeout
    }
}

/// Turns a non-zero exit into an error, decoding the plugin's error object
/// when it printed one.
fn check_exit(plugin: &str, output: ExecOutput) -> Result<ExecOutput> {
    if output.success() {
        return Ok(output);
    }
    let message = serde_json::from_str::<CniErrorResponse>(&output.stdout).map_or_else(
        |_| format!("exited with code {}: {}", output.exit_code, output.stderr.trim()),
        |response| response.to_string(),
    );
    Err(TaskhostError::NetworkPlugin {
        plugin: plugin.to_string(),
        message,
    })
}

fn malformed(plugin: &str, what: &str, output: &str, e: &serde_json::Error) -> TaskhostError {
    TaskhostError::NetworkPlugin {
        plugin: plugin.to_string(),
        message: format!("unable to parse {what} from {:?}: {e}", output.trim()),
    }
}

#[async_trait]
impl NetworkNamespaceManager for CniClient {
    async fn setup_ns(&self, config: &NetworkConfig, timeout: Duration) -> Result<AddResult> {
        let deadline = Self::deadline(timeout);
        let Some((first, rest)) = config.networks.split_first() else {
            return Err(TaskhostError::Configuration {
                message: format!("no networks to set up for container {}", config.container_id),
            });
        };

        let output = self.add(config, first, deadline).await?;
        let result: AddResult = serde_json::from_str(&output.stdout).map_err(|e| {
            malformed(first.plugin.plugin_type(), "ADD result", &output.stdout, &e)
        })?;
        for entry in rest {
            let _ = self.add(config, entry, deadline).await?;
        }

        tracing::info!(
            container_id = %config.container_id,
            networks = config.networks.len(),
            "set up container network namespace"
        );
        Ok(result)
    }

    async fn cleanup_ns(&self, config: &NetworkConfig, timeout: Duration) -> Result<()> {
        let deadline = Self::deadline(timeout);

        for entry in config.networks.iter().rev() {
            let _ = self
                .invoke(CniCommand::Del, config, entry, &entry.plugin, deadline)
                .await
                .context("delete network failed")?;
            tracing::debug!(
                container_id = %config.container_id,
                network = entry.plugin.name(),
                "deleted network"
            );
        }

        tracing::info!(container_id = %config.container_id, "cleaned up container network namespace");
        Ok(())
    }

    async fn release_ip_resource(&self, config: &NetworkConfig, timeout: Duration) -> Result<()> {
        let deadline = Self::deadline(timeout);

        for entry in &config.networks {
            let Some(ipam) = entry.plugin.ipam_config() else {
                continue;
            };
            let _ = self
                .invoke(CniCommand::Del, config, entry, &ipam, deadline)
                .await
                .with_context(|| format!("release ip from {} failed", ipam.plugin_type()))?;
            tracing::debug!(
                container_id = %config.container_id,
                plugin = ipam.plugin_type(),
                "released ip resource"
            );
        }
        Ok(())
    }

    async fn version(&self, plugin: &str) -> Result<String> {
        let stdout = self.probe(plugin, CNI_VERSION_ARG).await?;
        let version: PluginVersion = serde_json::from_str(&stdout)
            .map_err(|e| malformed(plugin, "version", &stdout, &e))?;
        Ok(version.to_string())
    }

    async fn capabilities(&self, plugin: &str) -> Result<Vec<String>> {
        let stdout = self.probe(plugin, CNI_CAPABILITIES_ARG).await?;
        let capabilities: PluginCapabilities = serde_json::from_str(&stdout)
            .map_err(|e| malformed(plugin, "capabilities", &stdout, &e))?;
        Ok(capabilities.capabilities)
    }
}

impl std::fmt::Debug for CniClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CniClient")
            .field("plugins_path", &self.plugins_path)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}
