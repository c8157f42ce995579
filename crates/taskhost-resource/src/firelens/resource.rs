//! The firelens resource: directory layout, creation steps, and persistence.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use taskhost_common::config::AgentConfig;
use taskhost_common::constants::{
    CONFIG_DIR_NAME, EXTERNAL_CONFIG_FILE, FLUENT_CONFIG_FILE, SOCKET_DIR_NAME,
};
use taskhost_common::error::{Result, ResultExt, TaskhostError};
use taskhost_common::status::ResourceStatus;
use taskhost_common::types::TaskArn;

use super::config::{LogRouterConfig, TaskMetadata};
use super::options::parse_options;
use super::{ExternalConfig, ExternalConfigType, FirelensConfigType, RESOURCE_NAME};
use crate::fs::{AtomicConfigWriter, Filesystem, provisioning};
use crate::resource::{ResourceFields, TaskResource};
use crate::storage::fetch::ExternalConfigFetcher;
use crate::tracker::{StatusFields, StatusTracker};
use crate::transition::TransitionTable;

/// Inputs to [`FirelensResource::new`], taken from the task definition and
/// the host configuration.
#[derive(Debug, Clone, Default)]
pub struct FirelensParams {
    /// Cluster the task runs in.
    pub cluster: String,
    /// ARN of the owning task.
    pub task_arn: String,
    /// Task definition family and revision.
    pub task_definition: String,
    /// Host instance ID.
    pub instance_id: String,
    /// Agent data directory.
    pub data_dir: PathBuf,
    /// Router type, `fluentd` or `fluentbit`. Validated on create.
    pub config_type: String,
    /// Region the task runs in.
    pub region: String,
    /// Task network mode.
    pub network_mode: String,
    /// Firelens options of the router container.
    pub options: HashMap<String, String>,
    /// Log options of every container routing through firelens.
    pub container_log_options: BTreeMap<String, BTreeMap<String, String>>,
    /// ID of the task's execution role credentials.
    pub execution_credentials_id: String,
}

impl FirelensParams {
    /// Creates params for `task_arn` with the host-level fields of `config`.
    #[must_use]
    pub fn from_agent_config(config: &AgentConfig, task_arn: impl Into<String>) -> Self {
        Self {
            cluster: config.cluster.clone(),
            task_arn: task_arn.into(),
            instance_id: config.instance_id.clone(),
            data_dir: config.data_dir.clone(),
            region: config.region.clone(),
            ..Self::default()
        }
    }
}

/// Persisted form of a [`FirelensResource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirelensState {
    /// Cluster the task runs in.
    pub cluster: String,
    /// ARN of the owning task.
    pub task_arn: TaskArn,
    /// Task definition family and revision.
    pub task_definition: String,
    /// Host instance ID.
    pub instance_id: String,
    /// Resource directory.
    pub resource_dir: PathBuf,
    /// Router type as given.
    pub config_type: String,
    /// Region the task runs in.
    pub region: String,
    /// Task network mode.
    pub network_mode: String,
    /// Whether records are enriched with task metadata.
    pub ecs_metadata_enabled: bool,
    /// Per-container log options.
    pub container_log_options: BTreeMap<String, BTreeMap<String, String>>,
    /// ID of the task's execution role credentials.
    pub execution_credentials_id: String,
    /// External configuration fragment, if any.
    pub external_config: Option<ExternalConfig>,
    /// Status triple and creation time.
    pub status: StatusFields,
    /// Reason the resource failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<String>,
}

/// Configuration bundle of a task's log router container.
pub struct FirelensResource {
    cluster: String,
    task_arn: TaskArn,
    task_definition: String,
    instance_id: String,
    resource_dir: PathBuf,
    config_type: String,
    region: String,
    network_mode: String,
    ecs_metadata_enabled: bool,
    container_log_options: BTreeMap<String, BTreeMap<String, String>>,
    execution_credentials_id: String,
    external_config: Option<ExternalConfig>,

    tracker: StatusTracker,
    filesystem: Arc<dyn Filesystem>,
    writer: AtomicConfigWriter,
    fetcher: ExternalConfigFetcher,
    transitions: TransitionTable<Self>,
}

impl FirelensResource {
    /// Creates the resource for a task. Nothing is written to disk.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the firelens options are invalid or
    /// the task ARN does not end in a task ID.
    pub fn new(params: FirelensParams, fields: &ResourceFields) -> Result<Self> {
        let options = parse_options(&params.options).context("error parsing firelens options")?;
        let task_arn = TaskArn::new(params.task_arn);
        if matches!(task_arn.task_id(), "" | "." | "..") {
            return Err(TaskhostError::Configuration {
                message: format!("task arn {task_arn} has no task id"),
            });
        }
        let resource_dir = params
            .data_dir
            .join(RESOURCE_NAME)
            .join(task_arn.task_id());

        let state = FirelensState {
            cluster: params.cluster,
            task_arn,
            task_definition: params.task_definition,
            instance_id: params.instance_id,
            resource_dir,
            config_type: params.config_type,
            region: params.region,
            network_mode: params.network_mode,
            ecs_metadata_enabled: options.ecs_metadata_enabled,
            container_log_options: params.container_log_options,
            execution_credentials_id: params.execution_credentials_id,
            external_config: options.external_config,
            status: StatusFields::default(),
            terminal_reason: None,
        };
        Ok(Self::from_state(state, fields))
    }

    /// Rebuilds a resource from persisted state and re-attaches `fields`.
    #[must_use]
    pub fn restore(state: FirelensState, fields: &ResourceFields) -> Self {
        let resource = Self::from_state(state, fields);
        tracing::debug!(
            task_arn = %resource.task_arn,
            known = %resource.tracker.known_status(),
            "restored firelens resource"
        );
        resource
    }

    fn from_state(state: FirelensState, fields: &ResourceFields) -> Self {
        let tracker =
            StatusTracker::with_fields(RESOURCE_NAME, state.task_arn.as_str(), state.status);
        if let Some(reason) = state.terminal_reason {
            let _ = tracker.set_terminal_reason(reason);
        }
        let (writer, fetcher) = collaborators(&state.resource_dir, fields);
        Self {
            cluster: state.cluster,
            task_arn: state.task_arn,
            task_definition: state.task_definition,
            instance_id: state.instance_id,
            resource_dir: state.resource_dir,
            config_type: state.config_type,
            region: state.region,
            network_mode: state.network_mode,
            ecs_metadata_enabled: state.ecs_metadata_enabled,
            container_log_options: state.container_log_options,
            execution_credentials_id: state.execution_credentials_id,
            external_config: state.external_config,
            tracker,
            filesystem: Arc::clone(&fields.filesystem),
            writer,
            fetcher,
            transitions: Self::transition_table(),
        }
    }

    /// Re-attaches the collaborators and rebuilds the transition table.
    ///
    /// Called after status fields were restored from somewhere other than
    /// [`FirelensResource::restore`].
    pub fn initialize(&mut self, fields: &ResourceFields) {
        let (writer, fetcher) = collaborators(&self.resource_dir, fields);
        self.filesystem = Arc::clone(&fields.filesystem);
        self.writer = writer;
        self.fetcher = fetcher;
        self.transitions = Self::transition_table();
    }

    fn transition_table() -> TransitionTable<Self> {
        TransitionTable::new().with(ResourceStatus::Created, Self::create)
    }

    /// Captures the persistable state of the resource.
    #[must_use]
    pub fn snapshot(&self) -> FirelensState {
        FirelensState {
            cluster: self.cluster.clone(),
            task_arn: self.task_arn.clone(),
            task_definition: self.task_definition.clone(),
            instance_id: self.instance_id.clone(),
            resource_dir: self.resource_dir.clone(),
            config_type: self.config_type.clone(),
            region: self.region.clone(),
            network_mode: self.network_mode.clone(),
            ecs_metadata_enabled: self.ecs_metadata_enabled,
            container_log_options: self.container_log_options.clone(),
            execution_credentials_id: self.execution_credentials_id.clone(),
            external_config: self.external_config.clone(),
            status: self.tracker.snapshot(),
            terminal_reason: self.tracker.terminal_reason().map(str::to_string),
        }
    }

    /// Provisions the resource directory and writes the router configuration.
    ///
    /// Steps, each aborting on failure: validate the router type, create
    /// `config/` and `socket/`, fetch the external configuration when it
    /// lives in S3, render `config/fluent.conf`. The first failure is
    /// recorded as the terminal reason. Directories created before a
    /// failure are left in place for [`FirelensResource::cleanup`].
    ///
    /// # Errors
    ///
    /// Returns the failing step's error wrapped with the step it happened in.
    pub fn create(&self) -> Result<()> {
        let result = self.provision();
        if let Err(e) = &result {
            let _ = self.tracker.set_terminal_reason(e.to_string());
            tracing::error!(task_arn = %self.task_arn, error = %e, "failed to create firelens resource");
        }
        result
    }

    fn provision(&self) -> Result<()> {
        let config_type: FirelensConfigType = self.config_type.parse()?;

        self.create_directories().with_context(|| {
            format!(
                "unable to initialize resource directory {}",
                self.resource_dir.display()
            )
        })?;

        if let Some(ExternalConfig {
            kind: ExternalConfigType::S3,
            value,
        }) = &self.external_config
        {
            self.fetcher
                .fetch(
                    &self.execution_credentials_id,
                    value,
                    &self.region,
                    &self.config_dir().join(EXTERNAL_CONFIG_FILE),
                )
                .context("unable to download firelens s3 config file")?;
        }

        self.generate_config_file(config_type)
            .context("unable to generate firelens config file")
    }

    fn create_directories(&self) -> Result<()> {
        let config_dir = self.config_dir();
        self.filesystem
            .create_dir_all(&config_dir)
            .map_err(|e| provisioning("unable to create config directory", &config_dir, e))?;
        let socket_dir = self.resource_dir.join(SOCKET_DIR_NAME);
        self.filesystem
            .create_dir_all(&socket_dir)
            .map_err(|e| provisioning("unable to create socket directory", &socket_dir, e))?;
        Ok(())
    }

    fn generate_config_file(&self, config_type: FirelensConfigType) -> Result<()> {
        let config = self.router_config(config_type)?;
        let dest = self.config_dir().join(FLUENT_CONFIG_FILE);
        self.writer.write(&dest, |w| {
            config
                .write(config_type, w)
                .map_err(|e| provisioning("unable to write", &dest, e))
        })?;
        tracing::info!(task_arn = %self.task_arn, path = %dest.display(), "generated firelens config file");
        Ok(())
    }

    /// Builds the router configuration for this task.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a container's log options do not
    /// name an output plugin.
    pub fn router_config(&self, config_type: FirelensConfigType) -> Result<LogRouterConfig> {
        let mut config = LogRouterConfig::new(&self.network_mode);
        match &self.external_config {
            Some(ExternalConfig {
                kind: ExternalConfigType::S3,
                ..
            }) => config = config.with_include(config_type.external_config_mount()),
            Some(ExternalConfig {
                kind: ExternalConfigType::File,
                value,
            }) => config = config.with_include(value.clone()),
            None => {}
        }
        if self.ecs_metadata_enabled {
            config = config.with_metadata(TaskMetadata {
                instance_id: self.instance_id.clone(),
                cluster: self.cluster.clone(),
                task_arn: self.task_arn.to_string(),
                task_definition: self.task_definition.clone(),
            });
        }
        config.with_outputs(&self.container_log_options)
    }

    fn config_dir(&self) -> PathBuf {
        self.resource_dir.join(CONFIG_DIR_NAME)
    }

    /// Returns the cluster the task runs in.
    #[must_use]
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Returns the owning task's ARN.
    #[must_use]
    pub const fn task_arn(&self) -> &TaskArn {
        &self.task_arn
    }

    /// Returns the task definition.
    #[must_use]
    pub fn task_definition(&self) -> &str {
        &self.task_definition
    }

    /// Returns the host instance ID.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Returns `<dataDir>/firelens/<taskID>`.
    #[must_use]
    pub fn resource_dir(&self) -> &Path {
        &self.resource_dir
    }

    /// Returns the router type as given.
    #[must_use]
    pub fn config_type(&self) -> &str {
        &self.config_type
    }

    /// Returns whether records are enriched with task metadata.
    #[must_use]
    pub const fn ecs_metadata_enabled(&self) -> bool {
        self.ecs_metadata_enabled
    }

    /// Returns the per-container log options.
    #[must_use]
    pub const fn container_log_options(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.container_log_options
    }

    /// Returns the region the task runs in.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns the execution credentials ID.
    #[must_use]
    pub fn execution_credentials_id(&self) -> &str {
        &self.execution_credentials_id
    }

    /// Returns where the external configuration comes from, if any.
    #[must_use]
    pub fn external_config_type(&self) -> Option<ExternalConfigType> {
        self.external_config.as_ref().map(|c| c.kind)
    }

    /// Returns the external configuration's ARN or path, if any.
    #[must_use]
    pub fn external_config_value(&self) -> Option<&str> {
        self.external_config.as_ref().map(|c| c.value.as_str())
    }

    /// Returns the task network mode.
    #[must_use]
    pub fn network_mode(&self) -> &str {
        &self.network_mode
    }
}

impl TaskResource for FirelensResource {
    fn name(&self) -> &'static str {
        RESOURCE_NAME
    }

    fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    fn apply_transition(&self, target: ResourceStatus) -> Result<()> {
        self.transitions.apply(self, &self.tracker, target)
    }

    fn cleanup(&self) -> Result<()> {
        self.filesystem.remove_dir_all(&self.resource_dir).map_err(|e| {
            provisioning(
                "unable to remove firelens resource directory",
                &self.resource_dir,
                e,
            )
        })?;
        tracing::info!(
            task_arn = %self.task_arn,
            path = %self.resource_dir.display(),
            "removed firelens resource directory"
        );
        Ok(())
    }
}

fn collaborators(
    resource_dir: &Path,
    fields: &ResourceFields,
) -> (AtomicConfigWriter, ExternalConfigFetcher) {
    let writer = AtomicConfigWriter::new(Arc::clone(&fields.filesystem), resource_dir);
    let fetcher = ExternalConfigFetcher::new(
        Arc::clone(&fields.credentials),
        Arc::clone(&fields.object_store),
        writer.clone(),
    );
    (writer, fetcher)
}

impl std::fmt::Debug for FirelensResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirelensResource")
            .field("task_arn", &self.task_arn)
            .field("config_type", &self.config_type)
            .field("resource_dir", &self.resource_dir)
            .field("status", &self.tracker.snapshot())
            .finish_non_exhaustive()
    }
}
