//! The capability every task resource type provides and the closed set of
//! resource variants a task can own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskhost_common::config::AgentConfig;
use taskhost_common::error::Result;
use taskhost_common::status::ResourceStatus;

use crate::credentials::CredentialsManager;
use crate::firelens::{FirelensResource, FirelensState};
use crate::fs::{Filesystem, OsFilesystem};
use crate::storage::client::{ObjectStoreClientFactory, S3ClientFactory};
use crate::tracker::StatusTracker;

/// A container that must reach `satisfied_status` before the resource can
/// reach the dependent status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDependency {
    /// Name of the container depended upon.
    pub container_name: String,
    /// Container status that satisfies the dependency.
    pub satisfied_status: String,
}

/// Collaborators handed to a resource at construction and after restore.
///
/// None of these are persisted with the resource.
#[derive(Clone)]
pub struct ResourceFields {
    /// Task credentials lookup.
    pub credentials: Arc<dyn CredentialsManager>,
    /// Filesystem the resource provisions on.
    pub filesystem: Arc<dyn Filesystem>,
    /// Factory for object storage clients.
    pub object_store: Arc<dyn ObjectStoreClientFactory>,
}

impl ResourceFields {
    /// Creates the production collaborators for `config`.
    #[must_use]
    pub fn from_config(config: &AgentConfig, credentials: Arc<dyn CredentialsManager>) -> Self {
        Self {
            credentials,
            filesystem: Arc::new(OsFilesystem),
            object_store: Arc::new(S3ClientFactory::from_config(config)),
        }
    }
}

impl std::fmt::Debug for ResourceFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFields").finish_non_exhaustive()
    }
}

/// Operations the task engine drives on every resource type.
///
/// Status bookkeeping is provided on top of [`TaskResource::tracker`].
pub trait TaskResource: Send + Sync {
    /// Returns the resource type name.
    fn name(&self) -> &'static str;

    /// Returns the status tracker of this instance.
    fn tracker(&self) -> &StatusTracker;

    /// Moves the resource to `target` using its transition table.
    ///
    /// # Errors
    ///
    /// Returns an error if no transition to `target` exists or the
    /// transition itself fails.
    fn apply_transition(&self, target: ResourceStatus) -> Result<()>;

    /// Tears the resource down.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource's artifacts cannot be removed.
    fn cleanup(&self) -> Result<()>;

    /// Returns whether the resource must wait for the task network.
    fn depends_on_task_network(&self) -> bool {
        false
    }

    /// Returns the containers that must progress before `dependent` is reached.
    fn container_dependencies(&self, _dependent: ResourceStatus) -> Vec<ContainerDependency> {
        Vec::new()
    }

    /// Sets the desired status.
    fn set_desired_status(&self, status: ResourceStatus) {
        self.tracker().set_desired_status(status);
    }

    /// Returns the desired status.
    fn desired_status(&self) -> ResourceStatus {
        self.tracker().desired_status()
    }

    /// Sets the known status and releases a completed applied status.
    fn set_known_status(&self, status: ResourceStatus) {
        self.tracker().set_known_status(status);
    }

    /// Returns the known status.
    fn known_status(&self) -> ResourceStatus {
        self.tracker().known_status()
    }

    /// Claims `status` as the transition in flight; `false` if one already is.
    fn set_applied_status(&self, status: ResourceStatus) -> bool {
        self.tracker().set_applied_status(status)
    }

    /// Returns the status of the transition in flight.
    fn applied_status(&self) -> ResourceStatus {
        self.tracker().applied_status()
    }

    /// Returns the status after the known one.
    fn next_known_state(&self) -> ResourceStatus {
        self.tracker().next_known_state()
    }

    /// Returns whether the desired status is terminal.
    fn desired_terminal(&self) -> bool {
        self.tracker().desired_terminal()
    }

    /// Returns whether the resource has been created.
    fn known_created(&self) -> bool {
        self.tracker().known_created()
    }

    /// Returns the terminal status.
    fn terminal_status(&self) -> ResourceStatus {
        ResourceStatus::TERMINAL
    }

    /// Returns the steady status.
    fn steady_state(&self) -> ResourceStatus {
        ResourceStatus::STEADY_STATE
    }

    /// Returns the reason the resource failed, if it did.
    fn terminal_reason(&self) -> Option<&str> {
        self.tracker().terminal_reason()
    }

    /// Records when the resource was first observed as created.
    fn set_created_at(&self, created_at: DateTime<Utc>) {
        self.tracker().set_created_at(created_at);
    }

    /// Returns when the resource was first observed as created.
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.tracker().created_at()
    }

    /// Returns the display form of `status`.
    fn status_string(&self, status: ResourceStatus) -> &'static str {
        status.as_str()
    }
}

/// Every resource type a task can own.
#[derive(Debug)]
pub enum Resource {
    /// Log router configuration bundle.
    Firelens(FirelensResource),
}

impl Resource {
    /// Returns the resource as its capability trait.
    #[must_use]
    pub fn as_task_resource(&self) -> &dyn TaskResource {
        match self {
            Self::Firelens(firelens) => firelens,
        }
    }

    /// Captures the persistable state of the resource.
    #[must_use]
    pub fn snapshot(&self) -> ResourceState {
        match self {
            Self::Firelens(firelens) => ResourceState::Firelens(firelens.snapshot()),
        }
    }

    /// Rebuilds a resource from persisted state and re-attaches `fields`.
    #[must_use]
    pub fn restore(state: ResourceState, fields: &ResourceFields) -> Self {
        match state {
            ResourceState::Firelens(state) => {
                Self::Firelens(FirelensResource::restore(state, fields))
            }
        }
    }
}

/// Persisted form of a [`Resource`], tagged by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceState {
    /// Persisted [`FirelensResource`].
    Firelens(FirelensState),
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::credentials::InMemoryCredentials;
    use crate::firelens::FirelensParams;

    fn firelens(data_dir: &std::path::Path, fields: &ResourceFields) -> Resource {
        let mut params = FirelensParams::from_agent_config(
            &AgentConfig {
                data_dir: data_dir.to_path_buf(),
                cluster: "prod".into(),
                region: "us-west-2".into(),
                ..AgentConfig::default()
            },
            "arn:aws:ecs:us-west-2:1:task/prod/abc",
        );
        params.config_type = "fluentbit".into();
        params.network_mode = "bridge".into();
        params.container_log_options = BTreeMap::from([(
            "app".to_string(),
            BTreeMap::from([("Name".to_string(), "stdout".to_string())]),
        )]);
        Resource::Firelens(FirelensResource::new(params, fields).expect("new"))
    }

    #[test]
    fn provided_helpers_follow_tracker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fields = ResourceFields::from_config(
            &AgentConfig::default(),
            Arc::new(InMemoryCredentials::new()),
        );
        let resource = firelens(dir.path(), &fields);
        let resource = resource.as_task_resource();

        assert_eq!(resource.next_known_state(), ResourceStatus::Created);
        assert_eq!(resource.steady_state(), ResourceStatus::Created);
        assert_eq!(resource.terminal_status(), ResourceStatus::Removed);
        assert!(!resource.depends_on_task_network());
        assert!(resource.container_dependencies(ResourceStatus::Created).is_empty());

        assert!(resource.set_applied_status(ResourceStatus::Created));
        assert!(!resource.set_applied_status(ResourceStatus::Created));
        resource.set_known_status(ResourceStatus::Created);
        assert_eq!(resource.applied_status(), ResourceStatus::None);
        assert!(resource.known_created());
        assert_eq!(resource.status_string(resource.known_status()), "CREATED");

        resource.set_desired_status(ResourceStatus::Removed);
        assert!(resource.desired_terminal());
    }

    #[test]
    fn state_round_trips_through_tagged_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fields = ResourceFields::from_config(
            &AgentConfig::default(),
            Arc::new(InMemoryCredentials::new()),
        );
        let resource = firelens(dir.path(), &fields);
        resource.as_task_resource().set_known_status(ResourceStatus::Created);

        let json = serde_json::to_value(resource.snapshot()).expect("serialize");
        assert_eq!(json["type"], "firelens");
        assert_eq!(json["status"]["known"], "CREATED");

        let state: ResourceState = serde_json::from_value(json).expect("deserialize");
        let restored = Resource::restore(state, &fields);
        assert_eq!(restored.as_task_resource().known_status(), ResourceStatus::Created);
        assert_eq!(restored.as_task_resource().name(), "firelens");
    }
}
