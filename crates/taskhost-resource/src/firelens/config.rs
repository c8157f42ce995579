//! Log router configuration model and renderers.
//!
//! One [`LogRouterConfig`] renders either a fluentd or a fluent-bit file.
//! Sections are emitted in a fixed order: inputs, the external include,
//! the metadata filter, then one output per container.

use std::collections::BTreeMap;
use std::io::{self, Write};

use taskhost_common::error::{Result, TaskhostError};

use super::{FirelensConfigType, SOCKET_PATH};

/// TCP port of the forward input.
pub const FORWARD_PORT: u16 = 24224;
/// TCP port of the fluent-bit health check input.
pub const HEALTHCHECK_PORT: u16 = 8877;
/// Tag of records arriving on the health check input.
pub const HEALTHCHECK_TAG: &str = "firelens-healthcheck";
/// Log option naming a container's output plugin.
pub const OUTPUT_NAME_OPTION: &str = "Name";

const INDENT: &str = "    ";

/// Task metadata attached to every record when enrichment is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetadata {
    /// Host instance ID.
    pub instance_id: String,
    /// Cluster name.
    pub cluster: String,
    /// Task ARN.
    pub task_arn: String,
    /// Task definition family and revision.
    pub task_definition: String,
}

impl TaskMetadata {
    fn records(&self) -> [(&'static str, &str); 4] {
        [
            ("ec2_instance_id", &self.instance_id),
            ("ecs_cluster", &self.cluster),
            ("ecs_task_arn", &self.task_arn),
            ("ecs_task_definition", &self.task_definition),
        ]
    }
}

/// Output section routing one container's records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Container whose records are matched.
    pub container: String,
    /// Output plugin name.
    pub plugin: String,
    /// Remaining plugin options, sorted by key.
    pub options: BTreeMap<String, String>,
}

/// A renderable log router configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogRouterConfig {
    forward_bind: Option<&'static str>,
    include: Option<String>,
    metadata: Option<TaskMetadata>,
    outputs: Vec<Output>,
}

impl LogRouterConfig {
    /// Creates a configuration with the inputs suited to `network_mode`.
    ///
    /// `bridge` listens for forwarded records on all addresses; `awsvpc` and
    /// `host` on loopback only. Other modes get no TCP forward input.
    #[must_use]
    pub fn new(network_mode: &str) -> Self {
        let forward_bind = match network_mode {
            "bridge" => Some("0.0.0.0"),
            "awsvpc" | "host" => Some("127.0.0.1"),
            _ => None,
        };
        Self {
            forward_bind,
            ..Self::default()
        }
    }

    /// Includes the configuration fragment at `path`.
    #[must_use]
    pub fn with_include(mut self, path: impl Into<String>) -> Self {
        self.include = Some(path.into());
        self
    }

    /// Enriches every record with `metadata`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Adds one output per container from its log options.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::Configuration`] if a container's options
    /// do not name an output plugin.
    pub fn with_outputs(
        mut self,
        container_options: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<Self> {
        for (container, options) in container_options {
            let mut options = options.clone();
            let Some(plugin) = options.remove(OUTPUT_NAME_OPTION) else {
                return Err(TaskhostError::Configuration {
                    message: format!(
                        "log options of container {container} do not specify {OUTPUT_NAME_OPTION}"
                    ),
                });
            };
            self.outputs.push(Output {
                container: container.clone(),
                plugin,
                options,
            });
        }
        Ok(self)
    }

    /// Returns the configured outputs.
    #[must_use]
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Renders the configuration for `kind` into `w`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `w` fails.
    pub fn write(&self, kind: FirelensConfigType, w: &mut dyn Write) -> io::Result<()> {
        match kind {
            FirelensConfigType::Fluentd => self.write_fluentd(w),
            FirelensConfigType::Fluentbit => self.write_fluentbit(w),
        }
    }

    /// Renders a fluentd configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `w` fails.
    pub fn write_fluentd(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "<source>")?;
        writeln!(w, "{INDENT}@type unix")?;
        writeln!(w, "{INDENT}path {SOCKET_PATH}")?;
        writeln!(w, "</source>")?;

        if let Some(bind) = self.forward_bind {
            writeln!(w)?;
            writeln!(w, "<source>")?;
            writeln!(w, "{INDENT}@type forward")?;
            writeln!(w, "{INDENT}bind {bind}")?;
            writeln!(w, "{INDENT}port {FORWARD_PORT}")?;
            writeln!(w, "</source>")?;
        }

        if let Some(include) = &self.include {
            writeln!(w)?;
            writeln!(w, "@include {include}")?;
        }

        if let Some(metadata) = &self.metadata {
            writeln!(w)?;
            writeln!(w, "<filter **>")?;
            writeln!(w, "{INDENT}@type record_transformer")?;
            writeln!(w, "{INDENT}<record>")?;
            for (key, value) in metadata.records() {
                writeln!(w, "{INDENT}{INDENT}{key} {value}")?;
            }
            writeln!(w, "{INDENT}</record>")?;
            writeln!(w, "</filter>")?;
        }

        for output in &self.outputs {
            writeln!(w)?;
            writeln!(w, "<match {}-firelens**>", output.container)?;
            writeln!(w, "{INDENT}@type {}", output.plugin)?;
            for (key, value) in &output.options {
                writeln!(w, "{INDENT}{key} {value}")?;
            }
            writeln!(w, "</match>")?;
        }
        Ok(())
    }

    /// Renders a fluent-bit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `w` fails.
    pub fn write_fluentbit(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "[INPUT]")?;
        writeln!(w, "{INDENT}Name forward")?;
        writeln!(w, "{INDENT}unix_path {SOCKET_PATH}")?;

        if let Some(bind) = self.forward_bind {
            writeln!(w)?;
            writeln!(w, "[INPUT]")?;
            writeln!(w, "{INDENT}Name forward")?;
            writeln!(w, "{INDENT}Listen {bind}")?;
            writeln!(w, "{INDENT}Port {FORWARD_PORT}")?;
        }

        writeln!(w)?;
        writeln!(w, "[INPUT]")?;
        writeln!(w, "{INDENT}Name tcp")?;
        writeln!(w, "{INDENT}Tag {HEALTHCHECK_TAG}")?;
        writeln!(w, "{INDENT}Listen 127.0.0.1")?;
        writeln!(w, "{INDENT}Port {HEALTHCHECK_PORT}")?;

        if let Some(include) = &self.include {
            writeln!(w)?;
            writeln!(w, "@INCLUDE {include}")?;
        }

        if let Some(metadata) = &self.metadata {
            writeln!(w)?;
            writeln!(w, "[FILTER]")?;
            writeln!(w, "{INDENT}Name record_modifier")?;
            writeln!(w, "{INDENT}Match *")?;
            for (key, value) in metadata.records() {
                writeln!(w, "{INDENT}Record {key} {value}")?;
            }
        }

        writeln!(w)?;
        writeln!(w, "[OUTPUT]")?;
        writeln!(w, "{INDENT}Name null")?;
        writeln!(w, "{INDENT}Match {HEALTHCHECK_TAG}")?;

        for output in &self.outputs {
            writeln!(w)?;
            writeln!(w, "[OUTPUT]")?;
            writeln!(w, "{INDENT}Name {}", output.plugin)?;
            writeln!(w, "{INDENT}Match {}-firelens*", output.container)?;
            for (key, value) in &output.options {
                writeln!(w, "{INDENT}{key} {value}")?;
            }
        }
        Ok(())
    }
}
