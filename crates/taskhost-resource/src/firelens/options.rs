//! Firelens options declared on the log router container.

use std::collections::HashMap;

use taskhost_common::error::{Result, TaskhostError};

use super::{ExternalConfig, ExternalConfigType};

/// Option toggling the ECS metadata filter.
pub const ECS_LOG_METADATA_OPTION: &str = "enable-ecs-log-metadata";
/// Option naming the source of an external configuration fragment.
pub const CONFIG_FILE_TYPE_OPTION: &str = "config-file-type";
/// Option carrying the S3 ARN or path of the external configuration fragment.
pub const CONFIG_FILE_VALUE_OPTION: &str = "config-file-value";

/// Parsed firelens options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirelensOptions {
    /// Whether log records are enriched with task metadata.
    pub ecs_metadata_enabled: bool,
    /// External configuration fragment to include, if any.
    pub external_config: Option<ExternalConfig>,
}

impl Default for FirelensOptions {
    fn default() -> Self {
        Self {
            ecs_metadata_enabled: true,
            external_config: None,
        }
    }
}

/// Parses the firelens options map.
///
/// Metadata enrichment defaults to enabled; an unparsable value is ignored
/// with a warning.
///
/// # Errors
///
/// Returns [`TaskhostError::Configuration`] if `config-file-type` is neither
/// `s3` nor `file`, or is given without `config-file-value`.
pub fn parse_options(options: &HashMap<String, String>) -> Result<FirelensOptions> {
    let mut parsed = FirelensOptions::default();

    if let Some(value) = options.get(ECS_LOG_METADATA_OPTION) {
        match parse_bool(value) {
            Some(enabled) => parsed.ecs_metadata_enabled = enabled,
            None => tracing::warn!(
                option = ECS_LOG_METADATA_OPTION,
                value = %value,
                "invalid value for firelens container option, ignoring it"
            ),
        }
    }

    if let Some(kind) = options.get(CONFIG_FILE_TYPE_OPTION) {
        let kind = match kind.as_str() {
            "s3" => ExternalConfigType::S3,
            "file" => ExternalConfigType::File,
            other => {
                return Err(TaskhostError::Configuration {
                    message: format!(
                        "invalid value {other} is specified for option {CONFIG_FILE_TYPE_OPTION}"
                    ),
                });
            }
        };
        let Some(value) = options.get(CONFIG_FILE_VALUE_OPTION) else {
            return Err(TaskhostError::Configuration {
                message: format!(
                    "option {CONFIG_FILE_TYPE_OPTION} is specified but \
                     {CONFIG_FILE_VALUE_OPTION} is not specified"
                ),
            });
        };
        parsed.external_config = Some(ExternalConfig {
            kind,
            value: value.clone(),
        });
    }

    Ok(parsed)
}

/// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
