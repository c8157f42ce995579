//! System-wide constants, fixed file names, and default paths.

use std::time::Duration;

/// Default base directory for agent data.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/ecs/data";

/// Default directory holding the CNI plugin executables.
pub const DEFAULT_CNI_PLUGINS_PATH: &str = "/amazon-ecs-cni-plugins";

/// Name of the sub-directory holding a resource's configuration files.
pub const CONFIG_DIR_NAME: &str = "config";

/// Name of the sub-directory mounted for the log router's unix socket.
pub const SOCKET_DIR_NAME: &str = "socket";

/// File name of the rendered log router configuration.
pub const FLUENT_CONFIG_FILE: &str = "fluent.conf";

/// File name of a configuration fragment fetched from object storage.
pub const EXTERNAL_CONFIG_FILE: &str = "external.conf";

/// Prefix of the staging file used while writing a configuration file.
pub const TEMP_CONFIG_FILE_PREFIX: &str = "temp_config_file";

/// Permission bits applied to generated configuration files.
pub const CONFIG_FILE_MODE: u32 = 0o644;

/// Deadline for fetching an external configuration file from object storage.
pub const S3_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// CNI specification version sent to plugins that do not declare one.
pub const CNI_SPEC_VERSION: &str = "0.3.1";

/// Probe argument that makes a plugin print its version as JSON.
pub const CNI_VERSION_ARG: &str = "--version";

/// Probe argument that makes a plugin print its capabilities as JSON.
pub const CNI_CAPABILITIES_ARG: &str = "--capabilities";

/// Default log level handed to CNI plugins.
pub const DEFAULT_CNI_LOG_LEVEL: &str = "info";
