//! Plugin executable invocation.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use taskhost_common::error::{Result, TaskhostError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Output from a plugin invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the plugin.
    pub stdout: String,
    /// Standard error from the plugin.
    pub stderr: String,
    /// Exit code returned by the plugin, `-1` if killed by a signal.
    pub exit_code: i32,
}

impl ExecOutput {
    /// Returns whether the plugin exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs plugin executables.
///
/// Dropping the future returned by [`PluginExecutor::run`] must stop the
/// plugin.
#[async_trait]
pub trait PluginExecutor: Send + Sync {
    /// Returns whether an executable file exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Runs `path` with `args` and additional `env`, feeding `stdin` if given.
    ///
    /// A non-zero exit is not an error here.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::NetworkPlugin`] if the process cannot be
    /// started or its output cannot be collected.
    async fn run(
        &self,
        path: &Path,
        args: &[&str],
        env: &[(String, String)],
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput>;
}

/// [`PluginExecutor`] spawning child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl PluginExecutor for ProcessExecutor {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    async fn run(
        &self,
        path: &Path,
        args: &[&str],
        env: &[(String, String)],
        stdin: Option<&[u8]>,
    ) -> Result<ExecOutput> {
        let failed = |message: String| TaskhostError::NetworkPlugin {
            plugin: path.display().to_string(),
            message,
        };

        let mut child = Command::new(path)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("unable to execute: {e}")))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)
                .await
                .map_err(|e| failed(format!("unable to write stdin: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| failed(format!("unable to collect output: {e}")))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}
