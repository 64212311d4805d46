//! Shell plugin: runs SHELL activities in a subprocess.

use async_trait::async_trait;
use convoy_core::{ActivityKind, SHELL_CAPABILITY};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::PluginError;
use crate::traits::{Plugin, PluginOutcome, PluginRequest, Validation};

/// Runs `command arguments...` through `sh -c`.
///
/// Provides NO isolation.
#[derive(Debug, Clone)]
pub struct ShellPlugin {
    timeout_ms: u64,
    shell: String,
}

impl ShellPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout_ms: 3_600_000,
            shell: if cfg!(windows) {
                "cmd".to_string()
            } else {
                "sh".to_string()
            },
        }
    }

    /// Set execution timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set shell to use.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    fn command_line(command: &str, arguments: &[String]) -> String {
        let mut line = command.to_string();
        for arg in arguments {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        line
    }
}

impl Default for ShellPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-quote `arg` for a POSIX shell.
fn quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[async_trait]
impl Plugin for ShellPlugin {
    fn name(&self) -> &str {
        SHELL_CAPABILITY
    }

    fn configure(&mut self, options: &serde_json::Value) -> Result<(), PluginError> {
        if let Some(timeout) = options.get("timeout_ms") {
            self.timeout_ms = timeout
                .as_u64()
                .ok_or_else(|| PluginError::ConfigError("timeout_ms must be a number".into()))?;
        }
        if let Some(shell) = options.get("shell") {
            self.shell = shell
                .as_str()
                .ok_or_else(|| PluginError::ConfigError("shell must be a string".into()))?
                .to_string();
        }
        Ok(())
    }

    async fn check(&self, request: &PluginRequest) -> Result<Validation, PluginError> {
        Ok(match &request.kind {
            ActivityKind::Shell { command, .. } if command.trim().is_empty() => {
                Validation::invalid("empty command")
            }
            ActivityKind::Shell { .. } => Validation::ok(),
            other => Validation::invalid(format!(
                "shell plugin cannot run {} activities",
                other.activity_type()
            )),
        })
    }

    #[instrument(skip(self, request), fields(activity_id = %request.activity_id, plugin = "shell"))]
    async fn process(&self, request: &PluginRequest) -> Result<PluginOutcome, PluginError> {
        let ActivityKind::Shell {
            command,
            arguments,
            env_vars,
        } = &request.kind
        else {
            return Err(PluginError::InvalidRequest("not a shell activity".into()));
        };

        let line = Self::command_line(command, arguments);
        debug!("Running: {}", line);

        let shell_arg = if cfg!(windows) { "/C" } else { "-c" };
        let mut cmd = Command::new(&self.shell);
        cmd.arg(shell_arg)
            .arg(&line)
            .envs(env_vars)
            .env("CONVOY_ACTIVITY_ID", &request.activity_id)
            .env("CONVOY_CAMPAIGN_ID", &request.campaign_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let output = tokio::time::timeout(Duration::from_millis(self.timeout_ms), cmd.output())
            .await
            .map_err(|_| PluginError::Timeout(self.timeout_ms))??;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(PluginOutcome {
            success: output.status.success(),
            exit_code: Some(exit_code),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            message: String::new(),
            duration_ms,
        })
    }
}
