//! Plugin traits and types.

use async_trait::async_trait;
use convoy_core::{ActivityKind, DagNode, TransferTokens};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::PluginError;

/// Everything a plugin gets to know about one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRequest {
    pub activity_id: String,
    pub campaign_id: String,
    pub kind: ActivityKind,
    /// Input file URIs as declared
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub transfer_tokens: Option<TransferTokens>,
    /// Directory holding staged inputs, if any were staged
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl PluginRequest {
    /// Build a request for the activity of `node`. `None` for sentinels.
    #[must_use]
    pub fn from_node(node: &DagNode) -> Option<Self> {
        let submitted = node.activity.as_ref()?;
        Some(Self {
            activity_id: submitted.id().to_string(),
            campaign_id: submitted.campaign_id.clone(),
            kind: submitted.activity.kind.clone(),
            files: submitted.activity.files.clone(),
            transfer_tokens: node.transfer_tokens.clone(),
            working_dir: None,
        })
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Result of [`Plugin::check`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Validation {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![error.into()],
        }
    }
}

/// Result of [`Plugin::process`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginOutcome {
    /// Whether the activity did what it was asked to
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Short human-readable summary
    pub message: String,
    pub duration_ms: u64,
}

impl PluginOutcome {
    /// Summary suitable for a control message.
    #[must_use]
    pub fn summary(&self) -> String {
        if !self.message.is_empty() {
            return self.message.clone();
        }
        match self.exit_code {
            Some(code) if !self.success => {
                let stderr = self.stderr.trim();
                if stderr.is_empty() {
                    format!("exit code {code}")
                } else {
                    let head: String = stderr.chars().take(200).collect();
                    format!("exit code {code}: {head}")
                }
            }
            _ => String::new(),
        }
    }
}

/// An activity execution backend.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Capability name this plugin provides.
    fn name(&self) -> &str;

    /// Apply backend options before the plugin is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if `options` are not understood.
    fn configure(&mut self, options: &serde_json::Value) -> Result<(), PluginError>;

    /// Validate a request without running it.
    ///
    /// # Errors
    ///
    /// Returns an error if validation itself cannot be performed.
    async fn check(&self, request: &PluginRequest) -> Result<Validation, PluginError>;

    /// Run the activity.
    ///
    /// # Errors
    ///
    /// Returns an error if the activity could not be run at all.
    async fn process(&self, request: &PluginRequest) -> Result<PluginOutcome, PluginError>;
}
