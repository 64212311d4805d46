//! Activities - the executable steps of a campaign.
//!
//! An [`Activity`] is built first (by its constructors) and becomes a
//! [`SubmittedActivity`] once a campaign adopts it. Only the submitted form
//! ever travels between processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::uri;

/// Capability name required to run SHELL activities.
pub const SHELL_CAPABILITY: &str = "shell";

/// Capability name required to run TRANSFER activities.
pub const TRANSFER_CAPABILITY: &str = "transfer";

/// Declared type of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    /// A shell invocation
    Shell,
    /// A data transfer
    Transfer,
    /// An interpreted-language task run by a named plugin
    Plugin,
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell => write!(f, "SHELL"),
            Self::Transfer => write!(f, "TRANSFER"),
            Self::Plugin => write!(f, "PLUGIN"),
        }
    }
}

/// Typed execution payload of an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    /// Run `command` with `arguments` through the shell plugin.
    Shell {
        command: String,
        #[serde(default)]
        arguments: Vec<String>,
        #[serde(default)]
        env_vars: BTreeMap<String, String>,
    },
    /// Move `source` to `destination`.
    Transfer { source: String, destination: String },
    /// Hand `arguments` to the plugin registered as `plugin`.
    Plugin {
        plugin: String,
        #[serde(default)]
        arguments: serde_json::Value,
        #[serde(default)]
        env_vars: BTreeMap<String, String>,
    },
}

impl ActivityKind {
    /// Discriminant of this payload.
    #[must_use]
    pub fn activity_type(&self) -> ActivityType {
        match self {
            Self::Shell { .. } => ActivityType::Shell,
            Self::Transfer { .. } => ActivityType::Transfer,
            Self::Plugin { .. } => ActivityType::Plugin,
        }
    }

    /// Name of the capability an agent must have configured to run this.
    #[must_use]
    pub fn required_capability(&self) -> &str {
        match self {
            Self::Shell { .. } => SHELL_CAPABILITY,
            Self::Transfer { .. } => TRANSFER_CAPABILITY,
            Self::Plugin { plugin, .. } => plugin,
        }
    }
}

/// Processing marker carried on the activity snapshot.
///
/// Terminal outcomes are reported through control messages, never written
/// back onto a snapshot that has left the submitting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityStatus {
    /// Built but not yet received by an agent
    #[default]
    Created,
    /// Received by an agent and fanned out to the broker
    Submitted,
    /// Being executed
    Processing,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
}

impl ActivityStatus {
    /// Whether no further transition is expected.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A unit of work, before it belongs to a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Unique ID, assigned at creation
    pub activity_id: String,
    /// Execution payload
    pub kind: ActivityKind,
    /// Input file URIs
    #[serde(default)]
    pub files: Vec<String>,
    /// Optional correlation id
    #[serde(default)]
    pub message_id: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Activity {
    /// Create an activity from a payload.
    #[must_use]
    pub fn new(kind: ActivityKind) -> Self {
        Self {
            activity_id: Uuid::new_v4().to_string(),
            kind,
            files: Vec::new(),
            message_id: None,
            created_at: Utc::now(),
        }
    }

    /// A shell activity running `command`.
    #[must_use]
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new(ActivityKind::Shell {
            command: command.into(),
            arguments: Vec::new(),
            env_vars: BTreeMap::new(),
        })
    }

    /// A transfer activity from `source` to `destination`.
    #[must_use]
    pub fn transfer(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::new(ActivityKind::Transfer {
            source: source.into(),
            destination: destination.into(),
        })
    }

    /// A task for the plugin registered under `plugin`.
    #[must_use]
    pub fn plugin(plugin: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::new(ActivityKind::Plugin {
            plugin: plugin.into(),
            arguments,
            env_vars: BTreeMap::new(),
        })
    }

    /// Append a command-line argument. Ignored for non-shell activities.
    #[must_use]
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        if let ActivityKind::Shell { arguments, .. } = &mut self.kind {
            arguments.push(value.into());
        }
        self
    }

    /// Set an environment variable. Ignored for transfers.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.kind {
            ActivityKind::Shell { env_vars, .. } | ActivityKind::Plugin { env_vars, .. } => {
                env_vars.insert(key.into(), value.into());
            }
            ActivityKind::Transfer { .. } => {}
        }
        self
    }

    /// Declare an input file.
    #[must_use]
    pub fn file(mut self, uri: impl Into<String>) -> Self {
        self.files.push(uri.into());
        self
    }

    /// Set the correlation id.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Declared type.
    #[must_use]
    pub fn activity_type(&self) -> ActivityType {
        self.kind.activity_type()
    }

    /// Capability an agent needs to admit this activity.
    #[must_use]
    pub fn required_capability(&self) -> &str {
        self.kind.required_capability()
    }

    /// Input files that are not yet on the local filesystem.
    pub fn remote_files(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .map(String::as_str)
            .filter(|f| !uri::is_local(f))
    }

    /// Whether dispatching this activity needs an externally-authenticated
    /// token set.
    #[must_use]
    pub fn needs_transfer_auth(&self) -> bool {
        self.activity_type() == ActivityType::Transfer
            || self.files.iter().any(|f| uri::requires_credentials(f))
    }

    /// Adopt this activity into a campaign.
    #[must_use]
    pub fn submit(self, campaign_id: impl Into<String>) -> SubmittedActivity {
        SubmittedActivity {
            activity: self,
            campaign_id: campaign_id.into(),
            origin_agent_id: None,
            running_agent_ids: Vec::new(),
            status: ActivityStatus::Created,
            submission_time: Utc::now(),
        }
    }
}

/// An activity that belongs to a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedActivity {
    /// The activity itself
    pub activity: Activity,
    /// Owning campaign
    pub campaign_id: String,
    /// First agent that received it
    #[serde(default)]
    pub origin_agent_id: Option<String>,
    /// Agents that ran it, in order (append-only)
    #[serde(default)]
    pub running_agent_ids: Vec<String>,
    /// Processing marker
    #[serde(default)]
    pub status: ActivityStatus,
    /// When the campaign adopted it
    pub submission_time: DateTime<Utc>,
}

impl SubmittedActivity {
    /// Activity ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.activity.activity_id
    }

    /// Declared type.
    #[must_use]
    pub fn activity_type(&self) -> ActivityType {
        self.activity.activity_type()
    }

    /// Mark as received by `agent_id`. The first receiver becomes the origin.
    #[must_use]
    pub fn received_by(mut self, agent_id: &str) -> Self {
        if self.origin_agent_id.is_none() {
            self.origin_agent_id = Some(agent_id.to_string());
        }
        self.status = ActivityStatus::Submitted;
        self
    }

    /// Record that `agent_id` is running this snapshot.
    pub fn record_running_agent(&mut self, agent_id: &str) {
        self.running_agent_ids.push(agent_id.to_string());
    }
}
