//! Campaign submission.
//!
//! A [`Campaign`] owns an ordered list of activities, packs them into a DAG
//! and hands that DAG to the local agent over the request/reply channel.
//!
//! ```rust,no_run
//! use convoy_agent::{Activity, Campaign, DispatchOutcome};
//!
//! # async fn example() {
//! let mut campaign = Campaign::new("nightly");
//! campaign.add_activity(Activity::shell("echo hi"));
//! campaign.add_activity(Activity::shell("echo bye"));
//!
//! match campaign.dispatch().await {
//!     DispatchOutcome::Acknowledged => println!("submitted"),
//!     other => eprintln!("not submitted: {other:?}"),
//! }
//! # }
//! ```

use async_trait::async_trait;
use convoy_bus::{RequestClient, ACK};
use convoy_core::{Activity, ActivityKind, Dag, DispatchConfig, SubmittedActivity, TransferTokens};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::AgentError;

/// Source of the token set attached to campaigns that move credentialed data.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a fresh token set.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Credentials`] if no usable tokens are available.
    async fn transfer_tokens(&self) -> Result<TransferTokens, AgentError>;
}

/// Hands out a fixed token set.
#[derive(Debug, Clone)]
pub struct StaticTokens(pub TransferTokens);

#[async_trait]
impl CredentialProvider for StaticTokens {
    async fn transfer_tokens(&self) -> Result<TransferTokens, AgentError> {
        if self.0.is_expired() {
            return Err(AgentError::Credentials("token set has expired".into()));
        }
        Ok(self.0.clone())
    }
}

/// Reads a JSON token set from a file on every refresh, so an external login
/// flow can rotate it.
#[derive(Debug, Clone)]
pub struct TokenFileProvider {
    path: PathBuf,
}

impl TokenFileProvider {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialProvider for TokenFileProvider {
    async fn transfer_tokens(&self) -> Result<TransferTokens, AgentError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AgentError::Credentials(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let tokens: TransferTokens = serde_json::from_str(&raw).map_err(|e| {
            AgentError::Credentials(format!("malformed token file {}: {e}", self.path.display()))
        })?;
        if tokens.is_expired() {
            return Err(AgentError::Credentials(format!(
                "tokens in {} have expired, log in again",
                self.path.display()
            )));
        }
        Ok(tokens)
    }
}

/// What happened to a dispatched campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The agent acknowledged receipt
    Acknowledged,
    /// The agent replied with something other than the acknowledgement
    Unexpected(Vec<u8>),
    /// The agent could not be reached in time
    Unreachable(String),
    /// The campaign could not be packed
    Failed(String),
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }
}

/// A named, ordered collection of activities submitted as one unit.
pub struct Campaign {
    campaign_id: String,
    name: String,
    activities: Vec<SubmittedActivity>,
    needs_transfer_auth: bool,
    credentials: Option<Arc<dyn CredentialProvider>>,
    dispatch: DispatchConfig,
}

impl Campaign {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            campaign_id: Uuid::new_v4().to_string(),
            name: name.into(),
            activities: Vec::new(),
            needs_transfer_auth: false,
            credentials: None,
            dispatch: DispatchConfig::default(),
        }
    }

    #[must_use]
    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adopt `activity` as the next step of the campaign.
    pub fn add_activity(&mut self, activity: Activity) -> &SubmittedActivity {
        self.needs_transfer_auth |= activity.needs_transfer_auth();
        self.activities.push(activity.submit(self.campaign_id.clone()));
        &self.activities[self.activities.len() - 1]
    }

    #[must_use]
    pub fn activities(&self) -> &[SubmittedActivity] {
        &self.activities
    }

    /// Whether any activity moves data that needs out-of-band credentials.
    #[must_use]
    pub fn needs_transfer_auth(&self) -> bool {
        self.needs_transfer_auth
    }

    #[must_use]
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    #[must_use]
    pub fn with_dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    /// Build `MONITOR -> a1 -> ... -> an -> TERMINATOR`, attaching a fresh
    /// token set to every node when the campaign needs one.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Credentials`] if tokens are needed and cannot be
    /// obtained.
    pub async fn pack_dag_for_dispatch(&self) -> Result<Dag, AgentError> {
        let tokens = if self.needs_transfer_auth {
            let provider = self.credentials.as_ref().ok_or_else(|| {
                AgentError::Credentials(
                    "campaign moves credentialed data but has no credential provider".into(),
                )
            })?;
            Some(provider.transfer_tokens().await?)
        } else {
            None
        };

        Ok(Dag::linear_chain(
            &self.campaign_id,
            self.activities.clone(),
            tokens,
        ))
    }

    /// Send the packed DAG to the local agent and wait for its
    /// acknowledgement. Failures are logged and returned, never raised; the
    /// caller decides whether to retry.
    #[instrument(skip(self), fields(campaign_id = %self.campaign_id, name = %self.name))]
    pub async fn dispatch(&self) -> DispatchOutcome {
        let packed = self
            .pack_dag_for_dispatch()
            .await
            .and_then(|dag| dag.serialize_dag().map_err(AgentError::from));
        let body = match packed {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to pack campaign");
                return DispatchOutcome::Failed(e.to_string());
            }
        };

        let addr = &self.dispatch.agent_addr;
        let mut client = match RequestClient::connect(
            addr,
            self.dispatch.send_timeout,
            self.dispatch.recv_timeout,
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                error!(addr = %addr, error = %e, "No agent reachable, is convoy-agent running on this address?");
                return DispatchOutcome::Unreachable(e.to_string());
            }
        };

        let outcome = match client.request(&body).await {
            Ok(reply) if reply == ACK => {
                info!(activities = self.activities.len(), "Campaign acknowledged by agent");
                DispatchOutcome::Acknowledged
            }
            Ok(reply) => {
                warn!(reply = %String::from_utf8_lossy(&reply), "Unexpected reply from agent");
                DispatchOutcome::Unexpected(reply)
            }
            Err(e) => {
                error!(addr = %addr, error = %e, "Agent did not acknowledge the campaign, is it started?");
                DispatchOutcome::Unreachable(e.to_string())
            }
        };
        client.close().await;
        outcome
    }
}

/// JSON description of a campaign, as read by `convoy-submit`.
///
/// ```json
/// {
///   "name": "nightly",
///   "activities": [
///     { "type": "SHELL", "command": "echo", "arguments": ["hi"] },
///     { "type": "TRANSFER", "source": "gs://b/in", "destination": "file:///tmp/in" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignDescription {
    pub name: String,
    #[serde(default)]
    pub activities: Vec<ActivityDescription>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityDescription {
    #[serde(flatten)]
    pub kind: ActivityKind,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

impl CampaignDescription {
    /// Parse a description.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if `json` is not a valid description.
    pub fn from_json(json: &str) -> Result<Self, AgentError> {
        serde_json::from_str(json)
            .map_err(|e| AgentError::Config(format!("invalid campaign description: {e}")))
    }

    /// Build the campaign.
    #[must_use]
    pub fn into_campaign(self) -> Campaign {
        let mut campaign = Campaign::new(self.name);
        for description in self.activities {
            let mut activity = Activity::new(description.kind);
            activity.files = description.files;
            activity.message_id = description.message_id;
            campaign.add_activity(activity);
        }
        campaign
    }
}
