//! Configuration types for agents and campaign dispatch.
//!
//! Both objects are constructed once at process start and passed into every
//! component that needs them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::CoreError;

/// What the executor does when a predecessor FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report FAILED without running
    #[default]
    Propagate,
    /// Run anyway
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "propagate" => Ok(Self::Propagate),
            "continue" => Ok(Self::Continue),
            other => Err(CoreError::InvalidConfig(format!(
                "unknown failure policy: {other}"
            ))),
        }
    }
}

/// Broker transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// In-process broker (tests, single-host fleets)
    #[default]
    Memory,
    /// NATS / JetStream
    Nats,
}

impl FromStr for BrokerKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "nats" => Ok(Self::Nats),
            other => Err(CoreError::InvalidConfig(format!("unknown broker: {other}"))),
        }
    }
}

/// Restart budget for supervised workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restarts allowed before the worker is given up on
    pub max_restarts: u32,
    /// Base delay; the n-th restart waits `n * backoff`
    pub backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    /// Address of the campaign request/reply listener
    pub listen_addr: String,
    pub broker: BrokerKind,
    pub broker_url: String,
    /// Capability names this agent admits (`shell`, `transfer`, plugin names)
    pub capabilities: BTreeSet<String>,
    pub heartbeat_interval: Duration,
    /// Sleep after a negative acknowledgement
    pub nack_backoff: Duration,
    /// Deliveries after which an unadmittable activity is dead-lettered
    pub max_redeliveries: Option<u32>,
    pub failure_policy: FailurePolicy,
    /// Upper bound on the predecessor gate; `None` waits forever
    pub gate_timeout: Option<Duration>,
    /// Upper bound on waiting for remotely staged inputs
    pub staging_timeout: Duration,
    /// Root directory for staged input files
    pub staging_dir: PathBuf,
    /// Append-only audit log; `None` keeps records in memory
    pub audit_log: Option<PathBuf>,
    /// Capacity of every internal queue
    pub channel_capacity: usize,
    /// How long finished campaigns stay in the status ledger
    pub ledger_retention: Duration,
    pub restart: RestartPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: format!("agent-{}", Uuid::new_v4()),
            listen_addr: "127.0.0.1:5555".into(),
            broker: BrokerKind::Memory,
            broker_url: "nats://localhost:4222".into(),
            capabilities: BTreeSet::new(),
            heartbeat_interval: Duration::from_secs(5),
            nack_backoff: Duration::from_secs(1),
            max_redeliveries: Some(100),
            failure_policy: FailurePolicy::Propagate,
            gate_timeout: None,
            staging_timeout: Duration::from_secs(600),
            staging_dir: std::env::temp_dir().join("convoy-staging"),
            audit_log: None,
            channel_capacity: 1024,
            ledger_retention: Duration::from_secs(3600),
            restart: RestartPolicy::default(),
        }
    }
}

impl AgentConfig {
    /// Default configuration with the given agent id.
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    /// Load from `CONVOY_*` environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AgentConfig::from_env`] with an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(id) = lookup("CONVOY_AGENT_ID") {
            config.agent_id = id;
        }
        if let Some(addr) = lookup("CONVOY_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(broker) = lookup("CONVOY_BROKER") {
            config.broker = broker.parse()?;
        }
        if let Some(url) = lookup("CONVOY_BROKER_URL") {
            config.broker_url = url;
        }
        if let Some(caps) = lookup("CONVOY_CAPABILITIES") {
            config.capabilities = caps
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(ms) = lookup("CONVOY_HEARTBEAT_MS") {
            config.heartbeat_interval = parse_millis("CONVOY_HEARTBEAT_MS", &ms)?;
        }
        if let Some(ms) = lookup("CONVOY_NACK_BACKOFF_MS") {
            config.nack_backoff = parse_millis("CONVOY_NACK_BACKOFF_MS", &ms)?;
        }
        if let Some(n) = lookup("CONVOY_MAX_REDELIVERIES") {
            config.max_redeliveries = if n == "0" || n.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse_number("CONVOY_MAX_REDELIVERIES", &n)?)
            };
        }
        if let Some(policy) = lookup("CONVOY_FAILURE_POLICY") {
            config.failure_policy = policy.parse()?;
        }
        if let Some(ms) = lookup("CONVOY_GATE_TIMEOUT_MS") {
            config.gate_timeout = Some(parse_millis("CONVOY_GATE_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = lookup("CONVOY_STAGING_TIMEOUT_MS") {
            config.staging_timeout = parse_millis("CONVOY_STAGING_TIMEOUT_MS", &ms)?;
        }
        if let Some(dir) = lookup("CONVOY_STAGING_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("CONVOY_AUDIT_LOG") {
            config.audit_log = Some(PathBuf::from(path));
        }
        if let Some(cap) = lookup("CONVOY_CHANNEL_CAPACITY") {
            config.channel_capacity = parse_number("CONVOY_CHANNEL_CAPACITY", &cap)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no component can run with.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.agent_id.is_empty() {
            return Err(CoreError::InvalidConfig("agent_id is empty".into()));
        }
        if self.channel_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "channel_capacity must be positive".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(CoreError::InvalidConfig(
                "heartbeat_interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Whether `capability` is configured locally.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    #[must_use]
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    #[must_use]
    pub fn with_broker(mut self, broker: BrokerKind, url: impl Into<String>) -> Self {
        self.broker = broker;
        self.broker_url = url.into();
        self
    }

    /// Add a capability.
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_nack_backoff(mut self, backoff: Duration) -> Self {
        self.nack_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_max_redeliveries(mut self, max: Option<u32>) -> Self {
        self.max_redeliveries = max;
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_staging_timeout(mut self, timeout: Duration) -> Self {
        self.staging_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }
}

/// Campaign-side settings for reaching the local agent.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub agent_addr: String,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            agent_addr: "127.0.0.1:5555".into(),
            send_timeout: Duration::from_millis(5000),
            recv_timeout: Duration::from_millis(5000),
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub fn new(agent_addr: impl Into<String>) -> Self {
        Self {
            agent_addr: agent_addr.into(),
            ..Self::default()
        }
    }

    /// Load from `CONVOY_AGENT_ADDR`, `CONVOY_SEND_TIMEOUT_MS` and
    /// `CONVOY_RECV_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// Returns an error if a timeout is not a number.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("CONVOY_AGENT_ADDR") {
            config.agent_addr = addr;
        }
        if let Ok(ms) = std::env::var("CONVOY_SEND_TIMEOUT_MS") {
            config.send_timeout = parse_millis("CONVOY_SEND_TIMEOUT_MS", &ms)?;
        }
        if let Ok(ms) = std::env::var("CONVOY_RECV_TIMEOUT_MS") {
            config.recv_timeout = parse_millis("CONVOY_RECV_TIMEOUT_MS", &ms)?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_timeouts(mut self, send: Duration, recv: Duration) -> Self {
        self.send_timeout = send;
        self.recv_timeout = recv;
        self
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, CoreError> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::InvalidConfig(format!("{key}: not a number: {value}")))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, CoreError> {
    parse_number(key, value).map(Duration::from_millis)
}
