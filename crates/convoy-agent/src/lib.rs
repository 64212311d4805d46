//! # convoy-agent
//!
//! The Convoy agent runtime and the campaign submission side.
//!
//! An agent accepts campaign DAGs over a request/reply socket, fans their
//! nodes out on the broker's `ACTIVITIES` work queue, admits deliveries it has
//! the capability for, and runs them behind a predecessor gate fed by the
//! `CONTROL` channel. A per-campaign monitor heartbeats until every activity
//! has finished.
//!
//! ```rust,no_run
//! use convoy_agent::{Agent, AgentConfig};
//!
//! # async fn example() -> Result<(), convoy_agent::AgentError> {
//! let config = AgentConfig::new("agent-1").with_capability("shell");
//! let agent = Agent::new(config).start().await?;
//! println!("accepting campaigns on {}", agent.local_addr());
//! agent.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod agent;
mod campaign;
mod channels;
mod error;
mod executor;
mod handler;
mod ledger;
mod monitor;
mod router;
mod staging;
mod supervisor;

pub use agent::{Agent, AgentHandle};
pub use campaign::{
    ActivityDescription, Campaign, CampaignDescription, CredentialProvider, DispatchOutcome,
    StaticTokens, TokenFileProvider,
};
pub use channels::{shared_channel, SharedReceiver, WorkItem};
pub use error::AgentError;
pub use executor::Executor;
pub use handler::{Admission, MessageHandler};
pub use ledger::{GateOutcome, StatusLedger};
pub use monitor::{Monitor, MonitorHandle, MonitorSignal};
pub use router::{ControlRouter, MonitorRegistry};
pub use staging::{FileResolver, StagingResolver};
pub use supervisor::{spawn_supervised, supervise};

pub use convoy_core::{Activity, AgentConfig, DispatchConfig};
