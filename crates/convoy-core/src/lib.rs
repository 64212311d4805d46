//! # convoy-core
//!
//! Core types shared by every Convoy component.
//!
//! This crate provides:
//! - [`Activity`] and [`SubmittedActivity`] - executable campaign steps
//! - [`Dag`] - the campaign graph with its `MONITOR`/`TERMINATOR` sentinels
//! - [`ControlMessage`] - status records exchanged on the `CONTROL` channel
//! - [`AgentConfig`] / [`DispatchConfig`] - explicit configuration objects
//!
//! ## Quick Start
//!
//! ```rust
//! use convoy_core::{Activity, Dag, MONITOR, TERMINATOR};
//!
//! let activities = vec![
//!     Activity::shell("echo hi").submit("campaign-1"),
//!     Activity::shell("echo bye").submit("campaign-1"),
//! ];
//! let dag = Dag::linear_chain("campaign-1", activities, None);
//!
//! assert_eq!(dag.len(), 4);
//! assert!(dag.node(MONITOR).unwrap().predecessors.is_empty());
//! assert!(dag.node(TERMINATOR).unwrap().successors.is_empty());
//! ```

pub mod activity;
pub mod config;
pub mod control;
pub mod dag;
pub mod error;
pub mod uri;

pub use activity::{
    Activity, ActivityKind, ActivityStatus, ActivityType, SubmittedActivity, SHELL_CAPABILITY,
    TRANSFER_CAPABILITY,
};
pub use config::{AgentConfig, BrokerKind, DispatchConfig, FailurePolicy, RestartPolicy};
pub use control::{ControlMessage, ControlStatus};
pub use dag::{decode_node, encode_node, is_sentinel, Dag, DagNode, TransferTokens, MONITOR, TERMINATOR};
pub use error::CoreError;
