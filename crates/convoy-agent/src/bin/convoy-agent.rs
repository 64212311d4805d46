//! Convoy agent daemon
//!
//! Runs one agent until Ctrl-C. Configured from `CONVOY_*` environment
//! variables; see `AgentConfig::from_env`. Plugin options may be supplied as
//! a JSON object of `{capability: options}` in the file named by
//! `CONVOY_PLUGIN_CONFIG`.

use anyhow::{Context, Result};
use convoy_agent::{Agent, AgentConfig};
use convoy_plugins::PluginRegistry;
use std::collections::BTreeMap;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Convoy agent v{}", env!("CARGO_PKG_VERSION"));

    let agent = match build_agent().await {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Cannot construct agent");
            std::process::exit(1);
        }
    };

    let handle = match agent.start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Agent failed to start");
            std::process::exit(1);
        }
    };

    info!(agent_id = %handle.agent_id(), addr = %handle.local_addr(), "Agent running, Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn build_agent() -> Result<Agent> {
    let config = AgentConfig::from_env().context("invalid agent configuration")?;
    let plugins = load_plugins(&config).await?;

    let agent = Agent::new(config).with_plugins(plugins);
    with_redis_store(agent).await
}

#[cfg(feature = "redis")]
async fn with_redis_store(agent: Agent) -> Result<Agent> {
    let Ok(url) = std::env::var("CONVOY_REDIS_URL") else {
        return Ok(agent);
    };
    let store = convoy_storage::RedisActivityStore::connect(&url)
        .await
        .context("cannot connect to the Redis audit store")?;
    Ok(agent.with_store(std::sync::Arc::new(store)))
}

#[cfg(not(feature = "redis"))]
async fn with_redis_store(agent: Agent) -> Result<Agent> {
    Ok(agent)
}

async fn load_plugins(config: &AgentConfig) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::builtin(config.capabilities.iter().map(String::as_str));

    let Ok(path) = std::env::var("CONVOY_PLUGIN_CONFIG") else {
        return Ok(registry);
    };
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("cannot read plugin config {path}"))?;
    let options: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&raw).with_context(|| format!("malformed plugin config {path}"))?;

    for (capability, value) in &options {
        registry
            .configure(capability, value)
            .with_context(|| format!("cannot configure plugin {capability}"))?;
        info!(capability = %capability, "Plugin configured");
    }
    Ok(registry)
}
