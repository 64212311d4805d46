//! Agent assembly: wires the broker, store, plugins and workers together.

use convoy_bus::{Broker, InMemoryBroker, ReplyListener};
use convoy_core::{AgentConfig, BrokerKind};
use convoy_plugins::PluginRegistry;
use convoy_storage::{ActivityStore, JsonlActivityStore, MemoryActivityStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channels::shared_channel;
use crate::error::AgentError;
use crate::executor::Executor;
use crate::handler::MessageHandler;
use crate::ledger::StatusLedger;
use crate::router::{ControlRouter, MonitorRegistry};
use crate::staging::{FileResolver, StagingResolver};
use crate::supervisor::spawn_supervised;

/// An agent waiting to be started.
///
/// Collaborators not supplied are derived from the configuration: the broker
/// from `broker`/`broker_url`, the store from `audit_log`, the plugins from
/// `capabilities`, the resolver from `staging_dir`.
pub struct Agent {
    config: AgentConfig,
    broker: Option<Arc<dyn Broker>>,
    store: Option<Arc<dyn ActivityStore>>,
    plugins: Option<PluginRegistry>,
    resolver: Option<Arc<dyn FileResolver>>,
}

impl Agent {
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            broker: None,
            store: None,
            plugins: None,
            resolver: None,
        }
    }

    #[must_use]
    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ActivityStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = Some(plugins);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn FileResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Connect, bind and spawn every worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the broker cannot be
    /// reached, the audit store cannot be opened or the listen address
    /// cannot be bound.
    pub async fn start(self) -> Result<AgentHandle, AgentError> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let broker = match self.broker {
            Some(broker) => broker,
            None => default_broker(&config)?,
        };
        let store: Arc<dyn ActivityStore> = match (self.store, &config.audit_log) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(JsonlActivityStore::open(path).await?),
            (None, None) => Arc::new(MemoryActivityStore::new()),
        };
        let plugins = self.plugins.unwrap_or_else(|| {
            PluginRegistry::builtin(config.capabilities.iter().map(String::as_str))
        });
        for capability in &config.capabilities {
            if !plugins.has_capability(capability) {
                warn!(capability = %capability, "Capability admitted without a plugin, its activities will fail");
            }
        }
        let plugins = Arc::new(plugins);
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(StagingResolver::new(config.staging_dir.clone())));

        broker.connect().await?;
        let listener = Arc::new(ReplyListener::bind(config.listen_addr.as_str()).await?);
        let local_addr = listener.local_addr()?;

        let capacity = config.channel_capacity;
        let (to_broker_tx, to_broker_rx) = shared_channel(capacity);
        let (ready_tx, ready_rx) = shared_channel(capacity);
        let (control_tx, control_rx) = shared_channel(capacity);

        let ledger = Arc::new(StatusLedger::new());
        let monitors = Arc::new(MonitorRegistry::new());
        let router = ControlRouter::new(Arc::clone(&ledger), Arc::clone(&monitors));

        let handler = MessageHandler::new(
            Arc::clone(&config),
            Arc::clone(&broker),
            store,
            router,
            to_broker_tx.clone(),
            ready_tx,
            control_tx.clone(),
        );
        let executor = Executor::new(
            Arc::clone(&config),
            plugins,
            resolver,
            Arc::clone(&ledger),
            monitors,
            to_broker_tx,
            control_tx,
        );

        let policy = config.restart;
        let mut tasks = Vec::new();

        let (h, l) = (handler.clone(), Arc::clone(&listener));
        tasks.push(spawn_supervised("campaign-listener", policy, move || {
            let (h, l) = (h.clone(), Arc::clone(&l));
            async move { h.recv_activity_dag_from_campaign(l).await }
        }));

        let (h, rx) = (handler.clone(), to_broker_rx);
        tasks.push(spawn_supervised("activity-sender", policy, move || {
            let (h, rx) = (h.clone(), Arc::clone(&rx));
            async move { h.send_activity(rx).await }
        }));

        let h = handler.clone();
        tasks.push(spawn_supervised("activity-receiver", policy, move || {
            let h = h.clone();
            async move { h.recv_activity().await }
        }));

        let h = handler.clone();
        tasks.push(spawn_supervised("control-receiver", policy, move || {
            let h = h.clone();
            async move { h.recv_control().await }
        }));

        let (h, rx) = (handler, control_rx);
        tasks.push(spawn_supervised("control-sender", policy, move || {
            let (h, rx) = (h.clone(), Arc::clone(&rx));
            async move { h.send_control(rx).await }
        }));

        let (e, rx) = (executor, ready_rx);
        tasks.push(spawn_supervised("executor", policy, move || {
            let (e, rx) = (e.clone(), Arc::clone(&rx));
            async move { e.run(rx).await }
        }));

        let retention = config.ledger_retention;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(retention);
            loop {
                ticker.tick().await;
                let pruned = ledger.prune(retention).await;
                if pruned > 0 {
                    info!(pruned, "Pruned idle campaigns from the status ledger");
                }
            }
        }));

        info!(
            agent_id = %config.agent_id,
            listen_addr = %local_addr,
            capabilities = ?config.capabilities,
            "Agent started"
        );

        Ok(AgentHandle {
            agent_id: config.agent_id.clone(),
            local_addr,
            broker,
            tasks,
        })
    }
}

fn default_broker(config: &AgentConfig) -> Result<Arc<dyn Broker>, AgentError> {
    match config.broker {
        BrokerKind::Memory => Ok(Arc::new(InMemoryBroker::new())),
        #[cfg(feature = "nats")]
        BrokerKind::Nats => Ok(Arc::new(convoy_bus::NatsBroker::new(
            convoy_bus::NatsConfig::new(config.broker_url.clone()).with_name(config.agent_id.clone()),
        ))),
        #[cfg(not(feature = "nats"))]
        BrokerKind::Nats => Err(AgentError::Config(
            "NATS broker requested but the nats feature is disabled".into(),
        )),
    }
}

/// A running agent.
pub struct AgentHandle {
    agent_id: String,
    local_addr: SocketAddr,
    broker: Arc<dyn Broker>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Address campaigns are accepted on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop every worker and close the broker connection.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        if let Err(e) = self.broker.close().await {
            warn!(agent_id = %self.agent_id, error = %e, "Failed to close broker");
        }
        info!(agent_id = %self.agent_id, "Agent stopped");
    }
}
