//! Executor - the agent's dispatch loop.
//!
//! Consumes admitted work items in arrival order:
//!
//! ```text
//! RECEIVED ─┬─ MONITOR ────► spawn monitor + completion reader
//!           ├─ TERMINATOR ─► SUCCEEDED for the campaign
//!           └─ activity ───► predecessor gate ─► stage inputs ─► plugin ─► SUCCEEDED | FAILED
//! ```
//!
//! Every activity dispatched here ends with exactly one terminal status.
//! Activities wait at the gate off the ready queue, so a predecessor admitted
//! after its dependent still runs. Payloads run one at a time.

use convoy_core::{
    is_sentinel, uri, ActivityKind, AgentConfig, ControlMessage, ControlStatus, DagNode,
    FailurePolicy, SubmittedActivity, MONITOR, TERMINATOR, TRANSFER_CAPABILITY,
};
use convoy_plugins::{PluginRegistry, PluginRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::channels::{self, SharedReceiver, WorkItem};
use crate::error::AgentError;
use crate::ledger::StatusLedger;
use crate::monitor::Monitor;
use crate::router::MonitorRegistry;
use crate::staging::FileResolver;

/// Dispatch loop of one agent.
#[derive(Clone)]
pub struct Executor {
    config: Arc<AgentConfig>,
    plugins: Arc<PluginRegistry>,
    resolver: Arc<dyn FileResolver>,
    ledger: Arc<StatusLedger>,
    monitors: Arc<MonitorRegistry>,
    to_broker: mpsc::Sender<WorkItem>,
    control_out: mpsc::Sender<ControlMessage>,
    run_slot: Arc<Mutex<()>>,
}

impl Executor {
    #[must_use]
    pub fn new(
        config: Arc<AgentConfig>,
        plugins: Arc<PluginRegistry>,
        resolver: Arc<dyn FileResolver>,
        ledger: Arc<StatusLedger>,
        monitors: Arc<MonitorRegistry>,
        to_broker: mpsc::Sender<WorkItem>,
        control_out: mpsc::Sender<ControlMessage>,
    ) -> Self {
        Self {
            config,
            plugins,
            resolver,
            ledger,
            monitors,
            to_broker,
            control_out,
            run_slot: Arc::new(Mutex::new(())),
        }
    }

    /// Consume the ready queue until every producer is gone.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other supervised workers.
    pub async fn run(&self, ready: SharedReceiver<WorkItem>) -> Result<(), AgentError> {
        info!(agent_id = %self.config.agent_id, "Executor started");
        let mut gated = JoinSet::new();
        loop {
            tokio::select! {
                item = channels::next(&ready) => {
                    let Some(item) = item else { break };
                    if is_sentinel(&item.node_id) {
                        self.dispatch(item).await;
                    } else {
                        let executor = self.clone();
                        gated.spawn(async move { executor.dispatch(item).await });
                    }
                }
                Some(joined) = gated.join_next(), if !gated.is_empty() => reap(joined),
            }
        }

        info!(in_flight = gated.len(), "Ready queue closed, executor stopping");
        while let Some(joined) = gated.join_next().await {
            reap(joined);
        }
        Ok(())
    }

    /// Handle one work item.
    pub async fn dispatch(&self, item: WorkItem) {
        match item.node_id.as_str() {
            MONITOR => self.start_monitor(&item.node).await,
            TERMINATOR => {
                info!(campaign_id = %item.node.campaign_id, "Reached TERMINATOR");
                self.emit(ControlMessage::campaign_complete(&item.node.campaign_id))
                    .await;
            }
            _ => {
                let status = self.execute(item).await;
                self.emit(status).await;
            }
        }
    }

    async fn emit(&self, message: ControlMessage) {
        let message = message.from_agent(&self.config.agent_id);
        self.ledger.observe(&message).await;
        if self.control_out.send(message).await.is_err() {
            warn!("Control queue closed, status dropped");
        }
    }

    async fn start_monitor(&self, node: &DagNode) {
        let campaign_id = node.campaign_id.clone();
        let mut handle = Monitor::spawn(
            &campaign_id,
            &self.config.agent_id,
            &node.all_activity_ids,
            self.config.heartbeat_interval,
            self.control_out.clone(),
            self.config.channel_capacity,
        );

        if !self.monitors.register(&campaign_id, handle.sender()).await {
            warn!(campaign_id = %campaign_id, "Campaign already monitored here, ignoring duplicate MONITOR");
            handle.kill().await;
            return;
        }

        let monitors = Arc::clone(&self.monitors);
        let ledger = Arc::clone(&self.ledger);
        let retention = self.config.ledger_retention;
        tokio::spawn(async move {
            handle.wait_completed().await;
            monitors.deregister(&campaign_id).await;
            handle.kill().await;
            info!(campaign_id = %campaign_id, "Campaign complete, monitor released");

            tokio::time::sleep(retention).await;
            ledger.forget(&campaign_id).await;
        });
    }

    /// Run one activity node and return its terminal status.
    #[instrument(skip(self, item), fields(activity_id = %item.node_id, campaign_id = %item.node.campaign_id))]
    async fn execute(&self, mut item: WorkItem) -> ControlMessage {
        let activity_id = item.node_id.clone();
        let campaign_id = item.node.campaign_id.clone();
        let failed = |reason: String| ControlMessage::failed(&activity_id, &campaign_id, reason);

        let Some(submitted) = item.node.activity.as_mut() else {
            return failed("node carries no activity".into());
        };

        let gate = self
            .ledger
            .wait_for(&campaign_id, &item.node.predecessors, self.config.gate_timeout)
            .await;
        let outcome = match gate {
            Ok(outcome) => outcome,
            Err(e) => return failed(e.to_string()),
        };
        if !outcome.is_clean() && self.config.failure_policy == FailurePolicy::Propagate {
            return failed(format!(
                "predecessor failed: {}",
                outcome.failed_predecessors.join(", ")
            ));
        }

        let _slot = self.run_slot.lock().await;
        submitted.record_running_agent(&self.config.agent_id);
        self.emit(ControlMessage::processing(&activity_id, &campaign_id))
            .await;

        let Some(mut request) = PluginRequest::from_node(&item.node) else {
            return failed("node carries no activity".into());
        };

        if matches!(request.kind, ActivityKind::Shell { .. })
            && request.files.iter().any(|f| !uri::is_local(f))
        {
            match self.stage_inputs(&item.node, &request.files).await {
                Ok(dir) => request.working_dir = Some(dir),
                Err(e) => {
                    error!(error = %e, "Input staging failed");
                    return failed(e.to_string());
                }
            }
        }

        let capability = request.kind.required_capability().to_string();
        match self.plugins.run(&capability, &request).await {
            Ok(outcome) if outcome.success => {
                info!(duration_ms = outcome.duration_ms, "Activity succeeded");
                ControlMessage::succeeded(&activity_id, &campaign_id).with_msg(outcome.summary())
            }
            Ok(outcome) => {
                let summary = outcome.summary();
                warn!(summary = %summary, "Activity failed");
                failed(if summary.is_empty() {
                    "plugin reported failure".into()
                } else {
                    summary
                })
            }
            Err(e) => {
                warn!(error = %e, "Activity failed");
                failed(e.to_string())
            }
        }
    }

    /// Make every remote input of `node` local. Transfers this agent can run
    /// are run in place; the rest are published for other agents and awaited.
    async fn stage_inputs(&self, node: &DagNode, files: &[String]) -> Result<PathBuf, AgentError> {
        let Some(owner) = node.activity.as_ref() else {
            return Err(AgentError::Staging("node carries no activity".into()));
        };
        let campaign_id = &node.campaign_id;
        let owner_id = owner.id();

        let mut transfers = Vec::new();
        for file in files {
            transfers.extend(self.resolver.resolve(campaign_id, owner_id, file)?);
        }
        debug!(count = transfers.len(), "Staging inputs");

        let local = self.config.has_capability(TRANSFER_CAPABILITY)
            && self.plugins.has_capability(TRANSFER_CAPABILITY);
        let mut pending = Vec::new();

        for transfer in transfers {
            let submitted = transfer
                .submit(campaign_id.clone())
                .received_by(&self.config.agent_id);
            let transfer_id = submitted.id().to_string();

            if local {
                self.run_transfer(&submitted, node).await?;
            } else {
                let transfer_node = DagNode::for_activity(submitted)
                    .with_predecessors(vec![MONITOR.to_string()])
                    .with_transfer_tokens(node.transfer_tokens.clone());
                info!(transfer_id = %transfer_id, "Publishing staging transfer");
                self.to_broker
                    .send(WorkItem::new(&transfer_id, transfer_node))
                    .await
                    .map_err(|_| AgentError::ChannelClosed("to_broker"))?;
                pending.push(transfer_id);
            }
        }

        if !pending.is_empty() {
            let outcome = self
                .ledger
                .wait_for(campaign_id, &pending, Some(self.config.staging_timeout))
                .await
                .map_err(|e| AgentError::Staging(e.to_string()))?;
            if !outcome.is_clean() {
                return Err(AgentError::Staging(format!(
                    "transfer failed: {}",
                    outcome.failed_predecessors.join(", ")
                )));
            }
        }

        Ok(self.resolver.staging_dir(campaign_id, owner_id))
    }

    async fn run_transfer(
        &self,
        transfer: &SubmittedActivity,
        owner: &DagNode,
    ) -> Result<(), AgentError> {
        let request = PluginRequest {
            activity_id: transfer.id().to_string(),
            campaign_id: transfer.campaign_id.clone(),
            kind: transfer.activity.kind.clone(),
            files: Vec::new(),
            transfer_tokens: owner.transfer_tokens.clone(),
            working_dir: None,
        };

        let result = self.plugins.run(TRANSFER_CAPABILITY, &request).await;
        let status = match &result {
            Ok(outcome) if outcome.success => {
                ControlMessage::succeeded(&request.activity_id, &request.campaign_id)
                    .with_msg(outcome.summary())
            }
            Ok(outcome) => {
                ControlMessage::failed(&request.activity_id, &request.campaign_id, outcome.summary())
            }
            Err(e) => ControlMessage::failed(&request.activity_id, &request.campaign_id, e.to_string()),
        };
        let succeeded = status.status == ControlStatus::Succeeded;
        let reason = status.msg.clone();
        self.emit(status).await;

        if succeeded {
            Ok(())
        } else {
            Err(AgentError::Staging(format!(
                "transfer {} failed: {reason}",
                request.activity_id
            )))
        }
    }
}

fn reap(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Activity task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::StagingResolver;
    use async_trait::async_trait;
    use convoy_core::{Activity, ActivityType, Dag};
    use convoy_plugins::{Plugin, PluginError, PluginOutcome, Validation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Shell stand-in that counts invocations.
    struct CountingPlugin {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        succeed: bool,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn configure(&mut self, _options: &serde_json::Value) -> Result<(), PluginError> {
            Ok(())
        }

        async fn check(&self, _request: &PluginRequest) -> Result<Validation, PluginError> {
            Ok(Validation::ok())
        }

        async fn process(&self, _request: &PluginRequest) -> Result<PluginOutcome, PluginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PluginOutcome {
                success: self.succeed,
                ..PluginOutcome::default()
            })
        }
    }

    struct Harness {
        executor: Executor,
        ledger: Arc<StatusLedger>,
        to_broker: mpsc::Receiver<WorkItem>,
        control: mpsc::Receiver<ControlMessage>,
    }

    fn harness(config: AgentConfig, plugins: PluginRegistry) -> Harness {
        let (to_broker_tx, to_broker) = mpsc::channel(16);
        let (control_tx, control) = mpsc::channel(64);
        let ledger = Arc::new(StatusLedger::new());
        let executor = Executor::new(
            Arc::new(config),
            Arc::new(plugins),
            Arc::new(StagingResolver::new(std::env::temp_dir().join("convoy-exec-tests"))),
            Arc::clone(&ledger),
            Arc::new(MonitorRegistry::new()),
            to_broker_tx,
            control_tx,
        );
        Harness {
            executor,
            ledger,
            to_broker,
            control,
        }
    }

    fn counting(name: &'static str, succeed: bool) -> (PluginRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register(CountingPlugin {
            name,
            calls: Arc::clone(&calls),
            succeed,
        });
        (registry, calls)
    }

    fn item(dag: &Dag, id: &str) -> WorkItem {
        WorkItem::new(id, dag.node(id).cloned().unwrap())
    }

    async fn terminal_for(control: &mut mpsc::Receiver<ControlMessage>, id: &str) -> ControlMessage {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), control.recv())
                .await
                .unwrap()
                .unwrap();
            if message.activity_id == id && message.status.is_terminal() {
                return message;
            }
        }
    }

    #[tokio::test]
    async fn test_gate_waits_for_heartbeat() {
        let (plugins, calls) = counting("shell", true);
        let mut h = harness(AgentConfig::new("agent-1"), plugins);
        let dag = Dag::linear_chain("c1", vec![Activity::shell("true").submit("c1")], None);
        let id = dag.activity_ids()[0].clone();

        let executor = h.executor.clone();
        let work = item(&dag, &id);
        let task = tokio::spawn(async move { executor.dispatch(work).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        h.ledger.observe(&ControlMessage::heartbeat("c1")).await;
        task.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(terminal_for(&mut h.control, &id).await.status, ControlStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_predecessor_failure_propagates() {
        let (plugins, calls) = counting("shell", true);
        let mut h = harness(AgentConfig::new("agent-1"), plugins);
        let dag = Dag::linear_chain(
            "c1",
            vec![
                Activity::shell("false").submit("c1"),
                Activity::shell("true").submit("c1"),
            ],
            None,
        );
        let ids = dag.activity_ids();

        h.ledger
            .observe(&ControlMessage::failed(&ids[0], "c1", "boom"))
            .await;
        h.executor.dispatch(item(&dag, &ids[1])).await;

        let status = terminal_for(&mut h.control, &ids[1]).await;
        assert_eq!(status.status, ControlStatus::Failed);
        assert!(status.msg.contains(&ids[0]));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_continue_policy_runs_after_failure() {
        let (plugins, calls) = counting("shell", true);
        let config = AgentConfig::new("agent-1").with_failure_policy(FailurePolicy::Continue);
        let mut h = harness(config, plugins);
        let dag = Dag::linear_chain(
            "c1",
            vec![
                Activity::shell("false").submit("c1"),
                Activity::shell("true").submit("c1"),
            ],
            None,
        );
        let ids = dag.activity_ids();

        h.ledger
            .observe(&ControlMessage::failed(&ids[0], "c1", "boom"))
            .await;
        h.executor.dispatch(item(&dag, &ids[1])).await;

        assert_eq!(
            terminal_for(&mut h.control, &ids[1]).await.status,
            ControlStatus::Succeeded
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_timeout_fails_activity() {
        let (plugins, calls) = counting("shell", true);
        let config = AgentConfig::new("agent-1").with_gate_timeout(Duration::from_millis(30));
        let mut h = harness(config, plugins);
        let dag = Dag::linear_chain("c1", vec![Activity::shell("true").submit("c1")], None);
        let id = dag.activity_ids()[0].clone();

        h.executor.dispatch(item(&dag, &id)).await;
        assert_eq!(
            terminal_for(&mut h.control, &id).await.status,
            ControlStatus::Failed
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_plugin_failure_is_failed_status() {
        let (plugins, _calls) = counting("shell", false);
        let mut h = harness(AgentConfig::new("agent-1"), plugins);
        let dag = Dag::linear_chain("c1", vec![Activity::shell("false").submit("c1")], None);
        let id = dag.activity_ids()[0].clone();

        h.ledger.observe(&ControlMessage::heartbeat("c1")).await;
        h.executor.dispatch(item(&dag, &id)).await;

        let status = terminal_for(&mut h.control, &id).await;
        assert_eq!(status.status, ControlStatus::Failed);
        assert_eq!(status.agent_id.as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn test_remote_input_staging_failure() {
        let (plugins, calls) = counting("shell", true);
        let mut h = harness(AgentConfig::new("agent-1").with_capability("shell"), plugins);
        let dag = Dag::linear_chain(
            "c1",
            vec![Activity::shell("wc -l input.h5")
                .file("globus://endpoint/data/input.h5")
                .submit("c1")],
            None,
        );
        let id = dag.activity_ids()[0].clone();
        h.ledger.observe(&ControlMessage::heartbeat("c1")).await;

        let executor = h.executor.clone();
        let work = item(&dag, &id);
        let task = tokio::spawn(async move { executor.dispatch(work).await });

        let published = tokio::time::timeout(Duration::from_secs(2), h.to_broker.recv())
            .await
            .unwrap()
            .unwrap();
        let transfer = published.node.activity.as_ref().unwrap();
        assert_eq!(transfer.activity_type(), ActivityType::Transfer);
        assert_eq!(published.node.predecessors, vec![MONITOR.to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        h.ledger
            .observe(&ControlMessage::failed(&published.node_id, "c1", "endpoint offline"))
            .await;
        task.await.unwrap();

        let status = terminal_for(&mut h.control, &id).await;
        assert_eq!(status.status, ControlStatus::Failed);
        assert!(status.msg.contains("Staging failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remote_input_staged_in_place() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transfers = Arc::new(AtomicUsize::new(0));
        let mut plugins = PluginRegistry::new();
        plugins.register(CountingPlugin {
            name: "shell",
            calls: Arc::clone(&calls),
            succeed: true,
        });
        plugins.register(CountingPlugin {
            name: "transfer",
            calls: Arc::clone(&transfers),
            succeed: true,
        });
        let config = AgentConfig::new("agent-1")
            .with_capability("shell")
            .with_capability("transfer");
        let mut h = harness(config, plugins);

        let dag = Dag::linear_chain(
            "c1",
            vec![Activity::shell("cat a b")
                .file("gs://bucket/a")
                .file("gs://bucket/b")
                .file("/already/local")
                .submit("c1")],
            None,
        );
        let id = dag.activity_ids()[0].clone();
        h.ledger.observe(&ControlMessage::heartbeat("c1")).await;
        h.executor.dispatch(item(&dag, &id)).await;

        assert_eq!(
            terminal_for(&mut h.control, &id).await.status,
            ControlStatus::Succeeded
        );
        assert_eq!(transfers.load(Ordering::SeqCst), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(h.to_broker.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_predecessor_queued_behind_dependent_still_runs() {
        let (plugins, calls) = counting("shell", true);
        let mut h = harness(AgentConfig::new("agent-1"), plugins);
        let dag = Dag::linear_chain(
            "c1",
            vec![
                Activity::shell("true").submit("c1"),
                Activity::shell("true").submit("c1"),
            ],
            None,
        );
        let ids = dag.activity_ids();
        h.ledger.observe(&ControlMessage::heartbeat("c1")).await;

        let (ready_tx, ready) = channels::shared_channel(8);
        ready_tx.send(item(&dag, &ids[1])).await.unwrap();
        ready_tx.send(item(&dag, &ids[0])).await.unwrap();
        drop(ready_tx);

        tokio::time::timeout(Duration::from_secs(2), h.executor.run(ready))
            .await
            .unwrap()
            .unwrap();

        let mut terminal = Vec::new();
        while let Ok(message) = h.control.try_recv() {
            if message.status.is_terminal() {
                assert_eq!(message.status, ControlStatus::Succeeded);
                terminal.push(message.activity_id);
            }
        }
        assert_eq!(terminal, ids);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminator_reports_campaign_success() {
        let mut h = harness(AgentConfig::new("agent-1"), PluginRegistry::new());
        let dag = Dag::linear_chain("c9", Vec::new(), None);

        h.executor.dispatch(item(&dag, TERMINATOR)).await;
        let status = terminal_for(&mut h.control, TERMINATOR).await;
        assert_eq!(status.status, ControlStatus::Succeeded);
        assert_eq!(status.campaign_id, "c9");
    }

    #[tokio::test]
    async fn test_monitor_node_starts_heartbeats() {
        let config = AgentConfig::new("agent-1").with_heartbeat_interval(Duration::from_millis(20));
        let mut h = harness(config, PluginRegistry::new());
        let dag = Dag::linear_chain("c5", vec![Activity::shell("true").submit("c5")], None);

        h.executor.dispatch(item(&dag, MONITOR)).await;
        assert!(h.executor.monitors.contains("c5").await);

        let heartbeat = tokio::time::timeout(Duration::from_secs(1), h.control.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(heartbeat.is_heartbeat());

        // Completion releases the monitor.
        let id = dag.activity_ids()[0].clone();
        h.executor
            .monitors
            .forward(ControlMessage::succeeded(&id, "c5"))
            .await;
        h.executor
            .monitors
            .forward(ControlMessage::campaign_complete("c5"))
            .await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while h.executor.monitors.contains("c5").await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
