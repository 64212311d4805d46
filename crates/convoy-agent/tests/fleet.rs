//! End-to-end runs of in-process agent fleets sharing one broker.

use convoy_agent::{Activity, Agent, AgentConfig, AgentHandle, Campaign, DispatchConfig, DispatchOutcome};
use convoy_bus::{Broker, DeliveryStream, InMemoryBroker, Topic};
use convoy_core::{ControlMessage, ControlStatus, Dag, TERMINATOR};
use convoy_plugins::{LocalTransferPlugin, PluginRegistry, ShellPlugin};
use convoy_storage::{ActivityRecord, ActivityStore, MemoryActivityStore, RecordStatus};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DEADLINE: Duration = Duration::from_secs(10);

fn config(agent_id: &str) -> AgentConfig {
    AgentConfig::new(agent_id)
        .with_listen_addr("127.0.0.1:0")
        .with_heartbeat_interval(Duration::from_millis(50))
        .with_nack_backoff(Duration::from_millis(20))
        .with_staging_dir(std::env::temp_dir().join(format!("convoy-fleet-{}", Uuid::new_v4())))
}

async fn start(broker: &InMemoryBroker, config: AgentConfig) -> AgentHandle {
    Agent::new(config)
        .with_broker(Arc::new(broker.handle()))
        .start()
        .await
        .unwrap()
}

/// A connected client listening on `CONTROL`. The client must outlive the
/// stream.
async fn observer(broker: &InMemoryBroker) -> (InMemoryBroker, DeliveryStream) {
    let client = broker.handle();
    client.connect().await.unwrap();
    let stream = client.listen(Topic::Control).await.unwrap();
    (client, stream)
}

/// Every control message seen until each of `ids` has a terminal status.
async fn until_terminal(stream: &mut DeliveryStream, ids: &[String]) -> Vec<ControlMessage> {
    let mut seen = Vec::new();
    let mut terminal: HashMap<String, ControlStatus> = HashMap::new();
    tokio::time::timeout(DEADLINE, async {
        while !ids.iter().all(|id| terminal.contains_key(id)) {
            let delivery = stream.next().await.expect("control stream ended");
            let message = ControlMessage::from_bytes(&delivery.body).unwrap();
            if message.status.is_terminal() {
                terminal.entry(message.activity_id.clone()).or_insert(message.status);
            }
            seen.push(message);
        }
    })
    .await
    .expect("campaign did not finish in time");
    seen
}

fn terminal_of<'a>(seen: &'a [ControlMessage], id: &str) -> &'a ControlMessage {
    seen.iter()
        .find(|m| m.activity_id == id && m.status.is_terminal())
        .unwrap()
}

fn position(seen: &[ControlMessage], id: &str, status: ControlStatus) -> usize {
    seen.iter()
        .position(|m| m.activity_id == id && m.status == status)
        .unwrap()
}

fn campaign_for(agent: &AgentHandle, activities: Vec<Activity>) -> Campaign {
    let dispatch = DispatchConfig::new(agent.local_addr().to_string())
        .with_timeouts(Duration::from_secs(2), Duration::from_secs(2));
    let mut campaign = Campaign::new("fleet-test").with_dispatch_config(dispatch);
    for activity in activities {
        campaign.add_activity(activity);
    }
    campaign
}

fn ids(campaign: &Campaign) -> Vec<String> {
    campaign.activities().iter().map(|a| a.id().to_string()).collect()
}

#[tokio::test]
async fn test_two_shell_activities_run_in_order() {
    let broker = InMemoryBroker::new();
    let (_client, mut control) = observer(&broker).await;
    let store = Arc::new(MemoryActivityStore::new());
    let agent = Agent::new(config("agent-a").with_capability("shell"))
        .with_broker(Arc::new(broker.handle()))
        .with_store(store.clone())
        .start()
        .await
        .unwrap();

    let campaign = campaign_for(&agent, vec![Activity::shell("echo hi"), Activity::shell("echo bye")]);
    let ids = ids(&campaign);
    assert_eq!(campaign.dispatch().await, DispatchOutcome::Acknowledged);

    let mut wanted = ids.clone();
    wanted.push(TERMINATOR.to_string());
    let seen = until_terminal(&mut control, &wanted).await;

    for id in &ids {
        let status = terminal_of(&seen, id);
        assert_eq!(status.status, ControlStatus::Succeeded, "{id}: {}", status.msg);
        assert_eq!(status.agent_id.as_deref(), Some("agent-a"));
    }
    // B may only start once A has finished.
    assert!(
        position(&seen, &ids[0], ControlStatus::Succeeded)
            < position(&seen, &ids[1], ControlStatus::Processing)
    );
    assert_eq!(terminal_of(&seen, TERMINATOR).status, ControlStatus::Succeeded);
    assert!(seen.iter().any(ControlMessage::is_heartbeat));

    for id in &ids {
        let record = store
            .get(&ActivityRecord::record_id("agent-a", campaign.campaign_id(), id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RecordStatus::Accepted);
    }
    agent.shutdown().await;
}

#[tokio::test]
async fn test_work_moves_to_capable_agent() {
    let broker = InMemoryBroker::new();
    let (_client, mut control) = observer(&broker).await;
    let idle = start(&broker, config("idle")).await;
    let worker = start(&broker, config("worker").with_capability("shell")).await;

    // Submitted to the agent that cannot run it.
    let campaign = campaign_for(&idle, vec![Activity::shell("echo one"), Activity::shell("echo two")]);
    let ids = ids(&campaign);
    assert_eq!(campaign.dispatch().await, DispatchOutcome::Acknowledged);

    let seen = until_terminal(&mut control, &ids).await;
    for id in &ids {
        let status = terminal_of(&seen, id);
        assert_eq!(status.status, ControlStatus::Succeeded);
        assert_eq!(status.agent_id.as_deref(), Some("worker"));
    }

    idle.shutdown().await;
    worker.shutdown().await;
}

#[tokio::test]
async fn test_rejected_predecessor_runs_after_redelivery() {
    let broker = InMemoryBroker::new();
    let (_client, mut control) = observer(&broker).await;

    let dag = Dag::linear_chain(
        "redelivered",
        vec![
            Activity::shell("echo a").submit("redelivered"),
            Activity::shell("echo b").submit("redelivered"),
        ],
        None,
    );
    let ids = dag.activity_ids();

    // A client without the shell capability takes MONITOR and turns A down.
    let other = broker.handle();
    other.connect().await.unwrap();
    for id in dag.topological_order().unwrap() {
        other
            .send(Topic::Activities, dag.serialize_node(&id).unwrap())
            .await
            .unwrap();
    }
    let mut deliveries = other.listen(Topic::Activities).await.unwrap();
    deliveries.next().await.unwrap().ack().await.unwrap();
    let rejected = deliveries.next().await.unwrap();
    assert_eq!(Dag::deserialize_node(&rejected.body).unwrap().0, ids[0]);
    rejected.nack().await.unwrap();
    drop(deliveries);
    assert_eq!(broker.pending(), 3);

    // The monitor lives elsewhere; only its heartbeats reach this fleet.
    let heartbeats = tokio::spawn(async move {
        let body = ControlMessage::heartbeat("redelivered").to_bytes().unwrap();
        loop {
            if other.send(Topic::Control, body.clone()).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    let worker = start(&broker, config("worker").with_capability("shell")).await;
    let seen = until_terminal(&mut control, &ids).await;
    for id in &ids {
        let status = terminal_of(&seen, id);
        assert_eq!(status.status, ControlStatus::Succeeded, "{id}: {}", status.msg);
        assert_eq!(status.agent_id.as_deref(), Some("worker"));
    }
    assert!(
        position(&seen, &ids[0], ControlStatus::Succeeded)
            < position(&seen, &ids[1], ControlStatus::Processing)
    );

    heartbeats.abort();
    worker.shutdown().await;
}

#[tokio::test]
async fn test_unadmittable_activity_is_dead_lettered() {
    let broker = InMemoryBroker::new();
    let (_client, mut control) = observer(&broker).await;
    let agent = start(
        &broker,
        config("lonely")
            .with_nack_backoff(Duration::from_millis(5))
            .with_max_redeliveries(Some(3)),
    )
    .await;

    let campaign = campaign_for(&agent, vec![Activity::shell("echo unreachable")]);
    let ids = ids(&campaign);
    assert_eq!(campaign.dispatch().await, DispatchOutcome::Acknowledged);

    let seen = until_terminal(&mut control, &ids).await;
    let status = terminal_of(&seen, &ids[0]);
    assert_eq!(status.status, ControlStatus::Failed);
    assert!(status.msg.contains("after 3 deliveries"), "{}", status.msg);
    assert_eq!(broker.pending(), 0);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_failure_propagates_down_the_chain() {
    let broker = InMemoryBroker::new();
    let (_client, mut control) = observer(&broker).await;
    let agent = start(&broker, config("agent-f").with_capability("shell")).await;

    let campaign = campaign_for(
        &agent,
        vec![Activity::shell("exit 3"), Activity::shell("echo never")],
    );
    let ids = ids(&campaign);
    assert_eq!(campaign.dispatch().await, DispatchOutcome::Acknowledged);

    let seen = until_terminal(&mut control, &ids).await;
    assert_eq!(terminal_of(&seen, &ids[0]).status, ControlStatus::Failed);
    let second = terminal_of(&seen, &ids[1]);
    assert_eq!(second.status, ControlStatus::Failed);
    assert!(second.msg.contains("predecessor failed"), "{}", second.msg);
    assert!(!seen
        .iter()
        .any(|m| m.activity_id == ids[1] && m.status == ControlStatus::Processing));

    agent.shutdown().await;
}

#[tokio::test]
async fn test_unstageable_input_skips_payload() {
    let broker = InMemoryBroker::new();
    let (_client, mut control) = observer(&broker).await;

    let mut plugins = PluginRegistry::new();
    plugins.register(ShellPlugin::new());
    plugins.register(LocalTransferPlugin::new());
    let agent = Agent::new(
        config("stager")
            .with_capability("shell")
            .with_capability("transfer"),
    )
    .with_broker(Arc::new(broker.handle()))
    .with_plugins(plugins)
    .start()
    .await
    .unwrap();

    let marker = std::env::temp_dir().join(format!("convoy-marker-{}", Uuid::new_v4()));
    let campaign = campaign_for(
        &agent,
        vec![Activity::shell(format!("touch {}", marker.display())).file("gs://bucket/input.csv")],
    );
    let ids = ids(&campaign);
    assert_eq!(campaign.dispatch().await, DispatchOutcome::Failed(
        "Credentials unavailable: campaign moves credentialed data but has no credential provider".into()
    ));

    // With credentials the campaign goes out, but the local copier cannot
    // fetch from a bucket.
    let campaign = campaign.with_credentials(Arc::new(convoy_agent::StaticTokens(Default::default())));
    assert_eq!(campaign.dispatch().await, DispatchOutcome::Acknowledged);

    let seen = until_terminal(&mut control, &ids).await;
    let status = terminal_of(&seen, &ids[0]);
    assert_eq!(status.status, ControlStatus::Failed);
    assert!(status.msg.contains("Staging failed"), "{}", status.msg);
    assert!(!marker.exists());

    agent.shutdown().await;
}
