//! Campaign DAG - an ordered chain of activity nodes between two sentinels.
//!
//! ```text
//! MONITOR ──► activity_1 ──► activity_2 ──► ... ──► activity_n ──► TERMINATOR
//! ```
//!
//! `MONITOR` has no predecessors, `TERMINATOR` has no successors. Nodes keep
//! their insertion order through every codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::activity::{ActivityStatus, ActivityType, SubmittedActivity};
use crate::error::CoreError;

/// Head sentinel; its executor spawns the campaign monitor.
pub const MONITOR: &str = "MONITOR";

/// Tail sentinel; reaching it completes the campaign.
pub const TERMINATOR: &str = "TERMINATOR";

/// Whether `id` names one of the two sentinel nodes.
#[must_use]
pub fn is_sentinel(id: &str) -> bool {
    id == MONITOR || id == TERMINATOR
}

/// Token set obtained by the credential-refresh flow, attached to every node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransferTokens {
    /// Resource server / scope -> access token
    pub tokens: BTreeMap<String, String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TransferTokens {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Attributes of one DAG node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    /// The activity; `None` for sentinels
    #[serde(default)]
    pub activity: Option<SubmittedActivity>,
    pub campaign_id: String,
    #[serde(default)]
    pub predecessors: Vec<String>,
    #[serde(default)]
    pub successors: Vec<String>,
    #[serde(default)]
    pub activity_status: Option<ActivityStatus>,
    #[serde(default)]
    pub transfer_tokens: Option<TransferTokens>,
    #[serde(default)]
    pub transfer_params: BTreeMap<String, serde_json::Value>,
    /// Campaign membership, only set on `MONITOR`
    #[serde(default)]
    pub all_activity_ids: Vec<String>,
}

impl DagNode {
    /// A node without an activity.
    #[must_use]
    pub fn sentinel(campaign_id: impl Into<String>) -> Self {
        Self {
            activity: None,
            campaign_id: campaign_id.into(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            activity_status: None,
            transfer_tokens: None,
            transfer_params: BTreeMap::new(),
            all_activity_ids: Vec::new(),
        }
    }

    /// A node wrapping `activity`.
    #[must_use]
    pub fn for_activity(activity: SubmittedActivity) -> Self {
        let mut node = Self::sentinel(activity.campaign_id.clone());
        node.activity_status = Some(activity.status);
        node.activity = Some(activity);
        node
    }

    /// Declared type of the wrapped activity.
    #[must_use]
    pub fn activity_type(&self) -> Option<ActivityType> {
        self.activity.as_ref().map(SubmittedActivity::activity_type)
    }

    #[must_use]
    pub fn with_predecessors(mut self, predecessors: Vec<String>) -> Self {
        self.predecessors = predecessors;
        self
    }

    #[must_use]
    pub fn with_transfer_tokens(mut self, tokens: Option<TransferTokens>) -> Self {
        self.transfer_tokens = tokens;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NodeEntry {
    id: String,
    node: DagNode,
}

#[derive(Serialize)]
struct NodeEntryRef<'a> {
    id: &'a str,
    node: &'a DagNode,
}

/// Encode one node independently of its graph.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_node(id: &str, node: &DagNode) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(&NodeEntryRef { id, node })
        .map_err(|e| CoreError::SerializationError(e.to_string()))
}

/// Decode a node produced by [`encode_node`].
///
/// # Errors
///
/// Returns an error if `bytes` is not an encoded node.
pub fn decode_node(bytes: &[u8]) -> Result<(String, DagNode), CoreError> {
    let entry: NodeEntry = serde_json::from_slice(bytes)
        .map_err(|e| CoreError::DeserializationError(e.to_string()))?;
    Ok((entry.id, entry.node))
}

/// Directed graph of one campaign.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dag {
    nodes: Vec<NodeEntry>,
    edges: Vec<(String, String)>,
}

impl Dag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build `MONITOR -> a1 -> ... -> an -> TERMINATOR` in list order, with
    /// relationships computed and `tokens` attached to every node.
    #[must_use]
    pub fn linear_chain(
        campaign_id: &str,
        activities: Vec<SubmittedActivity>,
        tokens: Option<TransferTokens>,
    ) -> Self {
        let mut dag = Self::new();
        let ids: Vec<String> = activities.iter().map(|a| a.id().to_string()).collect();

        let mut monitor = DagNode::sentinel(campaign_id).with_transfer_tokens(tokens.clone());
        monitor.all_activity_ids = ids.iter().cloned().chain([TERMINATOR.to_string()]).collect();
        dag.add_node(MONITOR, monitor);

        for activity in activities {
            let id = activity.id().to_string();
            dag.add_node(
                id,
                DagNode::for_activity(activity).with_transfer_tokens(tokens.clone()),
            );
        }
        dag.add_node(
            TERMINATOR,
            DagNode::sentinel(campaign_id).with_transfer_tokens(tokens),
        );

        let mut previous = MONITOR.to_string();
        for id in ids {
            dag.add_edge(&previous, &id);
            previous = id;
        }
        dag.add_edge(&previous, TERMINATOR);

        dag.update_node_relationships();
        dag
    }

    /// Insert a node, replacing the attributes of an existing one.
    pub fn add_node(&mut self, id: impl Into<String>, node: DagNode) {
        let id = id.into();
        match self.nodes.iter_mut().find(|e| e.id == id) {
            Some(entry) => entry.node = node,
            None => self.nodes.push(NodeEntry { id, node }),
        }
    }

    /// Insert an edge. Duplicates are ignored.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        if !self.edges.iter().any(|(f, t)| f == from && t == to) {
            self.edges.push((from.to_string(), to.to_string()));
        }
    }

    /// Recompute every node's `predecessors` and `successors` from the edge set.
    pub fn update_node_relationships(&mut self) {
        let mut predecessors: HashMap<&str, Vec<String>> = HashMap::new();
        let mut successors: HashMap<&str, Vec<String>> = HashMap::new();
        for (from, to) in &self.edges {
            successors.entry(from).or_default().push(to.clone());
            predecessors.entry(to).or_default().push(from.clone());
        }

        for entry in &mut self.nodes {
            entry.node.predecessors = predecessors.remove(entry.id.as_str()).unwrap_or_default();
            entry.node.successors = successors.remove(entry.id.as_str()).unwrap_or_default();
        }
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.iter().find(|e| e.id == id).map(|e| &e.node)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut DagNode> {
        self.nodes.iter_mut().find(|e| e.id == id).map(|e| &mut e.node)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &DagNode)> {
        self.nodes.iter().map(|e| (e.id.as_str(), &e.node))
    }

    #[must_use]
    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    /// IDs of the non-sentinel nodes, in insertion order.
    #[must_use]
    pub fn activity_ids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|e| !is_sentinel(&e.id))
            .map(|e| e.id.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in dependency order; ties keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NodeNotFound`] for an edge to an unknown node and
    /// [`CoreError::Cycle`] if the graph is cyclic.
    pub fn topological_order(&self) -> Result<Vec<String>, CoreError> {
        let position: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (from, to) in &self.edges {
            let f = *position
                .get(from.as_str())
                .ok_or_else(|| CoreError::NodeNotFound(from.clone()))?;
            let t = *position
                .get(to.as_str())
                .ok_or_else(|| CoreError::NodeNotFound(to.clone()))?;
            outgoing[f].push(t);
            in_degree[t] += 1;
        }

        let mut ready: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_front() {
            order.push(self.nodes[i].id.clone());
            let mut released = Vec::new();
            for &next in &outgoing[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    released.push(next);
                }
            }
            released.sort_unstable();
            ready.extend(released);
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(CoreError::Cycle)
        }
    }

    /// Whether the edges reference known nodes and form no cycle.
    #[must_use]
    pub fn is_directed_acyclic(&self) -> bool {
        self.topological_order().is_ok()
    }

    /// Encode the whole graph.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize_dag(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    /// Decode a graph produced by [`Dag::serialize_dag`].
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not an encoded graph.
    pub fn deserialize_dag(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::DeserializationError(e.to_string()))
    }

    /// Encode a single node for forwarding on its own.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NodeNotFound`] if `id` is not in the graph.
    pub fn serialize_node(&self, id: &str) -> Result<Vec<u8>, CoreError> {
        let node = self
            .node(id)
            .ok_or_else(|| CoreError::NodeNotFound(id.to_string()))?;
        encode_node(id, node)
    }

    /// Decode a node produced by [`Dag::serialize_node`].
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not an encoded node.
    pub fn deserialize_node(bytes: &[u8]) -> Result<(String, DagNode), CoreError> {
        decode_node(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Activity;

    fn chain(n: usize) -> Dag {
        let activities = (0..n)
            .map(|i| Activity::shell(format!("echo {i}")).submit("camp-1"))
            .collect();
        Dag::linear_chain("camp-1", activities, None)
    }

    #[test]
    fn test_linear_chain_shape() {
        for n in [1, 2, 5] {
            let dag = chain(n);
            assert_eq!(dag.len(), n + 2);

            let monitors: Vec<_> = dag.nodes().filter(|(id, _)| *id == MONITOR).collect();
            assert_eq!(monitors.len(), 1);
            assert!(monitors[0].1.predecessors.is_empty());
            let mut tracked = dag.activity_ids();
            tracked.push(TERMINATOR.to_string());
            assert_eq!(monitors[0].1.all_activity_ids, tracked);

            let terminator = dag.node(TERMINATOR).unwrap();
            assert!(terminator.successors.is_empty());
            assert_eq!(terminator.predecessors.len(), 1);

            for id in dag.activity_ids() {
                let node = dag.node(&id).unwrap();
                assert_eq!(node.predecessors.len(), 1);
                assert!(node.successors.len() <= 1);
            }
        }
    }

    #[test]
    fn test_scenario_a_order() {
        let a = Activity::shell("echo hi").submit("camp-a");
        let b = Activity::shell("echo bye").submit("camp-a");
        let (a_id, b_id) = (a.id().to_string(), b.id().to_string());

        let dag = Dag::linear_chain("camp-a", vec![a, b], None);
        assert_eq!(
            dag.topological_order().unwrap(),
            vec![MONITOR.to_string(), a_id.clone(), b_id.clone(), TERMINATOR.to_string()]
        );
        assert_eq!(dag.node(&a_id).unwrap().predecessors, vec![MONITOR.to_string()]);
        assert_eq!(dag.node(&b_id).unwrap().predecessors, vec![a_id]);
        assert!(dag
            .nodes()
            .all(|(_, n)| n.activity_type() != Some(ActivityType::Transfer)));
    }

    #[test]
    fn test_relationships_idempotent() {
        let mut dag = chain(3);
        let before = dag.clone();
        dag.update_node_relationships();
        assert_eq!(dag, before);
        dag.update_node_relationships();
        assert_eq!(dag, before);
    }

    #[test]
    fn test_dag_roundtrip_preserves_order() {
        let tokens = TransferTokens {
            tokens: BTreeMap::from([("transfer.api".to_string(), "tok".to_string())]),
            expires_at: None,
        };
        let activities = vec![
            Activity::shell("true").submit("camp-2"),
            Activity::transfer("/a", "/b").submit("camp-2"),
        ];
        let dag = Dag::linear_chain("camp-2", activities, Some(tokens));

        let decoded = Dag::deserialize_dag(&dag.serialize_dag().unwrap()).unwrap();
        assert_eq!(decoded, dag);
        let ids: Vec<_> = decoded.nodes().map(|(id, _)| id.to_string()).collect();
        let original: Vec<_> = dag.nodes().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, original);
        assert_eq!(decoded.edges(), dag.edges());
    }

    #[test]
    fn test_node_roundtrip() {
        let dag = chain(2);
        for (id, node) in dag.nodes() {
            let (decoded_id, decoded) =
                Dag::deserialize_node(&dag.serialize_node(id).unwrap()).unwrap();
            assert_eq!(decoded_id, id);
            assert_eq!(&decoded, node);
        }
        assert!(matches!(
            dag.serialize_node("missing"),
            Err(CoreError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_cycle_detection() {
        let mut dag = Dag::new();
        dag.add_node("a", DagNode::sentinel("c"));
        dag.add_node("b", DagNode::sentinel("c"));
        dag.add_edge("a", "b");
        assert!(dag.is_directed_acyclic());

        dag.add_edge("b", "a");
        assert!(!dag.is_directed_acyclic());
        assert!(matches!(dag.topological_order(), Err(CoreError::Cycle)));
    }

    #[test]
    fn test_edge_to_unknown_node() {
        let mut dag = Dag::new();
        dag.add_node("a", DagNode::sentinel("c"));
        dag.add_edge("a", "ghost");
        assert!(matches!(
            dag.topological_order(),
            Err(CoreError::NodeNotFound(id)) if id == "ghost"
        ));
    }

    #[test]
    fn test_add_node_replaces_attributes() {
        let mut dag = Dag::new();
        dag.add_node("x", DagNode::sentinel("c1"));
        dag.add_node("x", DagNode::sentinel("c2"));
        assert_eq!(dag.len(), 1);
        assert_eq!(dag.node("x").unwrap().campaign_id, "c2");
    }

    #[test]
    fn test_token_expiry() {
        let mut tokens = TransferTokens::default();
        assert!(!tokens.is_expired());
        tokens.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(tokens.is_expired());
    }
}
