//! Internal queues between agent workers.

use convoy_core::DagNode;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One DAG node travelling through the agent.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub node_id: String,
    pub node: DagNode,
}

impl WorkItem {
    #[must_use]
    pub fn new(node_id: impl Into<String>, node: DagNode) -> Self {
        Self {
            node_id: node_id.into(),
            node,
        }
    }
}

/// Receiving end that outlives the worker holding it, so a restarted worker
/// picks up where the failed one stopped.
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Bounded channel with a [`SharedReceiver`].
#[must_use]
pub fn shared_channel<T>(capacity: usize) -> (mpsc::Sender<T>, SharedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, Arc::new(Mutex::new(rx)))
}

/// Next value from a shared receiver; `None` once every sender is gone.
pub async fn next<T>(rx: &SharedReceiver<T>) -> Option<T> {
    rx.lock().await.recv().await
}
