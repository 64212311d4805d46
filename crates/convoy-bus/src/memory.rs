//! In-process broker.
//!
//! Every handle obtained through [`InMemoryBroker::handle`] behaves like an
//! independent client of the same broker, so several agents can share one
//! process.

use async_trait::async_trait;
use futures::stream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, warn};

use crate::error::BusError;
use crate::traits::{Acker, Broker, Delivery, DeliveryStream, Topic};

const CONTROL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Queued {
    body: Vec<u8>,
    delivery_count: u64,
}

struct Shared {
    queue: Mutex<VecDeque<Queued>>,
    available: Notify,
    control: broadcast::Sender<Vec<u8>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Queued>> {
        // The queue holds plain data, so a poisoned lock is still usable.
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn push(&self, message: Queued) {
        self.lock().push_back(message);
        self.available.notify_one();
    }

    /// Put a delivered message back at the head, ahead of anything published
    /// after it.
    fn requeue(&self, message: Queued) {
        self.lock().push_front(message);
        self.available.notify_one();
    }

    fn pop(&self) -> Option<Queued> {
        let mut message = self.lock().pop_front()?;
        message.delivery_count += 1;
        Some(message)
    }
}

/// In-process broker with a work queue and a fan-out channel.
pub struct InMemoryBroker {
    shared: Arc<Shared>,
    connected: AtomicBool,
    closed: watch::Sender<bool>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a broker with empty channels.
    #[must_use]
    pub fn new() -> Self {
        let (control, _) = broadcast::channel(CONTROL_CAPACITY);
        Self::with_shared(Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            control,
        }))
    }

    fn with_shared(shared: Arc<Shared>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            shared,
            connected: AtomicBool::new(false),
            closed,
        }
    }

    /// A new client of the same broker.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self::with_shared(Arc::clone(&self.shared))
    }

    /// Messages waiting in the work queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().len()
    }

    fn ensure_connected(&self) -> Result<(), BusError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }

    fn work_queue(&self) -> DeliveryStream {
        let state = (Arc::clone(&self.shared), self.closed.subscribe());
        Box::pin(stream::unfold(state, |(shared, mut closed)| async move {
            loop {
                if *closed.borrow() {
                    return None;
                }
                if let Some(message) = shared.pop() {
                    let acker = MemoryAcker {
                        shared: Arc::clone(&shared),
                        message: Some(Queued {
                            body: message.body.clone(),
                            delivery_count: message.delivery_count,
                        }),
                    };
                    let delivery =
                        Delivery::manual(message.body, message.delivery_count, Box::new(acker));
                    return Some((delivery, (shared, closed)));
                }
                tokio::select! {
                    () = shared.available.notified() => {}
                    changed = closed.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        }))
    }

    fn fanout(&self) -> DeliveryStream {
        let state = (self.shared.control.subscribe(), self.closed.subscribe());
        Box::pin(stream::unfold(state, |(mut rx, mut closed)| async move {
            loop {
                if *closed.borrow() {
                    return None;
                }
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(body) => return Some((Delivery::auto(body), (rx, closed))),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Control listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    },
                    changed = closed.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<(), BusError> {
        self.connected.store(true, Ordering::SeqCst);
        self.closed.send_replace(false);
        debug!("In-memory broker connected");
        Ok(())
    }

    async fn send(&self, topic: Topic, body: Vec<u8>) -> Result<(), BusError> {
        self.ensure_connected()?;
        match topic {
            Topic::Activities => self.shared.push(Queued {
                body,
                delivery_count: 0,
            }),
            Topic::Control => {
                // No listener is not an error for a fan-out channel.
                let _ = self.shared.control.send(body);
            }
        }
        Ok(())
    }

    async fn listen(&self, topic: Topic) -> Result<DeliveryStream, BusError> {
        self.ensure_connected()?;
        debug!(topic = %topic, "Listening");
        Ok(match topic {
            Topic::Activities => self.work_queue(),
            Topic::Control => self.fanout(),
        })
    }

    async fn close(&self) -> Result<(), BusError> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.send_replace(true);
        debug!("In-memory broker closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Settles one work-queue delivery. Dropping it unsettled requeues the message.
struct MemoryAcker {
    shared: Arc<Shared>,
    message: Option<Queued>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&mut self) -> Result<(), BusError> {
        self.message = None;
        Ok(())
    }

    async fn nack(&mut self) -> Result<(), BusError> {
        if let Some(message) = self.message.take() {
            self.shared.requeue(message);
        }
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.shared.requeue(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn connected() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.connect().await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let broker = InMemoryBroker::new();
        assert!(matches!(
            broker.send(Topic::Activities, b"x".to_vec()).await,
            Err(BusError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let broker = connected().await;
        let mut deliveries = broker.listen(Topic::Activities).await.unwrap();

        broker.send(Topic::Activities, b"one".to_vec()).await.unwrap();
        let delivery = deliveries.next().await.unwrap();
        assert_eq!(delivery.body, b"one");
        assert_eq!(delivery.delivery_count, 1);
        delivery.ack().await.unwrap();

        assert_eq!(broker.pending(), 0);
        assert!(timeout(Duration::from_millis(50), deliveries.next())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_nack_redelivers_with_count() {
        let broker = connected().await;
        let mut deliveries = broker.listen(Topic::Activities).await.unwrap();

        broker.send(Topic::Activities, b"job".to_vec()).await.unwrap();
        deliveries.next().await.unwrap().nack().await.unwrap();
        deliveries.next().await.unwrap().nack().await.unwrap();

        let third = deliveries.next().await.unwrap();
        assert_eq!(third.body, b"job");
        assert_eq!(third.delivery_count, 3);
        third.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_nacked_message_keeps_its_place() {
        let broker = connected().await;
        let mut deliveries = broker.listen(Topic::Activities).await.unwrap();

        for body in [b"a", b"b", b"c"] {
            broker.send(Topic::Activities, body.to_vec()).await.unwrap();
        }
        deliveries.next().await.unwrap().nack().await.unwrap();

        let mut order = Vec::new();
        for _ in 0..3 {
            let delivery = deliveries.next().await.unwrap();
            order.push(delivery.body.clone());
            delivery.ack().await.unwrap();
        }
        assert_eq!(order, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn test_unsettled_delivery_is_requeued() {
        let broker = connected().await;
        let mut deliveries = broker.listen(Topic::Activities).await.unwrap();

        broker.send(Topic::Activities, b"lost".to_vec()).await.unwrap();
        drop(deliveries.next().await.unwrap());

        let again = deliveries.next().await.unwrap();
        assert_eq!(again.delivery_count, 2);
        again.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_competing_consumers_share_work() {
        let broker = connected().await;
        let other = broker.handle();
        other.connect().await.unwrap();

        let mut a = broker.listen(Topic::Activities).await.unwrap();
        let mut b = other.listen(Topic::Activities).await.unwrap();

        broker.send(Topic::Activities, b"1".to_vec()).await.unwrap();
        broker.send(Topic::Activities, b"2".to_vec()).await.unwrap();

        let first = timeout(Duration::from_secs(1), a.next()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), b.next()).await.unwrap().unwrap();
        assert_ne!(first.body, second.body);
        first.ack().await.unwrap();
        second.ack().await.unwrap();
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_control_fans_out() {
        let broker = connected().await;
        let other = broker.handle();
        other.connect().await.unwrap();

        let mut a = broker.listen(Topic::Control).await.unwrap();
        let mut b = other.listen(Topic::Control).await.unwrap();

        other.send(Topic::Control, b"status".to_vec()).await.unwrap();
        assert_eq!(a.next().await.unwrap().body, b"status");
        assert_eq!(b.next().await.unwrap().body, b"status");
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let broker = connected().await;
        let mut work = broker.listen(Topic::Activities).await.unwrap();
        let mut control = broker.listen(Topic::Control).await.unwrap();

        broker.close().await.unwrap();
        assert!(!broker.is_connected());
        assert!(timeout(Duration::from_secs(1), work.next()).await.unwrap().is_none());
        assert!(timeout(Duration::from_secs(1), control.next()).await.unwrap().is_none());
    }
}
