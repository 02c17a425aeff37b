//! Job queue collaborators.
//!
//! Delivery is at-least-once: a received job stays in flight until it is
//! acked, or nacked back onto the queue.

use super::job::SigningJob;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A job handed to a consumer, with the handle needed to settle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Handle passed to [`JobQueue::ack`] or [`JobQueue::nack`]
    pub delivery_tag: u64,
    /// Decoded message
    pub job: SigningJob,
    /// 1 on first delivery
    pub attempt: u32,
}

/// Consume side of the job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Wait up to `wait` for the next job.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>>;

    /// The job reached a terminal state and must not be redelivered.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// The job was not completed. With `requeue` it is delivered again,
    /// otherwise it is dead-lettered.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Message {
    body: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    in_flight: HashMap<u64, Message>,
    dead_letters: Vec<Vec<u8>>,
    acked: u64,
    next_tag: u64,
}

/// In-process queue carrying JSON message bodies.
///
/// Messages that fail to decode, or exceed `max_deliveries`, move to the
/// dead-letter list.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    max_deliveries: u32,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(5)
    }
}

impl MemoryQueue {
    /// Queue that dead-letters a message after `max_deliveries` attempts.
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            max_deliveries: max_deliveries.max(1),
        }
    }

    /// Publish a job.
    pub fn publish(&self, job: &SigningJob) -> Result<()> {
        self.publish_raw(job.to_json()?)
    }

    /// Publish a raw message body.
    pub fn publish_raw(&self, body: Vec<u8>) -> Result<()> {
        self.lock()?.ready.push_back(Message { body, deliveries: 0 });
        self.notify.notify_one();
        Ok(())
    }

    /// Messages waiting for delivery.
    pub fn pending(&self) -> usize {
        self.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Messages delivered but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Number of acked messages.
    pub fn acked(&self) -> u64 {
        self.lock().map(|s| s.acked).unwrap_or(0)
    }

    /// Bodies of dead-lettered messages.
    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.lock().map(|s| s.dead_letters.clone()).unwrap_or_default()
    }

    /// Whether nothing is waiting or in flight.
    pub fn is_drained(&self) -> bool {
        self.lock()
            .map(|s| s.ready.is_empty() && s.in_flight.is_empty())
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| Error::Queue("queue lock poisoned".to_string()))
    }

    /// Pop the next decodable message, dead-lettering bad ones on the way.
    fn try_take(&self) -> Result<Option<Delivery>> {
        let mut state = self.lock()?;
        while let Some(mut message) = state.ready.pop_front() {
            match SigningJob::from_json(&message.body) {
                Ok(job) => {
                    message.deliveries += 1;
                    state.next_tag += 1;
                    let delivery_tag = state.next_tag;
                    let attempt = message.deliveries;
                    state.in_flight.insert(delivery_tag, message);
                    return Ok(Some(Delivery {
                        delivery_tag,
                        job,
                        attempt,
                    }));
                },
                Err(e) => {
                    log::warn!("Dead-lettering undecodable message: {}", e);
                    state.dead_letters.push(message.body);
                },
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_take()? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_take();
            }
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        let mut state = self.lock()?;
        state
            .in_flight
            .remove(&delivery_tag)
            .ok_or_else(|| Error::Queue(format!("unknown delivery tag {}", delivery_tag)))?;
        state.acked += 1;
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let requeued = {
            let mut state = self.lock()?;
            let message = state
                .in_flight
                .remove(&delivery_tag)
                .ok_or_else(|| Error::Queue(format!("unknown delivery tag {}", delivery_tag)))?;
            if requeue && message.deliveries < self.max_deliveries {
                state.ready.push_back(message);
                true
            } else {
                log::warn!(
                    "Dead-lettering message after {} deliveries",
                    message.deliveries
                );
                state.dead_letters.push(message.body);
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_receive_and_ack() {
        let queue = MemoryQueue::new(3);
        queue.publish(&SigningJob::new("doc-1", "alice")).unwrap();

        let delivery = queue.receive(WAIT).await.unwrap().unwrap();
        assert_eq!(delivery.job.document_key, "doc-1");
        assert_eq!(delivery.attempt, 1);
        assert_eq!(queue.in_flight(), 1);

        queue.ack(delivery.delivery_tag).await.unwrap();
        assert!(queue.is_drained());
        assert_eq!(queue.acked(), 1);
        assert!(queue.receive(WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_requeues_until_limit() {
        let queue = MemoryQueue::new(2);
        queue.publish(&SigningJob::new("doc-1", "alice")).unwrap();

        let first = queue.receive(WAIT).await.unwrap().unwrap();
        queue.nack(first.delivery_tag, true).await.unwrap();
        let second = queue.receive(WAIT).await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        queue.nack(second.delivery_tag, true).await.unwrap();

        assert!(queue.receive(WAIT).await.unwrap().is_none());
        assert_eq!(queue.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let queue = MemoryQueue::new(5);
        queue.publish(&SigningJob::new("doc-1", "alice")).unwrap();
        let delivery = queue.receive(WAIT).await.unwrap().unwrap();
        queue.nack(delivery.delivery_tag, false).await.unwrap();
        assert!(queue.is_drained());
        assert_eq!(queue.dead_letters().len(), 1);
        assert_eq!(queue.acked(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_dead_lettered() {
        let queue = MemoryQueue::new(5);
        queue.publish_raw(b"not json".to_vec()).unwrap();
        queue.publish(&SigningJob::new("doc-2", "bob")).unwrap();

        let delivery = queue.receive(WAIT).await.unwrap().unwrap();
        assert_eq!(delivery.job.document_key, "doc-2");
        assert_eq!(queue.dead_letters(), vec![b"not json".to_vec()]);
    }

    #[tokio::test]
    async fn test_unknown_tag() {
        let queue = MemoryQueue::new(5);
        assert!(matches!(queue.ack(99).await, Err(Error::Queue(_))));
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let queue = MemoryQueue::new(5);
        let producer = queue.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.publish(&SigningJob::new("late", "carol")).unwrap();
        });
        let delivery = queue.receive(Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap();
        assert_eq!(delivery.unwrap().job.document_key, "late");
    }
}
