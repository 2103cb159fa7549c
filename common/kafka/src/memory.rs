use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Notify;

use crate::transport::{Acknowledge, OffsetErr, PublishError, Publisher, RecvErr, Subscription};

/// In-process topic bus with at-least-once delivery.
///
/// Every subscription to a topic competes for the same FIFO queue, like consumers
/// of one kafka consumer group. A rewound message goes back to the head of its
/// topic. Used by tests and for running the service without a broker.
#[derive(Clone, Default)]
pub struct MemoryBus {
    topics: Arc<Mutex<HashMap<String, Arc<MemoryTopic>>>>,
    publish_failures: Arc<Mutex<HashMap<String, usize>>>,
}

#[derive(Default)]
struct MemoryTopic {
    queue: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryTopic {
    fn push_back(&self, payload: Vec<u8>) {
        lock(&self.queue).push_back(payload);
        self.notify.notify_one();
    }

    fn push_front(&self, payload: Vec<u8>) {
        lock(&self.queue).push_front(payload);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Vec<u8>> {
        lock(&self.queue).pop_front()
    }

    fn len(&self) -> usize {
        lock(&self.queue).len()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Arc<MemoryTopic> {
        lock(&self.topics)
            .entry(name.to_owned())
            .or_default()
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> MemorySubscription {
        MemorySubscription {
            name: topic.to_owned(),
            topic: self.topic(topic),
        }
    }

    /// Enqueue a raw payload, bypassing injected failures.
    pub fn send(&self, topic: &str, payload: Vec<u8>) {
        self.topic(topic).push_back(payload);
    }

    pub fn send_json<T: Serialize>(
        &self,
        topic: &str,
        message: &T,
    ) -> Result<(), serde_json::Error> {
        self.send(topic, serde_json::to_vec(message)?);
        Ok(())
    }

    /// Take the oldest message of `topic`, for reading output topics in tests.
    pub fn try_pop(&self, topic: &str) -> Option<Vec<u8>> {
        self.topic(topic).pop()
    }

    pub fn pending(&self, topic: &str) -> usize {
        self.topic(topic).len()
    }

    /// Make the next `times` publishes to `topic` fail as unavailable.
    pub fn fail_publishes(&self, topic: &str, times: usize) {
        lock(&self.publish_failures).insert(topic.to_owned(), times);
    }
}

#[async_trait]
impl Publisher for MemoryBus {
    async fn publish(
        &self,
        topic: &str,
        _key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        {
            let mut failures = lock(&self.publish_failures);
            if let Some(remaining) = failures.get_mut(topic) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PublishError::Unavailable(topic.to_owned()));
                }
            }
        }
        self.send(topic, payload.to_vec());
        Ok(())
    }
}

pub struct MemorySubscription {
    name: String,
    topic: Arc<MemoryTopic>,
}

pub struct MemoryAck {
    topic: Arc<MemoryTopic>,
    payload: Vec<u8>,
}

impl Acknowledge for MemoryAck {
    fn ack(self) -> Result<(), OffsetErr> {
        Ok(())
    }

    fn rewind(self) -> Result<(), OffsetErr> {
        self.topic.push_front(self.payload);
        Ok(())
    }
}

#[async_trait]
impl<T> Subscription<T> for MemorySubscription
where
    T: DeserializeOwned + Send + 'static,
{
    type Ack = MemoryAck;

    async fn recv(&self) -> Result<(T, MemoryAck), RecvErr> {
        let payload = loop {
            if let Some(payload) = self.topic.pop() {
                break payload;
            }
            // notify_one keeps a permit when nobody waits, so a push between pop and here is not lost
            self.topic.notify.notified().await;
        };

        if payload.is_empty() {
            return Err(RecvErr::Empty);
        }
        let message = serde_json::from_slice(&payload)?;
        Ok((
            message,
            MemoryAck {
                topic: self.topic.clone(),
                payload,
            },
        ))
    }

    fn topic(&self) -> &str {
        &self.name
    }
}
