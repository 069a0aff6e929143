//! In-process broker backed by Tokio primitives
//!
//! Queues are `VecDeque`s woken through a `Notify`, channels are
//! `broadcast` senders created on first subscribe and dropped once their
//! last receiver is gone, and the key-value store checks expiry on read and
//! sweeps expired keys on write.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::Instant;

use super::{Broker, BrokerError};

/// Buffered messages per channel before slow subscribers start lagging
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    queue_notify: Notify,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    values: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a channel; only messages published afterwards arrive
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.lock().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Number of items waiting in a queue
    pub async fn queue_len(&self, queue: &str) -> usize {
        let queues = self.queues.lock().await;
        queues.get(queue).map(|q| q.len()).unwrap_or(0)
    }

    async fn try_pop(&self, queue: &str) -> Option<String> {
        let mut queues = self.queues.lock().await;
        queues.get_mut(queue).and_then(|q| q.pop_back())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<(), BrokerError> {
        {
            let mut queues = self.queues.lock().await;
            queues
                .entry(queue.to_string())
                .or_default()
                .push_front(payload.to_string());
        }
        self.queue_notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, BrokerError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a concurrent push is not missed
            let notified = self.queue_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(queue).await {
                return Ok(Some(item));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let mut channels = self.channels.lock().await;
        let Some(sender) = channels.get(channel) else {
            return Ok(());
        };
        if sender.receiver_count() == 0 {
            channels.remove(channel);
        } else {
            // A receiver dropped since the check is not an error for pub/sub
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BrokerError> {
        let now = Instant::now();
        let mut values = self.values.lock().await;
        values.retain(|_, (_, expires_at)| *expires_at > now);
        values.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        let mut values = self.values.lock().await;
        match values.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                values.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }
}
