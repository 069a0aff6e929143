//! Redis backend
//!
//! Uses two multiplexed connections: BRPOP blocks the connection it runs
//! on, so queue pops get their own and everything else shares the other.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::{Broker, BrokerError};

pub struct RedisBroker {
    commands: MultiplexedConnection,
    blocking: Mutex<MultiplexedConnection>,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let commands = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let blocking = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        tracing::info!("Connected to Redis broker");
        Ok(Self {
            commands,
            blocking: Mutex::new(blocking),
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.commands.clone();
        let _: i64 = conn.lpush(queue, payload).await?;
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, BrokerError> {
        let mut conn = self.blocking.lock().await;
        let popped: Option<(String, String)> = conn.brpop(queue, timeout.as_secs_f64()).await?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.commands.clone();
        let _: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BrokerError> {
        let mut conn = self.commands.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        let mut conn = self.commands.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }
}
