//! Queue, pub/sub and key-value plumbing shared by producers and workers
//!
//! # Key layout
//!
//! ```text
//! queue:<agentType>     list     producers LPUSH tasks, workers BRPOP
//! progress:<taskId>     channel  ProgressEvent JSON, one per publish
//! files:<projectId>     channel  FileMutation JSON for live preview
//! result:<taskId>       string   TaskResult JSON, expires after the TTL
//! ```
//!
//! Two backends implement [`Broker`]: an in-process one (tests, local
//! development) and Redis (feature `redis`).

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::task::AgentType;

pub use memory::InMemoryBroker;
#[cfg(feature = "redis")]
pub use self::redis::RedisBroker;

/// Error type for broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unsupported broker url '{0}' (expected memory:// or redis://)")]
    UnsupportedUrl(String),

    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command failed: {0}")]
    Command(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Transport used for the work queue, progress channels and result store
#[async_trait]
pub trait Broker: Send + Sync {
    /// Short backend name for logs and the health endpoint
    fn backend(&self) -> &'static str;

    /// Append a payload to the head of a list-style queue
    async fn push(&self, queue: &str, payload: &str) -> Result<(), BrokerError>;

    /// Blocking pop from the tail of a queue
    ///
    /// Returns `Ok(None)` when nothing arrived within `timeout`. An item is
    /// handed to exactly one caller.
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, BrokerError>;

    /// Fire a message at the current subscribers of a channel
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;

    /// Store a value that expires after `ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BrokerError>;

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;
}

pub fn queue_key(agent_type: AgentType) -> String {
    format!("queue:{}", agent_type)
}

pub fn progress_channel(task_id: &str) -> String {
    format!("progress:{}", task_id)
}

pub fn files_channel(project_id: &str) -> String {
    format!("files:{}", project_id)
}

pub fn result_key(task_id: &str) -> String {
    format!("result:{}", task_id)
}

/// Build a broker from a URL (`memory://` or `redis://host:port`)
pub async fn connect(url: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(InMemoryBroker::new()));
    }

    #[cfg(feature = "redis")]
    {
        if url.starts_with("redis://") || url.starts_with("rediss://") {
            let broker = RedisBroker::connect(url).await?;
            return Ok(Arc::new(broker));
        }
    }

    Err(BrokerError::UnsupportedUrl(url.to_string()))
}
