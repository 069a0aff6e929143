//! Queue consumer
//!
//! One worker serves one `queue:<agentType>` and processes a single task at
//! a time. The loop only exits on shutdown: malformed payloads are dropped,
//! broker failures and failed tasks are followed by a backoff, and a panic
//! inside a task still produces a stored result.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::agent::AgentController;
use crate::broker::{queue_key, result_key, Broker, BrokerError};
use crate::config::WorkerSettings;
use crate::metrics::{QUEUE_POLLS, TASKS_IN_FLIGHT, TASKS_TOTAL, WORKER_ERRORS, WORKER_HEARTBEAT};
use crate::progress::{ProgressKind, ProgressPublisher};
use crate::task::{AgentType, Task, TaskResult};

/// Floor for the in-task heartbeat interval
const MIN_HEARTBEAT_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub agent_type: AgentType,
    pub poll_timeout: Duration,
    pub backoff: Duration,
    pub result_ttl: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_settings(&WorkerSettings::default())
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            agent_type: settings.agent_type,
            poll_timeout: settings.poll_timeout(),
            backoff: settings.backoff(),
            result_ttl: settings.result_ttl(),
        }
    }
}

/// Liveness counters shared with the health endpoint
#[derive(Debug, Default)]
pub struct WorkerStatus {
    /// Unix millis of the last poll or in-task tick, 0 before the first one
    last_heartbeat_ms: AtomicI64,
    tasks_processed: AtomicU64,
    busy: AtomicBool,
}

impl WorkerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeat(&self) {
        let now = Utc::now();
        self.last_heartbeat_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
        WORKER_HEARTBEAT.set(now.timestamp() as f64);
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        match self.last_heartbeat_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }

    fn start_task(&self) {
        self.busy.store(true, Ordering::Relaxed);
    }

    fn finish_task(&self) {
        self.busy.store(false, Ordering::Relaxed);
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Worker {
    broker: Arc<dyn Broker>,
    controller: Arc<AgentController>,
    publisher: ProgressPublisher,
    config: WorkerConfig,
    status: Arc<WorkerStatus>,
}

impl Worker {
    pub fn new(
        broker: Arc<dyn Broker>,
        controller: Arc<AgentController>,
        publisher: ProgressPublisher,
        config: WorkerConfig,
        status: Arc<WorkerStatus>,
    ) -> Self {
        Self {
            broker,
            controller,
            publisher,
            config,
            status,
        }
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        self.status.clone()
    }

    /// Consume tasks until `shutdown` turns true (or its sender is dropped)
    ///
    /// Shutdown is checked between polls, so a task that was already popped
    /// always runs to completion and gets its result stored.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let queue = queue_key(self.config.agent_type);
        info!(
            queue = %queue,
            backend = self.broker.backend(),
            poll_timeout_secs = self.config.poll_timeout.as_secs_f64(),
            "Worker started"
        );

        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            QUEUE_POLLS.inc();
            let payload = match self.broker.pop(&queue, self.config.poll_timeout).await {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    self.status.heartbeat();
                    continue;
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Queue pop failed");
                    WORKER_ERRORS.with_label_values(&["broker"]).inc();
                    self.backoff(&mut shutdown).await;
                    continue;
                }
            };
            self.status.heartbeat();

            let task = match serde_json::from_str::<Task>(&payload) {
                Ok(task) => task,
                Err(e) => {
                    warn!(error = %e, payload_len = payload.len(), "Dropping malformed task payload");
                    WORKER_ERRORS.with_label_values(&["malformed_task"]).inc();
                    continue;
                }
            };

            let result = self.process(task).await;
            let mut failed = result.error.is_some();

            if let Err(e) = self.store_result(&result).await {
                error!(task_id = %result.task_id, error = %e, "Failed to store task result");
                WORKER_ERRORS.with_label_values(&["result_store"]).inc();
                failed = true;
            }

            if failed {
                self.backoff(&mut shutdown).await;
            }
        }

        info!(
            tasks_processed = self.status.tasks_processed(),
            "Worker stopped"
        );
    }

    /// Drive one task to its result, catching panics
    ///
    /// The heartbeat keeps ticking every poll interval while the task runs.
    pub async fn process(&self, task: Task) -> TaskResult {
        debug!(task_id = %task.task_id, "Processing task");
        TASKS_IN_FLIGHT.inc();
        self.status.start_task();

        let iterations = AtomicUsize::new(0);
        let run = AssertUnwindSafe(self.controller.run_tracked(&task, &iterations)).catch_unwind();
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(self.config.poll_timeout.max(MIN_HEARTBEAT_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                _ = ticker.tick() => self.status.heartbeat(),
            }
        };

        TASKS_IN_FLIGHT.dec();
        self.status.finish_task();

        match outcome {
            Ok(outcome) => outcome.into_result(&task),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                let iterations = iterations.load(Ordering::Relaxed);
                error!(task_id = %task.task_id, iterations, panic = %message, "Task panicked");
                TASKS_TOTAL.with_label_values(&["panicked"]).inc();
                WORKER_ERRORS.with_label_values(&["panic"]).inc();

                let error = format!("task panicked: {}", message);
                self.publisher
                    .task_event(
                        &task.task_id,
                        ProgressKind::TaskError {
                            iterations,
                            error: error.clone(),
                        },
                    )
                    .await;

                TaskResult {
                    task_id: task.task_id.clone(),
                    agent_type: task.agent_type,
                    iterations,
                    completed: false,
                    error: Some(error),
                    timestamp: Utc::now(),
                }
            }
        }
    }

    async fn store_result(&self, result: &TaskResult) -> Result<(), WorkerError> {
        let json = serde_json::to_string(result)?;
        self.broker
            .set_ex(&result_key(&result.task_id), &json, self.config.result_ttl)
            .await?;
        info!(
            task_id = %result.task_id,
            completed = result.completed,
            iterations = result.iterations,
            "Stored task result"
        );
        Ok(())
    }

    async fn backoff(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.backoff) => {}
            _ = shutdown.changed() => {}
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
