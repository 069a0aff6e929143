//! Prometheus metrics for the orchestrator
//!
//! All metrics live in the default registry so `/metrics` can gather them
//! with a single `prometheus::gather()` call.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec,
    register_int_counter, register_int_counter_vec, CounterVec, Encoder, Gauge, Histogram,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Finished tasks by outcome (completed, max_iterations, error, panicked)
    pub static ref TASKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "taskforge_tasks_total",
        "Tasks processed, labelled by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Tasks currently owned by this worker (0 or 1)
    pub static ref TASKS_IN_FLIGHT: Gauge = register_gauge!(
        "taskforge_tasks_in_flight",
        "Tasks currently being processed"
    )
    .unwrap();

    /// Iterations used per finished task
    pub static ref TASK_ITERATIONS: Histogram = register_histogram!(
        "taskforge_task_iterations",
        "Conversation iterations per task",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 20.0, 50.0]
    )
    .unwrap();

    /// Tool dispatches by tool name and success
    pub static ref TOOL_CALLS: IntCounterVec = register_int_counter_vec!(
        "taskforge_tool_calls_total",
        "Tool calls dispatched, labelled by tool and status",
        &["tool", "status"]
    )
    .unwrap();

    /// Wall time of one streamed provider call
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "taskforge_llm_call_duration_seconds",
        "Duration of streamed LLM calls",
        &["model"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .unwrap();

    /// Progress/file publications that failed (best effort)
    pub static ref PUBLISH_FAILURES: CounterVec = register_counter_vec!(
        "taskforge_publish_failures_total",
        "Failed progress or file-mutation publications",
        &["channel"]
    )
    .unwrap();

    /// Worker loop errors that triggered a backoff
    pub static ref WORKER_ERRORS: IntCounterVec = register_int_counter_vec!(
        "taskforge_worker_errors_total",
        "Worker loop errors, labelled by kind",
        &["kind"]
    )
    .unwrap();

    /// Unix time of the last completed queue poll
    pub static ref WORKER_HEARTBEAT: Gauge = register_gauge!(
        "taskforge_worker_last_heartbeat_seconds",
        "Unix timestamp of the most recent queue poll"
    )
    .unwrap();

    /// Queue polls, including empty ones
    pub static ref QUEUE_POLLS: IntCounter = register_int_counter!(
        "taskforge_queue_polls_total",
        "Blocking queue pops performed"
    )
    .unwrap();
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
