//! taskforge - queue-driven agentic task orchestrator
//!
//! A worker pops build requests off a queue, drives a streaming
//! tool-calling conversation with an LLM, executes the requested file and
//! shell operations inside an isolated project workspace, and publishes
//! every step as a progress event.
//!
//! # Modules
//!
//! - `worker` - queue consumer loop and result storage
//! - `agent` - bounded streaming tool-calling loop
//! - `llm` - provider trait and the Anthropic streaming client
//! - `tools` - tool registry, schema validation and the built-in tools
//! - `workspace` - per-project directory roots and path confinement
//! - `sandbox` - Landlock confinement and process-group kill for tool commands
//! - `progress` - progress events and file-mutation broadcasts
//! - `broker` - queue / pub-sub / key-value backends (Redis, in-memory)
//! - `health` - `/health` and `/metrics` HTTP surface
//! - `config` - layered figment configuration
//! - `metrics` - Prometheus metrics for observability
//! - `telemetry` - logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use taskforge::{broker, AgentController, AgentConfig, ProgressPublisher, ToolRegistry, Workspace};
//!
//! let broker = broker::connect("memory://").await?;
//! let publisher = ProgressPublisher::new(broker.clone());
//! let controller = AgentController::new(
//!     provider,
//!     Arc::new(ToolRegistry::with_default_tools()),
//!     Arc::new(Workspace::new("./workspaces")),
//!     publisher,
//!     AgentConfig::default(),
//! );
//! let outcome = controller.run(&task).await;
//! ```

pub mod agent;
pub mod broker;
pub mod config;
pub mod health;
pub mod llm;
pub mod metrics;
pub mod progress;
pub mod sandbox;
pub mod task;
pub mod telemetry;
pub mod tools;
pub mod worker;
pub mod workspace;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentController, AgentOutcome};
pub use broker::{Broker, InMemoryBroker};
pub use config::Config;
pub use llm::{AnthropicClient, LlmProvider};
pub use progress::{FileMutation, ProgressEvent, ProgressKind, ProgressPublisher};
pub use task::{AgentType, Task, TaskResult};
pub use tools::{ToolRegistry, ToolResult};
pub use worker::{Worker, WorkerConfig, WorkerStatus};
pub use workspace::Workspace;
