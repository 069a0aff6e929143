//! Agent module: the streaming tool-calling loop
//!
//! # Architecture
//!
//! ```text
//! Task → AgentController → LlmProvider::stream (system prompt + tools)
//!              ↓
//!        TurnAssembler (text deltas → thinking_chunk, tool blocks → tool_start)
//!              ↓
//!        tool calls? ── no ──→ task_completed
//!              ↓ yes
//!        ToolRegistry::execute (sequential) → tool_executing / tool_result
//!              ↓
//!        batched tool_result message → next iteration
//!              ↓
//!        mark_complete → task_completed | cap → task_warning | error → task_error
//! ```

pub mod controller;
pub mod prompts;
pub mod turn;

pub use controller::{AgentConfig, AgentController, AgentError, AgentOutcome};
pub use prompts::system_prompt;
pub use turn::{AssistantTurn, TurnAssembler};
