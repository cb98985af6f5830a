//! Command surface over the engine, autonomous executor, and coordinator
//!
//! One tagged request variant per operation, validated at the boundary
//! before reaching the state machine. Responses and errors are plain
//! structured records; the caller (CLI, RPC transport) formats them.

mod requests;
mod service;

pub use requests::{ToolError, ToolRequest, ToolResponse};
pub use service::ToolService;
