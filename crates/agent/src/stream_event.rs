//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what the agent loop produces on its event channel
//! during a streaming run. Text deltas and tool lifecycle events share one
//! ordered channel so a consumer sees them in the order they happened.

use policypilot_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted by the agent during streaming execution.
///
/// - `chunk`               partial text token from the model
/// - `tool_call_started`   a tool call is about to run
/// - `tool_call_finished`  a tool call returned (or failed)
/// - `done`                the run is complete
/// - `error`               the run failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the model.
    Chunk { content: String },

    ToolCallStarted {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    ToolCallFinished {
        id: String,
        name: String,
        arguments: serde_json::Value,
        output: String,
        success: bool,
    },

    /// The run is complete.
    Done {
        conversation_id: String,
        usage: Option<Usage>,
        rounds: usize,
        tool_calls_made: usize,
        forced_stop: bool,
    },

    /// The run failed; no `done` event follows.
    Error { message: String },
}

impl AgentStreamEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallFinished { .. } => "tool_call_finished",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
