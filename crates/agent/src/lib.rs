//! The policy agent.
//!
//! A request flows through a small state machine:
//!
//! 1. **Receive** new user input for a conversation
//! 2. **Send to the model** with the system prompt, history and tool schemas
//! 3. **If tool calls**: run them, append the results, go back to step 2
//! 4. **If text**: persist it and return it
//!
//! The loop stops after a bounded number of model rounds. Streaming runs
//! report text deltas and tool lifecycle events as they happen, and the
//! chat-completion bridge turns them into Open WebUI events.

pub mod completion;
pub mod loop_runner;
pub mod service;
pub mod stream_event;
pub mod webui;

#[cfg(test)]
mod test_helpers;

pub use completion::{
    completion_stream, ChatCompletionRequest, ChatContent, ChatMessage, ChatPart, CompletionItem,
    CompletionStream,
};
pub use loop_runner::{AgentLoop, AgentOutcome, StreamingRun, FORCED_STOP_MESSAGE};
pub use service::PolicyAgent;
pub use stream_event::AgentStreamEvent;
pub use webui::{LifecycleEvent, LifecyclePhase, NotificationType, WebUiEvent};
