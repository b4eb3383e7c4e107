//! Bridge from OpenAI-style chat-completion requests to the agent loop.
//!
//! A request carries the whole visible chat. The conversation store already
//! holds everything up to the last assistant answer, so only the messages
//! after it are new input. An unseen conversation is seeded with every
//! non-system message of the request.

use std::pin::Pin;

use policypilot_core::error::Error;
use policypilot_core::message::{ContentPart, ConversationId, ImageContent, Message, Role};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::loop_runner::StreamingRun;
use crate::stream_event::AgentStreamEvent;
use crate::webui::LifecycleEvent;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,

    pub messages: Vec<ChatMessage>,

    /// Extra request fields, e.g. the conversation id
    #[serde(default)]
    pub body: RequestBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestBody {
    #[serde(default)]
    pub conversation_id: Option<String>,

    /// Older clients send the id under this name
    #[serde(default)]
    pub chat_history_id: Option<String>,
}

impl ChatCompletionRequest {
    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::or_default(
            self.body
                .conversation_id
                .as_deref()
                .or(self.body.chat_history_id.as_deref()),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,

    #[serde(default)]
    pub content: Option<ChatContent>,
}

/// `content` is either a plain string or a list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ChatPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatMessage {
    /// Convert to a domain message. System messages map to `None`.
    pub fn to_message(&self) -> Result<Option<Message>, Error> {
        let role = match self.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" | "developer" => return Ok(None),
            other => {
                return Err(Error::InvalidRequest(format!(
                    "unsupported message role: {other}"
                )));
            }
        };

        let mut parts = Vec::new();
        match &self.content {
            None => {}
            Some(ChatContent::Text(text)) => parts.push(ContentPart::Text { text: text.clone() }),
            Some(ChatContent::Parts(chat_parts)) => {
                for part in chat_parts {
                    match part {
                        ChatPart::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
                        ChatPart::ImageUrl { image_url } if role == Role::User => {
                            parts.push(ContentPart::Image {
                                image: ImageContent::from_url(&image_url.url)?,
                            });
                        }
                        ChatPart::ImageUrl { .. } | ChatPart::Unsupported => {}
                    }
                }
            }
        }

        Ok(Some(Message::new(role, parts)))
    }
}

/// The messages of `request` that the agent has not seen yet.
pub fn new_input(request: &ChatCompletionRequest, has_history: bool) -> Result<Vec<Message>, Error> {
    let mut messages = Vec::with_capacity(request.messages.len());
    for chat_message in &request.messages {
        if let Some(message) = chat_message.to_message()? {
            messages.push(message);
        }
    }

    if has_history {
        if let Some(last_assistant) = messages.iter().rposition(|m| m.role == Role::Assistant) {
            messages.drain(..=last_assistant);
        }
    }

    let has_user_content = messages
        .iter()
        .any(|m| m.role == Role::User && !m.content.is_empty());
    if !has_user_content {
        return Err(Error::InvalidRequest(
            "request has no new user message".into(),
        ));
    }
    Ok(messages)
}

/// One item of a chat-completion response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionItem {
    /// Text to append to the answer
    Fragment(String),
    Lifecycle(LifecycleEvent),
    /// The run failed; nothing follows
    Failed(String),
}

/// Text fragments and lifecycle events of one chat completion, in order.
pub type CompletionStream = Pin<Box<dyn Stream<Item = CompletionItem> + Send>>;

/// Map a streaming run to completion items.
///
/// Dropping the returned stream cancels the run at its next round boundary.
/// A run whose task dies without a terminal event ends with `Failed`.
pub fn completion_stream(run: StreamingRun) -> CompletionStream {
    let StreamingRun { events, task } = run;
    // A finished run already reported its outcome as `done` or `error`
    let joined = futures::stream::once(task).filter_map(|joined| {
        joined
            .err()
            .map(|e| CompletionItem::Failed(format!("agent run aborted: {e}")))
    });
    Box::pin(
        ReceiverStream::new(events)
            .filter_map(to_completion_item)
            .chain(joined),
    )
}

fn to_completion_item(event: AgentStreamEvent) -> Option<CompletionItem> {
    match event {
        AgentStreamEvent::Chunk { content } => Some(CompletionItem::Fragment(content)),
        AgentStreamEvent::ToolCallStarted { id, name, .. } => Some(CompletionItem::Lifecycle(
            LifecycleEvent::tool_call_start(&id, &name),
        )),
        AgentStreamEvent::ToolCallFinished {
            id,
            name,
            arguments,
            output,
            success,
        } => Some(CompletionItem::Lifecycle(LifecycleEvent::tool_call_end(
            &id, &name, &arguments, &output, success,
        ))),
        AgentStreamEvent::Done { .. } => None,
        AgentStreamEvent::Error { message } => Some(CompletionItem::Failed(message)),
    }
}
