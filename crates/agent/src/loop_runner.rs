//! The agent reasoning loop implementation.
//!
//! One run takes a conversation from new user input to a final assistant
//! message:
//!
//! ```text
//! AwaitingModel ──tool calls──▶ DispatchingTools ──results──▶ AwaitingModel
//!       │
//!       ├──no tool calls──▶ Done
//!       └──round cap hit──▶ ForcedStop
//! ```
//!
//! Everything a run produces is appended to the conversation store before
//! it returns: the new input first, then each tool round (the assistant
//! message with its calls plus every result) as one batch, then the answer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use policypilot_config::AppConfig;
use policypilot_core::error::{Error, ProviderError, ToolError};
use policypilot_core::event::{DomainEvent, EventBus};
use policypilot_core::memory::ConversationStore;
use policypilot_core::message::{ConversationId, Message, MessageToolCall, Role, ToolResultContent};
use policypilot_core::provider::{Provider, ProviderRequest, Usage};
use policypilot_core::tool::{ToolCall, ToolRegistry};
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::stream_event::AgentStreamEvent;

/// Answer used when the round cap is hit before the model said anything.
pub const FORCED_STOP_MESSAGE: &str = "I could not complete this request within the allowed number of steps. Please narrow down the question or provide more details.";

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// States of a single run.
#[derive(Debug)]
enum LoopState {
    AwaitingModel,
    /// The assistant message requesting the calls
    DispatchingTools(Message),
    Done(Message),
    ForcedStop,
}

/// The result of one run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub conversation_id: ConversationId,

    /// The final assistant message
    pub message: Message,

    /// Model calls made
    pub rounds: usize,

    pub tool_calls_made: usize,

    /// The round cap was reached while the model was still calling tools
    pub forced_stop: bool,

    /// The stream consumer went away and the run stopped at a round boundary
    pub cancelled: bool,

    /// Token usage summed over every round
    pub usage: Usage,
}

impl AgentOutcome {
    pub fn text(&self) -> String {
        self.message.text()
    }
}

/// A streaming run in progress.
///
/// Dropping `events` cancels the run at the next round boundary.
pub struct StreamingRun {
    pub events: mpsc::Receiver<AgentStreamEvent>,
    pub task: JoinHandle<Result<AgentOutcome, Error>>,
}

/// Serialises runs per conversation id.
#[derive(Default)]
struct SessionLocks {
    locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, conversation_id: &ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(conversation_id.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Where a run reports progress. Silent for non-streaming runs.
struct EventSink(Option<mpsc::Sender<AgentStreamEvent>>);

impl EventSink {
    fn is_streaming(&self) -> bool {
        self.0.is_some()
    }

    fn is_closed(&self) -> bool {
        self.0.as_ref().is_some_and(|tx| tx.is_closed())
    }

    async fn emit(&self, event: AgentStreamEvent) {
        if let Some(tx) = &self.0 {
            // A gone consumer is noticed at the next round boundary
            let _ = tx.send(event).await;
        }
    }
}

/// One model answer.
struct ModelTurn {
    message: Message,
    usage: Option<Usage>,
}

/// The core agent loop that orchestrates model calls and tool execution.
///
/// Cheap to clone; every clone shares the same provider, tools, memory and
/// per-conversation locks.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: Arc<str>,
    tools: Arc<ToolRegistry>,
    memory: Arc<dyn ConversationStore>,
    event_bus: Arc<EventBus>,
    max_rounds: usize,
    model_timeout: Duration,
    tool_timeout: Duration,
    parallel_tool_calls: bool,
    sessions: Arc<SessionLocks>,
}

impl AgentLoop {
    /// Create a new agent loop with default limits.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        memory: Arc<dyn ConversationStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: Arc::from(policypilot_config::DEFAULT_SYSTEM_PROMPT),
            tools,
            memory,
            event_bus,
            max_rounds: 10,
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
            parallel_tool_calls: true,
            sessions: Arc::new(SessionLocks::default()),
        }
    }

    /// Apply the `[agent]` settings and model defaults from `config`.
    pub fn with_config(self, config: &AppConfig) -> Self {
        let settings = &config.agent;
        self.with_system_prompt(settings.system_prompt.as_str())
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_rounds(settings.max_rounds)
            .with_model_timeout(Duration::from_secs(settings.model_timeout_secs))
            .with_tool_timeout(Duration::from_secs(settings.tool_timeout_secs))
            .with_parallel_tool_calls(settings.parallel_tool_calls)
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = Arc::from(prompt);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per model response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the maximum number of model calls per run.
    pub fn with_max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.parallel_tool_calls = enabled;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn memory(&self) -> &Arc<dyn ConversationStore> {
        &self.memory
    }

    /// Run the loop to completion for new `input` messages.
    pub async fn process(
        &self,
        conversation_id: &ConversationId,
        input: Vec<Message>,
    ) -> Result<AgentOutcome, Error> {
        self.run(conversation_id, |_| Ok(input), &EventSink(None)).await
    }

    /// Spawn the loop and stream its events.
    ///
    /// Text deltas arrive as `chunk` events while the model produces them.
    /// The last event is `done` or `error`.
    pub fn run_stream(&self, conversation_id: ConversationId, input: Vec<Message>) -> StreamingRun {
        self.run_stream_with(conversation_id, move |_| Ok(input))
    }

    /// Like [`AgentLoop::run_stream`], with the new input chosen by `select`.
    ///
    /// `select` sees the stored history while the conversation is locked,
    /// so concurrent runs never pick their input from a stale history.
    pub fn run_stream_with<F>(&self, conversation_id: ConversationId, select: F) -> StreamingRun
    where
        F: FnOnce(&[Message]) -> Result<Vec<Message>, Error> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let agent = self.clone();

        let task = tokio::spawn(async move {
            let sink = EventSink(Some(tx));
            let result = agent.run(&conversation_id, select, &sink).await;
            let terminal = match &result {
                Ok(outcome) => AgentStreamEvent::Done {
                    conversation_id: outcome.conversation_id.to_string(),
                    usage: Some(outcome.usage),
                    rounds: outcome.rounds,
                    tool_calls_made: outcome.tool_calls_made,
                    forced_stop: outcome.forced_stop,
                },
                Err(e) => AgentStreamEvent::Error {
                    message: e.to_string(),
                },
            };
            sink.emit(terminal).await;
            result
        });

        StreamingRun { events: rx, task }
    }

    async fn run(
        &self,
        conversation_id: &ConversationId,
        select: impl FnOnce(&[Message]) -> Result<Vec<Message>, Error>,
        sink: &EventSink,
    ) -> Result<AgentOutcome, Error> {
        let _session = self.sessions.acquire(conversation_id).await;

        let history = self.memory.get_history(conversation_id).await?;
        let input = select(&history)?;
        if input.is_empty() {
            return Err(Error::InvalidRequest("no new messages to process".into()));
        }
        if input.iter().any(|m| m.role == Role::System) {
            return Err(Error::InvalidRequest(
                "system messages are set by the agent, not the caller".into(),
            ));
        }
        info!(
            conversation_id = %conversation_id,
            history = history.len(),
            new = input.len(),
            streaming = sink.is_streaming(),
            "Processing conversation"
        );
        self.memory.append(conversation_id, input.clone()).await?;

        let mut messages = Vec::with_capacity(history.len() + input.len() + 1);
        messages.push(Message::system(&*self.system_prompt));
        messages.extend(history);
        messages.extend(input);

        let tool_definitions = self.tools.definitions();
        let mut usage = Usage::default();
        let mut rounds = 0;
        let mut tool_calls_made = 0;
        let mut last_text = String::new();
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if sink.is_closed() {
                        info!(conversation_id = %conversation_id, rounds, "Stream consumer went away, stopping");
                        return Ok(AgentOutcome {
                            conversation_id: conversation_id.clone(),
                            message: Message::assistant(last_text),
                            rounds,
                            tool_calls_made,
                            forced_stop: false,
                            cancelled: true,
                            usage,
                        });
                    }
                    if rounds >= self.max_rounds {
                        LoopState::ForcedStop
                    } else {
                        rounds += 1;
                        debug!(conversation_id = %conversation_id, round = rounds, "Agent loop round");

                        let request = ProviderRequest {
                            model: self.model.clone(),
                            messages: messages.clone(),
                            temperature: self.temperature,
                            max_tokens: self.max_tokens,
                            tools: tool_definitions.clone(),
                            stream: sink.is_streaming(),
                        };
                        let turn = self.call_model(request, sink).await.inspect_err(|e| {
                            warn!(conversation_id = %conversation_id, error = %e, "Model call failed");
                            self.event_bus.publish(DomainEvent::ErrorOccurred {
                                context: format!("model call for conversation {conversation_id}"),
                                error_message: e.to_string(),
                                timestamp: Utc::now(),
                            });
                        })?;

                        if let Some(turn_usage) = turn.usage {
                            usage.prompt_tokens += turn_usage.prompt_tokens;
                            usage.completion_tokens += turn_usage.completion_tokens;
                            usage.total_tokens += turn_usage.total_tokens;
                        }
                        let text = turn.message.text();
                        if !text.is_empty() {
                            last_text = text;
                        }

                        if turn.message.has_tool_calls() {
                            LoopState::DispatchingTools(turn.message)
                        } else {
                            LoopState::Done(turn.message)
                        }
                    }
                }

                LoopState::DispatchingTools(assistant) => {
                    let calls: Vec<MessageToolCall> =
                        assistant.tool_calls().into_iter().cloned().collect();
                    debug!(tool_count = calls.len(), "Executing tool calls");
                    tool_calls_made += calls.len();

                    let results = self.dispatch(conversation_id, &calls, sink).await;
                    let mut batch = Vec::with_capacity(results.len() + 1);
                    batch.push(assistant);
                    batch.extend(results.into_iter().map(Message::tool_result));

                    self.memory.append(conversation_id, batch.clone()).await?;
                    messages.extend(batch);
                    LoopState::AwaitingModel
                }

                LoopState::Done(message) => {
                    self.memory
                        .append(conversation_id, vec![message.clone()])
                        .await?;
                    return Ok(self.finish(conversation_id, message, rounds, tool_calls_made, false, usage));
                }

                LoopState::ForcedStop => {
                    warn!(
                        conversation_id = %conversation_id,
                        rounds,
                        "Max rounds reached, forcing a final answer"
                    );
                    let text = if last_text.is_empty() {
                        FORCED_STOP_MESSAGE.to_string()
                    } else {
                        last_text
                    };
                    let message = Message::assistant(text);
                    self.memory
                        .append(conversation_id, vec![message.clone()])
                        .await?;
                    return Ok(self.finish(conversation_id, message, rounds, tool_calls_made, true, usage));
                }
            };
        }
    }

    fn finish(
        &self,
        conversation_id: &ConversationId,
        message: Message,
        rounds: usize,
        tool_calls_made: usize,
        forced_stop: bool,
        usage: Usage,
    ) -> AgentOutcome {
        self.event_bus.publish(DomainEvent::ResponseGenerated {
            conversation_id: conversation_id.to_string(),
            model: self.model.clone(),
            rounds,
            tokens_used: usage.total_tokens,
            timestamp: Utc::now(),
        });
        info!(
            conversation_id = %conversation_id,
            rounds,
            tool_calls = tool_calls_made,
            tokens = usage.total_tokens,
            forced_stop,
            "Response generated"
        );

        AgentOutcome {
            conversation_id: conversation_id.clone(),
            message,
            rounds,
            tool_calls_made,
            forced_stop,
            cancelled: false,
            usage,
        }
    }

    /// One model call, bounded by the model timeout.
    async fn call_model(
        &self,
        request: ProviderRequest,
        sink: &EventSink,
    ) -> Result<ModelTurn, ProviderError> {
        let call = async {
            if sink.is_streaming() {
                self.stream_model(request, sink).await
            } else {
                let response = self.provider.complete(request).await?;
                Ok(ModelTurn {
                    message: response.message,
                    usage: response.usage,
                })
            }
        };

        tokio::time::timeout(self.model_timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout(self.model_timeout.as_secs()))?
    }

    /// Forward text deltas as they arrive and assemble the full message.
    async fn stream_model(
        &self,
        request: ProviderRequest,
        sink: &EventSink,
    ) -> Result<ModelTurn, ProviderError> {
        let mut rx = self.provider.stream(request).await?;
        let mut text = String::new();
        let mut calls = Vec::new();
        let mut usage = None;

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                text.push_str(&content);
                sink.emit(AgentStreamEvent::Chunk { content }).await;
            }
            calls.extend(chunk.tool_calls);
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        Ok(ModelTurn {
            message: Message::assistant_with_tool_calls(text, calls),
            usage,
        })
    }

    /// Run every call of one round. Results come back in call order.
    async fn dispatch(
        &self,
        conversation_id: &ConversationId,
        calls: &[MessageToolCall],
        sink: &EventSink,
    ) -> Vec<ToolResultContent> {
        if self.parallel_tool_calls && calls.len() > 1 {
            return join_all(calls.iter().map(|call| self.run_tool(conversation_id, call, sink))).await;
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.run_tool(conversation_id, call, sink).await);
        }
        results
    }

    /// Execute one call. Failures become error-tagged results.
    async fn run_tool(
        &self,
        conversation_id: &ConversationId,
        call: &MessageToolCall,
        sink: &EventSink,
    ) -> ToolResultContent {
        let parsed = parse_arguments(&call.arguments);
        let shown = parsed
            .as_ref()
            .ok()
            .cloned()
            .unwrap_or_else(|| serde_json::Value::String(call.arguments.clone()));

        sink.emit(AgentStreamEvent::ToolCallStarted {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: shown.clone(),
        })
        .await;

        let start = Instant::now();
        let outcome = match parsed {
            Ok(arguments) => {
                let tool_call = ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments,
                };
                tokio::time::timeout(self.tool_timeout, self.tools.execute(&tool_call))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ToolError::Timeout {
                            tool_name: call.name.clone(),
                            timeout_secs: self.tool_timeout.as_secs(),
                        })
                    })
            }
            Err(e) => Err(ToolError::InvalidArguments(format!(
                "arguments are not valid JSON: {e}"
            ))),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let (output, success) = match outcome {
            Ok(result) => (result.output, result.success),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                // Reported to the model so it can recover
                (format!("Error: {e}"), false)
            }
        };

        self.event_bus.publish(DomainEvent::ToolExecuted {
            conversation_id: conversation_id.to_string(),
            tool_name: call.name.clone(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });

        sink.emit(AgentStreamEvent::ToolCallFinished {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: shown,
            output: output.clone(),
            success,
        })
        .await;

        ToolResultContent {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            output,
            is_error: !success,
        }
    }
}

/// Models send `""` for argument-less calls.
fn parse_arguments(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw)
}
