//! The assembled policy assistant.
//!
//! `PolicyAgent::setup` builds every collaborator once: it ingests the
//! policy sources, registers the tools and wires the agent loop. The result
//! is an immutable context shared by every request.

use std::path::Path;
use std::sync::Arc;

use policypilot_config::AppConfig;
use policypilot_core::document::{DocumentStore, Embedder};
use policypilot_core::error::Error;
use policypilot_core::event::EventBus;
use policypilot_core::memory::ConversationStore;
use policypilot_core::message::{ConversationId, ImageContent, Message};
use policypilot_core::provider::Provider;
use policypilot_ingest::{IngestionPipeline, IngestionReport};
use policypilot_memory::{InMemoryConversationStore, InMemoryDocumentStore};
use policypilot_providers::{build_chat_provider, build_embedder};
use policypilot_tools::default_registry;
use tracing::info;

use crate::completion::{completion_stream, new_input, ChatCompletionRequest, CompletionStream};
use crate::loop_runner::{AgentLoop, AgentOutcome, StreamingRun};

pub struct PolicyAgent {
    agent: AgentLoop,
    memory: Arc<dyn ConversationStore>,
    documents: Arc<dyn DocumentStore>,
    events: Arc<EventBus>,
    report: IngestionReport,
}

impl PolicyAgent {
    /// Build providers from `config`, ingest the sources and wire the agent.
    pub async fn setup(config: &AppConfig) -> Result<Self, Error> {
        config.validate()?;
        let (provider, model) = build_chat_provider(config);
        let embedder = build_embedder(config).await?;
        Self::setup_with(config, provider, model, embedder).await
    }

    /// Like [`PolicyAgent::setup`], with the model backends supplied.
    pub async fn setup_with(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        model: String,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, Error> {
        let events = Arc::new(EventBus::default());
        let documents: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());

        let report = IngestionPipeline::from_config(config, Arc::clone(&embedder), Arc::clone(&documents))?
            .with_events(Arc::clone(&events))
            .run(&config.ingestion.sources)
            .await?;

        let tools = Arc::new(default_registry(config, embedder, Arc::clone(&documents)));
        let memory: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
        let agent = AgentLoop::new(
            provider,
            model,
            tools,
            Arc::clone(&memory),
            Arc::clone(&events),
        )
        .with_config(config);

        info!(
            model = %agent.model(),
            chunks = report.chunks,
            "Policy agent ready"
        );

        Ok(Self {
            agent,
            memory,
            documents,
            events,
            report,
        })
    }

    /// Answer one query and return the final assistant text.
    pub async fn run(
        &self,
        query: &str,
        image_path: Option<&Path>,
        conversation_id: Option<&str>,
    ) -> Result<String, Error> {
        Ok(self.ask(query, image_path, conversation_id).await?.text())
    }

    /// Like [`PolicyAgent::run`], returning the full outcome.
    pub async fn ask(
        &self,
        query: &str,
        image_path: Option<&Path>,
        conversation_id: Option<&str>,
    ) -> Result<AgentOutcome, Error> {
        let message = self.user_message(query, image_path).await?;
        let conversation_id = ConversationId::or_default(conversation_id);
        self.agent.process(&conversation_id, vec![message]).await
    }

    /// Stream the answer to one query.
    pub async fn ask_stream(
        &self,
        query: &str,
        image_path: Option<&Path>,
        conversation_id: Option<&str>,
    ) -> Result<StreamingRun, Error> {
        let message = self.user_message(query, image_path).await?;
        let conversation_id = ConversationId::or_default(conversation_id);
        Ok(self.agent.run_stream(conversation_id, vec![message]))
    }

    /// Handle an OpenAI-style chat-completion request as a stream of text
    /// fragments and tool lifecycle events.
    pub async fn run_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<CompletionStream, Error> {
        let conversation_id = request.conversation_id();
        // Reject malformed requests before a run is started
        new_input(&request, false)?;

        info!(
            conversation_id = %conversation_id,
            model = %request.model,
            messages = request.messages.len(),
            "Chat completion request"
        );
        let run = self.agent.run_stream_with(conversation_id, move |history| {
            new_input(&request, !history.is_empty())
        });
        Ok(completion_stream(run))
    }

    async fn user_message(&self, query: &str, image_path: Option<&Path>) -> Result<Message, Error> {
        if query.trim().is_empty() && image_path.is_none() {
            return Err(Error::InvalidRequest("query is empty".into()));
        }
        Ok(match image_path {
            Some(path) => Message::user_with_image(query, ImageContent::from_file_path(path).await?),
            None => Message::user(query),
        })
    }

    pub fn report(&self) -> IngestionReport {
        self.report
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn memory(&self) -> &Arc<dyn ConversationStore> {
        &self.memory
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn agent(&self) -> &AgentLoop {
        &self.agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionItem;
    use crate::test_helpers::*;
    use crate::webui::LifecyclePhase;
    use policypilot_core::message::Role;
    use serde_json::json;
    use std::io::Write;
    use tokio_stream::StreamExt;

    const POLICY: &str = "# Social budget\n\nEvery team has a social budget of 50 EUR per person per quarter.\n\n## Travel\n\nTravel is booked through the office.";

    fn config_with_policy(dir: &tempfile::TempDir) -> AppConfig {
        let path = dir.path().join("policy.md");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(POLICY.as_bytes())
            .unwrap();
        let mut config = AppConfig::default();
        config.ingestion.sources = vec![path];
        config
    }

    async fn agent(provider: ScriptedProvider) -> (PolicyAgent, Arc<ScriptedProvider>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_policy(&dir);
        let provider = Arc::new(provider);
        let agent = PolicyAgent::setup_with(&config, provider.clone(), "mock-model".into(), Arc::new(KeywordEmbedder))
            .await
            .unwrap();
        (agent, provider, dir)
    }

    #[tokio::test]
    async fn setup_ingests_sources() {
        let (agent, _provider, _dir) = agent(ScriptedProvider::single_text("x")).await;
        assert_eq!(agent.report().sources, 1);
        assert_eq!(agent.report().chunks, 1);
        assert_eq!(agent.documents().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn setup_fails_on_missing_source() {
        let mut config = AppConfig::default();
        config.ingestion.sources = vec!["/no/such/policy.md".into()];
        let result = PolicyAgent::setup_with(
            &config,
            Arc::new(ScriptedProvider::single_text("x")),
            "mock-model".into(),
            Arc::new(KeywordEmbedder),
        )
        .await;
        assert!(matches!(result, Err(Error::Ingestion(_))));
    }

    #[tokio::test]
    async fn run_answers_with_retrieved_policy() {
        let provider = ScriptedProvider::tool_then_answer(
            vec![make_tool_call("retrieval_tool", json!({"query": "social budget"}))],
            "Let me check the policy.",
            "The social budget is 50 EUR per person per quarter.",
        );
        let (agent, provider, _dir) = agent(provider).await;

        let answer = agent
            .run("How much is the social budget?", None, Some("emp-1"))
            .await
            .unwrap();
        assert_eq!(answer, "The social budget is 50 EUR per person per quarter.");

        let history = agent
            .memory()
            .get_history(&ConversationId::new("emp-1"))
            .await
            .unwrap();
        let tool_output = &history[2].tool_result_content().unwrap().output;
        assert!(tool_output.starts_with("File Content for "));
        assert!(tool_output.contains("50 EUR per person"));

        // The model saw the retrieved text
        assert_eq!(provider.requests()[1].messages[3].role, Role::Tool);
    }

    #[tokio::test]
    async fn run_attaches_image() {
        let (agent, provider, dir) = agent(ScriptedProvider::single_text("That is a taxi receipt.")).await;
        let image = dir.path().join("receipt.png");
        std::fs::write(&image, [0x89, b'P', b'N', b'G']).unwrap();

        agent.run("What is this?", Some(&image), None).await.unwrap();
        let sent = &provider.requests()[0].messages[1];
        assert_eq!(sent.images().count(), 1);
    }

    #[tokio::test]
    async fn unsupported_image_is_rejected() {
        let (agent, provider, dir) = agent(ScriptedProvider::single_text("x")).await;
        let file = dir.path().join("receipt.bmp");
        std::fs::write(&file, b"BM").unwrap();

        let err = agent.run("What is this?", Some(&file), None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn chat_completion_streams_fragments_and_lifecycle() {
        let provider = ScriptedProvider::tool_then_answer(
            vec![make_tool_call(
                "send_reimbursement",
                json!({"amount": 25, "currency": "eur", "description": "dinner"}),
            )],
            "",
            "Sorry, 25 EUR cannot be reimbursed.",
        );
        let (agent, _provider, _dir) = agent(provider).await;

        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "policypilot",
            "messages": [{"role": "user", "content": "Please reimburse my 25 EUR dinner"}],
            "body": {"conversation_id": "webui-1"}
        }))
        .unwrap();

        let items: Vec<CompletionItem> = agent.run_chat_completion(request).await.unwrap().collect().await;

        let phases: Vec<_> = items
            .iter()
            .filter_map(|i| match i {
                CompletionItem::Lifecycle(e) => Some(e.phase),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec![LifecyclePhase::ToolCallStart, LifecyclePhase::ToolCallEnd]);

        let end = items
            .iter()
            .find_map(|i| match i {
                CompletionItem::Lifecycle(e) if e.phase == LifecyclePhase::ToolCallEnd => Some(e),
                _ => None,
            })
            .unwrap();
        assert!(end.detail_content.as_ref().unwrap().contains("This amount cannot be reimbursed"));

        let text: String = items
            .iter()
            .filter_map(|i| match i {
                CompletionItem::Fragment(f) => Some(f.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Sorry, 25 EUR cannot be reimbursed.");

        let history = agent
            .memory()
            .get_history(&ConversationId::new("webui-1"))
            .await
            .unwrap();
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn chat_completion_continues_a_conversation() {
        let provider = ScriptedProvider::new(vec![
            make_text_response("Which currency?"),
            make_text_response("Thanks, submitted."),
        ]);
        let (agent, provider, _dir) = agent(provider).await;

        let first: ChatCompletionRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "Reimburse 5 for a coffee"}],
            "body": {"chat_history_id": "c1"}
        }))
        .unwrap();
        let _: Vec<_> = agent.run_chat_completion(first).await.unwrap().collect().await;

        let second: ChatCompletionRequest = serde_json::from_value(json!({
            "messages": [
                {"role": "user", "content": "Reimburse 5 for a coffee"},
                {"role": "assistant", "content": "Which currency?"},
                {"role": "user", "content": "eur"}
            ],
            "body": {"chat_history_id": "c1"}
        }))
        .unwrap();
        let _: Vec<_> = agent.run_chat_completion(second).await.unwrap().collect().await;

        let history = agent.memory().get_history(&ConversationId::new("c1")).await.unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text()).collect();
        assert_eq!(
            texts,
            vec!["Reimburse 5 for a coffee", "Which currency?", "eur", "Thanks, submitted."]
        );
        // system + 3 stored messages
        assert_eq!(provider.requests()[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn concurrent_requests_seed_a_conversation_once() {
        let provider = ScriptedProvider::new(vec![make_text_response("a1"), make_text_response("a2")])
            .with_delay(std::time::Duration::from_millis(50));
        let (agent, _provider, _dir) = agent(provider).await;

        let request = || -> ChatCompletionRequest {
            serde_json::from_value(json!({
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"},
                    {"role": "user", "content": "budget?"}
                ],
                "body": {"conversation_id": "race"}
            }))
            .unwrap()
        };
        let first = agent.run_chat_completion(request()).await.unwrap();
        let second = agent.run_chat_completion(request()).await.unwrap();
        let (first, second): (Vec<CompletionItem>, Vec<CompletionItem>) =
            tokio::join!(first.collect(), second.collect());
        assert!(!first.iter().chain(&second).any(|i| matches!(i, CompletionItem::Failed(_))));

        let history = agent.memory().get_history(&ConversationId::new("race")).await.unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text()).collect();
        assert_eq!(texts.iter().filter(|t| *t == "hi").count(), 1);
        assert_eq!(texts.len(), 6);
        assert_eq!(&texts[..3], ["hi", "hello", "budget?"]);
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let provider = ScriptedProvider::new(vec![make_text_response("a"), make_text_response("b")]);
        let (agent, _provider, _dir) = agent(provider).await;

        agent.run("only for A", None, Some("A")).await.unwrap();
        agent.run("only for B", None, Some("B")).await.unwrap();

        let b = agent.memory().get_history(&ConversationId::new("B")).await.unwrap();
        assert!(b.iter().all(|m| m.text() != "only for A"));
    }
}
