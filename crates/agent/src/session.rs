//! The agent session — the owned aggregate behind one logical chat.
//!
//! A session owns its memory, tool registry, document state, and the
//! orchestrator instance, threaded through calls rather than living in
//! ambient globals. One session serves one conversation; sessions share
//! nothing. Turns are processed strictly one at a time.

use std::sync::Arc;

use docpilot_config::AppConfig;
use docpilot_core::document::{DocumentChunk, TabularDataset};
use docpilot_core::error::{Error, Result};
use docpilot_core::provider::Provider;
use docpilot_core::tool::ToolRegistry;
use docpilot_core::turn::{ChatTurn, SessionId};
use docpilot_index::Embedder;
use docpilot_tools::{PassageSearchTool, TabularQueryTool};
use tracing::{debug, info, warn};

use crate::memory::ConversationMemory;
use crate::orchestrator::ConversationalAgent;
use crate::prompts;

/// Per-session tuning, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub memory_window: usize,
    pub retrieval_top_k: usize,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            memory_window: config.memory_window,
            retrieval_top_k: config.retrieval_top_k,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            temperature: 0.0,
            max_tokens: None,
            memory_window: 10,
            retrieval_top_k: 10,
        }
    }
}

/// One logical chat session.
///
/// Invariant: the orchestrator in use always reflects the current tool
/// registry. The registry's dirty flag is the sole rebuild signal, checked
/// once per turn before routing; the rebuild happens exactly once per
/// dirty transition.
pub struct AgentSession {
    id: SessionId,
    provider: Arc<dyn Provider>,
    embedder: Arc<dyn Embedder>,
    settings: SessionSettings,
    memory: ConversationMemory,
    registry: ToolRegistry,
    archived: Vec<Vec<ChatTurn>>,
    chunks: Vec<DocumentChunk>,
    dataset: Option<TabularDataset>,
    agent: Option<ConversationalAgent>,
    last_tool: Option<String>,
    rebuilds: usize,
}

impl AgentSession {
    pub fn new(
        provider: Arc<dyn Provider>,
        embedder: Arc<dyn Embedder>,
        settings: SessionSettings,
    ) -> Self {
        let memory = ConversationMemory::new(settings.memory_window);
        Self {
            id: SessionId::new(),
            provider,
            embedder,
            settings,
            memory,
            registry: ToolRegistry::new(),
            archived: Vec::new(),
            chunks: Vec::new(),
            dataset: None,
            agent: None,
            last_tool: None,
            rebuilds: 0,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Add extracted passage chunks. Rebuilds the registry wholesale.
    pub fn attach_chunks(&mut self, chunks: Vec<DocumentChunk>) {
        info!(added = chunks.len(), "attaching document chunks");
        self.chunks.extend(chunks);
        self.rebuild_registry();
    }

    /// Bind the tabular dataset. Exactly one dataset is supported;
    /// the first one registered wins.
    pub fn bind_dataset(&mut self, dataset: TabularDataset) {
        if let Some(existing) = &self.dataset {
            warn!(
                bound = %existing.name,
                ignored = %dataset.name,
                "a dataset is already bound; keeping the first"
            );
            return;
        }
        info!(name = %dataset.name, "binding tabular dataset");
        self.dataset = Some(dataset);
        self.rebuild_registry();
    }

    /// Replace the registry from the current document state. Wholesale:
    /// fresh tool instances, fresh indices, never a partial patch.
    fn rebuild_registry(&mut self) {
        let mut registry = ToolRegistry::new();

        if !self.chunks.is_empty() {
            registry.register(Arc::new(PassageSearchTool::new(
                self.provider.clone(),
                &self.settings.model,
                self.chunks.clone(),
                self.embedder.clone(),
                self.settings.retrieval_top_k,
            )));
        }

        if let Some(dataset) = &self.dataset {
            registry.register(Arc::new(TabularQueryTool::new(
                self.provider.clone(),
                &self.settings.model,
                dataset.clone(),
            )));
        }

        registry.mark_dirty();
        self.registry = registry;
    }

    /// Process one user turn and record it.
    pub async fn submit(&mut self, input: &str) -> Result<String> {
        if self.agent.is_none() || self.registry.is_dirty() {
            let tools = self.registry.current().to_vec();
            self.agent = Some(ConversationalAgent::new(
                self.provider.clone(),
                &self.settings.model,
                self.settings.temperature,
                self.settings.max_tokens,
                tools,
            ));
            self.registry.clear_dirty();
            self.rebuilds += 1;
            debug!(rebuilds = self.rebuilds, "orchestrator rebuilt");
        }

        let Some(agent) = self.agent.as_ref() else {
            return Err(Error::Internal("orchestrator missing after rebuild".into()));
        };

        let outcome = agent
            .take_turn(input, &self.memory, self.last_tool.as_deref())
            .await;

        self.last_tool = outcome.tool_used.clone();
        let turn = ChatTurn::new(input, &outcome.response, self.memory.len());
        self.memory.record(turn);

        Ok(outcome.response)
    }

    /// Start a new chat: archive the turn log, clear memory, and force a
    /// registry rebuild before the next turn.
    pub fn reset_session(&mut self) {
        let turns = self.memory.drain();
        if !turns.is_empty() {
            info!(archived_turns = turns.len(), "archiving session log");
            self.archived.push(turns);
        }
        self.last_tool = None;
        self.registry.mark_dirty();
    }

    /// Turn logs archived by previous resets, oldest first.
    pub fn archived_sessions(&self) -> &[Vec<ChatTurn>] {
        &self.archived
    }

    /// Discard all archived logs.
    pub fn clear_archives(&mut self) {
        self.archived.clear();
    }

    /// Greeting listing the currently available tools.
    pub fn welcome_message(&self) -> String {
        prompts::welcome_message(&self.registry.tokens())
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    /// Tool used by the most recent turn, if any.
    pub fn last_tool(&self) -> Option<&str> {
        self.last_tool.as_deref()
    }

    /// How many times the orchestrator has been (re)constructed.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }
}
