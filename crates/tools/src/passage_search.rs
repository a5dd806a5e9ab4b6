//! Passage search tool — sourced answers from indexed document chunks.
//!
//! On invocation the tool runs its own bounded retrieval loop: the model
//! may issue at most two distinct similarity queries, never the same one
//! twice, and must synthesize its answer from the retrieved context alone,
//! citing every factual claim with the chunk's source identifier.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docpilot_core::action::{AgentAction, parse_action};
use docpilot_core::document::DocumentChunk;
use docpilot_core::error::ToolError;
use docpilot_core::message::Message;
use docpilot_core::provider::{Provider, ProviderRequest};
use docpilot_core::retry::{MAX_ATTEMPTS, retry};
use docpilot_core::tool::Tool;
use docpilot_index::{Embedder, PassageIndex, ScoredChunk};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Invocation token for this tool.
pub const TOKEN: &str = "@pdfsearch";

/// Sub-action name the retrieval loop exposes to the model.
const SEARCH_ACTION: &str = "search_passages";

/// Distinct similarity queries allowed per invocation.
const MAX_SEARCHES: usize = 2;

/// Hard cap on model round-trips per attempt.
const MAX_STEPS: usize = 6;

const SEARCH_PROMPT: &str = r#"You answer questions strictly from passages retrieved out of the user's uploaded documents.

To retrieve passages, respond with exactly one JSON blob:
{"action": "search_passages", "action_input": "<similarity query>"}

To finish, respond with:
{"action": "Final Answer", "action_input": "<your answer>"}

Rules:
- You may perform up to 2 searches in a single turn before the Final Answer. Never search the same query more than once.
- If the user's message contains multiple questions, search for each one at a time, then compile the final answer from the individual results.
- Use only the retrieved passages. Do not add information of your own, and do not make assumptions beyond what the passages state.
- Reference every factual statement with its source, exactly as shown for the passage, in the form ["file_name"]. Do not shorten source names. There is no limit on how many references you give.
- If the retrieved context contains no answer, say that no results were found to answer the question.
- Never generate URLs or links that are not present in the retrieved passages."#;

/// Tool that searches the indexed document chunks.
pub struct PassageSearchTool {
    provider: Arc<dyn Provider>,
    model: String,
    chunks: Vec<DocumentChunk>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    index: OnceCell<PassageIndex>,
    last_queries: Mutex<Vec<String>>,
}

impl PassageSearchTool {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        chunks: Vec<DocumentChunk>,
        embedder: Arc<dyn Embedder>,
        top_k: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            chunks,
            embedder,
            top_k,
            index: OnceCell::new(),
            last_queries: Mutex::new(Vec::new()),
        }
    }

    /// The similarity queries issued during the most recent attempt.
    pub fn last_issued_queries(&self) -> Vec<String> {
        self.last_queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record_query(&self, query: &str) {
        self.last_queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(query.to_string());
    }

    fn reset_query_trace(&self) {
        self.last_queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    async fn run_retrieval_loop(
        &self,
        index: &PassageIndex,
        input: &str,
    ) -> Result<String, ToolError> {
        self.reset_query_trace();

        let mut messages = vec![Message::system(SEARCH_PROMPT), Message::user(input)];
        let mut issued: Vec<String> = Vec::new();

        for _ in 0..MAX_STEPS {
            let request = ProviderRequest::new(&self.model, messages.clone());
            let response = self.provider.complete(request).await.map_err(|e| {
                ToolError::ExecutionFailed {
                    token: TOKEN.into(),
                    reason: e.to_string(),
                }
            })?;

            let action =
                parse_action(&response.content).map_err(|e| ToolError::ExecutionFailed {
                    token: TOKEN.into(),
                    reason: e.to_string(),
                })?;

            match action {
                AgentAction::Final { answer } => {
                    info!(searches = issued.len(), "passage search finished");
                    return Ok(answer);
                }
                AgentAction::UseTool { token, input: raw } if token == SEARCH_ACTION => {
                    let query = AgentAction::input_text(&raw);
                    messages.push(Message::assistant(&response.content));

                    let observation = if issued.iter().any(|q| *q == query) {
                        debug!(%query, "duplicate query refused");
                        "That exact query was already searched this turn. Never repeat \
                         an identical query; refine it or give the Final Answer."
                            .to_string()
                    } else if issued.len() >= MAX_SEARCHES {
                        debug!(%query, "search budget exhausted");
                        "The search budget for this turn is used up. Give the Final \
                         Answer from the context gathered so far."
                            .to_string()
                    } else {
                        issued.push(query.clone());
                        self.record_query(&query);
                        let results = index.search(&query, self.top_k).await.map_err(|e| {
                            ToolError::ExecutionFailed {
                                token: TOKEN.into(),
                                reason: e.to_string(),
                            }
                        })?;
                        render_results(&results)
                    };

                    messages.push(Message::user(observation));
                }
                AgentAction::UseTool { token, .. } => {
                    messages.push(Message::assistant(&response.content));
                    messages.push(Message::user(format!(
                        "Unknown action '{token}'. Use \"{SEARCH_ACTION}\" or \"Final Answer\"."
                    )));
                }
            }
        }

        Err(ToolError::ExecutionFailed {
            token: TOKEN.into(),
            reason: format!("retrieval loop did not reach a final answer within {MAX_STEPS} steps"),
        })
    }
}

/// Format retrieved chunks as an observation for the model.
fn render_results(results: &[ScoredChunk]) -> String {
    if results.is_empty() {
        return "No results were found for this query.".into();
    }

    let mut out = format!("Search results (top {}):\n", results.len());
    for scored in results {
        out.push_str(&format!(
            "- [source: {} | similarity: {:.3}] {}\n",
            scored.chunk.source, scored.score, scored.chunk.content
        ));
    }
    out
}

#[async_trait]
impl Tool for PassageSearchTool {
    fn token(&self) -> &str {
        TOKEN
    }

    fn description(&self) -> &str {
        "useful when the question includes the term: @pdfsearch"
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        // Build (or reuse) the index; a failed build degrades to a
        // diagnostic message rather than a fault.
        let index = match self
            .index
            .get_or_try_init(|| PassageIndex::build(self.chunks.clone(), self.embedder.clone()))
            .await
        {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "passage index unavailable");
                return Ok(format!(
                    "No results were found: the document index is unavailable ({e})."
                ));
            }
        };

        match retry(MAX_ATTEMPTS, |_| self.run_retrieval_loop(index, input)).await {
            Ok(answer) => Ok(answer),
            Err(e) => Ok(e.to_string()),
        }
    }
}
