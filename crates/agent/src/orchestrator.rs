//! The conversational orchestrator and its turn-level state machine.
//!
//! A turn moves through `Idle → Routing → (ToolExecuting | direct) →
//! (Recovering)? → Responded`. Routing is lexical: an exact registered
//! token in the input mandates that tool, whatever the model proposes.
//! Output that cannot be parsed into an action is recovered through the
//! reformatter, never surfaced raw.

use std::sync::Arc;

use docpilot_core::action::{AgentAction, parse_action};
use docpilot_core::error::Error;
use docpilot_core::message::Message;
use docpilot_core::provider::{Provider, ProviderRequest};
use docpilot_core::retry::{MAX_ATTEMPTS, retry};
use docpilot_core::tool::Tool;
use tracing::{debug, info, warn};

use crate::memory::ConversationMemory;
use crate::prompts::{observation_message, routing_prompt};
use crate::recovery::RecoveryReformatter;

/// The phases a turn passes through, recorded for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Routing,
    ToolExecuting,
    Recovering,
    Responded,
}

/// The result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The visible answer.
    pub response: String,

    /// Token of the tool that was invoked this turn, if any.
    pub tool_used: Option<String>,

    /// Whether the reformatter produced the answer.
    pub recovered: bool,

    /// Phase trace of the final (successful) attempt.
    pub phases: Vec<TurnPhase>,
}

/// Decides whether a turn without an explicit token continues the
/// previous tool conversation. The judgment is inherently fuzzy, so it is
/// a policy hook rather than a fixed rule.
pub trait FollowUpPolicy: Send + Sync {
    fn is_follow_up(&self, input: &str, memory: &ConversationMemory) -> bool;
}

/// Default policy: short inputs and continuation openers count as
/// follow-ups once a conversation exists.
pub struct HeuristicFollowUp;

const CONTINUATION_CUES: &[&str] = &[
    "and ", "also ", "what about", "how about", "then ", "why", "it ", "they ", "that ", "those ",
];

impl FollowUpPolicy for HeuristicFollowUp {
    fn is_follow_up(&self, input: &str, memory: &ConversationMemory) -> bool {
        if memory.is_empty() {
            return false;
        }
        let lower = input.trim().to_lowercase();
        CONTINUATION_CUES.iter().any(|cue| lower.starts_with(cue))
            || lower.split_whitespace().count() <= 4
    }
}

struct AttemptOutcome {
    response: String,
    tool_used: Option<String>,
    recovered: bool,
    phases: Vec<TurnPhase>,
}

/// The orchestrator. Bound to a snapshot of the tool registry at
/// construction — a stale instance must never serve a turn, so the
/// session rebuilds it whenever the registry is marked dirty.
pub struct ConversationalAgent {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Vec<Arc<dyn Tool>>,
    follow_up: Arc<dyn FollowUpPolicy>,
    reformatter: RecoveryReformatter,
}

impl ConversationalAgent {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: Option<u32>,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Self {
        let model = model.into();
        let reformatter = RecoveryReformatter::new(provider.clone(), &model);
        Self {
            provider,
            model,
            temperature,
            max_tokens,
            tools,
            follow_up: Arc::new(HeuristicFollowUp),
            reformatter,
        }
    }

    /// Swap the follow-up policy.
    pub fn with_follow_up_policy(mut self, policy: Arc<dyn FollowUpPolicy>) -> Self {
        self.follow_up = policy;
        self
    }

    /// Process one user turn to completion.
    ///
    /// The whole routing+execution attempt is retried up to the shared
    /// budget; a persistent failure surfaces the last error's reformatted
    /// text rather than propagating.
    pub async fn take_turn(
        &self,
        input: &str,
        memory: &ConversationMemory,
        last_tool: Option<&str>,
    ) -> TurnOutcome {
        match retry(MAX_ATTEMPTS, |_| self.run_attempt(input, memory, last_tool)).await {
            Ok(attempt) => {
                let mut phases = vec![TurnPhase::Idle];
                phases.extend(attempt.phases);
                info!(
                    tool = attempt.tool_used.as_deref().unwrap_or("none"),
                    recovered = attempt.recovered,
                    "turn completed"
                );
                TurnOutcome {
                    response: attempt.response,
                    tool_used: attempt.tool_used,
                    recovered: attempt.recovered,
                    phases,
                }
            }
            Err(e) => {
                warn!(error = %e, "turn failed after retries; surfacing reformatted error");
                let response = self.reformatter.reformat(&e.to_string()).await;
                TurnOutcome {
                    response,
                    tool_used: None,
                    recovered: true,
                    phases: vec![
                        TurnPhase::Idle,
                        TurnPhase::Routing,
                        TurnPhase::Recovering,
                        TurnPhase::Responded,
                    ],
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        input: &str,
        memory: &ConversationMemory,
        last_tool: Option<&str>,
    ) -> Result<AttemptOutcome, Error> {
        let mut phases = vec![TurnPhase::Routing];

        match self.route(input, memory, last_tool) {
            Some(tool) => {
                phases.push(TurnPhase::ToolExecuting);
                self.tool_turn(input, memory, tool, phases).await
            }
            None => self.direct_turn(input, memory, phases).await,
        }
    }

    /// Lexical routing: an exact token mention mandates that tool; a
    /// follow-up reuses the previous turn's tool; otherwise no tool.
    fn route(
        &self,
        input: &str,
        memory: &ConversationMemory,
        last_tool: Option<&str>,
    ) -> Option<Arc<dyn Tool>> {
        for tool in &self.tools {
            if input.contains(tool.token()) {
                debug!(tool = tool.token(), "routing: explicit mention");
                return Some(tool.clone());
            }
        }

        if let Some(last) = last_tool
            && self.follow_up.is_follow_up(input, memory)
            && let Some(tool) = self.tools.iter().find(|t| t.token() == last)
        {
            debug!(tool = last, "routing: follow-up reuses previous tool");
            return Some(tool.clone());
        }

        debug!("routing: no tool");
        None
    }

    /// Mandated-tool path: the model proposes the action, the mandated
    /// tool runs regardless of what it proposed, and the observation is
    /// composed into the final answer.
    async fn tool_turn(
        &self,
        input: &str,
        memory: &ConversationMemory,
        tool: Arc<dyn Tool>,
        mut phases: Vec<TurnPhase>,
    ) -> Result<AttemptOutcome, Error> {
        let mut messages = self.base_messages(memory, Some(tool.token()));
        messages.push(Message::user(input));

        let proposal = self.provider.complete(self.request(messages.clone())).await?;

        let tool_input = match parse_action(&proposal.content) {
            Ok(AgentAction::UseTool { token, input: raw }) => {
                if token != tool.token() {
                    debug!(proposed = %token, mandated = tool.token(), "overriding model's tool choice");
                }
                AgentAction::input_text(&raw)
            }
            // The model skipped the tool; the mandate still stands, so the
            // raw user input becomes the tool input.
            Ok(AgentAction::Final { .. }) => input.to_string(),
            Err(docpilot_core::error::AgentError::ActionParse { raw }) => {
                phases.push(TurnPhase::Recovering);
                let response = self.reformatter.reformat(&raw).await;
                phases.push(TurnPhase::Responded);
                return Ok(AttemptOutcome {
                    response,
                    tool_used: None,
                    recovered: true,
                    phases,
                });
            }
        };

        let observation = tool.invoke(&tool_input).await.map_err(Error::from)?;

        messages.push(Message::assistant(&proposal.content));
        messages.push(Message::user(observation_message(&observation)));

        let composed = self.provider.complete(self.request(messages)).await?;

        match parse_action(&composed.content) {
            Ok(AgentAction::Final { answer }) => {
                let response = preserve_citations(&observation, answer);
                phases.push(TurnPhase::Responded);
                Ok(AttemptOutcome {
                    response,
                    tool_used: Some(tool.token().to_string()),
                    recovered: false,
                    phases,
                })
            }
            // Anything but a final answer here is malformed output for
            // this protocol step: recover instead of surfacing it.
            Ok(AgentAction::UseTool { .. }) | Err(_) => {
                phases.push(TurnPhase::Recovering);
                let reformatted = self.reformatter.reformat(&composed.content).await;
                let response = preserve_citations(&observation, reformatted);
                phases.push(TurnPhase::Responded);
                Ok(AttemptOutcome {
                    response,
                    tool_used: Some(tool.token().to_string()),
                    recovered: true,
                    phases,
                })
            }
        }
    }

    /// No-tool path: a single model call answered from its own knowledge.
    async fn direct_turn(
        &self,
        input: &str,
        memory: &ConversationMemory,
        mut phases: Vec<TurnPhase>,
    ) -> Result<AttemptOutcome, Error> {
        let mut messages = self.base_messages(memory, None);
        messages.push(Message::user(input));

        let response = self.provider.complete(self.request(messages)).await?;

        match parse_action(&response.content) {
            Ok(AgentAction::Final { answer }) => {
                phases.push(TurnPhase::Responded);
                Ok(AttemptOutcome {
                    response: answer,
                    tool_used: None,
                    recovered: false,
                    phases,
                })
            }
            Ok(AgentAction::UseTool { .. }) | Err(_) => {
                phases.push(TurnPhase::Recovering);
                let reformatted = self.reformatter.reformat(&response.content).await;
                phases.push(TurnPhase::Responded);
                Ok(AttemptOutcome {
                    response: reformatted,
                    tool_used: None,
                    recovered: true,
                    phases,
                })
            }
        }
    }

    fn base_messages(&self, memory: &ConversationMemory, mandated: Option<&str>) -> Vec<Message> {
        let mut messages = vec![Message::system(routing_prompt(&self.tools, mandated))];
        messages.extend(memory.render_messages());
        messages
    }

    fn request(&self, messages: Vec<Message>) -> ProviderRequest {
        ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop: vec![],
        }
    }
}

/// Bracketed source references (`["file_name"]`) found in `text`, in order
/// of first appearance.
fn citations(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("[\"") {
        let tail = &rest[start + 2..];
        match tail.find("\"]") {
            Some(end) => {
                let cite = &rest[start..start + 2 + end + 2];
                if !found.iter().any(|c| c == cite) {
                    found.push(cite.to_string());
                }
                rest = &tail[end + 2..];
            }
            None => break,
        }
    }
    found
}

/// Citations embedded in a tool result must survive composition: any that
/// the composed answer dropped are appended.
fn preserve_citations(tool_output: &str, composed: String) -> String {
    let missing: Vec<String> = citations(tool_output)
        .into_iter()
        .filter(|cite| !composed.contains(cite.as_str()))
        .collect();

    if missing.is_empty() {
        composed
    } else {
        format!("{}\n\nSources: {}", composed.trim_end(), missing.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;

    struct AlwaysFollowUp;
    impl FollowUpPolicy for AlwaysFollowUp {
        fn is_follow_up(&self, _input: &str, _memory: &ConversationMemory) -> bool {
            true
        }
    }

    struct NeverFollowUp;
    impl FollowUpPolicy for NeverFollowUp {
        fn is_follow_up(&self, _input: &str, _memory: &ConversationMemory) -> bool {
            false
        }
    }

    fn agent_with(
        provider: Arc<dyn Provider>,
        tools: Vec<Arc<dyn Tool>>,
    ) -> ConversationalAgent {
        ConversationalAgent::new(provider, "mock-model", 0.0, None, tools)
    }

    #[tokio::test]
    async fn explicit_mention_routes_to_that_tool() {
        let pdf = Arc::new(StubTool::new("@pdfsearch", r#"Built in 2002 ["doc1"]."#));
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action("@pdfsearch", "when was sensor xyz built?"),
            &final_action(r#"Sensor xyz was built in 2002 ["doc1"]."#),
        ]));
        let agent = agent_with(provider, vec![pdf.clone()]);
        let memory = ConversationMemory::new(10);

        let outcome = agent
            .take_turn("@pdfsearch, when was sensor xyz built?", &memory, None)
            .await;

        assert_eq!(outcome.tool_used.as_deref(), Some("@pdfsearch"));
        assert_eq!(pdf.calls(), 1);
        assert!(outcome.response.contains("2002"));
        assert!(outcome.phases.contains(&TurnPhase::ToolExecuting));
        assert!(!outcome.recovered);
    }

    #[tokio::test]
    async fn mention_overrides_the_models_tool_choice() {
        let pdf = Arc::new(StubTool::new("@pdfsearch", "pdf answer"));
        let csv = Arc::new(StubTool::new("@csvsearch", "csv answer"));
        // The model proposes @csvsearch even though the input mandates
        // @pdfsearch; the mandate wins.
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action("@csvsearch", "misrouted query"),
            &final_action("answer"),
        ]));
        let agent = agent_with(provider, vec![pdf.clone(), csv.clone()]);
        let memory = ConversationMemory::new(10);

        let outcome = agent
            .take_turn("@pdfsearch, what does the document say?", &memory, None)
            .await;

        assert_eq!(outcome.tool_used.as_deref(), Some("@pdfsearch"));
        assert_eq!(pdf.calls(), 1);
        assert_eq!(csv.calls(), 0);
    }

    #[tokio::test]
    async fn follow_up_reuses_the_previous_tool() {
        let pdf = Arc::new(StubTool::new("@pdfsearch", "follow-up answer"));
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action("@pdfsearch", "and when was it designed?"),
            &final_action("It was designed in 1999."),
        ]));
        let agent = agent_with(provider, vec![pdf.clone()])
            .with_follow_up_policy(Arc::new(AlwaysFollowUp));

        let mut memory = ConversationMemory::new(10);
        memory.record(docpilot_core::turn::ChatTurn::new(
            "@pdfsearch, when was it built?",
            "2002",
            0,
        ));

        let outcome = agent
            .take_turn("and when was it designed?", &memory, Some("@pdfsearch"))
            .await;

        assert_eq!(outcome.tool_used.as_deref(), Some("@pdfsearch"));
        assert_eq!(pdf.calls(), 1);
    }

    #[tokio::test]
    async fn no_token_and_no_follow_up_answers_directly() {
        let pdf = Arc::new(StubTool::new("@pdfsearch", "unused"));
        let provider = Arc::new(SequentialMockProvider::scripted(&[&final_action(
            "I can't check live weather, but I can answer general questions.",
        )]));
        let agent =
            agent_with(provider, vec![pdf.clone()]).with_follow_up_policy(Arc::new(NeverFollowUp));
        let memory = ConversationMemory::new(10);

        let outcome = agent.take_turn("what's the weather", &memory, None).await;

        assert!(outcome.tool_used.is_none());
        assert_eq!(pdf.calls(), 0);
        assert!(!outcome.phases.contains(&TurnPhase::ToolExecuting));
        assert!(outcome.phases.contains(&TurnPhase::Responded));
    }

    #[tokio::test]
    async fn citations_survive_composition() {
        let pdf = Arc::new(StubTool::new(
            "@pdfsearch",
            r#"Sensor xyz was built in 2002 ["doc1"]."#,
        ));
        // The composed answer drops the citation; it must be re-appended.
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action("@pdfsearch", "sensor"),
            &final_action("Sensor xyz was built in 2002."),
        ]));
        let agent = agent_with(provider, vec![pdf]);
        let memory = ConversationMemory::new(10);

        let outcome = agent.take_turn("@pdfsearch sensor", &memory, None).await;

        assert!(outcome.response.contains(r#"["doc1"]"#));
    }

    #[tokio::test]
    async fn malformed_compose_output_is_recovered() {
        let pdf = Arc::new(StubTool::new("@pdfsearch", "tool result"));
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &tool_action("@pdfsearch", "query"),
            "Could not parse LLM output: broken {json",
            // The reformatter's own model call:
            "Here is the cleaned up answer.",
        ]));
        let agent = agent_with(provider, vec![pdf]);
        let memory = ConversationMemory::new(10);

        let outcome = agent.take_turn("@pdfsearch query", &memory, None).await;

        assert!(outcome.recovered);
        assert!(outcome.phases.contains(&TurnPhase::Recovering));
        assert!(outcome.response.contains("cleaned up answer"));
    }

    #[tokio::test]
    async fn malformed_direct_output_is_recovered() {
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            "no action blob at all",
            "A tidy markdown answer.",
        ]));
        let agent = agent_with(provider, vec![]);
        let memory = ConversationMemory::new(10);

        let outcome = agent.take_turn("hello", &memory, None).await;

        assert!(outcome.recovered);
        assert_eq!(outcome.response, "A tidy markdown answer.");
    }

    #[tokio::test]
    async fn persistent_failure_surfaces_reformatted_error() {
        // Both attempts fail at the provider; the third call is the
        // reformatter cleaning up the error text.
        let provider = Arc::new(FlakyMockProvider::new(2, &["Something went wrong upstream."]));
        let agent = agent_with(provider, vec![]);
        let memory = ConversationMemory::new(10);

        let outcome = agent.take_turn("hello", &memory, None).await;

        assert!(outcome.recovered);
        assert_eq!(outcome.response, "Something went wrong upstream.");
        assert!(outcome.phases.contains(&TurnPhase::Recovering));
    }

    #[tokio::test]
    async fn second_attempt_succeeds_after_provider_error() {
        let provider = Arc::new(FlakyMockProvider::new(1, &[&final_action("recovered")]));
        let agent = agent_with(provider, vec![]);
        let memory = ConversationMemory::new(10);

        let outcome = agent.take_turn("hello", &memory, None).await;

        assert!(!outcome.recovered);
        assert_eq!(outcome.response, "recovered");
    }

    #[tokio::test]
    async fn model_skipping_the_mandated_tool_still_runs_it() {
        let pdf = Arc::new(StubTool::new("@pdfsearch", "tool observation"));
        // The model jumps straight to a final answer; the mandated tool
        // runs anyway, fed the raw user input.
        let provider = Arc::new(SequentialMockProvider::scripted(&[
            &final_action("premature answer"),
            &final_action("grounded answer"),
        ]));
        let agent = agent_with(provider, vec![pdf.clone()]);
        let memory = ConversationMemory::new(10);

        let outcome = agent
            .take_turn("@pdfsearch tell me things", &memory, None)
            .await;

        assert_eq!(pdf.calls(), 1);
        assert_eq!(
            pdf.last_input().as_deref(),
            Some("@pdfsearch tell me things")
        );
        assert_eq!(outcome.response, "grounded answer");
    }

    #[test]
    fn heuristic_follow_up_needs_history() {
        let policy = HeuristicFollowUp;
        let empty = ConversationMemory::new(10);
        assert!(!policy.is_follow_up("and the other one?", &empty));

        let mut memory = ConversationMemory::new(10);
        memory.record(docpilot_core::turn::ChatTurn::new("q", "a", 0));
        assert!(policy.is_follow_up("and the other one?", &memory));
        assert!(policy.is_follow_up("what about 2003?", &memory));
        assert!(!policy.is_follow_up(
            "please give me a completely new summary of the quarterly financial results",
            &memory
        ));
    }

    #[test]
    fn citation_scanner_finds_each_source_once() {
        let text = r#"A ["doc1"]. B ["doc2"]. A again ["doc1"]."#;
        assert_eq!(citations(text), vec![r#"["doc1"]"#, r#"["doc2"]"#]);
    }

    #[test]
    fn preserve_citations_appends_missing_only() {
        let tool_output = r#"fact ["doc1"] and fact ["doc2"]"#;
        let kept = preserve_citations(tool_output, r#"answer ["doc1"]"#.to_string());
        assert!(kept.contains(r#"["doc1"]"#));
        assert!(kept.ends_with(r#"Sources: ["doc2"]"#));

        let untouched = preserve_citations(tool_output, r#"a ["doc1"] b ["doc2"]"#.to_string());
        assert!(!untouched.contains("Sources:"));
    }
}
