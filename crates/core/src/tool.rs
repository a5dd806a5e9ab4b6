//! Tool trait and registry — the closed set of invokable capabilities.
//!
//! A tool is a named capability that answers a query using a bounded
//! reasoning loop over specific data (document passages or a bound table).
//! Tools are addressed by their invocation token (e.g. `@pdfsearch`): an
//! exact mention of the token in the user's input mandates that tool.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ToolError;

/// The core Tool trait.
///
/// Each tool implements this trait and is held in the session's
/// [`ToolRegistry`]. `invoke` runs the tool's own bounded reasoning loop
/// to completion and returns the user-visible result text; tool-internal
/// failures degrade to diagnostic text inside the implementation wherever
/// the contract demands it, so an `Err` here is a genuine fault.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The stable invocation token (e.g., "@pdfsearch").
    fn token(&self) -> &str;

    /// When this tool should be used (shown to the model).
    fn description(&self) -> &str;

    /// Execute the tool against the given free-text input.
    async fn invoke(&self, input: &str) -> std::result::Result<String, ToolError>;
}

/// The ordered set of tools available to the current session.
///
/// The registry is rebuilt wholesale whenever the uploaded document set
/// changes — retrieval indices and tabular bindings are not safely
/// updatable in place. Setting the dirty flag is the sole signal the
/// orchestrator uses to decide whether to reconstruct itself.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    dirty: bool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            dirty: false,
        }
    }

    /// Register a tool at the end of the ordered sequence.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// The current ordered tool sequence.
    pub fn current(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    /// Look up a tool by its invocation token.
    pub fn get(&self, token: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.token() == token).cloned()
    }

    /// All registered invocation tokens, in registration order.
    pub fn tokens(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.token()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Signal that the tool set is stale and the orchestrator must be
    /// rebuilt before the next turn. Idempotent.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Acknowledge a rebuild. Called exactly once per dirty transition,
    /// immediately after the orchestrator is reconstructed.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool {
        token: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn token(&self) -> &str {
            &self.token
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        async fn invoke(&self, input: &str) -> std::result::Result<String, ToolError> {
            Ok(input.to_string())
        }
    }

    fn echo(token: &str) -> Arc<dyn Tool> {
        Arc::new(EchoTool { token: token.into() })
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("@pdfsearch"));
        assert!(registry.get("@pdfsearch").is_some());
        assert!(registry.get("@nonexistent").is_none());
    }

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("@pdfsearch"));
        registry.register(echo("@tablequery"));
        assert_eq!(registry.tokens(), vec!["@pdfsearch", "@tablequery"]);
    }

    #[test]
    fn dirty_flag_lifecycle() {
        let mut registry = ToolRegistry::new();
        assert!(!registry.is_dirty());

        registry.mark_dirty();
        registry.mark_dirty(); // idempotent
        assert!(registry.is_dirty());

        registry.clear_dirty();
        assert!(!registry.is_dirty());
    }

    #[tokio::test]
    async fn invoke_through_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("@pdfsearch"));
        let tool = registry.get("@pdfsearch").unwrap();
        let out = tool.invoke("hello").await.unwrap();
        assert_eq!(out, "hello");
    }
}
