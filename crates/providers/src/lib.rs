//! Model provider implementations for docpilot.
//!
//! One provider covers nearly everything: most inference endpoints expose
//! an OpenAI-compatible `/v1/chat/completions` + `/v1/embeddings` surface
//! (OpenAI, Azure-style proxies, OpenRouter, Ollama, vLLM, ...).

pub mod openai_compat;

use std::sync::Arc;

use docpilot_config::AppConfig;
use docpilot_core::Provider;

pub use openai_compat::OpenAiCompatProvider;

/// Build the configured provider.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn Provider> {
    let api_key = config.api_key.clone().unwrap_or_default();
    Arc::new(OpenAiCompatProvider::new(
        "openai",
        &config.base_url,
        api_key,
    ))
}
