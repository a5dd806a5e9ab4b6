//! Recovery reformatter — the fallback for unparseable model output.
//!
//! One model call that strips parse-failure preambles and residual
//! serialization syntax and rewrites the content as presentation-ready
//! markdown. No retry loop: if this call also fails, the original raw
//! text is surfaced unmodified as the last resort.

use std::sync::Arc;

use docpilot_core::message::Message;
use docpilot_core::provider::{Provider, ProviderRequest};
use tracing::warn;

use crate::prompts::reformat_prompt;

pub struct RecoveryReformatter {
    provider: Arc<dyn Provider>,
    model: String,
}

impl RecoveryReformatter {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Produce clean text from malformed output. Single attempt; the raw
    /// input comes back unchanged if the reformatting call fails.
    pub async fn reformat(&self, raw: &str) -> String {
        let request = ProviderRequest::new(
            &self.model,
            vec![Message::user(reformat_prompt(raw))],
        );

        match self.provider.complete(request).await {
            Ok(response) if !response.content.trim().is_empty() => response.content,
            Ok(_) => {
                warn!("reformatter returned empty output; surfacing raw text");
                raw.to_string()
            }
            Err(e) => {
                warn!(error = %e, "reformatter call failed; surfacing raw text");
                raw.to_string()
            }
        }
    }
}
