//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities, so clone them freely.
//! The `complete` method is `async fn` on the enum so callers need no
//! trait-object machinery.

pub mod providers;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider misconfigured: {0}")]
    Config(String),
    #[error("provider request timed out: {0}")]
    Timeout(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

impl ProviderError {
    /// Map a transport failure, keeping timeouts distinguishable.
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else {
            ProviderError::Request(e.to_string())
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn. The system prompt travels separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Trim every turn and drop the ones left empty. Vendors reject a final
/// assistant turn that ends in whitespace.
pub(crate) fn normalize(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter_map(|m| {
            let content = m.content.trim();
            (!content.is_empty()).then(|| ChatMessage { role: m.role, content: content.to_string() })
        })
        .collect()
}

// ── Response ──────────────────────────────────────────────────────────────────

/// Token usage reported by the provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new `complete` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    Anthropic(providers::anthropic::AnthropicProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl LlmProvider {
    /// One round trip: `system` plus the conversation so far, no retries.
    pub async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<LlmResponse, ProviderError> {
        let system = system.trim();
        let messages = normalize(messages);
        if messages.is_empty() {
            return Err(ProviderError::Request("no non-empty messages to send".into()));
        }
        match self {
            LlmProvider::Dummy(p) => p.complete(system, &messages).await,
            LlmProvider::Anthropic(p) => p.complete(system, &messages).await,
            LlmProvider::OpenAiCompatible(p) => p.complete(system, &messages).await,
        }
    }

    /// Short backend name for health output and logs.
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::Anthropic(_) => "anthropic",
            LlmProvider::OpenAiCompatible(_) => "openai",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::Anthropic(p) => p.model(),
            LlmProvider::OpenAiCompatible(p) => p.model(),
        }
    }
}
