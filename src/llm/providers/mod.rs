//! LLM provider implementations.
//!
//! `build(config, api_key)` is the factory, called at startup.
//! Adding a new backend = new module + new match arm.

pub mod anthropic;
pub mod dummy;
pub mod openai_compatible;

use crate::config::LlmConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Construct a `LlmProvider` from config and an optional API key.
///
/// `api_key` is sourced from the environment (never TOML) and is `None` for
/// keyless local models.
pub fn build(config: &LlmConfig, api_key: Option<String>) -> Result<LlmProvider, ProviderError> {
    match config.provider.as_str() {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider)),
        "anthropic" | "claude" => {
            let a = &config.anthropic;
            let p = anthropic::AnthropicProvider::new(
                a.api_url.clone(),
                a.model.clone(),
                a.temperature,
                a.max_tokens,
                a.timeout_seconds,
                api_key.unwrap_or_default(),
            )?;
            Ok(LlmProvider::Anthropic(p))
        }
        "openai" | "openai-compatible" => {
            let oai = &config.openai;
            let p = openai_compatible::OpenAiCompatibleProvider::new(
                oai.api_base_url.clone(),
                oai.model.clone(),
                oai.temperature,
                oai.max_tokens,
                oai.timeout_seconds,
                api_key,
            )?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn llm_config(provider: &str) -> LlmConfig {
        let mut cfg = Config::offline().unwrap().llm;
        cfg.provider = provider.to_string();
        cfg
    }

    #[test]
    fn builds_dummy_without_key() {
        let p = build(&llm_config("dummy"), None).unwrap();
        assert_eq!(p.name(), "dummy");
    }

    #[test]
    fn builds_keyless_openai_compatible() {
        let p = build(&llm_config("openai"), None).unwrap();
        assert_eq!(p.name(), "openai");
        assert_eq!(p.model(), "gpt-4o-mini");
    }

    #[test]
    fn anthropic_requires_key() {
        assert!(matches!(build(&llm_config("anthropic"), None), Err(ProviderError::Config(_))));
        let p = build(&llm_config("anthropic"), Some("sk-ant-test".into())).unwrap();
        assert_eq!(p.name(), "anthropic");
    }

    #[test]
    fn unknown_provider_errors() {
        let err = build(&llm_config("bedrock"), None).unwrap_err();
        assert!(err.to_string().contains("bedrock"));
    }
}
