//! Dummy LLM provider: answers with the JSON contract, quoting the first
//! content line of the last user turn. Lets the full pipeline run without an
//! API key.

use serde_json::json;

use crate::llm::{ChatMessage, LlmResponse, ProviderError, Role};
use crate::prompt::{CODE_HEADER, LOG_HEADER};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(
        &self,
        _system: &str,
        messages: &[ChatMessage],
    ) -> Result<LlmResponse, ProviderError> {
        let first_line = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| {
                m.content
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty() && *l != LOG_HEADER && *l != CODE_HEADER)
            })
            .unwrap_or_default();

        let body = json!({
            "cause": format!("[dummy] {first_line}"),
            "solution": "[dummy] no model configured; set [llm] provider to a real backend",
            "prevention": "[dummy] add a regression test for this failure",
        });
        Ok(LlmResponse { text: body.to_string(), usage: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quotes_first_line_of_last_user_turn() {
        let msgs = vec![
            ChatMessage::user("[Log]\nold"),
            ChatMessage::assistant("draft"),
            ChatMessage::user("\n[Log]\nsecond"),
        ];
        let r = DummyProvider.complete("", &msgs).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&r.text).unwrap();
        assert_eq!(v["cause"], "[dummy] second");
        assert!(r.usage.is_none());
    }

    #[tokio::test]
    async fn empty_conversation_still_answers() {
        let r = DummyProvider.complete("", &[]).await.unwrap();
        assert!(r.text.contains("\"prevention\""));
    }
}
