//! The analysis pipeline: resolve → mask → prompt → model → extract → unmask.
//!
//! With a retrieval strategy the model is called twice. The first call
//! drafts an answer from the input alone; if the strategy asks for it, the
//! masked input is sent to the retriever and a second call sees the draft
//! plus the retrieved snippets. Retrieval is best-effort: an error or an
//! empty result keeps the draft.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{AnalysisConfig, Config};
use crate::error::AppError;
use crate::extract::extract_fields;
use crate::llm::{ChatMessage, LlmProvider, LlmResponse, ProviderError, providers};
use crate::masking::{MaskRule, Masker, MaskingTable};
use crate::prompt::{PromptTable, build_user_prompt};
use crate::rag::{self, Retriever, format_hits};
use crate::request::{AnalysisReport, AnalyzeRequest, InputMode, RequestError, ResolvedRequest};

/// Draft phrases that suggest the model lacks context.
pub const DEFAULT_TRIGGERS: &[&str] = &[
    "모르겠",
    "불확실",
    "추정",
    "추가 정보",
    "확인이 필요",
    "가능성이",
    "근거 부족",
    "not sure",
    "uncertain",
    "unclear",
    "more information",
    "more context",
    "cannot determine",
    "insufficient",
];

// ── Strategy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One model call, no retrieval.
    #[default]
    Direct,
    /// Draft, then retrieve only when the draft signals uncertainty.
    DraftRag,
    /// Draft, always retrieve, then finalize.
    AlwaysRag,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::DraftRag => "draft_rag",
            Strategy::AlwaysRag => "always_rag",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "direct" => Ok(Strategy::Direct),
            "draft_rag" => Ok(Strategy::DraftRag),
            "always_rag" => Ok(Strategy::AlwaysRag),
            other => Err(format!("unknown strategy '{other}' (expected direct, draft_rag or always_rag)")),
        }
    }
}

/// Whether `draft` contains any trigger phrase (case-insensitive).
pub fn needs_retrieval(draft: &str, triggers: &[String]) -> bool {
    if draft.trim().is_empty() {
        return false;
    }
    let draft = draft.to_lowercase();
    triggers
        .iter()
        .map(|t| t.trim().to_lowercase())
        .any(|t| !t.is_empty() && draft.contains(&t))
}

/// Retriever query: the masked log and code with placeholders blanked out.
/// Section headers and placeholder labels never reach the index.
fn retrieval_query(table: &MaskingTable, mode: InputMode, log: &str, code: &str) -> String {
    let log = if mode.needs_log() { log } else { "" };
    let code = if mode.needs_code() { code } else { "" };
    [log, code]
        .iter()
        .map(|text| table.strip_placeholders(text).trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Everything one analysis needs. Cheap to clone; shared by every request.
#[derive(Debug, Clone)]
pub struct Troubleshooter {
    provider: LlmProvider,
    prompts: Arc<PromptTable>,
    masker: Masker,
    retriever: Option<Retriever>,
    analysis: AnalysisConfig,
}

impl Troubleshooter {
    pub fn new(
        provider: LlmProvider,
        prompts: PromptTable,
        masker: Masker,
        retriever: Option<Retriever>,
        analysis: AnalysisConfig,
    ) -> Self {
        if analysis.strategy != Strategy::Direct && retriever.is_none() {
            warn!(strategy = %analysis.strategy, "no retriever configured; answering in one call");
        }
        Self { provider, prompts: Arc::new(prompts), masker, retriever, analysis }
    }

    /// Build the provider, prompt table, masking rules and retriever from config.
    pub fn from_config(cfg: &Config) -> Result<Self, AppError> {
        let provider = providers::build(&cfg.llm, cfg.secrets.llm_api_key.clone())
            .map_err(|e| AppError::Config(e.to_string()))?;
        let prompts = PromptTable::load(&cfg.prompts_dir);

        let masker = if cfg.masking.enabled {
            let extra = cfg
                .masking
                .rules
                .iter()
                .map(|(label, pattern)| {
                    MaskRule::new(label, pattern).map_err(|e| {
                        AppError::Config(format!("[masking.rules] {label}: invalid regex: {e}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Masker::new(extra)
        } else {
            Masker::disabled()
        };

        let retriever = rag::build(&cfg.rag, &cfg.secrets).map_err(|e| AppError::Rag(e.to_string()))?;

        info!(
            provider = provider.name(),
            model = provider.model(),
            strategy = %cfg.analysis.strategy,
            rag = retriever.as_ref().map_or("none", Retriever::name),
            masking = masker.is_enabled(),
            "troubleshooter ready"
        );
        Ok(Self::new(provider, prompts, masker, retriever, cfg.analysis.clone()))
    }

    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    pub fn strategy(&self) -> Strategy {
        self.analysis.strategy
    }

    pub fn retriever(&self) -> Option<&Retriever> {
        self.retriever.as_ref()
    }

    /// Run one request end to end.
    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalysisReport, AnalyzeError> {
        let request_id = Uuid::now_v7();
        let span = info_span!("analyze", %request_id);
        async move {
            let req = request.resolve()?;
            info!(persona = %req.persona, mode = %req.mode, strategy = %self.analysis.strategy, "analysis started");
            self.run(req).await
        }
        .instrument(span)
        .await
    }

    async fn run(&self, req: ResolvedRequest) -> Result<AnalysisReport, AnalyzeError> {
        let mut table = self.masker.table();
        table.reserve(&req.log);
        table.reserve(&req.code);
        let log = table.mask(&req.log);
        let code = table.mask(&req.code);
        if !table.is_empty() {
            debug!(masked = table.len(), "sensitive values masked");
        }

        let user_prompt = build_user_prompt(req.mode, &log, &code);
        let first_turn = [ChatMessage::user(user_prompt.as_str())];

        let raw = match (&self.retriever, self.analysis.strategy) {
            (Some(retriever), Strategy::DraftRag | Strategy::AlwaysRag) => {
                let draft_system = self.prompts.draft_prompt(req.persona, req.mode);
                let draft = self.call(&draft_system, &first_turn, "draft").await?;

                let wants_context = self.analysis.strategy == Strategy::AlwaysRag
                    || needs_retrieval(&draft, &self.analysis.triggers);
                if !wants_context {
                    debug!("draft is confident; skipping retrieval");
                    draft
                } else if let Some(context) =
                    self.retrieve(retriever, &retrieval_query(&table, req.mode, &log, &code)).await
                {
                    let final_system = self.prompts.final_prompt(req.persona, req.mode);
                    let turns = [
                        ChatMessage::user(user_prompt.as_str()),
                        ChatMessage::assistant(draft),
                        ChatMessage::user(self.prompts.context_message(&context)),
                    ];
                    self.call(&final_system, &turns, "final").await?
                } else {
                    draft
                }
            }
            _ => {
                let system = self.prompts.system_prompt(req.persona, req.mode);
                self.call(system, &first_turn, "answer").await?
            }
        };

        let fields = extract_fields(&raw);
        if !fields.is_complete() {
            warn!(missing = ?fields.missing(), "model answer incomplete; defaults applied");
        }
        let report = fields.into_report();
        let report = AnalysisReport {
            cause: table.unmask(&report.cause),
            solution: table.unmask(&report.solution),
            prevention: table.unmask(&report.prevention),
        };
        info!("analysis complete");
        Ok(report)
    }

    async fn call(
        &self,
        system: &str,
        messages: &[ChatMessage],
        stage: &'static str,
    ) -> Result<String, ProviderError> {
        let LlmResponse { text, usage } = self.provider.complete(system, messages).await?;
        match usage {
            Some(u) => debug!(
                stage,
                input_tokens = u.input_tokens,
                output_tokens = u.output_tokens,
                cached_input_tokens = u.cached_input_tokens,
                "model call finished"
            ),
            None => debug!(stage, "model call finished"),
        }
        tracing::trace!(stage, %text, "model output");
        Ok(text)
    }

    /// Search with the masked inputs. `None` means "keep the draft".
    async fn retrieve(&self, retriever: &Retriever, query: &str) -> Option<String> {
        let query: String = query.chars().take(self.analysis.query_max_chars.max(1)).collect();
        if query.trim().is_empty() {
            debug!("nothing left to search for after masking; keeping draft");
            return None;
        }
        match retriever.search(&query, self.analysis.top_k).await {
            Ok(hits) if hits.is_empty() => {
                info!(backend = retriever.name(), hits = 0, "no knowledge base match; keeping draft");
                None
            }
            Ok(hits) => {
                info!(backend = retriever.name(), hits = hits.len(), "knowledge base context retrieved");
                Some(format_hits(&hits))
            }
            Err(e) => {
                warn!(backend = retriever.name(), error = %e, "retrieval failed; keeping draft");
                None
            }
        }
    }
}
