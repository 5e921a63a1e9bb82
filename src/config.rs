//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory (or
//! the path given with `-f`), then applies `TROUBLESHOOTER_LOG_LEVEL` and
//! `TROUBLESHOOTER_BIND` env overrides. Secrets are read from the environment
//! only and never from TOML.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;
use crate::rag::ingest::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::troubleshoot::{DEFAULT_TRIGGERS, Strategy};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// HTTP backend configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind the listener to.
    pub bind: String,
    /// Upper bound on one `/analyze/log` request, LLM calls included.
    pub request_timeout_seconds: u64,
}

/// Anthropic Messages API configuration (`[llm.anthropic]`).
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

/// OpenAI / OpenAI-compatible provider configuration (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub model: String,
    /// Sampling temperature (ignored for models that forbid it).
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// LLM configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"`, `"anthropic"`, `"openai"`).
    /// Maps to `default` in `[llm]`: other provider sections can coexist
    /// without being loaded.
    pub provider: String,
    pub anthropic: AnthropicConfig,
    pub openai: OpenAiConfig,
}

/// Routing policy for `/analyze/log` (`[analysis]`).
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub strategy: Strategy,
    /// Snippets requested from the retriever.
    pub top_k: usize,
    /// Longest query sent to the retriever, in characters.
    pub query_max_chars: usize,
    /// Draft phrases that signal the model wants more context.
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MaskingConfig {
    pub enabled: bool,
    /// Extra label → regex rules, applied after the built-in ones in label order.
    pub rules: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    /// Data-plane host of the index, e.g. `https://kb-abc123.svc.us-east-1.pinecone.io`.
    pub index_host: String,
    pub namespace: String,
}

/// OpenAI-compatible `/embeddings` endpoint used by the Pinecone backend.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub url: String,
    pub model: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    /// `"none"`, `"local"` or `"pinecone"`.
    pub backend: String,
    /// Directory holding the local FTS index (already expanded, no `~`).
    pub local_dir: PathBuf,
    pub pinecone: PineconeConfig,
    pub embedding: EmbeddingConfig,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// Credentials sourced from the environment.
#[derive(Clone, Default)]
pub struct Secrets {
    pub llm_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub embedding_api_key: Option<String>,
}

impl Secrets {
    /// `LLM_API_KEY`, falling back to `ANTHROPIC_API_KEY` when the anthropic
    /// provider is selected; `PINECONE_API_KEY`; `EMBEDDING_API_KEY`, falling
    /// back to `OPENAI_API_KEY`.
    pub fn from_env(provider: &str) -> Self {
        let llm_api_key = non_empty_env("LLM_API_KEY").or_else(|| {
            matches!(provider, "anthropic" | "claude")
                .then(|| non_empty_env("ANTHROPIC_API_KEY"))
                .flatten()
        });
        Self {
            llm_api_key,
            pinecone_api_key: non_empty_env("PINECONE_API_KEY"),
            embedding_api_key: non_empty_env("EMBEDDING_API_KEY")
                .or_else(|| non_empty_env("OPENAI_API_KEY")),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("llm_api_key", &mark(&self.llm_api_key))
            .field("pinecone_api_key", &mark(&self.pinecone_api_key))
            .field("embedding_api_key", &mark(&self.embedding_api_key))
            .finish()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub log_level: String,
    /// Optional log file; stderr when `None`.
    pub log_file: Option<PathBuf>,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    /// Directory of prompt layer files (already expanded, no `~`).
    pub prompts_dir: PathBuf,
    pub analysis: AnalysisConfig,
    pub masking: MaskingConfig,
    pub rag: RagConfig,
    pub secrets: Secrets,
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

/// `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    app: RawApp,
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    prompts: RawPrompts,
    #[serde(default)]
    analysis: RawAnalysis,
    #[serde(default)]
    masking: RawMasking,
    #[serde(default)]
    rag: RawRag,
}

#[derive(Deserialize)]
struct RawApp {
    #[serde(default = "default_app_name")]
    name: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

impl Default for RawApp {
    fn default() -> Self {
        Self { name: default_app_name(), log_level: default_log_level(), log_file: None }
    }
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default = "default_request_timeout_seconds")]
    request_timeout_seconds: u64,
}

impl Default for RawServer {
    fn default() -> Self {
        Self { bind: default_bind(), request_timeout_seconds: default_request_timeout_seconds() }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    anthropic: RawAnthropicConfig,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            anthropic: RawAnthropicConfig::default(),
            openai: RawOpenAiConfig::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawAnthropicConfig {
    #[serde(default = "default_anthropic_api_url")]
    api_url: String,
    #[serde(default = "default_anthropic_model")]
    model: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_llm_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawAnthropicConfig {
    fn default() -> Self {
        Self {
            api_url: default_anthropic_api_url(),
            model: default_anthropic_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_llm_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawPrompts {
    #[serde(default = "default_prompts_dir")]
    dir: String,
}

impl Default for RawPrompts {
    fn default() -> Self {
        Self { dir: default_prompts_dir() }
    }
}

#[derive(Deserialize)]
struct RawAnalysis {
    #[serde(default = "default_strategy")]
    strategy: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default = "default_query_max_chars")]
    query_max_chars: usize,
    /// Replaces the built-in trigger list when present.
    #[serde(default)]
    triggers: Option<Vec<String>>,
}

impl Default for RawAnalysis {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            top_k: default_top_k(),
            query_max_chars: default_query_max_chars(),
            triggers: None,
        }
    }
}

#[derive(Deserialize)]
struct RawMasking {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    rules: BTreeMap<String, String>,
}

impl Default for RawMasking {
    fn default() -> Self {
        Self { enabled: true, rules: BTreeMap::new() }
    }
}

#[derive(Deserialize)]
struct RawRag {
    #[serde(default = "default_rag_backend")]
    backend: String,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    chunk_overlap: usize,
    #[serde(default)]
    local: RawRagLocal,
    #[serde(default)]
    pinecone: RawPinecone,
    #[serde(default)]
    embedding: RawEmbedding,
}

impl Default for RawRag {
    fn default() -> Self {
        Self {
            backend: default_rag_backend(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            local: RawRagLocal::default(),
            pinecone: RawPinecone::default(),
            embedding: RawEmbedding::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawRagLocal {
    #[serde(default = "default_rag_local_dir")]
    dir: String,
}

impl Default for RawRagLocal {
    fn default() -> Self {
        Self { dir: default_rag_local_dir() }
    }
}

#[derive(Deserialize)]
struct RawPinecone {
    #[serde(default)]
    index_host: String,
    #[serde(default = "default_pinecone_namespace")]
    namespace: String,
}

impl Default for RawPinecone {
    fn default() -> Self {
        Self { index_host: String::new(), namespace: default_pinecone_namespace() }
    }
}

#[derive(Deserialize)]
struct RawEmbedding {
    #[serde(default = "default_embedding_url")]
    url: String,
    #[serde(default = "default_embedding_model")]
    model: String,
    #[serde(default = "default_llm_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawEmbedding {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

fn default_app_name() -> String { "trouble-shooter".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_bind() -> String { "127.0.0.1:8000".to_string() }
fn default_request_timeout_seconds() -> u64 { 120 }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_anthropic_api_url() -> String { "https://api.anthropic.com/v1/messages".to_string() }
fn default_anthropic_model() -> String { "claude-3-5-sonnet-latest".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.4 }
fn default_max_tokens() -> u32 { 1500 }
fn default_llm_timeout_seconds() -> u64 { 60 }
fn default_prompts_dir() -> String { "config/prompts".to_string() }
fn default_strategy() -> String { "direct".to_string() }
fn default_top_k() -> usize { 3 }
fn default_query_max_chars() -> usize { 2000 }
fn default_rag_backend() -> String { "none".to_string() }
fn default_chunk_size() -> usize { DEFAULT_CHUNK_SIZE }
fn default_chunk_overlap() -> usize { DEFAULT_CHUNK_OVERLAP }
fn default_rag_local_dir() -> String { "~/.trouble-shooter/kb".to_string() }
fn default_pinecone_namespace() -> String { "dev".to_string() }
fn default_embedding_url() -> String { "https://api.openai.com/v1/embeddings".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }

fn default_true() -> bool {
    true
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `path`, then apply env-var overrides.
pub fn load(path: &Path) -> Result<Config, AppError> {
    let log_level_override = env::var("TROUBLESHOOTER_LOG_LEVEL").ok();
    let bind_override = env::var("TROUBLESHOOTER_BIND").ok();
    load_from(path, log_level_override.as_deref(), bind_override.as_deref())
}

/// Internal loader that accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    log_level_override: Option<&str>,
    bind_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let mut cfg = from_toml_str(&raw).map_err(|e| match e {
        AppError::Config(msg) => AppError::Config(format!("{msg} ({})", path.display())),
        other => other,
    })?;

    if let Some(level) = log_level_override.filter(|l| !l.trim().is_empty()) {
        cfg.log_level = level.to_string();
    }
    if let Some(bind) = bind_override.filter(|b| !b.trim().is_empty()) {
        cfg.server.bind = bind.to_string();
    }
    cfg.secrets = Secrets::from_env(&cfg.llm.provider);
    Ok(cfg)
}

/// Parse and resolve a TOML document. Secrets are left empty.
pub fn from_toml_str(raw: &str) -> Result<Config, AppError> {
    let parsed: RawConfig =
        toml::from_str(raw).map_err(|e| AppError::Config(format!("parse error: {e}")))?;
    resolve(parsed)
}

fn resolve(parsed: RawConfig) -> Result<Config, AppError> {
    let strategy: Strategy = parsed
        .analysis
        .strategy
        .parse()
        .map_err(|e| AppError::Config(format!("[analysis] strategy: {e}")))?;
    if parsed.analysis.top_k == 0 {
        return Err(AppError::Config("[analysis] top_k must be at least 1".into()));
    }
    if parsed.rag.chunk_overlap >= parsed.rag.chunk_size {
        return Err(AppError::Config(format!(
            "[rag] chunk_overlap ({}) must be smaller than chunk_size ({})",
            parsed.rag.chunk_overlap, parsed.rag.chunk_size
        )));
    }
    let backend = parsed.rag.backend.trim().to_ascii_lowercase();
    if !matches!(backend.as_str(), "none" | "local" | "pinecone") {
        return Err(AppError::Config(format!("[rag] unknown backend '{backend}'")));
    }

    let triggers = parsed
        .analysis
        .triggers
        .unwrap_or_else(|| DEFAULT_TRIGGERS.iter().map(|t| t.to_string()).collect())
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let llm = parsed.llm;
    Ok(Config {
        app_name: parsed.app.name,
        log_level: parsed.app.log_level,
        log_file: parsed.app.log_file.as_deref().map(expand_home),
        server: ServerConfig {
            bind: parsed.server.bind,
            request_timeout_seconds: parsed.server.request_timeout_seconds.max(1),
        },
        llm: LlmConfig {
            provider: llm.provider.trim().to_ascii_lowercase(),
            anthropic: AnthropicConfig {
                api_url: llm.anthropic.api_url,
                model: llm.anthropic.model,
                temperature: llm.anthropic.temperature,
                max_tokens: llm.anthropic.max_tokens,
                timeout_seconds: llm.anthropic.timeout_seconds,
            },
            openai: OpenAiConfig {
                api_base_url: llm.openai.api_base_url,
                model: llm.openai.model,
                temperature: llm.openai.temperature,
                max_tokens: llm.openai.max_tokens,
                timeout_seconds: llm.openai.timeout_seconds,
            },
        },
        prompts_dir: expand_home(&parsed.prompts.dir),
        analysis: AnalysisConfig {
            strategy,
            top_k: parsed.analysis.top_k,
            query_max_chars: parsed.analysis.query_max_chars,
            triggers,
        },
        masking: MaskingConfig { enabled: parsed.masking.enabled, rules: parsed.masking.rules },
        rag: RagConfig {
            backend,
            local_dir: expand_home(&parsed.rag.local.dir),
            pinecone: PineconeConfig {
                index_host: parsed.rag.pinecone.index_host.trim_end_matches('/').to_string(),
                namespace: parsed.rag.pinecone.namespace,
            },
            embedding: EmbeddingConfig {
                url: parsed.rag.embedding.url,
                model: parsed.rag.embedding.model,
                timeout_seconds: parsed.rag.embedding.timeout_seconds,
            },
            chunk_size: parsed.rag.chunk_size,
            chunk_overlap: parsed.rag.chunk_overlap,
        },
        secrets: Secrets::default(),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Defaults with the dummy provider, no retrieval, no keys, no external
    /// calls. Used by tests and the offline smoke run.
    pub fn offline() -> Result<Self, AppError> {
        resolve(RawConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[app]
name = "test-shooter"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.app_name, "test-shooter");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.llm.provider, "dummy");
        assert_eq!(cfg.server.request_timeout_seconds, 120);
        assert_eq!(cfg.analysis.strategy, Strategy::Direct);
        assert!(cfg.masking.enabled);
        assert_eq!(cfg.rag.backend, "none");
        assert_eq!((cfg.rag.chunk_size, cfg.rag.chunk_overlap), (1500, 200));
    }

    #[test]
    fn shipped_default_toml_parses() {
        let raw = include_str!("../config/default.toml");
        let cfg = from_toml_str(raw).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
        assert!(!cfg.analysis.triggers.is_empty());
    }

    #[test]
    fn full_sections_resolve() {
        let cfg = from_toml_str(
            r#"
[llm]
default = "Anthropic"
[llm.anthropic]
model = "claude-x"
max_tokens = 1000
[analysis]
strategy = "draft_rag"
top_k = 5
triggers = ["not sure", "  ", "모르겠"]
[masking]
enabled = false
[masking.rules]
hostname = 'db-\d+\.internal'
[rag]
backend = "pinecone"
[rag.pinecone]
index_host = "https://kb.svc.pinecone.io/"
namespace = "kb"
"#,
        )
        .unwrap();
        assert_eq!(cfg.llm.provider, "anthropic");
        assert_eq!(cfg.llm.anthropic.model, "claude-x");
        assert_eq!(cfg.llm.anthropic.max_tokens, 1000);
        assert_eq!(cfg.analysis.strategy, Strategy::DraftRag);
        assert_eq!(cfg.analysis.top_k, 5);
        assert_eq!(cfg.analysis.triggers, vec!["not sure", "모르겠"]);
        assert!(!cfg.masking.enabled);
        assert_eq!(cfg.masking.rules.get("hostname").map(String::as_str), Some(r"db-\d+\.internal"));
        assert_eq!(cfg.rag.pinecone.index_host, "https://kb.svc.pinecone.io");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(from_toml_str("[analysis]\nstrategy = \"sometimes\"").is_err());
        assert!(from_toml_str("[analysis]\ntop_k = 0").is_err());
        assert!(from_toml_str("[rag]\nbackend = \"faiss\"").is_err());
        assert!(from_toml_str("[rag]\nchunk_size = 100\nchunk_overlap = 100").is_err());
    }

    #[test]
    fn chunking_defaults_match_ingest_options() {
        let cfg = Config::offline().unwrap();
        let opts = crate::rag::IngestOptions::default();
        assert_eq!((cfg.rag.chunk_size, cfg.rag.chunk_overlap), (opts.chunk_size, opts.chunk_overlap));
        assert_eq!(cfg.rag.pinecone.namespace, "dev");
    }

    #[test]
    fn offline_config_uses_dummy() {
        let cfg = Config::offline().unwrap();
        assert_eq!(cfg.llm.provider, "dummy");
        assert!(cfg.secrets.llm_api_key.is_none());
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.trouble-shooter");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".trouble-shooter"));
    }

    #[test]
    fn absolute_path_unchanged() {
        let p = expand_home("/absolute/path");
        assert_eq!(p, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn relative_path_unchanged() {
        let p = expand_home("relative/path");
        assert_eq!(p, PathBuf::from("relative/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_overrides_apply() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("debug"), Some("0.0.0.0:9000")).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let s = Secrets { llm_api_key: Some("sk-live".into()), ..Secrets::default() };
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("sk-live"));
        assert!(dbg.contains("<set>"));
    }
}
