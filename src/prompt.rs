//! Persona × input-mode prompt selection.
//!
//! System prompts are assembled from plain-text layers stored under
//! `config/prompts/`:
//!
//! ```text
//! 0. persona_<persona>.md  who is answering and for whom
//! 1. mode_<mode>.md        what the user supplied
//! 2. output_contract.md    the JSON answer format
//! ```
//!
//! Each layer falls back to the copy compiled into the binary when the file
//! is missing or empty, so a [`PromptTable`] always has all six entries.
//! Variable substitution uses `{{key}}` syntax and is applied once at
//! [`build()`](PromptBuilder::build) time, after all layers are joined.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::request::{InputMode, Persona};

const SEPARATOR: &str = "\n\n";

/// Section headers used in the user turn.
pub const LOG_HEADER: &str = "[Log]";
pub const CODE_HEADER: &str = "[Code]";

const BUILTIN_PERSONA_JUNIOR: &str = include_str!("../config/prompts/persona_junior.md");
const BUILTIN_PERSONA_SENIOR: &str = include_str!("../config/prompts/persona_senior.md");
const BUILTIN_MODE_LOG: &str = include_str!("../config/prompts/mode_log.md");
const BUILTIN_MODE_CODE: &str = include_str!("../config/prompts/mode_code.md");
const BUILTIN_MODE_LOG_CODE: &str = include_str!("../config/prompts/mode_log_code.md");
const BUILTIN_OUTPUT_CONTRACT: &str = include_str!("../config/prompts/output_contract.md");
const BUILTIN_STAGE_DRAFT: &str = include_str!("../config/prompts/stage_draft.md");
const BUILTIN_STAGE_FINAL: &str = include_str!("../config/prompts/stage_final.md");
const BUILTIN_RETRIEVED_CONTEXT: &str = include_str!("../config/prompts/retrieved_context.md");

/// Fluent builder that assembles a layered prompt from template files.
pub struct PromptBuilder {
    prompts_dir: Option<PathBuf>,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    /// Create a builder rooted at `prompts_dir` (e.g. `"config/prompts"`).
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: Some(prompts_dir.into()),
            parts: Vec::new(),
            vars: HashMap::new(),
        }
    }

    /// A builder that never touches the filesystem; every layer uses its fallback.
    pub fn builtin() -> Self {
        Self {
            prompts_dir: None,
            parts: Vec::new(),
            vars: HashMap::new(),
        }
    }

    /// Append a layer loaded from `filename`, or `fallback` when the file is
    /// missing or blank.
    pub fn layer_or(mut self, filename: &str, fallback: &str) -> Self {
        let loaded = self.prompts_dir.as_ref().and_then(|dir| {
            let path = dir.join(filename);
            match fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => Some(text),
                Ok(_) => {
                    tracing::debug!("prompt: layer '{}' is empty, using builtin", path.display());
                    None
                }
                Err(_) => {
                    tracing::debug!("prompt: layer '{}' not found, using builtin", path.display());
                    None
                }
            }
        });
        let text = loaded.as_deref().unwrap_or(fallback);
        self.push(text);
        self
    }

    /// Directly append a text fragment.
    pub fn append(mut self, text: impl Into<String>) -> Self {
        let s = text.into();
        self.push(&s);
        self
    }

    /// Register a single `{{key}}` substitution.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Assemble all layers, join with blank lines, and apply variable substitution.
    pub fn build(self) -> String {
        let mut prompt = self.parts.join(SEPARATOR);
        for (k, v) in &self.vars {
            let placeholder = format!("{{{{{}}}}}", k);
            prompt = prompt.replace(&placeholder, v);
        }
        prompt
    }

    fn push(&mut self, text: &str) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
    }
}

/// The 2×3 lookup of system prompts plus the stage fragments used by the
/// draft → retrieve → final pipeline.
#[derive(Debug, Clone)]
pub struct PromptTable {
    system: HashMap<(Persona, InputMode), String>,
    draft_suffix: String,
    final_suffix: String,
    context_template: String,
}

impl PromptTable {
    /// Load every layer from `dir`, falling back to builtin text per layer.
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self::assemble(|| PromptBuilder::new(dir.clone()))
    }

    /// Table built from the compiled-in layers only.
    pub fn builtin() -> Self {
        Self::assemble(PromptBuilder::builtin)
    }

    fn assemble(new_builder: impl Fn() -> PromptBuilder) -> Self {
        let mut system = HashMap::new();
        for persona in Persona::ALL {
            for mode in InputMode::ALL {
                let prompt = new_builder()
                    .layer_or(&format!("persona_{}.md", persona.as_str()), builtin_persona(persona))
                    .layer_or(&format!("mode_{}.md", mode.as_str()), builtin_mode(mode))
                    .layer_or("output_contract.md", BUILTIN_OUTPUT_CONTRACT)
                    .build();
                system.insert((persona, mode), prompt);
            }
        }

        Self {
            system,
            draft_suffix: new_builder().layer_or("stage_draft.md", BUILTIN_STAGE_DRAFT).build(),
            final_suffix: new_builder().layer_or("stage_final.md", BUILTIN_STAGE_FINAL).build(),
            context_template: new_builder()
                .layer_or("retrieved_context.md", BUILTIN_RETRIEVED_CONTEXT)
                .build(),
        }
    }

    pub fn system_prompt(&self, persona: Persona, mode: InputMode) -> &str {
        // `assemble` fills every (persona, mode) pair.
        self.system
            .get(&(persona, mode))
            .map(String::as_str)
            .unwrap_or(BUILTIN_OUTPUT_CONTRACT)
    }

    /// System prompt for the first pass of a retrieval pipeline.
    pub fn draft_prompt(&self, persona: Persona, mode: InputMode) -> String {
        PromptBuilder::builtin()
            .append(self.system_prompt(persona, mode))
            .append(self.draft_suffix.as_str())
            .build()
    }

    /// System prompt for the pass that sees retrieved knowledge.
    pub fn final_prompt(&self, persona: Persona, mode: InputMode) -> String {
        PromptBuilder::builtin()
            .append(self.system_prompt(persona, mode))
            .append(self.final_suffix.as_str())
            .build()
    }

    /// The user turn that hands retrieved snippets to the model.
    pub fn context_message(&self, context: &str) -> String {
        PromptBuilder::builtin()
            .append(self.context_template.as_str())
            .var("context", context.trim())
            .build()
    }
}

fn builtin_persona(persona: Persona) -> &'static str {
    match persona {
        Persona::Junior => BUILTIN_PERSONA_JUNIOR,
        Persona::Senior => BUILTIN_PERSONA_SENIOR,
    }
}

fn builtin_mode(mode: InputMode) -> &'static str {
    match mode {
        InputMode::Log => BUILTIN_MODE_LOG,
        InputMode::Code => BUILTIN_MODE_CODE,
        InputMode::LogCode => BUILTIN_MODE_LOG_CODE,
    }
}

/// Render the user turn for `mode`. Both inputs are trimmed; the unused one
/// is ignored.
pub fn build_user_prompt(mode: InputMode, log: &str, code: &str) -> String {
    let log = log.trim();
    let code = code.trim();
    let content = match mode {
        InputMode::Log => format!("{LOG_HEADER}\n{log}"),
        InputMode::Code => format!("{CODE_HEADER}\n{code}"),
        InputMode::LogCode => format!("{LOG_HEADER}\n{log}\n\n{CODE_HEADER}\n{code}"),
    };
    content.trim().to_string()
}
