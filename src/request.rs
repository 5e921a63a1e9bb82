//! Request and response shapes shared by the HTTP backend and the CLI.
//!
//! A request carries a persona, an optional input mode, and the two free-text
//! inputs. [`AnalyzeRequest::resolve`] turns it into a [`ResolvedRequest`]
//! whose mode is guaranteed to match the populated fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Persona ───────────────────────────────────────────────────────────────────

/// Prompt variant selecting the verbosity and tone of the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Junior,
    Senior,
}

impl Persona {
    pub const ALL: [Persona; 2] = [Persona::Junior, Persona::Senior];

    pub fn as_str(self) -> &'static str {
        match self {
            Persona::Junior => "junior",
            Persona::Senior => "senior",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Persona {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "junior" => Ok(Persona::Junior),
            "senior" => Ok(Persona::Senior),
            other => Err(RequestError::UnknownPersona(other.to_string())),
        }
    }
}

// ── InputMode ─────────────────────────────────────────────────────────────────

/// Which of the two inputs the request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    Log,
    Code,
    LogCode,
}

impl InputMode {
    pub const ALL: [InputMode; 3] = [InputMode::Log, InputMode::Code, InputMode::LogCode];

    pub fn as_str(self) -> &'static str {
        match self {
            InputMode::Log => "log",
            InputMode::Code => "code",
            InputMode::LogCode => "log_code",
        }
    }

    /// Pick the mode from whichever inputs are non-blank.
    pub fn infer(log: &str, code: &str) -> Option<InputMode> {
        match (log.trim().is_empty(), code.trim().is_empty()) {
            (false, false) => Some(InputMode::LogCode),
            (true, false) => Some(InputMode::Code),
            (false, true) => Some(InputMode::Log),
            (true, true) => None,
        }
    }

    pub fn needs_log(self) -> bool {
        matches!(self, InputMode::Log | InputMode::LogCode)
    }

    pub fn needs_code(self) -> bool {
        matches!(self, InputMode::Code | InputMode::LogCode)
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputMode {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(InputMode::Log),
            "code" => Ok(InputMode::Code),
            "log_code" | "log+code" => Ok(InputMode::LogCode),
            other => Err(RequestError::UnknownMode(other.to_string())),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("either error_log or code must be provided")]
    EmptyInput,
    #[error("input_mode '{mode}' requires a non-empty {field}")]
    MissingField { mode: InputMode, field: &'static str },
    #[error("unknown persona: '{0}'")]
    UnknownPersona(String),
    #[error("unknown input mode: '{0}'")]
    UnknownMode(String),
}

// ── Request / response ────────────────────────────────────────────────────────

/// Wire shape of `POST /analyze/log`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub input_mode: Option<InputMode>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub error_log: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub code: String,
}

/// A request whose mode has been checked against its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub persona: Persona,
    pub mode: InputMode,
    pub log: String,
    pub code: String,
}

impl AnalyzeRequest {
    pub fn resolve(self) -> Result<ResolvedRequest, RequestError> {
        let inferred = InputMode::infer(&self.error_log, &self.code).ok_or(RequestError::EmptyInput)?;
        let mode = match self.input_mode {
            None => inferred,
            Some(mode) => {
                if mode.needs_log() && self.error_log.trim().is_empty() {
                    return Err(RequestError::MissingField { mode, field: "error_log" });
                }
                if mode.needs_code() && self.code.trim().is_empty() {
                    return Err(RequestError::MissingField { mode, field: "code" });
                }
                mode
            }
        };

        Ok(ResolvedRequest {
            persona: self.persona,
            mode,
            log: self.error_log,
            code: self.code,
        })
    }
}

/// The three-field answer returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub cause: String,
    pub solution: String,
    pub prevention: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(mode: Option<InputMode>, log: &str, code: &str) -> AnalyzeRequest {
        AnalyzeRequest {
            persona: Persona::Senior,
            input_mode: mode,
            error_log: log.into(),
            code: code.into(),
        }
    }

    #[test]
    fn infer_follows_populated_fields() {
        assert_eq!(InputMode::infer("boom", ""), Some(InputMode::Log));
        assert_eq!(InputMode::infer("  ", "fn main() {}"), Some(InputMode::Code));
        assert_eq!(InputMode::infer("boom", "fn main() {}"), Some(InputMode::LogCode));
        assert_eq!(InputMode::infer(" \n", "\t"), None);
    }

    #[test]
    fn resolve_infers_missing_mode() {
        let r = req(None, "", "let x = 1;").resolve().unwrap();
        assert_eq!(r.mode, InputMode::Code);
        assert_eq!(r.persona, Persona::Senior);
    }

    #[test]
    fn resolve_rejects_blank_input() {
        assert_eq!(req(Some(InputMode::Log), "   ", "").resolve(), Err(RequestError::EmptyInput));
    }

    #[test]
    fn resolve_rejects_mode_without_its_field() {
        let err = req(Some(InputMode::LogCode), "trace", "").resolve().unwrap_err();
        assert_eq!(err, RequestError::MissingField { mode: InputMode::LogCode, field: "code" });

        let err = req(Some(InputMode::Log), "", "code").resolve().unwrap_err();
        assert!(err.to_string().contains("error_log"));
    }

    #[test]
    fn explicit_mode_may_ignore_extra_field() {
        let r = req(Some(InputMode::Log), "trace", "unused code").resolve().unwrap();
        assert_eq!(r.mode, InputMode::Log);
    }

    #[test]
    fn wire_names_match_frontend() {
        let body = r#"{"persona":"senior","input_mode":"log_code","error_log":"e","code":null}"#;
        let parsed: AnalyzeRequest = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.persona, Persona::Senior);
        assert_eq!(parsed.input_mode, Some(InputMode::LogCode));
        assert_eq!(parsed.code, "");

        let defaulted: AnalyzeRequest = serde_json::from_str(r#"{"error_log":"x"}"#).unwrap();
        assert_eq!(defaulted.persona, Persona::Junior);
        assert_eq!(defaulted.input_mode, None);
    }

    #[test]
    fn parse_persona_and_mode_from_cli_strings() {
        assert_eq!("Senior".parse::<Persona>().unwrap(), Persona::Senior);
        assert_eq!("log+code".parse::<InputMode>().unwrap(), InputMode::LogCode);
        assert!("staff".parse::<Persona>().is_err());
    }
}
