//! LLM-backed troubleshooting assistant for error logs and code snippets.
//!
//! A request carries a persona, an input mode and the raw log and/or code.
//! [`troubleshoot::Troubleshooter`] masks sensitive values, picks the
//! persona × mode prompt, asks the model (optionally twice, with retrieved
//! knowledge-base snippets in between), salvages the `cause` / `solution` /
//! `prevention` fields from whatever the model wrote, and unmasks them.

pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod logger;
pub mod masking;
pub mod prompt;
pub mod rag;
pub mod request;
#[cfg(feature = "channel-axum")]
pub mod server;
pub mod troubleshoot;
