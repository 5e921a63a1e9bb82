//! Command-line surface of the `trouble-shooter` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;
use crate::request::{InputMode, Persona};

#[derive(Debug, Parser)]
#[command(name = "trouble-shooter", version, about = "Error log and code troubleshooting assistant")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(short = 'f', long = "config", global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Raise log verbosity (-v warn, -vv info, -vvv debug, -vvvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP backend (default).
    Serve,
    /// Analyze one log and/or code snippet and print the JSON report.
    Analyze(AnalyzeArgs),
    /// Chunk a directory of Markdown files into the configured knowledge base.
    Ingest {
        /// Directory containing `*.md` files.
        dir: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[arg(long, default_value = "junior", value_parser = parse_persona)]
    pub persona: Persona,

    /// Force the input mode instead of inferring it (log, code, log_code).
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<InputMode>,

    /// Error log file, or `-` for stdin.
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Source code file.
    #[arg(long)]
    pub code: Option<PathBuf>,
}

fn parse_persona(s: &str) -> Result<Persona, String> {
    s.parse().map_err(|e: crate::request::RequestError| e.to_string())
}

fn parse_mode(s: &str) -> Result<InputMode, String> {
    s.parse().map_err(|e: crate::request::RequestError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["trouble-shooter"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn analyze_flags_parse() {
        let cli = Cli::try_parse_from([
            "trouble-shooter", "-vv", "analyze", "--persona", "senior", "--mode", "log+code",
            "--log", "-", "--code", "app.py", "-f", "alt.toml",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        let Some(Command::Analyze(args)) = cli.command else { panic!("expected analyze") };
        assert_eq!(args.persona, Persona::Senior);
        assert_eq!(args.mode, Some(InputMode::LogCode));
        assert_eq!(args.log, Some(PathBuf::from("-")));
    }

    #[test]
    fn bad_persona_is_rejected() {
        assert!(Cli::try_parse_from(["trouble-shooter", "analyze", "--persona", "staff"]).is_err());
    }

    #[test]
    fn ingest_takes_a_dir() {
        let cli = Cli::try_parse_from(["trouble-shooter", "ingest", "kb/"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Ingest { dir }) if dir == PathBuf::from("kb/")));
    }
}
