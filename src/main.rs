//! trouble-shooter entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI and load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build the pipeline and run the chosen command

use std::path::Path;

use clap::Parser;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use trouble_shooter::cli::{AnalyzeArgs, Cli, Command};
use trouble_shooter::config::{self, Config};
use trouble_shooter::error::AppError;
use trouble_shooter::logger;
use trouble_shooter::rag::{self, IngestOptions};
use trouble_shooter::request::AnalyzeRequest;
use trouble_shooter::troubleshoot::Troubleshooter;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = config::load(&cli.config)?;

    let cli_level = logger::level_from_verbosity(cli.verbose);
    let effective_log_level = cli_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, cli_level.is_some(), config.log_file.as_deref())?;

    info!(
        app = %config.app_name,
        config = %cli.config.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Analyze(args) => analyze(&config, args).await,
        Command::Ingest { dir } => ingest(&config, &dir).await,
    }
}

#[cfg(feature = "channel-axum")]
async fn serve(config: &Config) -> Result<(), AppError> {
    use std::time::Duration;
    use trouble_shooter::server::{self, AppState};

    let troubleshooter = Troubleshooter::from_config(config)?;
    let state = AppState::new(
        troubleshooter,
        Duration::from_secs(config.server.request_timeout_seconds),
    );

    // Ctrl-C cancels the token; axum drains in-flight requests.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_token.cancel();
        }
    });

    server::run(&config.server.bind, state, shutdown).await
}

#[cfg(not(feature = "channel-axum"))]
async fn serve(_config: &Config) -> Result<(), AppError> {
    Err(AppError::Server("built without the channel-axum feature".into()))
}

async fn analyze(config: &Config, args: AnalyzeArgs) -> Result<(), AppError> {
    let error_log = match args.log.as_deref() {
        Some(path) => read_input(path).await?,
        None => String::new(),
    };
    let code = match args.code.as_deref() {
        Some(path) => read_input(path).await?,
        None => String::new(),
    };

    let troubleshooter = Troubleshooter::from_config(config)?;
    let request = AnalyzeRequest { persona: args.persona, input_mode: args.mode, error_log, code };
    let report = troubleshooter
        .analyze(request)
        .await
        .map_err(|e| AppError::Analyze(e.to_string()))?;

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| AppError::Analyze(format!("cannot encode report: {e}")))?;
    println!("{json}");
    Ok(())
}

async fn ingest(config: &Config, dir: &Path) -> Result<(), AppError> {
    let retriever = rag::build(&config.rag, &config.secrets)
        .map_err(|e| AppError::Rag(e.to_string()))?
        .ok_or_else(|| AppError::Config("[rag] backend is \"none\"; nothing to ingest into".into()))?;

    let opts = IngestOptions {
        chunk_size: config.rag.chunk_size,
        chunk_overlap: config.rag.chunk_overlap,
        ..IngestOptions::default()
    };
    let stats = rag::ingest_dir(&retriever, dir, opts)
        .await
        .map_err(|e| AppError::Rag(e.to_string()))?;

    println!("ingested {} chunks from {} documents into {}", stats.chunks, stats.docs, retriever.name());
    Ok(())
}

/// Read a file, or stdin when `path` is `-`.
async fn read_input(path: &Path) -> Result<String, AppError> {
    if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))
}
