//! mb-compare
//!
//! CLI front end for the multi-model comparison runtime. Loads a JSON
//! configuration file, reads the process environment for API keys, runs the
//! orchestrator (C8), and prints the result as canonical JSON to stdout.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use dotenvy::from_path as dotenv_from_path;
use mb_executor::ModelCaller;
use mb_orchestrator::RunInput;
use mb_providers::OpenAICompatCaller;
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical json error: {0}")]
    Canon(#[from] mb_common::CanonError),
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] mb_orchestrator::OrchestratorError),
}

#[derive(Parser)]
#[command(name = "mb-compare", version, about = "Dispatch one question to several models side by side")]
struct Args {
    /// Path to the JSON configuration file (see the `candidates`/`enabled`/... keys).
    #[arg(long)]
    config: PathBuf,

    /// The question sent to every admitted candidate.
    #[arg(long)]
    question: String,

    /// Workspace root used for context extraction.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Repo root to look for a `.env` file in before falling back to CWD's `./.env`.
    #[arg(long)]
    repo_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    if let Err(e) = run().await {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let args = Args::parse();
    load_env(args.repo_root.as_deref());

    let raw_config: serde_json::Value = serde_json::from_slice(&fs::read(&args.config)?)?;
    let env: HashMap<String, String> = std::env::vars().collect();
    let caller: Arc<dyn ModelCaller> = Arc::new(OpenAICompatCaller::new());

    let input = RunInput {
        raw_config: &raw_config,
        question: &args.question,
        workspace: &args.workspace,
        explicit_files: &[],
        explicit_snippets: &[],
        env: &env,
        default_candidate: None,
    };

    let output = mb_orchestrator::run(input, caller).await?;
    let bytes = mb_common::canonical_json_bytes(&output)?;
    println!("{}", String::from_utf8(bytes).expect("canonical json is always utf-8"));
    Ok(())
}

fn load_env(repo_root: Option<&Path>) {
    if let Some(repo_root) = repo_root {
        let repo_env = repo_root.join(".env");
        if repo_env.exists() {
            let _ = dotenv_from_path(&repo_env);
            tracing::debug!(path = %repo_env.display(), "loaded env");
            return;
        }
    }
    if Path::new(".env").exists() {
        let _ = dotenv_from_path(".env");
        tracing::debug!("loaded env from ./.env");
    }
}
