//! runstamp - 前回実行時刻を artifact に保存・取得する CLI
//!
//! # Usage
//! ```bash
//! runstamp --mode get-and-set --fail-if-missing
//! runstamp --backend local --local-dir .runstamp --mode set
//! ```
//!
//! 取得した値は stdout に出力し、`GITHUB_OUTPUT` があれば
//! `timestamp=<value>` として追記します。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use runstamp_core::app::config::{DEFAULT_ARTIFACT_NAME, DEFAULT_FILE_NAME, DEFAULT_RETENTION_DAYS};
use runstamp_core::domain::AccessToken;
use runstamp_core::impls::github::DEFAULT_API_URL;
use runstamp_core::impls::{GitHubArtifactStore, GitHubConfig, LocalArtifactStore};
use runstamp_core::ports::{ArtifactStore, SystemClock};
use runstamp_core::retry::RetryPolicy;
use runstamp_core::{InvocationReport, Mode, StoreConfig, TimestampStore};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Github,
    Local,
}

/// Persist the timestamp of the last run between workflow invocations
#[derive(Debug, Parser)]
#[command(name = "runstamp", author, version, about, long_about = None)]
struct Args {
    /// get, set or get-and-set (unknown values fall back to get)
    #[arg(long, env = "INPUT_MODE", default_value = "get")]
    mode: String,

    /// Fail when no valid previous timestamp exists
    #[arg(long, env = "INPUT_FAIL_IF_MISSING")]
    fail_if_missing: bool,

    #[arg(long, env = "INPUT_ARTIFACT_NAME", default_value = DEFAULT_ARTIFACT_NAME)]
    artifact_name: String,

    #[arg(long, env = "INPUT_FILE_NAME", default_value = DEFAULT_FILE_NAME)]
    file_name: String,

    #[arg(long, env = "INPUT_RETENTION_DAYS", default_value_t = DEFAULT_RETENTION_DAYS)]
    retention_days: u32,

    /// Retries per remote call after the first attempt
    #[arg(long, env = "INPUT_RETRIES", default_value_t = 2)]
    retries: u32,

    #[arg(long, value_enum, env = "INPUT_BACKEND", default_value = "github")]
    backend: Backend,

    /// Root directory of the local backend
    #[arg(long, env = "INPUT_LOCAL_DIR", default_value = ".runstamp")]
    local_dir: PathBuf,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// owner/repo
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: Option<String>,

    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    #[arg(long, env = "ACTIONS_RUNTIME_TOKEN", hide_env_values = true)]
    runtime_token: Option<String>,

    #[arg(long, env = "ACTIONS_RESULTS_URL")]
    results_url: Option<String>,

    /// File that receives `timestamp=<value>`
    #[arg(long, env = "GITHUB_OUTPUT")]
    output_file: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn store_config(&self) -> StoreConfig {
        StoreConfig::new()
            .with_artifact_name(&self.artifact_name)
            .with_file_name(&self.file_name)
            .with_retention_days(self.retention_days)
            .with_fail_if_missing(self.fail_if_missing)
            .with_token(self.token.clone().and_then(AccessToken::non_empty))
            .with_retry(RetryPolicy::default_remote().with_max_retries(self.retries))
    }

    fn github_config(&self) -> Result<GitHubConfig> {
        let Some(repository) = self.repository.as_deref().filter(|r| !r.trim().is_empty()) else {
            bail!("--repository (GITHUB_REPOSITORY) is required for the github backend");
        };
        Ok(GitHubConfig::new(repository)
            .with_api_url(&self.api_url)
            .with_token(self.token.clone().and_then(AccessToken::non_empty))
            .with_runtime(
                self.runtime_token.clone().and_then(AccessToken::non_empty),
                self.results_url.clone().filter(|u| !u.trim().is_empty()),
            ))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mode = Mode::from_input(&args.mode);
    let config = args.store_config();

    let report = match args.backend {
        Backend::Github => {
            let store = GitHubArtifactStore::new(args.github_config()?)
                .context("failed to build http client")?;
            run(store, config, mode).await
        }
        Backend::Local => {
            // the local backend ignores the credential but retrieval requires one
            let config = if config.token.is_none() {
                config.with_token(Some(AccessToken::new("local")))
            } else {
                config
            };
            run(LocalArtifactStore::new(&args.local_dir), config, mode).await
        }
    };

    if let Some(value) = report.output() {
        println!("{value}");
        if let Some(path) = &args.output_file {
            append_output(path, value.as_str())
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
    }

    if report.is_failed() {
        for failure in &report.failures {
            eprintln!("error: {failure}");
        }
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run<S: ArtifactStore>(store: S, config: StoreConfig, mode: Mode) -> InvocationReport {
    TimestampStore::new(store, SystemClock, config).run(mode).await
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

fn append_output(path: &Path, value: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "timestamp={value}")
}
