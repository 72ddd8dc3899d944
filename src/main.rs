//! # Feedcaster: scheduled feed-to-social pipeline
//!
//! Usage:
//!   feedcaster run                              # Start the scheduler loop
//!   feedcaster once <job>                       # Run one job now and print its Run Record
//!   feedcaster status                           # Last run of every job, from the ledger
//!   feedcaster vault set <account> --username u --password-env PW_VAR
//!   feedcaster vault list
//!   feedcaster vault gen-key                    # Print a fresh vault key

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedcaster_core::FeedcasterConfig;
use feedcaster_core::config::expand_path;
use feedcaster_core::types::{Credentials, RunKind, RunStatus};
use feedcaster_feeds::{CandidateFilter, HttpFeedSource, Ingestor};
use feedcaster_providers::{ContentTransformer, OpenAiCompatibleGenerator};
use feedcaster_publisher::{RemoteBrowserDriver, SessionManager};
use feedcaster_scheduler::{
    FingerprintStore, HealthReport, Job, MemoryFingerprintStore, MemoryRunLedger, Pipeline,
    RunLedger, Scheduler, SqliteFingerprintStore, SqliteRunLedger, StageTimeouts,
    targets_from_config,
};
use feedcaster_security::{CredentialVault, VaultKey};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "feedcaster",
    version,
    about = "📡 Feedcaster: feeds in, posts out, on schedule"
)]
struct Cli {
    /// Config file (default: ~/.feedcaster/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and run until Ctrl-C
    Run,
    /// Run a single job immediately
    Once {
        /// Job id from the config
        job: String,
    },
    /// Show the last run of every configured job
    Status,
    /// Manage the encrypted credential vault
    Vault {
        #[command(subcommand)]
        command: VaultCommand,
    },
}

#[derive(Subcommand)]
enum VaultCommand {
    /// Store credentials for an account
    Set {
        account: String,
        #[arg(long)]
        username: String,
        /// Environment variable holding the password
        #[arg(long)]
        password_env: String,
        /// Environment variable holding an access token, if the platform uses one
        #[arg(long)]
        token_env: Option<String>,
    },
    /// List accounts with stored credentials
    List,
    /// Print a new random vault key (hex)
    GenKey,
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "debug,hyper=info,hyper_util=info,reqwest=info"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&str>) -> Result<FeedcasterConfig> {
    let config = match path {
        Some(p) => FeedcasterConfig::load_from(&expand_path(p))?,
        None => FeedcasterConfig::load()?,
    };
    Ok(config)
}

fn open_vault(config: &FeedcasterConfig) -> Result<CredentialVault> {
    let key = VaultKey::from_env(&config.vault.key_env)
        .with_context(|| format!("vault key not available (set {})", config.vault.key_env))?;
    Ok(CredentialVault::open(&expand_path(&config.vault.path), key)?)
}

fn ledger_path(config: &FeedcasterConfig) -> PathBuf {
    config.scheduler.data_dir().join("runs.db")
}

fn open_ledger(config: &FeedcasterConfig) -> Result<Arc<dyn RunLedger>> {
    Ok(match config.scheduler.ledger.as_str() {
        "memory" => Arc::new(MemoryRunLedger::new()),
        _ => Arc::new(SqliteRunLedger::open(&ledger_path(config))?),
    })
}

fn open_fingerprints(config: &FeedcasterConfig) -> Result<Arc<dyn FingerprintStore>> {
    Ok(match config.dedup.backend.as_str() {
        "memory" => Arc::new(MemoryFingerprintStore::new(config.dedup.capacity)),
        _ => Arc::new(SqliteFingerprintStore::open(
            &config.scheduler.data_dir().join("fingerprints.db"),
        )?),
    })
}

/// Wire every component from config and register the configured jobs.
fn build_scheduler(config: &FeedcasterConfig) -> Result<Arc<Scheduler>> {
    let timeouts = StageTimeouts::from(&config.timeouts);

    let feed = Arc::new(HttpFeedSource::new(timeouts.fetch)?);
    let ingestor = Ingestor::new(feed, config.retry.clone(), timeouts.fetch);

    let generator = Arc::new(OpenAiCompatibleGenerator::from_config(&config.generator));
    let transformer =
        ContentTransformer::new(generator, config.generator.clone(), &config.transform);

    let vault = Arc::new(open_vault(config)?);
    let driver = Arc::new(RemoteBrowserDriver::from_config(
        &config.publisher,
        timeouts.publish,
    )?);
    let publisher = Arc::new(
        SessionManager::new(driver, vault, config.publisher.clone())
            .with_timeout(timeouts.publish),
    );

    let pipeline = Pipeline::new(
        ingestor,
        transformer,
        publisher,
        open_fingerprints(config)?,
        config.retry.clone(),
        timeouts,
        config.dedup.retention(),
    )
    .with_filter(CandidateFilter::from_config(&config.filter)?);
    let scheduler = Arc::new(Scheduler::new(
        pipeline,
        open_ledger(config)?,
        targets_from_config(&config.alerts),
        Duration::from_secs(config.scheduler.tick_secs),
    ));
    for job in &config.jobs {
        scheduler.schedule(Job::from_config(job, config)?)?;
    }
    Ok(scheduler)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    match cli.command {
        Command::Vault {
            command: VaultCommand::GenKey,
        } => {
            println!("{}", VaultKey::generate_hex());
            eprintln!("Export it as the variable named by vault.key_env (default FEEDCASTER_VAULT_KEY).");
        }
        Command::Vault {
            command: VaultCommand::List,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let vault = open_vault(&config)?;
            for account in vault.list() {
                println!("{account}");
            }
        }
        Command::Vault {
            command:
                VaultCommand::Set {
                    account,
                    username,
                    password_env,
                    token_env,
                },
        } => {
            let config = load_config(cli.config.as_deref())?;
            if config.account(&account).is_none() {
                tracing::warn!("⚠️ Account '{account}' is not declared in the config");
            }
            let password = std::env::var(&password_env)
                .with_context(|| format!("password env var {password_env} is not set"))?;
            let access_token = match token_env {
                Some(var) => Some(
                    std::env::var(&var)
                        .with_context(|| format!("token env var {var} is not set"))?,
                ),
                None => None,
            };
            let credentials = Credentials {
                username,
                password,
                access_token,
            };
            let vault = open_vault(&config)?;
            vault.set(&account, &credentials)?;
            vault.save()?;
            println!("🔐 Stored credentials for '{account}' in {}", vault.path().display());
        }
        Command::Status => {
            let config = load_config(cli.config.as_deref())?;
            if config.scheduler.ledger == "memory" {
                anyhow::bail!("ledger = \"memory\" keeps no history; nothing to report");
            }
            let ledger = SqliteRunLedger::open(&ledger_path(&config))?;
            let jobs = config
                .jobs
                .iter()
                .map(|j| Job::from_config(j, &config))
                .collect::<feedcaster_core::Result<Vec<_>>>()?;
            let report = HealthReport::from_ledger(&jobs, &ledger);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Once { job } => {
            let config = load_config(cli.config.as_deref())?;
            let scheduler = build_scheduler(&config)?;
            let record = scheduler.run_once(&job).await?;
            scheduler
                .shutdown(Duration::from_secs(config.scheduler.shutdown_grace_secs))
                .await;
            println!("{}", serde_json::to_string_pretty(&record)?);
            if record.kind == RunKind::Disabled {
                anyhow::bail!(
                    "{} (re-enable the job after fixing the cause)",
                    record.error_summary.as_deref().unwrap_or("job disabled")
                );
            }
            if record.status == RunStatus::Failure {
                anyhow::bail!(
                    "run failed: {}",
                    record.error_summary.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Command::Run => {
            let config = load_config(cli.config.as_deref())?;
            if config.jobs.is_empty() {
                tracing::warn!("⚠️ No jobs configured; the scheduler will idle");
            }
            let scheduler = build_scheduler(&config)?;
            let tick = Duration::from_secs(config.scheduler.tick_secs.max(1));
            let handle = scheduler.clone().spawn(tick);
            tracing::info!(
                "📡 Feedcaster running with {} job(s). Press Ctrl-C to stop.",
                scheduler.jobs().len()
            );

            tokio::signal::ctrl_c().await?;
            scheduler
                .shutdown(Duration::from_secs(config.scheduler.shutdown_grace_secs))
                .await;
            handle.await?;
            tracing::info!("👋 Bye");
        }
    }

    Ok(())
}
