//! Leasehold CLI - run commands under a distributed lock

use anyhow::Context;
use clap::{Parser, Subcommand};
use leasehold_core::config::validate_expires;
use leasehold_core::{BackendKind, LeaseStatus, LockError, LockOptions, LockSettings, Locker};
use std::process::ExitCode;
use tracing::{debug, warn};

/// Exit code when the lock could not be obtained in time
const EXIT_LOCK_TIMEOUT: u8 = 3;

#[derive(Parser)]
#[command(name = "leasehold")]
#[command(author, version, about = "Run commands under a distributed lock", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command while holding a lock
    Run {
        /// Lock key (the configured prefix is prepended)
        key: String,
        /// Seconds after which the lease is considered abandoned
        #[arg(short, long)]
        expires: Option<f64>,
        /// Seconds to wait for the lock; 0 tries once
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Connection descriptor, e.g. redis://cache:6379/0
        #[arg(short, long)]
        connection: Option<String>,
        /// Backend (open, redis, memory)
        #[arg(short, long)]
        backend: Option<BackendKind>,
        /// Command and arguments, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show the lease stored for a key
    Inspect {
        /// Lock key (the configured prefix is prepended)
        key: String,
        /// Connection descriptor
        #[arg(short, long)]
        connection: Option<String>,
        /// Backend (open, redis, memory)
        #[arg(short, long)]
        backend: Option<BackendKind>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved settings
    Show,
    /// Print the settings file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so they never mix with the child's stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("leasehold=info".parse()?)
                .add_directive("leasehold_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => Ok(code),
        Err(e) => {
            eprint!("{}", error_report(&e));
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Run {
            key,
            expires,
            timeout,
            connection,
            backend,
            command,
        } => {
            let mut options = LockOptions {
                timeout,
                backend,
                connection,
                ..LockOptions::default()
            };
            if let Some(expires) = expires {
                options = options.with_expires(validate_expires(expires)?);
            }
            cmd_run(&key, options, &command, cli.quiet).await
        }

        Commands::Inspect {
            key,
            connection,
            backend,
        } => {
            let options = LockOptions {
                backend,
                connection,
                ..LockOptions::default()
            };
            cmd_inspect(&key, &options, cli.format).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Config { action } => {
            cmd_config(action, cli.format)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Error text for stderr, with the lock error code and a hint when known
fn error_report(error: &anyhow::Error) -> String {
    match error.downcast_ref::<LockError>() {
        Some(lock_error) => {
            let mut report = format!("Error [{}]: {}\n", lock_error.code(), lock_error);
            if let Some(suggestion) = lock_error.suggestion() {
                report.push_str(&format!("  Try: {}\n", suggestion));
            }
            report
        }
        None => format!("Error: {:#}\n", error),
    }
}

/// Exit status for a lock that could not be taken; other errors pass through
fn lock_failure_status(error: LockError) -> Result<u8, LockError> {
    if error.is_timeout() {
        Ok(EXIT_LOCK_TIMEOUT)
    } else {
        Err(error)
    }
}

/// Exit status mirroring the child's; a missing or out-of-range code maps to 1
fn child_status(code: Option<i32>) -> u8 {
    code.and_then(|c| u8::try_from(c).ok()).unwrap_or(1)
}

async fn cmd_run(
    key: &str,
    options: LockOptions,
    command: &[String],
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    let (program, args) = command
        .split_first()
        .context("No command given to run")?;

    let locker = Locker::new(LockSettings::load()?)?;
    let lock = locker.lock(key, options).await?;

    let outcome = lock
        .run(async {
            debug!(key = %lock.key(), program = %program, "Running command under lock");
            tokio::process::Command::new(program).args(args).status().await
        })
        .await;

    let status = match outcome {
        Ok(status) => status.with_context(|| format!("Failed to run '{}'", program))?,
        Err(e) => {
            if e.is_timeout() && !quiet {
                eprintln!("Could not acquire lock '{}': {}", lock.key(), e);
            }
            return Ok(ExitCode::from(lock_failure_status(e)?));
        }
    };

    if status.code().is_none() {
        warn!(program = %program, "Command terminated by a signal");
    }
    Ok(ExitCode::from(child_status(status.code())))
}

async fn cmd_inspect(key: &str, options: &LockOptions, format: OutputFormat) -> anyhow::Result<()> {
    let locker = Locker::new(LockSettings::load()?)?;
    let (backend, _) = locker.resolve(options)?;
    let status = locker.inspect(key, options).await?;
    let full_key = locker.full_key(key);

    match format {
        OutputFormat::Text => {
            println!("{} ({}): {}", full_key, backend, status);
            if let LeaseStatus::Held { expires_at } = &status {
                let remaining = *expires_at - chrono::Utc::now();
                println!("  expires in {:.1}s", remaining.num_milliseconds() as f64 / 1000.0);
            }
        }
        OutputFormat::Json => {
            let mut value = serde_json::to_value(&status)?;
            if let Some(fields) = value.as_object_mut() {
                fields.insert("key".to_string(), full_key.into());
                fields.insert("backend".to_string(), backend.as_str().into());
                fields.insert("reclaimable".to_string(), status.is_reclaimable().into());
            }
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = LockSettings::load()?;
            match format {
                OutputFormat::Text => print!("{}", settings.to_toml_string()?),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&settings)?),
            }
        }
        ConfigAction::Path => {
            let path = LockSettings::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
