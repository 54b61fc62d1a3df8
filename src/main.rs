use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use floodgate::admission::AdmissionGuards;
use floodgate::config::FloodgateConfig;

/// Fixed-window admission control against a shared counter store.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Count requests against a limiter and print each decision
    Check {
        /// Limiter name (strict or general)
        #[arg(short, long, default_value = "general")]
        limiter: String,
        /// Caller identity
        identifier: String,
        /// Number of requests to count
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Run the strict-limit request validation for a user
    Validate {
        user_id: String,
    },
    /// Show a caller's counter in the current window without counting
    Inspect {
        #[arg(short, long, default_value = "general")]
        limiter: String,
        identifier: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Floodgate");

    let config = FloodgateConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config.redacted())?);
            Ok(())
        }
        command => run(command, &config).await,
    }
}

/// Run a command that needs the counter store.
async fn run(command: Command, config: &FloodgateConfig) -> anyhow::Result<()> {
    config.validate()?;
    let store = config.store.connect()?;
    let guards = AdmissionGuards::new(&config.limiters, store)?;

    match command {
        Command::Check {
            limiter,
            identifier,
            count,
        } => {
            let limiter = guards
                .limiters()
                .get(&limiter)
                .with_context(|| format!("unknown limiter {:?}", limiter))?;
            for _ in 0..count {
                let decision = limiter.check(&identifier).await;
                println!("{}", serde_json::to_string(&decision)?);
            }
        }
        Command::Validate { user_id } => {
            let validation = guards.validate_request(&user_id).await;
            println!("{}", serde_json::to_string(&validation)?);
        }
        Command::Inspect {
            limiter,
            identifier,
        } => {
            let limiter = guards
                .limiters()
                .get(&limiter)
                .with_context(|| format!("unknown limiter {:?}", limiter))?;
            let entry = limiter.peek(&identifier).await?;
            let window = limiter.current_window();
            let output = match entry {
                Some(entry) => json!({
                    "identifier": identifier,
                    "count": entry.count,
                    "limit": limiter.config().max_requests(),
                    "ttl_ms": entry.ttl_remaining.map(floodgate::ratelimit::duration_millis),
                    "reset_at": floodgate::ratelimit::to_datetime(window.reset_at_ms()).to_rfc3339(),
                }),
                None => json!({
                    "identifier": identifier,
                    "count": 0,
                    "limit": limiter.config().max_requests(),
                }),
            };
            println!("{}", output);
        }
        Command::Config => print!("{}", serde_yaml::to_string(&config.redacted())?),
    }

    Ok(())
}

/// Initialize tracing, honoring `RUST_LOG` with an `info` default.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
