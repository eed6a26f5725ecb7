//! selfverify CLI
//!
//! Drives a session verification controller through scripted scenarios
//! against simulated peers, and prints the resolved configuration.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use selfverify_cli::output;
use selfverify_cli::scenario::{self, Scenario, ScenarioOptions};
use selfverify_core::config::load_config;
use selfverify_core::tracing_init::init_from_config;

#[derive(Parser, Debug)]
#[command(name = "selfverify")]
#[command(version, about = "Session self-verification controller", long_about = None)]
struct Cli {
    /// Config file (JSON); layered over the global settings file
    #[arg(long, global = true, env = "SELFVERIFY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation)
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted verification flow against a simulated remote session.
    Run {
        #[arg(long, value_enum, default_value_t = Scenario::Happy)]
        scenario: Scenario,

        /// Override the key backup recovery wait (milliseconds)
        #[arg(long)]
        recovery_timeout_ms: Option<u64>,

        /// Delay before each simulated remote callback (milliseconds)
        #[arg(long, default_value_t = 50)]
        remote_latency_ms: u64,

        /// When recovery becomes enabled in the backup-wait scenario (milliseconds)
        #[arg(long, default_value_t = 500)]
        recovery_delay_ms: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved configuration as JSON.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.log_json {
        config.logging.json = true;
    }
    if let Command::Run {
        recovery_timeout_ms: Some(ms),
        ..
    } = cli.command
    {
        config.verification.recovery_wait_timeout_ms = ms;
    }
    config.validate()?;

    init_from_config(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting selfverify");

    let mut out = io::stdout();
    match cli.command {
        Command::Run {
            scenario,
            remote_latency_ms,
            recovery_delay_ms,
            json,
            ..
        } => {
            let options = ScenarioOptions {
                remote_latency: Duration::from_millis(remote_latency_ms),
                recovery_delay: Duration::from_millis(recovery_delay_ms),
            };
            let report = scenario::run(scenario, &config.verification, options).await?;
            if json {
                output::write_json(&mut out, &report)?;
            } else {
                output::write_text(&mut out, &report)?;
            }
            if !report.passed {
                anyhow::bail!(
                    "scenario ended in {}, expected {}",
                    report.final_state,
                    report.expected
                );
            }
        }
        Command::Config => {
            serde_json::to_writer_pretty(&mut out, &config)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
