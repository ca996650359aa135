use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use quorum_core::{EventReplayer, QuorumConfig, ReplayOptions, RunMode};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quorum", about = "Multi-analyst trading-day simulator")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run trading days over a date range
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/quorum.toml")]
        config: String,

        /// Override the configured tickers
        #[arg(long, value_delimiter = ',')]
        tickers: Option<Vec<String>>,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,

        /// Skip communication and round 2
        #[arg(long)]
        no_communication: bool,

        #[arg(long)]
        max_cycles: Option<u32>,

        /// signal | portfolio
        #[arg(long)]
        mode: Option<String>,
    },
    /// Replay a persisted day's timeline to stdout with its original pacing
    Replay {
        #[arg(long)]
        day_dir: PathBuf,

        /// Playback speed multiplier
        #[arg(long, default_value_t = 1.0)]
        speed: f64,

        /// Cap on any single delay
        #[arg(long)]
        max_delay_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing (respects RUST_LOG env var)
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Command::Run {
            config,
            tickers,
            start,
            end,
            no_communication,
            max_cycles,
            mode,
        } => {
            let config_str = std::fs::read_to_string(&config)
                .with_context(|| format!("Failed to read config: {config}"))?;
            let mut config: QuorumConfig =
                toml::from_str(&config_str).with_context(|| "Failed to parse config")?;

            if let Some(tickers) = tickers {
                config.run.tickers = tickers;
            }
            if let Some(start) = start {
                config.run.start_date = start;
            }
            if let Some(end) = end {
                config.run.end_date = end;
            }
            if no_communication {
                config.communication.enabled = false;
            }
            if let Some(max_cycles) = max_cycles {
                config.communication.max_cycles = max_cycles;
            }
            if let Some(mode) = mode {
                config.run.mode = match mode.as_str() {
                    "signal" => RunMode::Signal,
                    "portfolio" => RunMode::Portfolio,
                    other => bail!("Unknown mode: {other} (expected signal or portfolio)"),
                };
            }
            config.validate().context("Invalid configuration")?;

            if !quorum_agents::claude_cli::check_cli_available().await {
                tracing::warn!("claude CLI not found; analysts will fall back to neutral signals");
            }

            let store = quorum::open_day_store(&config)?;
            let orchestrator = quorum::build_orchestrator(&config, &store)
                .context("Failed to build orchestrator")?;

            // Handle shutdown signals
            let cancel = orchestrator.cancel_token();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received shutdown signal");
                cancel.cancel();
            });

            let summary = quorum::run_range(
                &orchestrator,
                &store,
                config.run.start_date,
                config.run.end_date,
            )
            .await
            .map_err(|e| anyhow::anyhow!("Run failed: {e}"))?;

            if let Some(state) = &summary.last_state {
                println!("{}", serde_json::to_string_pretty(&state.portfolio)?);
            }
            for (date, e) in &summary.failed {
                tracing::error!(%date, error = %e, "Day failed");
            }
            if !summary.failed.is_empty() {
                bail!("{} day(s) failed", summary.failed.len());
            }
        }
        Command::Replay {
            day_dir,
            speed,
            max_delay_ms,
        } => {
            let events = quorum_store::read_timeline(&day_dir)
                .with_context(|| format!("Failed to read timeline in {}", day_dir.display()))?;
            let replayer =
                EventReplayer::with_options(events, ReplayOptions { speed, max_delay_ms });

            let mut stdout = std::io::stdout();
            for (event, delay_ms) in replayer.replay() {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
                stdout.flush()?;
            }
        }
    }

    Ok(())
}
