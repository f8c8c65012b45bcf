//! riskhedge - Paired Risk/Hedge pool lifecycle engine
//!
//! Subcommands:
//! - `simulate`: replay a TOML script and print the resulting report
//! - `feed`: run a setup script, then stream JSON-lines oracle samples
//!   through the relay task
//! - `check-config`: load and validate an engine config

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riskhedge_backend::config::EngineConfig;
use riskhedge_backend::lifecycle::{spawn_oracle_relay, Address, OracleUpdate};
use riskhedge_backend::simulation::{MarketSummary, Script, SimulationReport, Simulator};

#[derive(Parser, Debug)]
#[command(name = "riskhedge")]
#[command(about = "Lifecycle engine for paired risk/hedge pools")]
struct Args {
    /// Path to TOML engine configuration
    #[arg(short, long, global = true, env = "RISKHEDGE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a lifecycle script
    Simulate {
        /// Path to the TOML script
        #[arg(short, long)]
        script: String,

        /// Print the report as JSON instead of a summary table
        #[arg(long)]
        json: bool,
    },
    /// Run a setup script, then relay JSON-lines price samples
    Feed {
        /// Setup script (create pairs, fund, deposit, start)
        #[arg(short, long)]
        script: String,

        /// JSON-lines file of {"market_id":..,"sample":{"price":..,"observed_at":..}}
        #[arg(short, long)]
        prices: String,

        /// Oracle identity used by the relay (defaults to first allow-listed)
        #[arg(long)]
        oracle: Option<String>,

        /// Relay channel capacity
        #[arg(long, default_value = "64")]
        buffer: usize,
    },
    /// Validate a config file and print the effective settings
    CheckConfig,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,riskhedge_backend=info,riskhedge=info")),
        )
        .with_target(false)
        .init();
}

fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => {
            info!("no config given, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

fn print_summary(report: &SimulationReport) {
    for step in &report.steps {
        let status = if step.ok { "ok" } else { "FAIL" };
        println!(
            "#{:<3} t={:<12} {:<12} {:<4} {}",
            step.index, step.at, step.action, status, step.detail
        );
    }
    println!();
    print_markets(&report.markets);
    println!();
    println!("journal entries: {}", report.journal_entries);
}

fn print_markets(markets: &[MarketSummary]) {
    println!(
        "{:<8} {:<12} {:<8} {:>14} {:>14} {:>14} {:>14}",
        "market", "phase", "settled", "risk_bal", "hedge_bal", "risk_claims", "hedge_claims"
    );
    for m in markets {
        let phase = m.phase.map(|p| p.as_str()).unwrap_or("unregistered");
        println!(
            "{:<8} {:<12} {:<8} {:>14} {:>14} {:>14} {:>14}",
            m.market_id.0,
            phase,
            m.settled,
            m.risk_balance,
            m.hedge_balance,
            m.risk_claims,
            m.hedge_claims
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Simulate { script, json } => {
            let script = Script::load(&script)?;
            let sim = Simulator::new(config, script.start_time)?;
            let report = sim.run(&script);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report);
            }
        }
        Command::Feed {
            script,
            prices,
            oracle,
            buffer,
        } => {
            let oracle = oracle
                .or_else(|| config.controller.oracle_allowlist.first().cloned())
                .unwrap_or_else(|| "oracle".to_string());
            let script = Script::load(&script)?;
            let sim = Simulator::new(config, script.start_time)?;
            let setup = sim.run(&script);
            if setup.failed_steps().next().is_some() {
                warn!("setup script had failing steps");
            }

            let (tx, rx) = mpsc::channel::<OracleUpdate>(buffer.max(1));
            let relay = spawn_oracle_relay(
                sim.engine().controller.clone(),
                Address::new(&oracle),
                rx,
            );

            let file = std::fs::File::open(&prices)
                .with_context(|| format!("open price feed {}", prices))?;
            for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let update: OracleUpdate = serde_json::from_str(&line)
                    .with_context(|| format!("{}:{}: bad sample", prices, line_no + 1))?;
                if tx.send(update).await.is_err() {
                    warn!("relay stopped early");
                    break;
                }
            }
            drop(tx);

            let stats = relay.await.context("relay task panicked")?;
            print_markets(&sim.market_summaries());
            println!("relay: {}", serde_json::to_string(&stats)?);
        }
        Command::CheckConfig => {
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
