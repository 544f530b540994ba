//! xbridge-tracker
//!
//! Command-line client for the cross-chain tracking service: resolve a
//! transaction linker to its operation id, read statuses and stage
//! profiles, or wait for an operation to finish.
//!
//! Configuration comes from `XBRIDGE_*` variables (a `.env` file is read
//! first); `--endpoint` overrides the endpoint list.

use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use xbridge_sdk::{
    Address, Direction, OperationId, OperationTracker, TrackerConfig, TrackingSession,
    TransactionLinker, WaitOptions,
};

#[derive(Parser)]
#[command(name = "xbridge-tracker", about = "Track TVM to EVM cross-chain operations")]
struct Cli {
    /// Tracking endpoint; repeat to try several in order.
    #[arg(long = "endpoint", global = true)]
    endpoints: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a linker to its operation id.
    OperationId(LinkerArgs),
    /// Print the status of one operation.
    Status(StatusArgs),
    /// Print stage profiles of one or more operations.
    Profile(ProfileArgs),
    /// Poll until the operation behind a linker finishes.
    Watch(WatchArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DirectionArg {
    /// Assets bridged from the TVM side.
    Forward,
    /// Operation started by the bridge on the EVM side.
    Reverse,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Forward => Direction::Forward,
            DirectionArg::Reverse => Direction::Reverse,
        }
    }
}

#[derive(Args)]
struct LinkerArgs {
    /// Linker JSON file as written by the sending application.
    #[arg(long, conflicts_with_all = ["caller", "shards_key"])]
    linker: Option<PathBuf>,
    /// Caller address (raw or user-friendly).
    #[arg(long, requires = "shards_key")]
    caller: Option<String>,
    #[arg(long)]
    shards_key: Option<String>,
    #[arg(long, default_value_t = 1)]
    shard_count: u32,
    /// Unix seconds at which the transaction was prepared.
    #[arg(long, default_value_t = 0)]
    timestamp: u64,
}

#[derive(Args)]
struct StatusArgs {
    #[arg(long)]
    operation_id: String,
    #[arg(long, value_enum, default_value_t = DirectionArg::Forward)]
    direction: DirectionArg,
}

#[derive(Args)]
struct ProfileArgs {
    /// Operation ids.
    #[arg(required = true)]
    operation_ids: Vec<String>,
}

#[derive(Args)]
struct WatchArgs {
    #[command(flatten)]
    linker: LinkerArgs,
    #[arg(long, value_enum, default_value_t = DirectionArg::Forward)]
    direction: DirectionArg,
    #[arg(long, default_value_t = 120)]
    max_attempts: u32,
    /// Seconds between polls.
    #[arg(long, default_value_t = 10)]
    delay: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    operation_id: String,
    status: String,
    simplified: String,
}

impl LinkerArgs {
    fn load(&self) -> Result<TransactionLinker> {
        if let Some(path) = &self.linker {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            return serde_json::from_str(&raw).context("parsing linker JSON");
        }
        let caller = self.caller.as_deref().context("--linker or --caller is required")?;
        let shards_key = self.shards_key.as_deref().context("--shards-key is required")?;
        let caller = Address::parse(caller)
            .with_context(|| format!("bad caller address {}", caller))?;
        Ok(TransactionLinker::new(&caller, self.shard_count, shards_key, self.timestamp))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn tracker(endpoints: Vec<String>) -> Result<OperationTracker> {
    let mut config = TrackerConfig::from_env()?;
    if !endpoints.is_empty() {
        config.endpoints = endpoints;
    }
    info!(endpoints = ?config.endpoints, "tracker configured");
    Ok(OperationTracker::new(config)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xbridge_tracker=info,xbridge_sdk=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let tracker = tracker(cli.endpoints)?;

    match cli.command {
        Commands::OperationId(args) => {
            let linker = args.load()?;
            let id = tracker.get_operation_id(&linker).await?;
            print_json(&serde_json::json!({ "operationId": id }))
        }
        Commands::Status(args) => {
            let id = OperationId::from(args.operation_id.as_str());
            let status = tracker.get_operation_status(&id).await?;
            let simplified = tracker.classify_status(&status, args.direction.into());
            print_json(&StatusOutput {
                operation_id: id.to_string(),
                status,
                simplified: simplified.to_string(),
            })
        }
        Commands::Profile(args) => {
            let ids: Vec<OperationId> = args
                .operation_ids
                .iter()
                .map(|s| OperationId::from(s.as_str()))
                .collect();
            let profiles = tracker.get_stage_profilings(&ids).await?;
            print_json(&profiles)
        }
        Commands::Watch(args) => {
            let linker = args.linker.load()?;
            let mut session = TrackingSession::new(linker, args.direction.into());
            let options = WaitOptions {
                max_attempts: args.max_attempts,
                delay: Duration::from_secs(args.delay),
            };
            let status = session.wait_until_terminal(&tracker, options).await?;
            print_json(&serde_json::json!({
                "operationId": session.state().operation_id(),
                "status": status,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_arguments() {
        let cli = Cli::try_parse_from([
            "xbridge-tracker",
            "--endpoint",
            "http://a",
            "watch",
            "--caller",
            "0:0000000000000000000000000000000000000000000000000000000000000001",
            "--shards-key",
            "1700000001",
            "--direction",
            "reverse",
        ])
        .unwrap();
        assert_eq!(cli.endpoints, vec!["http://a".to_string()]);
        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.direction, DirectionArg::Reverse);
                assert_eq!(args.max_attempts, 120);
                let linker = args.linker.load().unwrap();
                assert_eq!(linker.shards_key(), "1700000001");
                assert_eq!(linker.shard_count(), 1);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_profile_requires_ids() {
        assert!(Cli::try_parse_from(["xbridge-tracker", "profile"]).is_err());
    }
}
