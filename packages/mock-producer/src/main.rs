//! mock-producer: synthetic boat generator or session-pack replay, speaking
//! the same upstream wire formats the relay's subscribers (C7) consume.
//! Two subcommands, matching the teacher's `uwb-simulator` CLI surface via
//! `clap::Parser`.

mod boat_sim;
mod generate;
mod geo;
mod replay;
mod scenario;
mod transport;
mod upstream;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use scenario::Scenario;

#[derive(Parser, Debug)]
#[command(name = "mock-producer", about = "Synthetic/replay upstream producer for the start-line relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate synthetic boats approaching the line and stream them live.
    Generate(GenerateArgs),
    /// Replay a recorded session pack at its original (or scaled) cadence.
    Replay(ReplayArgs),
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    #[arg(long, default_value = "0.0.0.0:5000")]
    position_addr: String,
    #[arg(long, default_value = "0.0.0.0:5001")]
    gate_addr: String,
    #[arg(long, default_value_t = 8)]
    boats: u32,
    #[arg(long, default_value_t = 1)]
    first_device_id: u32,
    #[arg(long, default_value_t = 101)]
    anchor_left_device_id: u32,
    #[arg(long, default_value_t = 102)]
    anchor_right_device_id: u32,
    #[arg(long, default_value_t = 10.0)]
    rate_hz: f64,
    #[arg(long, default_value_t = 1.0)]
    speed: f64,
    #[arg(long, default_value_t = 120.0)]
    line_length_m: f64,
    #[arg(long, default_value_t = 400.0)]
    approach_distance_m: f64,
    #[arg(long, default_value_t = 30)]
    t_minus_seconds: u32,
    /// Device ids to force across the line at T-0 (repeatable, `--scenario ocs`).
    #[arg(long)]
    ocs_device_id: Vec<u32>,
    /// Device id to silence periodically (`--scenario device-dropout`).
    #[arg(long)]
    dropout_device_id: Option<u32>,
    #[arg(long, value_enum, default_value = "clean")]
    scenario: Scenario,
    #[arg(long, default_value_t = 22.2793, allow_hyphen_values = true)]
    origin_lat: f64,
    #[arg(long, default_value_t = 114.1628, allow_hyphen_values = true)]
    origin_lon: f64,
}

#[derive(Parser, Debug)]
struct ReplayArgs {
    /// Path to a `{session_id}.jsonl` pack written by the relay's recorder.
    #[arg(long)]
    pack: PathBuf,
    #[arg(long, default_value = "0.0.0.0:5000")]
    position_addr: String,
    #[arg(long, default_value = "0.0.0.0:5001")]
    gate_addr: String,
    #[arg(long, default_value_t = 1.0)]
    speed: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mock_producer=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let result = match cli.command {
        Command::Generate(args) => {
            info!(boats = args.boats, scenario = ?args.scenario, "starting generate");
            generate::run(
                generate::GenerateConfig {
                    position_addr: args.position_addr,
                    gate_addr: args.gate_addr,
                    n_boats: args.boats,
                    first_device_id: args.first_device_id,
                    anchor_left_device_id: args.anchor_left_device_id,
                    anchor_right_device_id: args.anchor_right_device_id,
                    rate_hz: args.rate_hz,
                    speed: args.speed,
                    line_length_m: args.line_length_m,
                    approach_distance_m: args.approach_distance_m,
                    t_minus_seconds: args.t_minus_seconds,
                    ocs_device_ids: args.ocs_device_id,
                    dropout_device_id: args.dropout_device_id,
                    scenario: args.scenario,
                    origin_lat: args.origin_lat,
                    origin_lon: args.origin_lon,
                },
                shutdown_rx,
            )
            .await
        }
        Command::Replay(args) => {
            info!(pack = %args.pack.display(), "starting replay");
            replay::run(
                replay::ReplayConfig {
                    pack_path: args.pack,
                    position_addr: args.position_addr,
                    gate_addr: args.gate_addr,
                    speed: args.speed,
                },
                shutdown_rx,
            )
            .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "mock producer exited with an unrecoverable error");
        std::process::exit(1);
    }
}
