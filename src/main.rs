use clap::{Parser, Subcommand};
use log::info;
use mini_swarm::core::RequestCounting;
use mini_swarm::utils::{level_for_verbosity, setup_logging};
use mini_swarm::{ChunkSource, Config, Result, Simulation, SimulationOptions};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mini-swarm")]
#[command(about = "Chunk distribution with integrity checks and freerider eviction")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a swarm over an in-process network
    Simulate {
        /// JSON configuration file; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of peers besides the root
        #[arg(long)]
        peer_count: Option<usize>,
        /// Number of chunks in the shared file
        #[arg(long)]
        chunk_count: Option<usize>,
        /// Payload bytes per message
        #[arg(long)]
        payload_size: Option<usize>,
        /// Evict peers whose upload/download ratio falls below this
        #[arg(long)]
        ratio_threshold: Option<f64>,
        /// Evict peers with more pending requests than this
        #[arg(long)]
        pending_request_threshold: Option<u32>,
        /// Bytes a peer may download before its ratio is judged
        #[arg(long)]
        ratio_grace_bytes: Option<u64>,
        /// How pending requests are counted
        #[arg(long, value_enum)]
        request_counting: Option<RequestCounting>,
        /// Re-requests allowed per chunk (0 disables retrying)
        #[arg(long, conflicts_with = "unbounded_retries")]
        max_retries: Option<u32>,
        /// Retry failed chunks forever
        #[arg(long)]
        unbounded_retries: bool,
        /// Milliseconds before an unanswered request is sent again
        #[arg(long)]
        request_timeout_ms: Option<u64>,
        /// Share this file instead of synthetic data
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Random seed for data, loss and corruption
        #[arg(long, default_value = "1")]
        seed: u64,
        /// Probability that a frame is lost
        #[arg(long, default_value = "0.0")]
        loss_rate: f64,
        /// Probability that a served chunk is corrupted
        #[arg(long, default_value = "0.0")]
        corruption_rate: f64,
        /// Stop after this many rounds
        #[arg(long, default_value = "1000")]
        max_rounds: u32,
        /// Milliseconds between rounds
        #[arg(long, default_value = "10")]
        round_interval_ms: u64,
        /// Most chunks a peer keeps requested at once
        #[arg(long, default_value = "4")]
        request_window: usize,
        /// Deliver chunks unverified instead of sending integrity verdicts
        #[arg(long)]
        trusted_delivery: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the default configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(level_for_verbosity(cli.verbose));

    match cli.command {
        Commands::Simulate {
            config,
            peer_count,
            chunk_count,
            payload_size,
            ratio_threshold,
            pending_request_threshold,
            ratio_grace_bytes,
            request_counting,
            max_retries,
            unbounded_retries,
            request_timeout_ms,
            file,
            seed,
            loss_rate,
            corruption_rate,
            max_rounds,
            round_interval_ms,
            request_window,
            trusted_delivery,
            json,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::default(),
            };
            if let Some(peer_count) = peer_count {
                config.peer_count = peer_count;
            }
            if let Some(chunk_count) = chunk_count {
                config.chunk_count = chunk_count;
            }
            if let Some(payload_size) = payload_size {
                config.payload_size = payload_size;
            }
            if let Some(ratio_threshold) = ratio_threshold {
                config.ratio_threshold = ratio_threshold;
            }
            if let Some(pending_request_threshold) = pending_request_threshold {
                config.pending_request_threshold = pending_request_threshold;
            }
            if let Some(ratio_grace_bytes) = ratio_grace_bytes {
                config.ratio_grace_bytes = ratio_grace_bytes;
            }
            if let Some(request_counting) = request_counting {
                config.request_counting = request_counting;
            }
            if let Some(max_retries) = max_retries {
                config.retry.max_retries = Some(max_retries);
            }
            if unbounded_retries {
                config.retry.max_retries = None;
            }
            if let Some(request_timeout_ms) = request_timeout_ms {
                config.request_timeout_ms = request_timeout_ms;
            }

            let source = match file {
                Some(path) => {
                    let source = ChunkSource::from_file(&path, config.payload_size).await?;
                    config.chunk_count = source.len();
                    source
                }
                None => ChunkSource::synthetic(config.chunk_count, config.payload_size, seed),
            };
            config.validate()?;

            let options = SimulationOptions {
                seed,
                loss_rate,
                corruption_rate,
                max_rounds,
                round_interval: Duration::from_millis(round_interval_ms),
                trusted_delivery,
                request_window,
            };

            info!(
                "Simulating {} peers sharing {} chunks",
                config.peer_count, config.chunk_count
            );
            let report = Simulation::new(config, source, options)?.run().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&Config::default())?);
        }
    }

    Ok(())
}
