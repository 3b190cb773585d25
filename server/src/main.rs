use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use server::settlement::MockBlockchainService;
use shared::{DEFAULT_ROUND_SECONDS, DEFAULT_STAKE_MICRO};
use std::sync::Arc;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, then starts the WebSocket server and its game engine.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Length of a voting round in seconds
        #[clap(short, long, default_value_t = DEFAULT_ROUND_SECONDS)]
        round_seconds: u32,
        /// Stake per vote in micro-units
        #[clap(long, default_value_t = DEFAULT_STAKE_MICRO)]
        stake_micro: u64,
        /// Frames buffered per client before it is dropped
        #[clap(long, default_value = "256")]
        outbound_queue: usize,
        /// Inbound frames buffered for the hub before readers wait
        #[clap(long, default_value = "1024")]
        inbound_queue: usize,
        /// Seconds a socket write may take before the client is disconnected
        #[clap(long, default_value = "10")]
        write_timeout_secs: u64,
        /// Number of ended games kept for the games list
        #[clap(long, default_value = "256")]
        archive_capacity: usize,
        /// Concurrent settlement workers
        #[clap(long, default_value = "4")]
        settlement_workers: usize,
        /// Pending settlement jobs before new ones are discarded
        #[clap(long, default_value = "1024")]
        settlement_queue: usize,
        /// Require a signed permit for votes that name a chain
        #[clap(long)]
        require_permit: bool,
    }

    // Parse command line arguments
    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        round_seconds: args.round_seconds,
        stake_micro: args.stake_micro,
        permit_allowance_micro: args.stake_micro * 100,
        outbound_queue: args.outbound_queue,
        inbound_queue: args.inbound_queue,
        write_timeout: Duration::from_secs(args.write_timeout_secs),
        archive_capacity: args.archive_capacity,
        settlement_workers: args.settlement_workers,
        settlement_queue: args.settlement_queue,
        require_permit: args.require_permit,
        ..ServerConfig::default()
    };

    let server = Server::bind(config, Arc::new(MockBlockchainService::new())).await?;

    // Handle shutdown gracefully
    tokio::select! {
        _ = server.run() => {
            error!("Server stopped accepting connections");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
