//! # Crowd Chess Server Library
//!
//! This library provides the authoritative server for crowd-played chess. Two
//! teams of players, white and black, steer one board together: during each
//! timed round every player on the side to move may vote for one legal move,
//! and when the round closes the most-voted move is played.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Game State
//! The server owns the only copy of every board. Votes are validated against
//! the current position and the voter's team before they are counted, and
//! clients only ever learn about moves through server broadcasts.
//!
//! ### Round Consensus
//! Each game runs its own countdown task. When the countdown expires, or as
//! soon as a lone player on the side to move has voted, the round resolves:
//! - The plurality move is applied to the board
//! - A side without a single vote forfeits the game
//! - Checkmate, stalemate and the draw rules end the game
//!
//! ### Session Orchestration
//! Handles the complete lifecycle of client connections including:
//! - Connection registration and identity assignment
//! - Matchmaking two wallets into a fresh game
//! - Team membership and reconnection
//! - Spectating and the lobby games list
//!
//! ### Settlement
//! Stakes and payouts are reported to an external settlement service from a
//! bounded worker pool. Its failures are logged and never reach players.
//!
//! ## Architecture Design
//!
//! ### Single Dispatch Loop
//! All connection bookkeeping happens in one event loop inside the hub. Connection
//! tasks and game tasks talk to it through channels, so rooms and queues need
//! no locks.
//!
//! ### Per-Game Locking
//! Game state sits behind one lock per game. A slow game never delays
//! lookups or votes in another.
//!
//! ### Non-Blocking Delivery
//! Outbound frames go through a bounded queue per connection. A client that
//! cannot keep up is dropped instead of stalling everyone else.
//!
//! ## Module Organization
//!
//! - `board`: chess rules and terminal outcome detection
//! - `game`: one game's rosters, vote tallies and pots
//! - `consensus`: the per-game round timer
//! - `manager`: game registry and permits
//! - `hub`: connections, rooms, matchmaking and broadcasts
//! - `connection`: WebSocket reader and writer tasks
//! - `network`: the listener tying it all together
//! - `settlement`: the external settlement seam and its worker pool
//! - `archive`: ended games kept for the lobby
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::settlement::MockBlockchainService;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 8080,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Votes are reported to an in-memory settlement service
//!     let server = Server::bind(config, Arc::new(MockBlockchainService::new())).await?;
//!
//!     // Accepts WebSocket clients until the process exits
//!     server.run().await;
//!
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod board;
pub mod config;
pub mod connection;
pub mod consensus;
pub mod error;
pub mod game;
pub mod hub;
pub mod manager;
pub mod network;
pub mod settlement;
pub mod utils;
