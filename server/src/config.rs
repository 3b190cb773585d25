//! Server tunables. The binary fills these from command line arguments.

use shared::{DEFAULT_ROUND_SECONDS, DEFAULT_STAKE_MICRO};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Countdown length of one voting round, in ticks.
    pub round_seconds: u32,
    /// Length of one countdown tick. One second outside of tests.
    pub tick: Duration,
    /// Stake charged per accepted vote, in micro-units.
    pub stake_micro: u64,
    /// Frames buffered per connection before it is dropped as a slow consumer.
    pub outbound_queue: usize,
    /// Inbound frames buffered for the hub across all connections. Readers wait when it is full.
    pub inbound_queue: usize,
    /// A socket write that takes longer than this closes the connection.
    pub write_timeout: Duration,
    pub archive_capacity: usize,
    pub settlement_workers: usize,
    pub settlement_queue: usize,
    /// Votes that name a chain need a signed, unexpired permit for it.
    pub require_permit: bool,
    pub vault_address: String,
    pub permit_allowance_micro: u64,
    pub permit_ttl_secs: u64,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            round_seconds: DEFAULT_ROUND_SECONDS,
            tick: Duration::from_secs(1),
            stake_micro: DEFAULT_STAKE_MICRO,
            outbound_queue: 256,
            inbound_queue: 1024,
            write_timeout: Duration::from_secs(10),
            archive_capacity: 256,
            settlement_workers: 4,
            settlement_queue: 1024,
            require_permit: false,
            vault_address: "0x0000000000000000000000000000000000000000".to_string(),
            // 100 votes worth of stake
            permit_allowance_micro: DEFAULT_STAKE_MICRO * 100,
            permit_ttl_secs: 24 * 60 * 60,
        }
    }
}
