//! Error types shared by the game engine, the settlement pool and the hub

use shared::ParseTeamError;
use thiserror::Error;

/// Domain failures returned synchronously to the caller. The `Display` text is
/// what the offending connection receives in its `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("invalid move: {0}")]
    InvalidMove(String),
}

impl From<ParseTeamError> for GameError {
    fn from(err: ParseTeamError) -> Self {
        GameError::InvalidInput(err.to_string())
    }
}

/// Failures of the external settlement collaborator. Logged, never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    #[error("settlement service is not connected")]
    NotConnected,

    #[error("settlement call rejected: {0}")]
    Rejected(String),

    #[error("settlement queue is full")]
    QueueFull,
}

/// Inbound frames that cannot be decoded into a known message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
