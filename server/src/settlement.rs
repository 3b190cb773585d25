//! On-chain settlement boundary.
//!
//! Game code never awaits the chain. It hands [`SettlementJob`]s to a
//! [`SettlementDispatcher`], a fixed pool of workers draining a bounded queue.
//! Jobs are attempted once; failures and overflow are logged and dropped.

use crate::error::SettlementError;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use shared::{micro_to_units, Winner};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    WhiteWins,
    BlackWins,
    Draw,
}

impl From<Winner> for GameResult {
    fn from(winner: Winner) -> Self {
        match winner {
            Winner::White => GameResult::WhiteWins,
            Winner::Black => GameResult::BlackWins,
            Winner::Draw => GameResult::Draw,
        }
    }
}

/// One winner's slice of the pot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardShare {
    pub wallet: String,
    pub votes: u32,
    pub amount_micro: u64,
}

/// Splits `total_micro` across `winners` proportionally to their lifetime votes.
/// Integer division; the remainder stays in the pot.
pub fn split_pot(total_micro: u64, winners: &[(String, u32)]) -> Vec<RewardShare> {
    let total_votes: u128 = winners.iter().map(|(_, votes)| u128::from(*votes)).sum();
    if total_votes == 0 {
        return Vec::new();
    }

    winners
        .iter()
        .filter(|(_, votes)| *votes > 0)
        .map(|(wallet, votes)| {
            let amount = u128::from(total_micro) * u128::from(*votes) / total_votes;
            RewardShare {
                wallet: wallet.clone(),
                votes: *votes,
                amount_micro: amount as u64,
            }
        })
        .collect()
}

#[async_trait]
pub trait BlockchainService: Send + Sync {
    async fn create_game(&self, game_id: &str, stake_micro: u64) -> Result<(), SettlementError>;

    async fn record_move(
        &self,
        game_id: &str,
        player: &str,
        chain_id: u32,
    ) -> Result<(), SettlementError>;

    async fn stake_on_vote(
        &self,
        game_id: &str,
        player: &str,
        stake_micro: u64,
    ) -> Result<(), SettlementError>;

    async fn end_game(&self, game_id: &str, result: GameResult) -> Result<(), SettlementError>;

    /// Reward owed to `player` given the stake they put in, in micro-units.
    async fn calculate_rewards(
        &self,
        game_id: &str,
        player: &str,
        player_total_stake_micro: u64,
    ) -> Result<u64, SettlementError>;

    /// Pays `player` their share of the pot, in micro-units.
    async fn distribute_reward(
        &self,
        game_id: &str,
        player: &str,
        amount_micro: u64,
    ) -> Result<(), SettlementError>;

    fn is_connected(&self) -> bool;
}

/// Stand-in service that logs every call and keeps a record of them.
#[derive(Debug)]
pub struct MockBlockchainService {
    connected: bool,
    reject: bool,
    calls: StdMutex<Vec<String>>,
}

impl MockBlockchainService {
    pub fn new() -> Self {
        Self {
            connected: true,
            reject: false,
            calls: StdMutex::new(Vec::new()),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            ..Self::new()
        }
    }

    /// Accepts calls but fails every one of them.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: String) -> Result<(), SettlementError> {
        info!("[mock chain] {}", call);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.clone());
        }
        if self.reject {
            return Err(SettlementError::Rejected(call));
        }
        Ok(())
    }
}

impl Default for MockBlockchainService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockchainService for MockBlockchainService {
    async fn create_game(&self, game_id: &str, stake_micro: u64) -> Result<(), SettlementError> {
        self.record(format!("create_game {game_id} stake={stake_micro}"))
    }

    async fn record_move(
        &self,
        game_id: &str,
        player: &str,
        chain_id: u32,
    ) -> Result<(), SettlementError> {
        self.record(format!("record_move {game_id} {player} chain={chain_id}"))
    }

    async fn stake_on_vote(
        &self,
        game_id: &str,
        player: &str,
        stake_micro: u64,
    ) -> Result<(), SettlementError> {
        self.record(format!("stake_on_vote {game_id} {player} stake={stake_micro}"))
    }

    async fn end_game(&self, game_id: &str, result: GameResult) -> Result<(), SettlementError> {
        self.record(format!("end_game {game_id} {result:?}"))
    }

    async fn calculate_rewards(
        &self,
        game_id: &str,
        player: &str,
        player_total_stake_micro: u64,
    ) -> Result<u64, SettlementError> {
        self.record(format!(
            "calculate_rewards {game_id} {player} stake={player_total_stake_micro}"
        ))?;
        Ok(player_total_stake_micro)
    }

    async fn distribute_reward(
        &self,
        game_id: &str,
        player: &str,
        amount_micro: u64,
    ) -> Result<(), SettlementError> {
        self.record(format!(
            "distribute_reward {game_id} {player} amount={amount_micro}"
        ))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementJob {
    CreateGame {
        game_id: String,
        stake_micro: u64,
    },
    RecordVote {
        game_id: String,
        wallet: String,
        chain_id: u32,
        stake_micro: u64,
    },
    EndGame {
        game_id: String,
        result: GameResult,
        stake_micro: u64,
        shares: Vec<RewardShare>,
    },
}

/// Front door of the settlement worker pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SettlementDispatcher {
    tx: mpsc::Sender<SettlementJob>,
}

impl SettlementDispatcher {
    /// Spawns `workers` tasks sharing one queue of `capacity` jobs.
    pub fn start(service: Arc<dyn BlockchainService>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let service = Arc::clone(&service);

            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => execute(service.as_ref(), job).await,
                        None => break,
                    }
                }
                debug!("Settlement worker {} stopped", worker);
            });
        }

        Self { tx }
    }

    /// Queues a job without waiting. A full queue drops the job.
    pub fn dispatch(&self, job: SettlementJob) -> Result<(), SettlementError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!("Settlement queue full, dropping {:?}", job);
                Err(SettlementError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Settlement workers are gone");
                Err(SettlementError::NotConnected)
            }
        }
    }
}

async fn execute(service: &dyn BlockchainService, job: SettlementJob) {
    if !service.is_connected() {
        warn!("Skipping settlement job: {}", SettlementError::NotConnected);
        return;
    }

    match job {
        SettlementJob::CreateGame {
            game_id,
            stake_micro,
        } => {
            if let Err(e) = service.create_game(&game_id, stake_micro).await {
                error!("Failed to create game {} on chain: {}", game_id, e);
            }
        }
        SettlementJob::RecordVote {
            game_id,
            wallet,
            chain_id,
            stake_micro,
        } => {
            if let Err(e) = service.record_move(&game_id, &wallet, chain_id).await {
                error!("Failed to record move for {} in {}: {}", wallet, game_id, e);
                return;
            }
            if let Err(e) = service.stake_on_vote(&game_id, &wallet, stake_micro).await {
                error!("Failed to stake vote for {} in {}: {}", wallet, game_id, e);
            }
        }
        SettlementJob::EndGame {
            game_id,
            result,
            stake_micro,
            shares,
        } => {
            if let Err(e) = service.end_game(&game_id, result).await {
                error!("Failed to end game {} on chain: {}", game_id, e);
                return;
            }
            for share in shares {
                let staked = u64::from(share.votes) * stake_micro;
                match service
                    .calculate_rewards(&game_id, &share.wallet, staked)
                    .await
                {
                    Ok(reported) => debug!(
                        "Chain reports {:.6} owed to {} in {}",
                        micro_to_units(reported),
                        share.wallet,
                        game_id
                    ),
                    Err(e) => error!(
                        "Failed to calculate rewards for {} in {}: {}",
                        share.wallet, game_id, e
                    ),
                }
                match service
                    .distribute_reward(&game_id, &share.wallet, share.amount_micro)
                    .await
                {
                    Ok(()) => info!(
                        "Paid {:.6} to {} in {}",
                        micro_to_units(share.amount_micro),
                        share.wallet,
                        game_id
                    ),
                    Err(e) => error!(
                        "Failed to pay {} in {}: {}",
                        share.wallet, game_id, e
                    ),
                }
            }
        }
    }
}
