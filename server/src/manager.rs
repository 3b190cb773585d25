//! Game registry and every game-mutating operation.
//!
//! The [`Manager`] owns one lock per game. Operations look the game up under the
//! registry's read lock, release it, then take that game's own lock, so slow work
//! on one game never blocks lookups of another. Settlement jobs are queued only
//! after the game lock is released.

use crate::config::ServerConfig;
use crate::consensus::{ConsensusTimer, GameEvent};
use crate::error::GameError;
use crate::game::GameState;
use crate::settlement::{SettlementDispatcher, SettlementJob};
use crate::utils::unix_timestamp;
use log::{info, warn};
use shared::{is_valid_wallet, GameInfo, GameStats, PermitRequest, Team};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Result of an accepted vote, read under the same lock that accepted it.
#[derive(Debug, Clone)]
pub struct VoteAccepted {
    pub mv: String,
    pub votes: BTreeMap<String, u32>,
    pub stats: GameStats,
}

#[derive(Debug, Clone)]
struct StoredPermit {
    request: PermitRequest,
    signature: Option<String>,
}

impl StoredPermit {
    fn is_expired(&self) -> bool {
        self.request.deadline <= unix_timestamp()
    }

    fn is_valid_for(&self, chain_id: u32) -> bool {
        self.request.chain_id == chain_id
            && self.signature.as_deref().is_some_and(|s| !s.is_empty())
            && !self.is_expired()
    }
}

pub struct Manager {
    games: RwLock<HashMap<String, Arc<RwLock<GameState>>>>,
    permits: RwLock<HashMap<String, StoredPermit>>,
    next_nonce: AtomicU64,
    config: ServerConfig,
    settlement: SettlementDispatcher,
    events: mpsc::UnboundedSender<GameEvent>,
}

impl Manager {
    pub fn new(
        config: ServerConfig,
        settlement: SettlementDispatcher,
        events: mpsc::UnboundedSender<GameEvent>,
    ) -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            permits: RwLock::new(HashMap::new()),
            next_nonce: AtomicU64::new(0),
            config,
            settlement,
            events,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Allocates a game and starts its consensus timer.
    pub async fn create_game(&self) -> String {
        let game_id = Uuid::new_v4().to_string();
        let game = Arc::new(RwLock::new(GameState::new(
            game_id.clone(),
            self.config.round_seconds,
            self.config.stake_micro,
        )));

        self.games
            .write()
            .await
            .insert(game_id.clone(), Arc::clone(&game));

        ConsensusTimer::new(
            game_id.clone(),
            game,
            self.settlement.clone(),
            self.events.clone(),
            self.config.tick,
        )
        .spawn();

        let _ = self.settlement.dispatch(SettlementJob::CreateGame {
            game_id: game_id.clone(),
            stake_micro: self.config.stake_micro,
        });

        info!("Created game {}", game_id);
        game_id
    }

    async fn game(&self, game_id: &str) -> Result<Arc<RwLock<GameState>>, GameError> {
        self.games
            .read()
            .await
            .get(game_id)
            .cloned()
            .ok_or_else(|| GameError::NotFound(format!("game {game_id}")))
    }

    pub async fn game_exists(&self, game_id: &str) -> bool {
        self.games.read().await.contains_key(game_id)
    }

    pub async fn add_player_to_team(
        &self,
        game_id: &str,
        wallet: &str,
        team: &str,
    ) -> Result<(), GameError> {
        let game = self.game(game_id).await?;
        let team: Team = team.parse()?;
        let mut game = game.write().await;
        game.add_player(wallet, team)
    }

    pub async fn vote_for_move(
        &self,
        game_id: &str,
        wallet: &str,
        mv: &str,
        team: &str,
        chain_id: u32,
    ) -> Result<VoteAccepted, GameError> {
        let game = self.game(game_id).await?;
        let team: Team = team.parse()?;

        let needs_permit = self.config.require_permit && chain_id != 0;
        if needs_permit && !self.has_valid_permit(wallet, chain_id).await {
            return Err(GameError::Forbidden(
                "no valid permit - please sign permit before voting".to_string(),
            ));
        }

        let accepted = {
            let mut game = game.write().await;
            let mv = game.cast_vote(wallet, mv, team)?;
            VoteAccepted {
                mv,
                votes: game.votes_snapshot(),
                stats: game.stats(),
            }
        };

        let _ = self.settlement.dispatch(SettlementJob::RecordVote {
            game_id: game_id.to_string(),
            wallet: wallet.to_string(),
            chain_id,
            stake_micro: self.config.stake_micro,
        });

        info!(
            "Vote for {} by {} ({}) accepted in game {}",
            accepted.mv, wallet, team, game_id
        );
        Ok(accepted)
    }

    pub async fn get_valid_moves(&self, game_id: &str) -> Result<Vec<String>, GameError> {
        let game = self.game(game_id).await?;
        let moves = game.read().await.valid_moves();
        Ok(moves)
    }

    pub async fn get_votes(&self, game_id: &str) -> Result<BTreeMap<String, u32>, GameError> {
        let game = self.game(game_id).await?;
        let votes = game.read().await.votes_snapshot();
        Ok(votes)
    }

    pub async fn get_game_stats(&self, game_id: &str) -> Result<GameStats, GameError> {
        let game = self.game(game_id).await?;
        let stats = game.read().await.stats();
        Ok(stats)
    }

    /// Current tally and stats taken under one read lock.
    pub async fn get_snapshot(
        &self,
        game_id: &str,
    ) -> Result<(BTreeMap<String, u32>, GameStats), GameError> {
        let game = self.game(game_id).await?;
        let game = game.read().await;
        Ok((game.votes_snapshot(), game.stats()))
    }

    pub async fn is_game_ended(&self, game_id: &str) -> Result<bool, GameError> {
        let game = self.game(game_id).await?;
        let ended = game.read().await.is_ended();
        Ok(ended)
    }

    pub async fn get_time_left(&self, game_id: &str) -> Result<u32, GameError> {
        let game = self.game(game_id).await?;
        let time_left = game.read().await.time_left();
        Ok(time_left)
    }

    pub async fn get_player_team(
        &self,
        game_id: &str,
        wallet: &str,
    ) -> Result<Option<Team>, GameError> {
        let game = self.game(game_id).await?;
        let team = game.read().await.team_of(wallet);
        Ok(team)
    }

    pub async fn get_game_info(&self, game_id: &str) -> Result<GameInfo, GameError> {
        let game = self.game(game_id).await?;
        let info = game.read().await.info(0);
        Ok(info)
    }

    /// Lobby rows of every game still in play, oldest first.
    pub async fn active_games(&self) -> Vec<GameInfo> {
        let games: Vec<_> = self.games.read().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(games.len());
        for game in games {
            let game = game.read().await;
            if !game.is_ended() {
                infos.push(game.info(0));
            }
        }
        infos.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.game_id.cmp(&b.game_id))
        });
        infos
    }

    /// Returns the stake allowance `wallet` should sign for `chain_id`, reusing a
    /// still-valid permit if one exists.
    pub async fn request_permit(
        &self,
        wallet: &str,
        chain_id: u32,
    ) -> Result<PermitRequest, GameError> {
        if !is_valid_wallet(wallet) {
            return Err(GameError::InvalidInput(format!(
                "invalid wallet address: {wallet}"
            )));
        }
        if chain_id == 0 {
            return Err(GameError::InvalidInput("chain id is required".to_string()));
        }

        let mut permits = self.permits.write().await;
        if let Some(existing) = permits.get(wallet) {
            if existing.is_valid_for(chain_id) {
                return Ok(existing.request.clone());
            }
        }

        let request = PermitRequest {
            owner: wallet.to_string(),
            spender: self.config.vault_address.clone(),
            amount: self.config.permit_allowance_micro,
            nonce: self.next_nonce.fetch_add(1, Ordering::Relaxed),
            deadline: unix_timestamp() + self.config.permit_ttl_secs,
            chain_id,
        };
        permits.insert(
            wallet.to_string(),
            StoredPermit {
                request: request.clone(),
                signature: None,
            },
        );

        info!("Created permit for {} on chain {}", wallet, chain_id);
        Ok(request)
    }

    pub async fn submit_permit_signature(
        &self,
        wallet: &str,
        chain_id: u32,
        signature: &str,
    ) -> Result<(), GameError> {
        if signature.is_empty() {
            return Err(GameError::InvalidInput("signature is required".to_string()));
        }

        let mut permits = self.permits.write().await;
        let permit = permits
            .get_mut(wallet)
            .ok_or_else(|| GameError::NotFound(format!("permit for {wallet}")))?;

        if permit.request.chain_id != chain_id {
            return Err(GameError::Conflict(format!(
                "permit is for chain {}, but player is on chain {}",
                permit.request.chain_id, chain_id
            )));
        }
        if permit.is_expired() {
            warn!("Permit expired for {} on chain {}", wallet, chain_id);
            return Err(GameError::Conflict(
                "permit has expired - please request a new permit".to_string(),
            ));
        }

        permit.signature = Some(signature.to_string());
        info!("Stored permit signature for {} on chain {}", wallet, chain_id);
        Ok(())
    }

    pub async fn has_valid_permit(&self, wallet: &str, chain_id: u32) -> bool {
        self.permits
            .read()
            .await
            .get(wallet)
            .is_some_and(|permit| permit.is_valid_for(chain_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::MockBlockchainService;
    use assert_approx_eq::assert_approx_eq;
    use std::time::Duration;

    const A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const C: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

    fn manager_with(
        config: ServerConfig,
        service: Arc<MockBlockchainService>,
    ) -> (Manager, mpsc::UnboundedReceiver<GameEvent>) {
        let settlement = SettlementDispatcher::start(service, 2, 64);
        let (tx, rx) = mpsc::unbounded_channel();
        (Manager::new(config, settlement, tx), rx)
    }

    fn manager() -> (Manager, mpsc::UnboundedReceiver<GameEvent>) {
        manager_with(
            ServerConfig::default(),
            Arc::new(MockBlockchainService::new()),
        )
    }

    #[tokio::test]
    async fn test_unknown_game() {
        let (manager, _rx) = manager();

        assert!(matches!(
            manager.add_player_to_team("nope", A, "white").await,
            Err(GameError::NotFound(_))
        ));
        assert!(matches!(
            manager.vote_for_move("nope", A, "e4", "white", 0).await,
            Err(GameError::NotFound(_))
        ));
        assert!(matches!(
            manager.get_valid_moves("nope").await,
            Err(GameError::NotFound(_))
        ));
        assert!(matches!(
            manager.get_votes("nope").await,
            Err(GameError::NotFound(_))
        ));
        assert!(matches!(
            manager.get_game_stats("nope").await,
            Err(GameError::NotFound(_))
        ));
        assert!(!manager.game_exists("nope").await);
    }

    #[tokio::test]
    async fn test_team_validation() {
        let (manager, _rx) = manager();
        let game_id = manager.create_game().await;

        assert!(matches!(
            manager.add_player_to_team(&game_id, A, "purple").await,
            Err(GameError::InvalidInput(_))
        ));
        assert!(matches!(
            manager.add_player_to_team(&game_id, "bogus", "white").await,
            Err(GameError::InvalidInput(_))
        ));

        manager.add_player_to_team(&game_id, A, "white").await.unwrap();
        assert!(matches!(
            manager.add_player_to_team(&game_id, A, "black").await,
            Err(GameError::Conflict(_))
        ));
        assert!(matches!(
            manager.add_player_to_team(&game_id, A, "white").await,
            Err(GameError::Conflict(_))
        ));
        assert_eq!(
            manager.get_player_team(&game_id, A).await.unwrap(),
            Some(Team::White)
        );
        assert_eq!(manager.get_player_team(&game_id, B).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_vote_flow_and_snapshots() {
        let (manager, _rx) = manager();
        let game_id = manager.create_game().await;
        manager.add_player_to_team(&game_id, A, "white").await.unwrap();
        manager.add_player_to_team(&game_id, B, "white").await.unwrap();
        manager.add_player_to_team(&game_id, C, "black").await.unwrap();

        let accepted = manager
            .vote_for_move(&game_id, A, "e4", "white", 0)
            .await
            .unwrap();
        assert_eq!(accepted.mv, "e2e4");
        assert_eq!(accepted.votes.get("e2e4"), Some(&1));
        assert_eq!(accepted.stats.white_current_turn_votes, 1);

        assert!(matches!(
            manager.vote_for_move(&game_id, C, "e5", "black", 0).await,
            Err(GameError::Forbidden(_))
        ));
        assert!(matches!(
            manager.vote_for_move(&game_id, A, "d4", "white", 0).await,
            Err(GameError::Conflict(_))
        ));
        assert!(matches!(
            manager.vote_for_move(&game_id, B, "z9", "white", 0).await,
            Err(GameError::InvalidMove(_))
        ));

        let votes = manager.get_votes(&game_id).await.unwrap();
        assert_eq!(votes.len(), 1);

        let stats = manager.get_game_stats(&game_id).await.unwrap();
        assert_approx_eq!(stats.total_pot, stats.white_pot + stats.black_pot);
        assert_approx_eq!(stats.white_pot, 0.01);
        assert_eq!(manager.get_valid_moves(&game_id).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_settlement_failure_does_not_reject_vote() {
        let service = Arc::new(MockBlockchainService::rejecting());
        let (manager, _rx) = manager_with(ServerConfig::default(), service.clone());
        let game_id = manager.create_game().await;
        manager.add_player_to_team(&game_id, A, "white").await.unwrap();

        assert!(manager
            .vote_for_move(&game_id, A, "e4", "white", 8453)
            .await
            .is_ok());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let calls = service.calls();
        assert!(calls.iter().any(|c| c.starts_with("create_game")));
        assert!(calls.iter().any(|c| c.starts_with("record_move")));
        assert_eq!(manager.get_votes(&game_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_permit_gating() {
        let config = ServerConfig {
            require_permit: true,
            ..ServerConfig::default()
        };
        let (manager, _rx) = manager_with(config, Arc::new(MockBlockchainService::new()));
        let game_id = manager.create_game().await;
        manager.add_player_to_team(&game_id, A, "white").await.unwrap();

        assert!(matches!(
            manager.vote_for_move(&game_id, A, "e4", "white", 8453).await,
            Err(GameError::Forbidden(_))
        ));

        let permit = manager.request_permit(A, 8453).await.unwrap();
        assert_eq!(permit.owner, A);
        assert_eq!(permit.chain_id, 8453);
        assert!(!manager.has_valid_permit(A, 8453).await);

        assert!(matches!(
            manager.submit_permit_signature(A, 1, "0xsig").await,
            Err(GameError::Conflict(_))
        ));
        assert!(matches!(
            manager.submit_permit_signature(A, 8453, "").await,
            Err(GameError::InvalidInput(_))
        ));
        manager
            .submit_permit_signature(A, 8453, "0xsig")
            .await
            .unwrap();
        assert!(manager.has_valid_permit(A, 8453).await);
        assert!(!manager.has_valid_permit(A, 1).await);

        // A valid permit is handed back instead of a fresh one.
        let again = manager.request_permit(A, 8453).await.unwrap();
        assert_eq!(again.nonce, permit.nonce);

        assert!(manager
            .vote_for_move(&game_id, A, "e4", "white", 8453)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_permit_not_needed_without_chain() {
        let config = ServerConfig {
            require_permit: true,
            ..ServerConfig::default()
        };
        let (manager, _rx) = manager_with(config, Arc::new(MockBlockchainService::new()));
        let game_id = manager.create_game().await;
        manager.add_player_to_team(&game_id, A, "white").await.unwrap();

        assert!(manager
            .vote_for_move(&game_id, A, "e4", "white", 0)
            .await
            .is_ok());
        assert!(matches!(
            manager.submit_permit_signature(B, 1, "0xsig").await,
            Err(GameError::NotFound(_))
        ));
        assert!(matches!(
            manager.request_permit("nope", 1).await,
            Err(GameError::InvalidInput(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_games_list_drops_ended_games() {
        let (manager, mut rx) = manager();
        let first = manager.create_game().await;
        let second = manager.create_game().await;
        manager.add_player_to_team(&second, A, "white").await.unwrap();
        manager.vote_for_move(&second, A, "e4", "white", 0).await.unwrap();

        assert_eq!(manager.active_games().await.len(), 2);

        // The first game has no votes at all and forfeits after one round.
        loop {
            match rx.recv().await {
                Some(GameEvent::GameEnded { game_id, .. }) if game_id == first => break,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }

        let active = manager.active_games().await;
        assert!(active.iter().all(|info| info.game_id != first));
        assert!(manager.game_exists(&first).await);
        assert!(manager.get_game_info(&first).await.unwrap().winner.is_some());
    }
}
