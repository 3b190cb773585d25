//! Per-game round driver.
//!
//! Each game gets exactly one [`ConsensusTimer`] task. Every tick it takes the
//! game's write lock, advances the countdown and, when a round resolves, copies
//! out what the hub needs before releasing the lock. Events and settlement jobs
//! are only emitted after the lock is dropped. The task exits for good once the
//! board reaches a terminal outcome.

use crate::board::BoardOutcome;
use crate::game::{GameState, RoundResolution};
use crate::settlement::{split_pot, GameResult, SettlementDispatcher, SettlementJob};
use log::{debug, info, warn};
use shared::GameStats;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Notifications from game tasks to the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    MoveResolved {
        game_id: String,
        mv: String,
        votes: BTreeMap<String, u32>,
        stats: GameStats,
    },
    GameEnded {
        game_id: String,
        outcome: BoardOutcome,
        stats: GameStats,
    },
}

pub struct ConsensusTimer {
    game_id: String,
    game: Arc<RwLock<GameState>>,
    settlement: SettlementDispatcher,
    events: mpsc::UnboundedSender<GameEvent>,
    tick: Duration,
}

impl ConsensusTimer {
    pub fn new(
        game_id: String,
        game: Arc<RwLock<GameState>>,
        settlement: SettlementDispatcher,
        events: mpsc::UnboundedSender<GameEvent>,
        tick: Duration,
    ) -> Self {
        Self {
            game_id,
            game,
            settlement,
            events,
            tick,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let step = {
                let mut game = self.game.write().await;
                game.tick().map(|resolution| {
                    let end_job = resolution
                        .outcome()
                        .map(|outcome| end_game_job(&game, outcome));
                    (resolution, game.stats(), end_job)
                })
            };

            let Some((resolution, stats, end_job)) = step else {
                continue;
            };

            let outcome = resolution.outcome();
            if let RoundResolution::Moved { mv, votes, .. } = resolution {
                self.emit(GameEvent::MoveResolved {
                    game_id: self.game_id.clone(),
                    mv,
                    votes,
                    stats: stats.clone(),
                });
            }

            if let Some(outcome) = outcome {
                info!(
                    "Game {} ended: {:?} by {:?}",
                    self.game_id, outcome.winner, outcome.reason
                );
                self.emit(GameEvent::GameEnded {
                    game_id: self.game_id.clone(),
                    outcome,
                    stats,
                });
                if let Some(job) = end_job {
                    let _ = self.settlement.dispatch(job);
                }
                break;
            }
        }

        debug!("Consensus timer for game {} stopped", self.game_id);
    }

    fn emit(&self, event: GameEvent) {
        if self.events.send(event).is_err() {
            warn!("No hub listening for events of game {}", self.game_id);
        }
    }
}

/// Winners share the whole pot by lifetime votes. Draws pay nobody.
fn end_game_job(game: &GameState, outcome: BoardOutcome) -> SettlementJob {
    let shares = outcome
        .winner
        .team()
        .map(|team| split_pot(game.total_pot_micro(), &game.team_votes(team)))
        .unwrap_or_default();

    SettlementJob::EndGame {
        game_id: game.id.clone(),
        result: GameResult::from(outcome.winner),
        stake_micro: game.stake_micro(),
        shares,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::MockBlockchainService;
    use shared::{GameEndReason, Team, Winner};

    const WHITE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const BLACK: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

    fn start(
        game: GameState,
    ) -> (
        Arc<RwLock<GameState>>,
        mpsc::UnboundedReceiver<GameEvent>,
        JoinHandle<()>,
        Arc<MockBlockchainService>,
    ) {
        let service = Arc::new(MockBlockchainService::new());
        let settlement = SettlementDispatcher::start(service.clone(), 1, 16);
        let (tx, rx) = mpsc::unbounded_channel();
        let game = Arc::new(RwLock::new(game));
        let handle = ConsensusTimer::new(
            "g1".to_string(),
            Arc::clone(&game),
            settlement,
            tx,
            Duration::from_secs(1),
        )
        .spawn();
        (game, rx, handle, service)
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_resolves_after_countdown() {
        let mut state = GameState::new("g1".to_string(), 15, 10_000);
        state.add_player(WHITE, Team::White).unwrap();
        state.add_player(BLACK, Team::Black).unwrap();
        state
            .add_player("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", Team::White)
            .unwrap();
        let (game, mut rx, _handle, _service) = start(state);

        game.write()
            .await
            .cast_vote(WHITE, "e4", Team::White)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(14_500)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(game.read().await.time_left(), 1);

        match rx.recv().await {
            Some(GameEvent::MoveResolved { mv, stats, .. }) => {
                assert_eq!(mv, "e2e4");
                assert_eq!(stats.current_move, 2);
                assert_eq!(stats.current_turn, Team::Black);
                assert_eq!(stats.time_left, 15);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_player_side_resolves_early() {
        let mut state = GameState::new("g1".to_string(), 15, 10_000);
        state.add_player(WHITE, Team::White).unwrap();
        state.add_player(BLACK, Team::Black).unwrap();
        let (game, mut rx, _handle, _service) = start(state);

        game.write()
            .await
            .cast_vote(WHITE, "d4", Team::White)
            .unwrap();

        let started = tokio::time::Instant::now();
        let event = rx.recv().await;
        assert!(matches!(event, Some(GameEvent::MoveResolved { .. })));
        assert!(started.elapsed() <= Duration::from_millis(1_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forfeit_ends_task_and_settles() {
        let mut state = GameState::new("g1".to_string(), 15, 10_000);
        state.add_player(WHITE, Team::White).unwrap();
        state.add_player(BLACK, Team::Black).unwrap();
        let (game, mut rx, handle, service) = start(state);

        match rx.recv().await {
            Some(GameEvent::GameEnded { outcome, .. }) => {
                assert_eq!(outcome.winner, Winner::Black);
                assert_eq!(outcome.reason, GameEndReason::Forfeit);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        handle.await.unwrap();
        assert!(game.read().await.is_ended());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(service.calls(), vec!["end_game g1 BlackWins".to_string()]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mating_move_emits_move_then_end() {
        let board = crate::board::Board::from_fen(
            "rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2",
        )
        .unwrap();
        let mut state = GameState::with_board("g1".to_string(), board, 15, 10_000);
        state.add_player(WHITE, Team::White).unwrap();
        state.add_player(BLACK, Team::Black).unwrap();
        let (game, mut rx, handle, service) = start(state);

        game.write()
            .await
            .cast_vote(BLACK, "d8h4", Team::Black)
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(GameEvent::MoveResolved { ref mv, .. }) if mv == "d8h4"
        ));
        match rx.recv().await {
            Some(GameEvent::GameEnded { outcome, stats, .. }) => {
                assert_eq!(outcome.reason, GameEndReason::Checkmate);
                assert!(stats.is_checkmate);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let calls = service.calls();
        assert_eq!(calls[0], "end_game g1 BlackWins");
        assert_eq!(
            calls[1],
            format!("calculate_rewards g1 {BLACK} stake=10000")
        );
        assert_eq!(
            calls[2],
            format!("distribute_reward g1 {BLACK} amount=10000")
        );
    }

    #[test]
    fn test_draw_pays_nobody() {
        let mut game = GameState::new("g1".to_string(), 15, 10_000);
        game.add_player(WHITE, Team::White).unwrap();
        game.cast_vote(WHITE, "e4", Team::White).unwrap();

        let job = end_game_job(
            &game,
            BoardOutcome {
                winner: Winner::Draw,
                reason: GameEndReason::Stalemate,
            },
        );
        assert!(matches!(
            job,
            SettlementJob::EndGame { result: GameResult::Draw, ref shares, .. } if shares.is_empty()
        ));
    }
}
