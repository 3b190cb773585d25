//! Per-game consensus state: rosters, the round's vote tally, pots and countdown.
//!
//! `GameState` is plain synchronous data. The [`Manager`](crate::manager::Manager)
//! wraps each instance in its own lock and the
//! [`ConsensusTimer`](crate::consensus::ConsensusTimer) drives [`GameState::tick`]
//! once per second while holding that lock.

use crate::board::{Board, BoardOutcome};
use crate::error::GameError;
use crate::utils::unix_timestamp;
use log::{error, info};
use shared::{
    is_valid_wallet, micro_to_units, GameInfo, GameStats, GameStatus, PlayerStats, Team,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// What a round resolution did to the game.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundResolution {
    /// The plurality move was played. `votes` is the tally it won with.
    Moved {
        mv: String,
        votes: BTreeMap<String, u32>,
        outcome: Option<BoardOutcome>,
    },
    /// Nobody on the side to move voted, so that side resigned.
    Forfeited { team: Team, outcome: BoardOutcome },
}

impl RoundResolution {
    pub fn outcome(&self) -> Option<BoardOutcome> {
        match self {
            RoundResolution::Moved { outcome, .. } => *outcome,
            RoundResolution::Forfeited { outcome, .. } => Some(*outcome),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TeamTally {
    turn_votes: u32,
    total_votes: u32,
    pot_micro: u64,
}

#[derive(Debug, Clone)]
pub struct GameState {
    pub id: String,
    pub created_at: u64,
    board: Board,
    current_move: u32,
    round_seconds: u32,
    time_left: u32,
    elapsed_in_round: u32,
    /// Candidates in the order they first received a vote.
    votes: Vec<(String, u32)>,
    voted_this_round: HashSet<String>,
    white_players: BTreeSet<String>,
    black_players: BTreeSet<String>,
    white: TeamTally,
    black: TeamTally,
    player_total_votes: HashMap<String, u32>,
    stake_micro: u64,
    outcome: Option<BoardOutcome>,
    ended_at: Option<u64>,
}

impl GameState {
    pub fn new(id: String, round_seconds: u32, stake_micro: u64) -> Self {
        Self::with_board(id, Board::new(), round_seconds, stake_micro)
    }

    pub fn with_board(id: String, board: Board, round_seconds: u32, stake_micro: u64) -> Self {
        let round_seconds = round_seconds.max(1);
        Self {
            id,
            created_at: unix_timestamp(),
            board,
            current_move: 1,
            round_seconds,
            time_left: round_seconds,
            elapsed_in_round: 0,
            votes: Vec::new(),
            voted_this_round: HashSet::new(),
            white_players: BTreeSet::new(),
            black_players: BTreeSet::new(),
            white: TeamTally::default(),
            black: TeamTally::default(),
            player_total_votes: HashMap::new(),
            stake_micro,
            outcome: None,
            ended_at: None,
        }
    }

    pub fn add_player(&mut self, wallet: &str, team: Team) -> Result<(), GameError> {
        if !is_valid_wallet(wallet) {
            return Err(GameError::InvalidInput(format!(
                "invalid wallet address: {wallet}"
            )));
        }

        if let Some(current) = self.team_of(wallet) {
            return Err(if current == team {
                GameError::Conflict(format!("player already on {team} team"))
            } else {
                GameError::Conflict(format!(
                    "player cannot join {team} team - already on {current} team"
                ))
            });
        }

        self.roster_mut(team).insert(wallet.to_string());
        info!("Player {} joined {} team in game {}", wallet, team, self.id);
        Ok(())
    }

    /// Records one vote and returns the move in coordinate notation.
    /// On error nothing is mutated.
    pub fn cast_vote(
        &mut self,
        wallet: &str,
        notation: &str,
        team: Team,
    ) -> Result<String, GameError> {
        if self.is_ended() {
            return Err(GameError::Conflict("game has ended".to_string()));
        }
        if wallet.is_empty() {
            return Err(GameError::InvalidInput(
                "wallet address is required".to_string(),
            ));
        }
        if !self.roster(team).contains(wallet) {
            return Err(GameError::Forbidden(format!(
                "player is not on the {team} team"
            )));
        }
        if self.board.turn() != team {
            return Err(GameError::Forbidden(format!("it is not {team}'s turn")));
        }
        if self.voted_this_round.contains(wallet) {
            return Err(GameError::Conflict(
                "player already voted this round".to_string(),
            ));
        }
        let mv = self
            .board
            .normalize(notation)
            .ok_or_else(|| GameError::InvalidMove(notation.to_string()))?;

        match self.votes.iter().position(|(candidate, _)| *candidate == mv) {
            Some(index) => self.votes[index].1 += 1,
            None => self.votes.push((mv.clone(), 1)),
        }
        self.voted_this_round.insert(wallet.to_string());
        *self.player_total_votes.entry(wallet.to_string()).or_insert(0) += 1;

        let stake = self.stake_micro;
        let tally = self.tally_mut(team);
        tally.turn_votes += 1;
        tally.total_votes += 1;
        tally.pot_micro += stake;

        Ok(mv)
    }

    /// Advances the countdown by one second and resolves the round when it is
    /// due. Returns `None` while the round is still open or after the game ended.
    pub fn tick(&mut self) -> Option<RoundResolution> {
        if self.is_ended() {
            return None;
        }

        self.time_left = self.time_left.saturating_sub(1);
        self.elapsed_in_round += 1;

        let turn = self.board.turn();
        let early = self.elapsed_in_round >= 1
            && self.roster(turn).len() == 1
            && !self.votes.is_empty();

        if self.time_left > 0 && !early {
            return None;
        }
        self.resolve_round()
    }

    /// First candidate with the strictly highest count. Earlier candidates win ties.
    pub fn plurality_move(&self) -> Option<&str> {
        let mut best: Option<(&str, u32)> = None;
        for (mv, count) in &self.votes {
            if best.map_or(true, |(_, top)| *count > top) {
                best = Some((mv.as_str(), *count));
            }
        }
        best.map(|(mv, _)| mv)
    }

    fn resolve_round(&mut self) -> Option<RoundResolution> {
        let turn = self.board.turn();

        let Some(mv) = self.plurality_move().map(str::to_owned) else {
            self.board.resign(turn);
            let outcome = self.board.outcome()?;
            self.finish(outcome);
            info!("Game {}: {} forfeited with no votes", self.id, turn);
            return Some(RoundResolution::Forfeited {
                team: turn,
                outcome,
            });
        };

        let votes = self.votes_snapshot();
        let played = match self.board.apply(&mv) {
            Ok(played) => played,
            Err(e) => {
                error!("Game {}: failed to apply voted move: {}", self.id, e);
                self.reset_round();
                return None;
            }
        };

        self.reset_round();
        self.current_move += 1;

        let outcome = self.board.outcome();
        if let Some(outcome) = outcome {
            self.finish(outcome);
        }
        info!("Game {}: {} played {}", self.id, turn, played);

        Some(RoundResolution::Moved {
            mv: played,
            votes,
            outcome,
        })
    }

    fn reset_round(&mut self) {
        self.votes.clear();
        self.voted_this_round.clear();
        self.white.turn_votes = 0;
        self.black.turn_votes = 0;
        self.time_left = self.round_seconds;
        self.elapsed_in_round = 0;
    }

    fn finish(&mut self, outcome: BoardOutcome) {
        self.outcome = Some(outcome);
        self.ended_at = Some(unix_timestamp());
    }

    pub fn is_ended(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<BoardOutcome> {
        self.outcome
    }

    pub fn ended_at(&self) -> Option<u64> {
        self.ended_at
    }

    pub fn team_of(&self, wallet: &str) -> Option<Team> {
        if self.white_players.contains(wallet) {
            Some(Team::White)
        } else if self.black_players.contains(wallet) {
            Some(Team::Black)
        } else {
            None
        }
    }

    pub fn roster(&self, team: Team) -> &BTreeSet<String> {
        match team {
            Team::White => &self.white_players,
            Team::Black => &self.black_players,
        }
    }

    fn roster_mut(&mut self, team: Team) -> &mut BTreeSet<String> {
        match team {
            Team::White => &mut self.white_players,
            Team::Black => &mut self.black_players,
        }
    }

    fn tally(&self, team: Team) -> &TeamTally {
        match team {
            Team::White => &self.white,
            Team::Black => &self.black,
        }
    }

    fn tally_mut(&mut self, team: Team) -> &mut TeamTally {
        match team {
            Team::White => &mut self.white,
            Team::Black => &mut self.black,
        }
    }

    pub fn turn(&self) -> Team {
        self.board.turn()
    }

    pub fn time_left(&self) -> u32 {
        self.time_left
    }

    pub fn current_move(&self) -> u32 {
        self.current_move
    }

    pub fn has_voted(&self, wallet: &str) -> bool {
        self.voted_this_round.contains(wallet)
    }

    pub fn player_votes(&self, wallet: &str) -> u32 {
        self.player_total_votes.get(wallet).copied().unwrap_or(0)
    }

    pub fn stake_micro(&self) -> u64 {
        self.stake_micro
    }

    pub fn total_pot_micro(&self) -> u64 {
        self.white.pot_micro + self.black.pot_micro
    }

    pub fn valid_moves(&self) -> Vec<String> {
        if self.is_ended() {
            return Vec::new();
        }
        self.board.legal_moves()
    }

    pub fn votes_snapshot(&self) -> BTreeMap<String, u32> {
        self.votes.iter().cloned().collect()
    }

    /// Lifetime vote counts of one team's wallets, for the reward split.
    pub fn team_votes(&self, team: Team) -> Vec<(String, u32)> {
        self.roster(team)
            .iter()
            .map(|wallet| (wallet.clone(), self.player_votes(wallet)))
            .collect()
    }

    fn player_stats(&self, team: Team) -> Vec<PlayerStats> {
        self.roster(team)
            .iter()
            .map(|wallet| {
                let votes = self.player_votes(wallet);
                PlayerStats {
                    wallet_address: wallet.clone(),
                    total_votes: votes,
                    total_spent: micro_to_units(u64::from(votes) * self.stake_micro),
                }
            })
            .collect()
    }

    pub fn stats(&self) -> GameStats {
        let rostered = self.white_players.iter().chain(self.black_players.iter());

        GameStats {
            white_players: self.white_players.len(),
            black_players: self.black_players.len(),
            white_current_turn_votes: self.white.turn_votes,
            black_current_turn_votes: self.black.turn_votes,
            white_team_total_votes: self.white.total_votes,
            black_team_total_votes: self.black.total_votes,
            total_pot: micro_to_units(self.total_pot_micro()),
            white_pot: micro_to_units(self.white.pot_micro),
            black_pot: micro_to_units(self.black.pot_micro),
            current_turn: self.board.turn(),
            time_left: self.time_left,
            current_move: self.current_move,
            player_voted_this_round: rostered
                .clone()
                .map(|wallet| (wallet.clone(), self.has_voted(wallet)))
                .collect(),
            player_total_votes: rostered
                .map(|wallet| (wallet.clone(), self.player_votes(wallet)))
                .collect(),
            board: self.board.squares(),
            is_in_check: self.board.is_check(),
            is_checkmate: self.board.is_checkmate(),
            white_team_players: self.player_stats(Team::White),
            black_team_players: self.player_stats(Team::Black),
        }
    }

    /// Lobby row. Spectators are counted by the hub, which owns the rooms.
    pub fn info(&self, spectators: usize) -> GameInfo {
        let ended = self.is_ended();
        GameInfo {
            game_id: self.id.clone(),
            white_players: self.white_players.len(),
            black_players: self.black_players.len(),
            time_left: self.time_left,
            current_move: self.current_move,
            total_pot: micro_to_units(self.total_pot_micro()),
            white_pot: micro_to_units(self.tally(Team::White).pot_micro),
            black_pot: micro_to_units(self.tally(Team::Black).pot_micro),
            spectators,
            current_turn: self.board.turn(),
            status: if ended {
                GameStatus::Ended
            } else {
                GameStatus::Active
            },
            winner: self.outcome.map(|o| o.winner),
            end_reason: self.outcome.map(|o| o.reason),
            created_at: self.created_at,
            ended_at: self.ended_at,
            board: self.board.squares(),
            white_team_players: if ended {
                self.player_stats(Team::White)
            } else {
                Vec::new()
            },
            black_team_players: if ended {
                self.player_stats(Team::Black)
            } else {
                Vec::new()
            },
        }
    }
}
