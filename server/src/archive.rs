//! Bounded store of finished games for the lobby list.

use log::debug;
use shared::GameInfo;
use std::collections::{HashMap, VecDeque};

/// Final snapshots keyed by game ID. Once `capacity` is reached the oldest
/// entry is evicted.
#[derive(Debug)]
pub struct GameArchive {
    capacity: usize,
    order: VecDeque<String>,
    games: HashMap<String, GameInfo>,
}

impl GameArchive {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            games: HashMap::new(),
        }
    }

    pub fn insert(&mut self, info: GameInfo) {
        let game_id = info.game_id.clone();
        if self.games.insert(game_id.clone(), info).is_some() {
            return;
        }

        self.order.push_back(game_id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.games.remove(&evicted);
                debug!("Evicted game {} from archive", evicted);
            }
        }
    }

    pub fn get(&self, game_id: &str) -> Option<&GameInfo> {
        self.games.get(game_id)
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &GameInfo> {
        self.order.iter().filter_map(|id| self.games.get(id))
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{GameStatus, Team};

    fn info(id: &str) -> GameInfo {
        GameInfo {
            game_id: id.to_string(),
            white_players: 1,
            black_players: 1,
            time_left: 0,
            current_move: 5,
            total_pot: 0.0,
            white_pot: 0.0,
            black_pot: 0.0,
            spectators: 0,
            current_turn: Team::White,
            status: GameStatus::Ended,
            winner: None,
            end_reason: None,
            created_at: 0,
            ended_at: Some(1),
            board: vec![],
            white_team_players: vec![],
            black_team_players: vec![],
        }
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut archive = GameArchive::new(2);
        archive.insert(info("a"));
        archive.insert(info("b"));
        archive.insert(info("c"));

        assert_eq!(archive.len(), 2);
        assert!(archive.get("a").is_none());
        let ids: Vec<_> = archive.iter().map(|g| g.game_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_reinsert_replaces_without_growing() {
        let mut archive = GameArchive::new(2);
        archive.insert(info("a"));
        let mut updated = info("a");
        updated.current_move = 9;
        archive.insert(updated);

        assert_eq!(archive.len(), 1);
        assert_eq!(archive.get("a").map(|g| g.current_move), Some(9));
        assert!(!archive.is_empty());
    }
}
