//! Connection and session orchestration.
//!
//! The [`Hub`] owns every piece of per-connection state: the connection
//! registry, the matchmaking queue, game rooms and the ended-game archive. All of
//! it is mutated from a single dispatch loop that drains three channels:
//!
//! - control [`HubEvent`]s (register, unregister, timer ticks)
//! - [`GameEvent`]s from the per-game consensus timers
//! - inbound frames from connection readers, through a bounded queue
//!
//! Because only the loop touches these maps they need no lock. Game state
//! itself lives behind the [`Manager`], which the hub calls for every rule
//! decision.
//!
//! Outbound delivery never waits. Each connection has a bounded queue drained
//! by its writer task; a connection whose queue is full or closed is removed
//! on the spot and everyone else is told about the new connection count.

use crate::archive::GameArchive;
use crate::board::BoardOutcome;
use crate::consensus::GameEvent;
use crate::error::{GameError, ProtocolError};
use crate::manager::Manager;
use log::{debug, error, info, warn};
use shared::{is_valid_wallet, ClientMessage, GameInfo, GameStats, ServerMessage, Team};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

/// Messages sent from connection tasks and the ticker to the dispatch loop
#[derive(Debug)]
pub enum HubEvent {
    Register {
        conn_id: String,
        outbound: mpsc::Sender<String>,
    },
    Unregister {
        conn_id: String,
    },
    Inbound {
        conn_id: String,
        text: String,
    },
    Tick,
}

/// Cloneable front door to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    control: mpsc::UnboundedSender<HubEvent>,
    inbound: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Registers an outbound queue and returns the connection's ID, or `None`
    /// if the hub has stopped.
    pub fn register(&self, outbound: mpsc::Sender<String>) -> Option<String> {
        let conn_id = Uuid::new_v4().to_string();
        self.send(HubEvent::Register {
            conn_id: conn_id.clone(),
            outbound,
        })
        .then_some(conn_id)
    }

    pub fn unregister(&self, conn_id: &str) {
        self.send(HubEvent::Unregister {
            conn_id: conn_id.to_string(),
        });
    }

    /// Queues a frame for the dispatch loop. Waits while the inbound queue is
    /// full, so a flooding reader is held to the hub's pace instead of growing
    /// the queue. Returns `false` once the hub has stopped.
    pub async fn inbound(&self, conn_id: &str, text: String) -> bool {
        let event = HubEvent::Inbound {
            conn_id: conn_id.to_string(),
            text,
        };
        match self.inbound.send(event).await {
            Ok(()) => true,
            Err(e) => {
                error!("Hub is not running: {}", e);
                false
            }
        }
    }

    fn send(&self, event: HubEvent) -> bool {
        match self.control.send(event) {
            Ok(()) => true,
            Err(e) => {
                error!("Hub is not running: {}", e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TeamBinding {
    game_id: String,
    team: Team,
}

/// Hub-side record of one client connection
#[derive(Debug)]
struct Connection {
    /// Frames waiting for the connection's writer task
    outbound: mpsc::Sender<String>,
    /// Wallet named by the last identifying message
    wallet: Option<String>,
    /// Local copy of the manager's team assignment
    team: Option<TeamBinding>,
}

pub struct Hub {
    manager: Arc<Manager>,
    connections: HashMap<String, Connection>,
    /// Game ID to the connections watching it, players and spectators alike
    rooms: HashMap<String, HashSet<String>>,
    /// (wallet, connection) pairs in arrival order
    matchmaking: VecDeque<(String, String)>,
    archive: GameArchive,
    tick: Duration,
    handle: HubHandle,
    /// Connections removed by `deliver` whose departure is not yet announced,
    /// with whether each was attached to a game
    dropped: Vec<(String, bool)>,
    control_rx: mpsc::UnboundedReceiver<HubEvent>,
    inbound_rx: mpsc::Receiver<HubEvent>,
    game_rx: mpsc::UnboundedReceiver<GameEvent>,
}

impl Hub {
    pub fn new(
        manager: Arc<Manager>,
        game_rx: mpsc::UnboundedReceiver<GameEvent>,
    ) -> (Self, HubHandle) {
        let (control, control_rx) = mpsc::unbounded_channel();
        let (inbound, inbound_rx) = mpsc::channel(manager.config().inbound_queue.max(1));
        let handle = HubHandle { control, inbound };
        let archive = GameArchive::new(manager.config().archive_capacity);
        let tick = manager.config().tick;

        let hub = Self {
            manager,
            connections: HashMap::new(),
            rooms: HashMap::new(),
            matchmaking: VecDeque::new(),
            archive,
            tick,
            handle: handle.clone(),
            dropped: Vec::new(),
            control_rx,
            inbound_rx,
            game_rx,
        };
        (hub, handle)
    }

    /// Main dispatch loop. Every registry mutation happens here.
    pub async fn run(mut self) {
        self.spawn_ticker();
        info!("Hub dispatch loop started");

        loop {
            // Control first, so a connection is registered before its frames arrive
            tokio::select! {
                biased;
                Some(event) = self.control_rx.recv() => self.handle_event(event).await,
                Some(event) = self.game_rx.recv() => self.handle_game_event(event).await,
                Some(event) = self.inbound_rx.recv() => self.handle_event(event).await,
                else => break,
            }
            self.announce_dropped().await;
        }

        info!("Hub dispatch loop stopped");
    }

    /// Spawns task that pushes a timer tick into the loop every period
    fn spawn_ticker(&self) {
        let handle = self.handle.clone();
        let period = self.tick;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !handle.send(HubEvent::Tick) {
                    break;
                }
            }
        });
    }

    async fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register { conn_id, outbound } => self.register(conn_id, outbound),
            HubEvent::Unregister { conn_id } => self.unregister(&conn_id).await,
            HubEvent::Inbound { conn_id, text } => {
                if !self.connections.contains_key(&conn_id) {
                    debug!("Ignoring frame from unknown connection {}", conn_id);
                    return;
                }
                match decode(&text) {
                    Ok(message) => self.handle_message(&conn_id, message).await,
                    Err(e) => warn!("Dropping frame from {}: {}", conn_id, e),
                }
            }
            HubEvent::Tick => self.broadcast_timers().await,
        }
    }

    fn register(&mut self, conn_id: String, outbound: mpsc::Sender<String>) {
        self.connections.insert(
            conn_id.clone(),
            Connection {
                outbound,
                wallet: None,
                team: None,
            },
        );
        info!(
            "Client registered: {} (Total connections: {})",
            conn_id,
            self.connections.len()
        );

        self.send_to(
            &conn_id,
            &ServerMessage::ClientConnected {
                client_id: conn_id.clone(),
            },
        );
        self.broadcast_connection_count();
    }

    async fn unregister(&mut self, conn_id: &str) {
        let Some(was_in_game) = self.drop_connection(conn_id) else {
            return;
        };
        info!(
            "Client unregistered: {} (Total connections: {})",
            conn_id,
            self.connections.len()
        );

        self.broadcast_connection_count();
        if was_in_game {
            self.broadcast_games_list().await;
        }
    }

    /// Broadcasts the departures of slow consumers dropped while handling the
    /// last event. Those broadcasts can drop more connections, hence the loop.
    async fn announce_dropped(&mut self) {
        while !self.dropped.is_empty() {
            let dropped = std::mem::take(&mut self.dropped);
            let was_in_game = dropped.iter().any(|(_, in_game)| *in_game);
            for (conn_id, _) in &dropped {
                info!(
                    "Client dropped: {} (Total connections: {})",
                    conn_id,
                    self.connections.len()
                );
            }

            self.broadcast_connection_count();
            if was_in_game {
                self.broadcast_games_list().await;
            }
        }
    }

    /// Forgets a connection everywhere except game rosters. Returns whether it
    /// was attached to a game, or `None` if it was already gone.
    fn drop_connection(&mut self, conn_id: &str) -> Option<bool> {
        let conn = self.connections.remove(conn_id)?;
        self.matchmaking.retain(|(_, id)| id != conn_id);

        let mut was_in_game = conn.team.is_some();
        for room in self.rooms.values_mut() {
            was_in_game |= room.remove(conn_id);
        }
        Some(was_in_game)
    }

    async fn handle_message(&mut self, conn_id: &str, message: ClientMessage) {
        let result = match message {
            ClientMessage::JoinGame { game_id } => self.join_game(conn_id, &game_id).await,
            ClientMessage::VoteMove {
                game_id,
                mv,
                player_id,
                team,
                chain_id,
            } => {
                self.vote_move(conn_id, &game_id, &mv, player_id, team, chain_id)
                    .await
            }
            ClientMessage::JoinTeam {
                game_id,
                player_id,
                team,
            } => self.join_team(conn_id, &game_id, player_id, &team).await,
            ClientMessage::WatchGame { game_id } => self.watch_game(conn_id, &game_id).await,
            ClientMessage::JoinMatchmaking { wallet_address } => {
                self.join_matchmaking(conn_id, wallet_address).await
            }
            ClientMessage::LeaveMatchmaking {} => {
                self.leave_matchmaking(conn_id);
                Ok(())
            }
            ClientMessage::GetValidMoves { game_id } => {
                self.get_valid_moves(conn_id, &game_id).await
            }
            ClientMessage::CheckPlayerStatus {
                game_id,
                wallet_address,
            } => {
                self.check_player_status(conn_id, &game_id, wallet_address)
                    .await
            }
            ClientMessage::RequestGamesList {} => {
                self.send_games_list(conn_id, None).await;
                Ok(())
            }
            ClientMessage::RequestFilteredGamesList { filter } => {
                self.send_games_list(conn_id, Some(filter)).await;
                Ok(())
            }
            ClientMessage::NumberOfPlayers {} => {
                self.broadcast_connection_count();
                Ok(())
            }
            ClientMessage::RequestPermit {
                wallet_address,
                chain_id,
            } => {
                self.request_permit(conn_id, wallet_address, chain_id)
                    .await
            }
            ClientMessage::SubmitPermitSignature {
                wallet_address,
                signature,
                chain_id,
            } => {
                self.submit_permit(conn_id, wallet_address, &signature, chain_id)
                    .await
            }
        };

        if let Err(e) = result {
            warn!("Request from {} rejected: {}", conn_id, e);
            self.send_error(conn_id, e.to_string());
        }
    }

    async fn join_game(&mut self, conn_id: &str, game_id: &str) -> Result<(), GameError> {
        self.ensure_active(game_id).await?;
        self.join_room(conn_id, game_id);
        self.send_snapshot(conn_id, game_id).await?;
        self.broadcast_games_list().await;
        Ok(())
    }

    async fn watch_game(&mut self, conn_id: &str, game_id: &str) -> Result<(), GameError> {
        self.ensure_active(game_id).await?;
        self.join_room(conn_id, game_id);
        info!("{} watching game {}", conn_id, game_id);
        self.broadcast_games_list().await;
        Ok(())
    }

    async fn vote_move(
        &mut self,
        conn_id: &str,
        game_id: &str,
        mv: &str,
        player_id: String,
        team: Option<String>,
        chain_id: u32,
    ) -> Result<(), GameError> {
        let wallet = self.identify(conn_id, player_id).ok_or_else(|| {
            GameError::InvalidInput("wallet address is required to vote".to_string())
        })?;

        let team = match team.filter(|team| !team.is_empty()) {
            Some(team) => team,
            None => self
                .manager
                .get_player_team(game_id, &wallet)
                .await?
                .map(|team| team.to_string())
                .ok_or_else(|| {
                    GameError::Forbidden("you must join a team before voting".to_string())
                })?,
        };

        let accepted = self
            .manager
            .vote_for_move(game_id, &wallet, mv, &team, chain_id)
            .await?;

        self.broadcast_to_room(
            game_id,
            &ServerMessage::VoteUpdate {
                game_id: game_id.to_string(),
                votes: accepted.votes,
                stats: accepted.stats,
            },
        );
        self.broadcast_games_list().await;
        Ok(())
    }

    async fn join_team(
        &mut self,
        conn_id: &str,
        game_id: &str,
        player_id: String,
        team: &str,
    ) -> Result<(), GameError> {
        let wallet = self.identify(conn_id, player_id).ok_or_else(|| {
            GameError::InvalidInput("wallet address is required to join a team".to_string())
        })?;
        let requested: Team = team.parse()?;
        self.ensure_active(game_id).await?;

        match self.manager.get_player_team(game_id, &wallet).await? {
            Some(existing) if existing != requested => {
                return Err(GameError::Conflict(format!(
                    "You are already on the {existing} team. Cannot switch teams."
                )));
            }
            Some(existing) => {
                info!(
                    "Player {} reconnecting to {} team in game {}",
                    wallet, existing, game_id
                );
                self.bind_team(conn_id, game_id, existing);
                self.join_room(conn_id, game_id);
                self.send_snapshot(conn_id, game_id).await?;
            }
            None => {
                self.manager
                    .add_player_to_team(game_id, &wallet, team)
                    .await?;
                self.bind_team(conn_id, game_id, requested);
                self.join_room(conn_id, game_id);
            }
        }

        self.broadcast_games_list().await;
        Ok(())
    }

    async fn join_matchmaking(&mut self, conn_id: &str, wallet: String) -> Result<(), GameError> {
        if wallet.is_empty() {
            return Err(GameError::InvalidInput(
                "wallet address is required for matchmaking".to_string(),
            ));
        }
        if !is_valid_wallet(&wallet) {
            return Err(GameError::InvalidInput(format!(
                "invalid wallet address: {wallet}"
            )));
        }
        if self
            .matchmaking
            .iter()
            .any(|(queued, id)| *queued == wallet || id == conn_id)
        {
            return Err(GameError::Conflict(
                "you are already in the matchmaking queue".to_string(),
            ));
        }

        self.identify(conn_id, wallet.clone());
        self.matchmaking.push_back((wallet, conn_id.to_string()));
        info!("Matchmaking queue size: {}", self.matchmaking.len());

        if self.matchmaking.len() >= 2 {
            self.create_match().await;
        }
        Ok(())
    }

    /// Pairs the two oldest queue entries into a new game.
    async fn create_match(&mut self) {
        let (Some(first), Some(second)) =
            (self.matchmaking.pop_front(), self.matchmaking.pop_front())
        else {
            return;
        };

        let game_id = self.manager.create_game().await;
        let sides = if rand::random::<bool>() {
            [Team::White, Team::Black]
        } else {
            [Team::Black, Team::White]
        };
        let pairs = [(first, sides[0]), (second, sides[1])];

        for ((wallet, _), side) in &pairs {
            if let Err(e) = self
                .manager
                .add_player_to_team(&game_id, wallet, side.as_str())
                .await
            {
                error!("Failed to seat {} on {} in {}: {}", wallet, side, game_id, e);
                for ((_, conn_id), _) in &pairs {
                    self.send_error(conn_id, "failed to create match".to_string());
                }
                return;
            }
        }

        let players: Vec<String> = pairs.iter().map(|((_, conn_id), _)| conn_id.clone()).collect();
        for ((wallet, conn_id), side) in &pairs {
            self.bind_team(conn_id, &game_id, *side);
            self.join_room(conn_id, &game_id);
            self.send_to(
                conn_id,
                &ServerMessage::MatchFound {
                    game_id: game_id.clone(),
                    players: players.clone(),
                    assigned_side: *side,
                },
            );
            info!("Matched {} as {} in game {}", wallet, side, game_id);
        }

        self.broadcast_games_list().await;
    }

    fn leave_matchmaking(&mut self, conn_id: &str) {
        let before = self.matchmaking.len();
        self.matchmaking.retain(|(_, id)| id != conn_id);
        if self.matchmaking.len() != before {
            info!("{} left matchmaking", conn_id);
        }
    }

    async fn get_valid_moves(&mut self, conn_id: &str, game_id: &str) -> Result<(), GameError> {
        let valid_moves = self.manager.get_valid_moves(game_id).await?;
        self.send_to(
            conn_id,
            &ServerMessage::ValidMovesResponse {
                game_id: game_id.to_string(),
                valid_moves,
            },
        );
        Ok(())
    }

    async fn check_player_status(
        &mut self,
        conn_id: &str,
        game_id: &str,
        wallet: String,
    ) -> Result<(), GameError> {
        if wallet.is_empty() {
            return Err(GameError::InvalidInput(
                "wallet address is required for player status check".to_string(),
            ));
        }
        self.identify(conn_id, wallet.clone());

        let team = self.manager.get_player_team(game_id, &wallet).await?;
        self.send_to(
            conn_id,
            &ServerMessage::PlayerStatus {
                game_id: game_id.to_string(),
                wallet_address: wallet,
                team,
            },
        );
        Ok(())
    }

    async fn request_permit(
        &mut self,
        conn_id: &str,
        wallet: String,
        chain_id: u32,
    ) -> Result<(), GameError> {
        if wallet.is_empty() {
            return Err(GameError::InvalidInput(
                "wallet address is required for permit2 request".to_string(),
            ));
        }
        self.identify(conn_id, wallet.clone());

        let permit2_data = self.manager.request_permit(&wallet, chain_id).await?;
        self.send_to(conn_id, &ServerMessage::PermitData { permit2_data });
        Ok(())
    }

    async fn submit_permit(
        &mut self,
        conn_id: &str,
        wallet: String,
        signature: &str,
        chain_id: u32,
    ) -> Result<(), GameError> {
        if wallet.is_empty() {
            return Err(GameError::InvalidInput(
                "wallet address is required for permit2 signature".to_string(),
            ));
        }
        self.identify(conn_id, wallet.clone());

        self.manager
            .submit_permit_signature(&wallet, chain_id, signature)
            .await?;
        self.send_to(
            conn_id,
            &ServerMessage::PermitAccepted {
                wallet_address: wallet,
                chain_id,
            },
        );
        Ok(())
    }

    async fn handle_game_event(&mut self, event: GameEvent) {
        match event {
            GameEvent::MoveResolved {
                game_id,
                mv,
                votes,
                stats,
            } => {
                debug!("Move {} resolved in game {}", mv, game_id);
                self.broadcast_to_room(
                    &game_id,
                    &ServerMessage::MoveResult {
                        game_id: game_id.clone(),
                        mv,
                        votes,
                        stats,
                    },
                );
                self.broadcast_games_list().await;
            }
            GameEvent::GameEnded {
                game_id,
                outcome,
                stats,
            } => self.end_game(game_id, outcome, stats).await,
        }
    }

    /// Sends each room member its own `game_end`, archives the final state and
    /// tears the room down.
    async fn end_game(&mut self, game_id: String, outcome: BoardOutcome, stats: GameStats) {
        let members = self.room_members(&game_id);
        let spectators = self.spectators(&game_id);

        for conn_id in members {
            let player_votes = self
                .connections
                .get(&conn_id)
                .and_then(|conn| conn.wallet.as_ref())
                .and_then(|wallet| stats.player_total_votes.get(wallet))
                .copied()
                .unwrap_or(0);

            self.send_to(
                &conn_id,
                &ServerMessage::GameEnd {
                    game_id: game_id.clone(),
                    winner: outcome.winner,
                    game_end_reason: outcome.reason,
                    player_votes,
                    stats: stats.clone(),
                },
            );
        }

        match self.manager.get_game_info(&game_id).await {
            Ok(mut info) => {
                info.spectators = spectators;
                self.archive.insert(info);
            }
            Err(e) => error!("Could not archive game {}: {}", game_id, e),
        }

        self.rooms.remove(&game_id);
        for conn in self.connections.values_mut() {
            if conn
                .team
                .as_ref()
                .is_some_and(|binding| binding.game_id == game_id)
            {
                conn.team = None;
            }
        }

        info!("Game {} archived ({} ended games kept)", game_id, self.archive.len());
        self.broadcast_games_list().await;
    }

    async fn broadcast_timers(&mut self) {
        let game_ids: Vec<String> = self.rooms.keys().cloned().collect();
        for game_id in game_ids {
            match self.manager.get_time_left(&game_id).await {
                Ok(seconds_left) => self.broadcast_to_room(
                    &game_id,
                    &ServerMessage::TimerTick {
                        game_id: game_id.clone(),
                        seconds_left,
                    },
                ),
                Err(e) => debug!("No timer for room {}: {}", game_id, e),
            }
        }
    }

    async fn ensure_active(&self, game_id: &str) -> Result<(), GameError> {
        if self.manager.is_game_ended(game_id).await? {
            return Err(GameError::Conflict(format!("game {game_id} has ended")));
        }
        Ok(())
    }

    async fn send_snapshot(&mut self, conn_id: &str, game_id: &str) -> Result<(), GameError> {
        let (votes, stats) = self.manager.get_snapshot(game_id).await?;
        self.send_to(
            conn_id,
            &ServerMessage::VoteUpdate {
                game_id: game_id.to_string(),
                votes,
                stats,
            },
        );
        Ok(())
    }

    /// Binds `wallet` to the connection when given, otherwise returns the wallet
    /// bound earlier.
    fn identify(&mut self, conn_id: &str, wallet: String) -> Option<String> {
        let conn = self.connections.get_mut(conn_id)?;
        if !wallet.is_empty() {
            conn.wallet = Some(wallet);
        }
        conn.wallet.clone()
    }

    fn bind_team(&mut self, conn_id: &str, game_id: &str, team: Team) {
        if let Some(conn) = self.connections.get_mut(conn_id) {
            conn.team = Some(TeamBinding {
                game_id: game_id.to_string(),
                team,
            });
        }
    }

    fn join_room(&mut self, conn_id: &str, game_id: &str) {
        self.rooms
            .entry(game_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    fn room_members(&self, game_id: &str) -> Vec<String> {
        self.rooms
            .get(game_id)
            .map(|room| room.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Room members without a team in this game.
    fn spectators(&self, game_id: &str) -> usize {
        let Some(room) = self.rooms.get(game_id) else {
            return 0;
        };
        room.iter()
            .filter(|conn_id| {
                self.connections
                    .get(*conn_id)
                    .and_then(|conn| conn.team.as_ref())
                    .filter(|binding| binding.game_id == game_id)
                    .is_none()
            })
            .count()
    }

    /// Active games from the manager followed by archived ones. `filter` may be
    /// "active" or "ended"; anything else lists both.
    async fn games_list(&self, filter: Option<&str>) -> Vec<GameInfo> {
        let mut games = Vec::new();

        if filter != Some("ended") {
            for mut info in self.manager.active_games().await {
                info.spectators = self.spectators(&info.game_id);
                games.push(info);
            }
        }
        if filter != Some("active") {
            games.extend(self.archive.iter().cloned());
        }
        games
    }

    async fn send_games_list(&mut self, conn_id: &str, filter: Option<String>) {
        let games_list = self.games_list(filter.as_deref()).await;
        self.send_to(
            conn_id,
            &ServerMessage::GamesList {
                games_list,
                total_connections: self.connections.len(),
                filter,
            },
        );
    }

    async fn broadcast_games_list(&mut self) {
        let games_list = self.games_list(None).await;
        self.broadcast_to_all(&ServerMessage::GamesListUpdate {
            games_list,
            total_connections: self.connections.len(),
        });
    }

    fn broadcast_connection_count(&mut self) {
        self.broadcast_to_all(&ServerMessage::NumberOfPlayers {
            total_connections: self.connections.len(),
        });
    }

    fn send_error(&mut self, conn_id: &str, error: String) {
        self.send_to(conn_id, &ServerMessage::Error { error });
    }

    fn send_to(&mut self, conn_id: &str, message: &ServerMessage) {
        if let Some(text) = encode(message) {
            self.deliver(conn_id, text);
        }
    }

    fn broadcast_to_room(&mut self, game_id: &str, message: &ServerMessage) {
        let Some(text) = encode(message) else {
            return;
        };
        for conn_id in self.room_members(game_id) {
            self.deliver(&conn_id, text.clone());
        }
    }

    fn broadcast_to_all(&mut self, message: &ServerMessage) {
        let Some(text) = encode(message) else {
            return;
        };
        let conn_ids: Vec<String> = self.connections.keys().cloned().collect();
        for conn_id in conn_ids {
            self.deliver(&conn_id, text.clone());
        }
    }

    /// Non-blocking send. A full or closed queue gets the connection dropped.
    fn deliver(&mut self, conn_id: &str, text: String) -> bool {
        let Some(conn) = self.connections.get(conn_id) else {
            return false;
        };

        match conn.outbound.try_send(text) {
            Ok(()) => return true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Dropping slow consumer {}", conn_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound queue of {} closed", conn_id);
            }
        }

        if let Some(was_in_game) = self.drop_connection(conn_id) {
            self.dropped.push((conn_id.to_string(), was_in_game));
        }
        false
    }
}

fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed to encode message: {}", e);
            None
        }
    }
}
