use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_ROUND_SECONDS: u32 = 15;
/// Stake per accepted vote, in micro-units (6 decimals): 0.01 USDC.
pub const DEFAULT_STAKE_MICRO: u64 = 10_000;
pub const MICRO_PER_UNIT: f64 = 1_000_000.0;
pub const WALLET_ADDRESS_LEN: usize = 42;

pub fn micro_to_units(micro: u64) -> f64 {
    micro as f64 / MICRO_PER_UNIT
}

/// `0x` followed by 40 hex digits.
pub fn is_valid_wallet(address: &str) -> bool {
    address.len() == WALLET_ADDRESS_LEN
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    White,
    Black,
}

impl Team {
    pub fn opposite(self) -> Self {
        match self {
            Team::White => Team::Black,
            Team::Black => Team::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Team::White => "white",
            Team::Black => "black",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid team: {0}")]
pub struct ParseTeamError(pub String);

impl FromStr for Team {
    type Err = ParseTeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "white" => Ok(Team::White),
            "black" => Ok(Team::Black),
            other => Err(ParseTeamError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    White,
    Black,
    Draw,
}

impl From<Team> for Winner {
    fn from(team: Team) -> Self {
        match team {
            Team::White => Winner::White,
            Team::Black => Winner::Black,
        }
    }
}

impl Winner {
    pub fn team(self) -> Option<Team> {
        match self {
            Winner::White => Some(Team::White),
            Winner::Black => Some(Team::Black),
            Winner::Draw => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoveRule,
    Forfeit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Active,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub wallet_address: String,
    pub total_votes: u32,
    pub total_spent: f64,
}

/// Immutable view of one game, taken under the game's lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStats {
    pub white_players: usize,
    pub black_players: usize,
    pub white_current_turn_votes: u32,
    pub black_current_turn_votes: u32,
    pub white_team_total_votes: u32,
    pub black_team_total_votes: u32,
    pub total_pot: f64,
    pub white_pot: f64,
    pub black_pot: f64,
    pub current_turn: Team,
    pub time_left: u32,
    pub current_move: u32,
    pub player_voted_this_round: BTreeMap<String, bool>,
    pub player_total_votes: BTreeMap<String, u32>,
    pub board: Vec<Vec<String>>,
    pub is_in_check: bool,
    pub is_checkmate: bool,
    pub white_team_players: Vec<PlayerStats>,
    pub black_team_players: Vec<PlayerStats>,
}

/// Row of the games list shown in the lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub game_id: String,
    pub white_players: usize,
    pub black_players: usize,
    pub time_left: u32,
    pub current_move: u32,
    pub total_pot: f64,
    pub white_pot: f64,
    pub black_pot: f64,
    pub spectators: usize,
    pub current_turn: Team,
    pub status: GameStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<GameEndReason>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    pub board: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub white_team_players: Vec<PlayerStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub black_team_players: Vec<PlayerStats>,
}

/// Stake allowance a wallet is asked to sign before voting on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitRequest {
    pub owner: String,
    pub spender: String,
    pub amount: u64,
    pub nonce: u64,
    pub deadline: u64,
    pub chain_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinGame {
        game_id: String,
    },
    VoteMove {
        game_id: String,
        #[serde(rename = "move")]
        mv: String,
        #[serde(default)]
        player_id: String,
        #[serde(default)]
        team: Option<String>,
        #[serde(default)]
        chain_id: u32,
    },
    JoinTeam {
        game_id: String,
        #[serde(default)]
        player_id: String,
        team: String,
    },
    WatchGame {
        game_id: String,
    },
    JoinMatchmaking {
        #[serde(default)]
        wallet_address: String,
    },
    LeaveMatchmaking {},
    GetValidMoves {
        game_id: String,
    },
    CheckPlayerStatus {
        game_id: String,
        #[serde(default)]
        wallet_address: String,
    },
    RequestGamesList {},
    RequestFilteredGamesList {
        #[serde(default)]
        filter: String,
    },
    NumberOfPlayers {},
    #[serde(rename = "request_permit2")]
    RequestPermit {
        #[serde(default)]
        wallet_address: String,
        #[serde(default)]
        chain_id: u32,
    },
    #[serde(rename = "submit_permit2_signature")]
    SubmitPermitSignature {
        #[serde(default)]
        wallet_address: String,
        #[serde(default)]
        signature: String,
        #[serde(default)]
        chain_id: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    ClientConnected {
        client_id: String,
    },
    MatchFound {
        game_id: String,
        players: Vec<String>,
        assigned_side: Team,
    },
    VoteUpdate {
        game_id: String,
        votes: BTreeMap<String, u32>,
        #[serde(flatten)]
        stats: GameStats,
    },
    MoveResult {
        game_id: String,
        #[serde(rename = "move")]
        mv: String,
        votes: BTreeMap<String, u32>,
        #[serde(flatten)]
        stats: GameStats,
    },
    TimerTick {
        game_id: String,
        seconds_left: u32,
    },
    GameEnd {
        game_id: String,
        winner: Winner,
        game_end_reason: GameEndReason,
        player_votes: u32,
        #[serde(flatten)]
        stats: GameStats,
    },
    GamesList {
        games_list: Vec<GameInfo>,
        total_connections: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    GamesListUpdate {
        games_list: Vec<GameInfo>,
        total_connections: usize,
    },
    PlayerStatus {
        game_id: String,
        wallet_address: String,
        team: Option<Team>,
    },
    ValidMovesResponse {
        game_id: String,
        valid_moves: Vec<String>,
    },
    NumberOfPlayers {
        total_connections: usize,
    },
    #[serde(rename = "permit2_data")]
    PermitData {
        permit2_data: PermitRequest,
    },
    #[serde(rename = "permit2_accepted")]
    PermitAccepted {
        wallet_address: String,
        chain_id: u32,
    },
    Error {
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use serde_json::{json, Value};

    fn sample_stats() -> GameStats {
        let mut voted = BTreeMap::new();
        voted.insert("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(), true);
        let mut totals = BTreeMap::new();
        totals.insert("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(), 3);

        GameStats {
            white_players: 1,
            black_players: 2,
            white_current_turn_votes: 1,
            black_current_turn_votes: 0,
            white_team_total_votes: 3,
            black_team_total_votes: 2,
            total_pot: 0.05,
            white_pot: 0.03,
            black_pot: 0.02,
            current_turn: Team::White,
            time_left: 12,
            current_move: 4,
            player_voted_this_round: voted,
            player_total_votes: totals,
            board: vec![vec![String::new(); 8]; 8],
            is_in_check: false,
            is_checkmate: false,
            white_team_players: vec![],
            black_team_players: vec![],
        }
    }

    #[test]
    fn test_wallet_validation() {
        assert!(is_valid_wallet("0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(!is_valid_wallet(""));
        assert!(!is_valid_wallet("52908400098527886E0F7030069857D2E4169EE7ab"));
        assert!(!is_valid_wallet("0x52908400098527886E0F7030069857D2E4169EE"));
        assert!(!is_valid_wallet("0xZZ908400098527886E0F7030069857D2E4169EE7"));
    }

    #[test]
    fn test_team_parsing() {
        assert_eq!("white".parse::<Team>(), Ok(Team::White));
        assert_eq!("black".parse::<Team>(), Ok(Team::Black));
        assert!("purple".parse::<Team>().is_err());
        assert!("White".parse::<Team>().is_err());
        assert_eq!(Team::White.opposite(), Team::Black);
    }

    #[test]
    fn test_micro_conversion() {
        assert_approx_eq!(micro_to_units(DEFAULT_STAKE_MICRO), 0.01);
        assert_approx_eq!(micro_to_units(0), 0.0);
        assert_approx_eq!(micro_to_units(1_500_000), 1.5);
    }

    #[test]
    fn test_vote_move_decoding() {
        let raw = r#"{"type":"vote_move","gameId":"g1","move":"e2e4","playerId":"0xabc","team":"white","chainId":84532}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();

        assert_eq!(
            msg,
            ClientMessage::VoteMove {
                game_id: "g1".to_string(),
                mv: "e2e4".to_string(),
                player_id: "0xabc".to_string(),
                team: Some("white".to_string()),
                chain_id: 84532,
            }
        );
    }

    #[test]
    fn test_optional_fields_default() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"vote_move","gameId":"g1","move":"e4"}"#).unwrap();
        match msg {
            ClientMessage::VoteMove {
                player_id,
                team,
                chain_id,
                ..
            } => {
                assert!(player_id.is_empty());
                assert!(team.is_none());
                assert_eq!(chain_id, 0);
            }
            _ => panic!("Wrong message type after decoding"),
        }

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"leave_matchmaking","extra":1}"#).unwrap();
        assert_eq!(msg, ClientMessage::LeaveMatchmaking {});
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"launch_missiles"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"gameId":"g1"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_permit_message_names() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"request_permit2","walletAddress":"0xabc","chainId":10}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::RequestPermit { chain_id: 10, .. }));

        let reply = ServerMessage::PermitAccepted {
            wallet_address: "0xabc".to_string(),
            chain_id: 10,
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "permit2_accepted");
    }

    #[test]
    fn test_vote_update_flattens_stats() {
        let mut votes = BTreeMap::new();
        votes.insert("e2e4".to_string(), 2);

        let msg = ServerMessage::VoteUpdate {
            game_id: "g1".to_string(),
            votes,
            stats: sample_stats(),
        };
        let value: Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "vote_update");
        assert_eq!(value["gameId"], "g1");
        assert_eq!(value["votes"], json!({"e2e4": 2}));
        assert_eq!(value["whitePlayers"], 1);
        assert_eq!(value["blackTeamTotalVotes"], 2);
        assert_eq!(value["currentTurn"], "white");
        assert_eq!(value["currentMove"], 4);
        assert_eq!(value["board"].as_array().unwrap().len(), 8);
        assert!(value.get("stats").is_none());

        let decoded: ServerMessage = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_game_end_encoding() {
        let msg = ServerMessage::GameEnd {
            game_id: "g1".to_string(),
            winner: Winner::Black,
            game_end_reason: GameEndReason::Forfeit,
            player_votes: 3,
            stats: sample_stats(),
        };
        let value: Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "game_end");
        assert_eq!(value["winner"], "black");
        assert_eq!(value["gameEndReason"], "forfeit");
        assert_eq!(value["playerVotes"], 3);
        assert!(value["whiteTeamPlayers"].is_array());
    }

    #[test]
    fn test_ended_game_info_omits_empty_fields() {
        let info = GameInfo {
            game_id: "g1".to_string(),
            white_players: 1,
            black_players: 1,
            time_left: 15,
            current_move: 1,
            total_pot: 0.0,
            white_pot: 0.0,
            black_pot: 0.0,
            spectators: 0,
            current_turn: Team::White,
            status: GameStatus::Active,
            winner: None,
            end_reason: None,
            created_at: 1_700_000_000,
            ended_at: None,
            board: vec![],
            white_team_players: vec![],
            black_team_players: vec![],
        };
        let value: Value = serde_json::to_value(&info).unwrap();

        assert_eq!(value["status"], "active");
        assert!(value.get("winner").is_none());
        assert!(value.get("endedAt").is_none());
        assert!(value.get("whiteTeamPlayers").is_none());
    }

    #[test]
    fn test_winner_team_mapping() {
        assert_eq!(Winner::from(Team::Black), Winner::Black);
        assert_eq!(Winner::White.team(), Some(Team::White));
        assert_eq!(Winner::Draw.team(), None);
    }
}
