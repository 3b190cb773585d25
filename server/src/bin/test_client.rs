//! Bot client that matchmakes and plays the first legal move on its turn.
//! Run two of them against a local server to watch a full game.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use server::utils::random_wallet;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080".to_string());
    let wallet = random_wallet();

    println!("Connecting to {} as {}", url, wallet);
    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = socket.split();

    let join = json!({"type": "join_matchmaking", "walletAddress": wallet});
    sink.send(Message::text(join.to_string())).await?;

    let mut game_id = String::new();
    let mut side = String::new();
    let mut turn = "white".to_string();

    while let Some(frame) = stream.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let message: Value = match serde_json::from_str(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                println!("Unreadable message: {}", e);
                continue;
            }
        };

        match message["type"].as_str().unwrap_or_default() {
            "match_found" => {
                game_id = message["gameId"].as_str().unwrap_or_default().to_string();
                side = message["assignedSide"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                println!("Matched into {} as {}", game_id, side);
            }
            "move_result" => {
                println!(
                    "Move {}: {}",
                    message["currentMove"], message["move"]
                );
                turn = message["currentTurn"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
            }
            "valid_moves_response" => {
                if let Some(mv) = message["validMoves"].get(0).and_then(Value::as_str) {
                    let vote = json!({
                        "type": "vote_move",
                        "gameId": game_id,
                        "move": mv,
                        "playerId": wallet,
                    });
                    println!("Voting for {}", mv);
                    sink.send(Message::text(vote.to_string())).await?;
                }
                continue;
            }
            "game_end" => {
                println!(
                    "Game over: {} by {} (my votes: {})",
                    message["winner"], message["gameEndReason"], message["playerVotes"]
                );
                break;
            }
            "error" => {
                println!("Server error: {}", message["error"]);
                continue;
            }
            _ => continue,
        }

        if !game_id.is_empty() && turn == side {
            let request = json!({"type": "get_valid_moves", "gameId": game_id});
            sink.send(Message::text(request.to_string())).await?;
        }
    }

    println!("Test client finished");
    Ok(())
}
