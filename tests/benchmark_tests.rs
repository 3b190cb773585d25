//! Performance benchmarks for critical game systems

use server::board::Board;
use server::game::GameState;
use shared::{ServerMessage, Team};
use std::time::Instant;

fn wallet(i: usize) -> String {
    format!("0x{:040x}", i)
}

/// Benchmarks legal move generation from the opening position
#[test]
fn benchmark_legal_moves() {
    let board = Board::new();

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let moves = board.legal_moves();
        assert_eq!(moves.len(), 20);
    }

    let duration = start.elapsed();
    println!(
        "Legal moves: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks vote acceptance on a crowded team
#[test]
fn benchmark_vote_acceptance() {
    let players = 1_000;
    let mut game = GameState::new("bench".to_string(), 15, 10_000);
    for i in 0..players {
        game.add_player(&wallet(i), Team::White).unwrap();
    }

    let moves = ["e4", "d4", "Nf3", "c2c4", "g1h3"];
    let start = Instant::now();

    for i in 0..players {
        game.cast_vote(&wallet(i), moves[i % moves.len()], Team::White)
            .unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Vote acceptance: {} votes in {:?} ({:.2} μs/vote)",
        players,
        duration,
        duration.as_micros() as f64 / players as f64
    );

    assert_eq!(game.votes_snapshot().values().sum::<u32>(), players as u32);
    // Should accept 1000 votes in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks building and encoding the stats snapshot sent with every update
#[test]
fn benchmark_stats_broadcast_encoding() {
    let mut game = GameState::new("bench".to_string(), 15, 10_000);
    for i in 0..200 {
        let team = if i % 2 == 0 { Team::White } else { Team::Black };
        game.add_player(&wallet(i), team).unwrap();
    }
    game.cast_vote(&wallet(0), "e4", Team::White).unwrap();

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let message = ServerMessage::VoteUpdate {
            game_id: "bench".to_string(),
            votes: game.votes_snapshot(),
            stats: game.stats(),
        };
        let text = serde_json::to_string(&message).unwrap();
        assert!(!text.is_empty());
    }

    let duration = start.elapsed();
    println!(
        "Stats encoding: {} snapshots in {:?} ({:.2} μs/snapshot)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should encode 1000 snapshots in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Stress test resolving many consecutive rounds
#[test]
fn stress_test_many_rounds() {
    let mut game = GameState::new("bench".to_string(), 1, 10_000);
    game.add_player(&wallet(1), Team::White).unwrap();
    game.add_player(&wallet(2), Team::Black).unwrap();

    // Knights shuffle without repeating often enough to end the game early
    let cycle = ["Nf3", "Nf6", "Nc3", "Nc6", "Nb1", "Nb8", "Ng1", "Ng8"];
    let start = Instant::now();

    for (round, mv) in cycle.iter().cycle().take(8).enumerate() {
        let (voter, team) = if round % 2 == 0 {
            (wallet(1), Team::White)
        } else {
            (wallet(2), Team::Black)
        };
        game.cast_vote(&voter, mv, team).unwrap();
        assert!(game.tick().is_some());
    }

    let duration = start.elapsed();
    println!("Round resolution: 8 rounds in {:?}", duration);

    assert_eq!(game.current_move(), 9);
    assert!(!game.is_ended());
    assert!(duration.as_millis() < 1000);
}
