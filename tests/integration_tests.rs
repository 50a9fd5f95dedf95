//! Integration tests for the quiz game session engine
//!
//! These tests drive whole games through the engine with a recording gateway
//! and collapsed countdowns, validating the event flow a real client sees.

use server::accounts::AccountStore;
use server::connections::ConnectionId;
use server::engine::{EngineConfig, SessionEngine};
use server::gateway::RecordingGateway;
use shared::{ClientCommand, Difficulty, GameMode, MatchStatus, ServerEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const ALICE: ConnectionId = ConnectionId(1);
const BOB: ConnectionId = ConnectionId(2);

/// Engine with all countdowns collapsed and alice/bob logged in.
async fn start_engine() -> (Arc<SessionEngine>, Arc<RecordingGateway>, Arc<AccountStore>) {
    let accounts = Arc::new(AccountStore::new());
    accounts.register("alice", "pw").await;
    accounts.register("bob", "pw").await;
    let gateway = Arc::new(RecordingGateway::new());
    let engine = SessionEngine::new(accounts.clone(), gateway.clone(), EngineConfig::immediate());
    engine.bind_session(ALICE, "alice").await;
    engine.bind_session(BOB, "bob").await;
    (engine, gateway, accounts)
}

/// Lets the engine's zero-delay deferred tasks run.
async fn settle() {
    sleep(Duration::from_millis(100)).await;
}

fn inverse(a: u64, p: u64) -> u64 {
    (1..p)
        .find(|x| (a * x) % p == 1)
        .expect("question must have an inverse")
}

/// The question broadcast for round `index` (1-based), once it exists.
fn question(gateway: &RecordingGateway, index: u32) -> Option<(u64, u64)> {
    gateway.events().iter().find_map(|e| match e {
        ServerEvent::NewQuestion {
            round_index, p, a, ..
        } if *round_index == index => Some((*p, *a)),
        _ => None,
    })
}

fn game_over(gateway: &RecordingGateway) -> Option<ServerEvent> {
    gateway
        .events()
        .into_iter()
        .find(|e| matches!(e, ServerEvent::GameOver { .. }))
}

async fn create_duo_room(engine: &Arc<SessionEngine>, mode: GameMode, rounds: u32) {
    engine
        .create_room(ALICE, Some("duo".to_string()), Difficulty::Easy, mode, 30, rounds)
        .await;
    engine.join_room(BOB, "duo").await;
}

/// FULL GAME FLOW TESTS
mod game_flow_tests {
    use super::*;

    /// Two-player First-mode game played to completion: alice takes every
    /// round, wins 2-0, and the room returns to the lobby.
    #[tokio::test]
    async fn first_mode_game_to_completion() {
        let (engine, gateway, _) = start_engine().await;
        create_duo_room(&engine, GameMode::First, 2).await;

        engine.ready(ALICE).await;
        engine.ready(BOB).await;
        settle().await;

        assert!(gateway
            .events()
            .iter()
            .any(|e| matches!(e, ServerEvent::GameStarted { .. })));

        for round in 1..=2u32 {
            let (p, a) = question(&gateway, round).expect("question should be live");
            engine.submit_answer(ALICE, &inverse(a, p).to_string()).await;
            settle().await;
        }

        match game_over(&gateway).expect("game should settle") {
            ServerEvent::GameOver {
                tie,
                winner,
                scores,
                is_ranked,
                ..
            } => {
                assert!(!tie);
                assert_eq!(winner.as_deref(), Some("alice"));
                assert_eq!(scores["alice"], 2);
                assert_eq!(scores["bob"], 0);
                assert!(!is_ranked);
            }
            _ => unreachable!(),
        }

        // Back in the lobby with the roster intact.
        let room = engine.registry().get("duo").await.unwrap();
        let room = room.lock().await;
        assert!(!room.is_started);
        assert_eq!(room.round_index, 0);
        assert!(room.ready.is_empty());
        assert_eq!(room.seats.len(), 2);
    }

    /// Speed mode scores by arrival rank and only advances once everyone
    /// has answered.
    #[tokio::test]
    async fn speed_mode_rank_scoring() {
        let (engine, gateway, _) = start_engine().await;
        create_duo_room(&engine, GameMode::Speed, 1).await;

        engine.ready(ALICE).await;
        engine.ready(BOB).await;
        settle().await;

        let (p, a) = question(&gateway, 1).expect("question should be live");
        let answer = inverse(a, p).to_string();

        engine.submit_answer(ALICE, &answer).await;
        settle().await;
        // One answer in a two-seat speed room does not end the round.
        assert!(game_over(&gateway).is_none());

        engine.submit_answer(BOB, &answer).await;
        settle().await;

        match game_over(&gateway).expect("game should settle") {
            ServerEvent::GameOver { winner, scores, .. } => {
                assert_eq!(winner.as_deref(), Some("alice"));
                assert_eq!(scores["alice"], 3);
                assert_eq!(scores["bob"], 2);
            }
            _ => unreachable!(),
        }
    }

    /// A 1-1 split across two First rounds ends in a tie with no winner.
    #[tokio::test]
    async fn split_rounds_end_in_tie() {
        let (engine, gateway, _) = start_engine().await;
        create_duo_room(&engine, GameMode::First, 2).await;

        engine.ready(ALICE).await;
        engine.ready(BOB).await;
        settle().await;

        let (p, a) = question(&gateway, 1).expect("round 1 question");
        engine.submit_answer(ALICE, &inverse(a, p).to_string()).await;
        settle().await;

        let (p, a) = question(&gateway, 2).expect("round 2 question");
        engine.submit_answer(BOB, &inverse(a, p).to_string()).await;
        settle().await;

        match game_over(&gateway).expect("game should settle") {
            ServerEvent::GameOver {
                tie,
                winner,
                tied_players,
                ..
            } => {
                assert!(tie);
                assert!(winner.is_none());
                assert_eq!(tied_players.len(), 2);
                assert!(tied_players.contains(&"alice".to_string()));
                assert!(tied_players.contains(&"bob".to_string()));
            }
            _ => unreachable!(),
        }
    }

    /// A wrong answer scores nothing and leaves the round open for the
    /// other player.
    #[tokio::test]
    async fn wrong_answer_scores_nothing() {
        let (engine, gateway, _) = start_engine().await;
        create_duo_room(&engine, GameMode::First, 1).await;

        engine.ready(ALICE).await;
        engine.ready(BOB).await;
        settle().await;

        let (p, a) = question(&gateway, 1).expect("question should be live");
        let correct = inverse(a, p);
        let wrong = if correct == p - 1 { 1 } else { correct + 1 };

        engine.submit_answer(ALICE, &wrong.to_string()).await;
        settle().await;
        assert!(game_over(&gateway).is_none());

        engine.submit_answer(BOB, &correct.to_string()).await;
        settle().await;

        match game_over(&gateway).expect("game should settle") {
            ServerEvent::GameOver { winner, scores, .. } => {
                assert_eq!(winner.as_deref(), Some("bob"));
                assert_eq!(scores["alice"], 0);
                assert_eq!(scores["bob"], 1);
            }
            _ => unreachable!(),
        }
    }

    /// The per-answer result carries a near-zero response time here since
    /// the answer lands right after the question.
    #[tokio::test]
    async fn answer_result_reports_elapsed_time() {
        use assert_approx_eq::assert_approx_eq;

        let (engine, gateway, _) = start_engine().await;
        create_duo_room(&engine, GameMode::First, 1).await;
        engine.ready(ALICE).await;
        engine.ready(BOB).await;
        settle().await;

        let (p, a) = question(&gateway, 1).expect("question should be live");
        engine.submit_answer(ALICE, &inverse(a, p).to_string()).await;

        let result = gateway
            .events_for(ALICE)
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::AnswerResult {
                    correct,
                    points,
                    time_taken_secs,
                    ..
                } => Some((correct, points, time_taken_secs)),
                _ => None,
            })
            .expect("answer result should be delivered");

        assert!(result.0);
        assert_eq!(result.1, 1);
        assert_approx_eq!(result.2, 0.0, 0.5);
    }

    /// After a game settles, the same room can ready up and play again.
    #[tokio::test]
    async fn rematch_in_same_room() {
        let (engine, gateway, _) = start_engine().await;
        create_duo_room(&engine, GameMode::First, 1).await;

        for _ in 0..2 {
            engine.ready(ALICE).await;
            engine.ready(BOB).await;
            settle().await;

            let latest = gateway
                .events()
                .iter()
                .rev()
                .find_map(|e| match e {
                    ServerEvent::NewQuestion { p, a, .. } => Some((*p, *a)),
                    _ => None,
                })
                .expect("question should be live");
            engine
                .submit_answer(ALICE, &inverse(latest.1, latest.0).to_string())
                .await;
            settle().await;
        }

        let game_overs = gateway
            .events()
            .iter()
            .filter(|e| matches!(e, ServerEvent::GameOver { .. }))
            .count();
        assert_eq!(game_overs, 2);
    }
}

/// RANKED PLAY TESTS
mod ranked_tests {
    use super::*;

    /// Two queued players get matched, play a full ranked game, and the
    /// winner takes 16 points off the loser at even ratings.
    #[tokio::test]
    async fn ranked_match_settles_ratings() {
        let (engine, gateway, accounts) = start_engine().await;

        engine.join_ranked_queue(ALICE).await;
        engine.join_ranked_queue(BOB).await;
        settle().await;

        let room_id = gateway
            .events_for(ALICE)
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::QueueStatus {
                    status: MatchStatus::Matched { room_id, .. },
                } => Some(room_id),
                _ => None,
            })
            .expect("alice should be matched");

        // Even 1500s play a short easy match.
        {
            let room = engine.registry().get(&room_id).await.unwrap();
            let room = room.lock().await;
            assert_eq!(room.mode, GameMode::Ranked);
            assert_eq!(room.difficulty, Difficulty::Easy);
            assert_eq!(room.round_count, 3);
        }

        engine.ready(ALICE).await;
        engine.ready(BOB).await;
        settle().await;

        for round in 1..=3u32 {
            let (p, a) = question(&gateway, round).expect("question should be live");
            engine.submit_answer(ALICE, &inverse(a, p).to_string()).await;
            settle().await;
        }

        match game_over(&gateway).expect("game should settle") {
            ServerEvent::GameOver {
                is_ranked,
                winner,
                old_ratings,
                rating_changes,
                ..
            } => {
                assert!(is_ranked);
                assert_eq!(winner.as_deref(), Some("alice"));
                assert_eq!(old_ratings["alice"], 1500);
                assert_eq!(rating_changes["alice"], 16);
                assert_eq!(rating_changes["bob"], -16);
            }
            _ => unreachable!(),
        }

        assert_eq!(accounts.rating("alice").await, 1516);
        assert_eq!(accounts.rating("bob").await, 1484);
    }

    /// Leaving the queue before a match means the next joiner waits.
    #[tokio::test]
    async fn canceled_player_is_not_matched() {
        let (engine, gateway, _) = start_engine().await;

        engine.join_ranked_queue(ALICE).await;
        engine.cancel_ranked_queue(ALICE).await;
        gateway.clear();

        engine.join_ranked_queue(BOB).await;
        assert!(gateway.events_for(BOB).iter().any(|e| matches!(
            e,
            ServerEvent::QueueStatus {
                status: MatchStatus::Waiting
            }
        )));

        engine.check_match_status(BOB).await;
        assert!(gateway.events_for(BOB).iter().any(|e| matches!(
            e,
            ServerEvent::QueueStatus {
                status: MatchStatus::Waiting
            }
        )));
    }
}

/// SERVER-DRIVEN TIMING TESTS
mod timing_tests {
    use super::*;

    /// An unanswered round times out on the server clock: TimeUp carries the
    /// answer, and a one-round game settles right after.
    #[tokio::test]
    async fn unanswered_round_times_out() {
        let accounts = Arc::new(AccountStore::new());
        accounts.register("alice", "pw").await;
        let gateway = Arc::new(RecordingGateway::new());
        let engine = SessionEngine::new(accounts, gateway.clone(), EngineConfig::immediate());
        engine.bind_session(ALICE, "alice").await;

        engine
            .create_room(
                ALICE,
                Some("solo".to_string()),
                Difficulty::Easy,
                GameMode::Practice,
                1, // 1 second round
                1,
            )
            .await;
        engine.ready(ALICE).await;
        settle().await;

        let (p, a) = question(&gateway, 1).expect("question should be live");
        let expected = inverse(a, p);

        sleep(Duration::from_millis(1500)).await;

        let time_up = gateway.events().into_iter().find_map(|e| match e {
            ServerEvent::TimeUp { correct_answer } => Some(correct_answer),
            _ => None,
        });
        assert_eq!(time_up, Some(expected));
        assert!(game_over(&gateway).is_some());
    }

    /// An answer landing before the timeout wins the race: the stale timer
    /// never emits a TimeUp for that round.
    #[tokio::test]
    async fn answer_preempts_round_timer() {
        let (engine, gateway, _) = start_engine().await;
        engine
            .create_room(
                ALICE,
                Some("fast".to_string()),
                Difficulty::Easy,
                GameMode::First,
                1,
                1,
            )
            .await;
        engine.join_room(BOB, "fast").await;
        engine.ready(ALICE).await;
        engine.ready(BOB).await;
        settle().await;

        let (p, a) = question(&gateway, 1).expect("question should be live");
        engine.submit_answer(ALICE, &inverse(a, p).to_string()).await;

        // Outlive the 1-second round timer.
        sleep(Duration::from_millis(1500)).await;

        assert!(!gateway
            .events()
            .iter()
            .any(|e| matches!(e, ServerEvent::TimeUp { .. })));
        assert!(game_over(&gateway).is_some());
    }
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;
    use bincode::{deserialize, serialize};
    use tokio::net::UdpSocket;

    /// A command survives a trip through a real UDP socket.
    #[tokio::test]
    async fn command_over_udp_socket() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let command = ClientCommand::SubmitAnswer {
            answer: "17".to_string(),
        };
        sender
            .send_to(&serialize(&command).unwrap(), receiver_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        match deserialize::<ClientCommand>(&buf[0..len]).unwrap() {
            ClientCommand::SubmitAnswer { answer } => assert_eq!(answer, "17"),
            _ => panic!("wrong command after the wire"),
        }
    }

    /// Every broadcast event stays under the receive buffer size, even a
    /// full-room status with scores and ratings.
    #[tokio::test]
    async fn full_room_status_fits_receive_buffer() {
        let mut scores = HashMap::new();
        let mut ratings = HashMap::new();
        let players: Vec<String> = (0..10).map(|i| format!("player_{}", i)).collect();
        for p in &players {
            scores.insert(p.clone(), 42);
            ratings.insert(p.clone(), 1500);
        }

        let event = ServerEvent::RoomStatus {
            players: players.clone(),
            scores,
            ready: players,
            game_started: false,
            ratings,
            mode: GameMode::Speed,
        };
        let bytes = serialize(&event).unwrap();
        assert!(bytes.len() < 2048);
    }
}
