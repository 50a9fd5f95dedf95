//! Room session engine: the state machine driving every game room
//!
//! One room moves through lobby -> countdown -> rounds -> game over -> lobby.
//! Every transition (join, ready, answer, timer callback, leave) locks the
//! room's mutex for its whole critical section, which is what serializes
//! answer arbitration and makes the timer staleness check sound: a deferred
//! task only acts if the room still exists and its generation stamp still
//! matches, so an answer-triggered advance and a timeout can never both fire
//! for the same round.
//!
//! Long waits (pre-game countdown, between-round countdown, result reveal,
//! the round timer itself) are spawned tasks that sleep without holding any
//! lock and re-validate on wake.

use crate::accounts::AccountStore;
use crate::connections::ConnectionId;
use crate::error::ServerError;
use crate::gateway::Gateway;
use crate::matchmaking::{ranked_settings, JoinOutcome, QueueEntry, RankedQueue};
use crate::question;
use crate::registry::RoomRegistry;
use crate::room::{Room, ScoringRule};
use log::{error, info, warn};
use shared::{
    Difficulty, GameMode, MatchStatus, RejectReason, ServerEvent, GAME_START_COUNTDOWN_SECS,
    NEXT_QUESTION_COUNTDOWN_SECS, RANKED_ROUND_TIME_SECS, RESULT_REVEAL_SECS,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

/// Delay configuration for the engine's deferred transitions. Production
/// uses the defaults; tests shrink them so rounds settle in milliseconds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wait between "all ready" and the first question.
    pub start_countdown: Duration,
    /// Wait between the reveal and the next question (round 2 onward).
    pub between_rounds: Duration,
    /// How long answer results stay on screen before the round advances.
    pub result_reveal: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_countdown: Duration::from_secs(GAME_START_COUNTDOWN_SECS),
            between_rounds: Duration::from_secs(NEXT_QUESTION_COUNTDOWN_SECS),
            result_reveal: Duration::from_secs(RESULT_REVEAL_SECS),
        }
    }
}

impl EngineConfig {
    /// All delays collapsed to zero, for tests.
    pub fn immediate() -> Self {
        Self {
            start_countdown: Duration::ZERO,
            between_rounds: Duration::ZERO,
            result_reveal: Duration::ZERO,
        }
    }
}

/// The binding from a connection to its player and (optionally) room.
#[derive(Debug, Clone)]
struct SessionBinding {
    username: String,
    room_id: Option<String>,
}

pub struct SessionEngine {
    registry: RoomRegistry,
    accounts: Arc<AccountStore>,
    gateway: Arc<dyn Gateway>,
    queue: RankedQueue,
    config: EngineConfig,
    sessions: RwLock<HashMap<ConnectionId, SessionBinding>>,
    /// Self-handle for the deferred tasks this engine spawns.
    myself: Weak<SessionEngine>,
}

impl SessionEngine {
    pub fn new(
        accounts: Arc<AccountStore>,
        gateway: Arc<dyn Gateway>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            registry: RoomRegistry::new(),
            accounts,
            gateway,
            queue: RankedQueue::new(),
            config,
            sessions: RwLock::new(HashMap::new()),
            myself: me.clone(),
        })
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Binds a freshly authenticated connection to its player identity.
    pub async fn bind_session(&self, conn: ConnectionId, username: &str) {
        self.sessions.write().await.insert(
            conn,
            SessionBinding {
                username: username.to_string(),
                room_id: None,
            },
        );
    }

    async fn session(&self, conn: ConnectionId) -> Option<SessionBinding> {
        self.sessions.read().await.get(&conn).cloned()
    }

    async fn set_session_room(&self, conn: ConnectionId, room_id: Option<String>) {
        if let Some(binding) = self.sessions.write().await.get_mut(&conn) {
            binding.room_id = room_id;
        }
    }

    // =========================================================================
    // Room lifecycle
    // =========================================================================

    pub async fn create_room(
        &self,
        conn: ConnectionId,
        room_id: Option<String>,
        difficulty: Difficulty,
        mode: GameMode,
        round_time_secs: u64,
        round_count: u32,
    ) {
        let Some(session) = self.session(conn).await else {
            return;
        };
        if round_time_secs == 0 || round_count == 0 {
            self.reject(conn, RejectReason::InvalidInput);
            return;
        }
        // A player can only be in one room at a time.
        if session.room_id.is_some() {
            self.leave_room(conn).await;
        }

        let id = match room_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                if self.registry.contains(&id).await {
                    self.reject(conn, RejectReason::RoomExists);
                    return;
                }
                id
            }
            None => self.registry.generate_room_id().await,
        };

        let mut room = Room::new(id.clone(), mode, difficulty, round_time_secs, round_count);
        room.add_player(conn, &session.username);
        if !self.registry.insert(room).await {
            // Lost a create race on the same id.
            self.reject(conn, RejectReason::RoomExists);
            return;
        }

        self.set_session_room(conn, Some(id.clone())).await;
        self.gateway
            .unicast(conn, ServerEvent::RoomCreated { room_id: id.clone() });

        if let Some(room_arc) = self.registry.get(&id).await {
            let room = room_arc.lock().await;
            self.broadcast_room_status(&room).await;
        }
    }

    pub async fn join_room(&self, conn: ConnectionId, room_id: &str) {
        let Some(session) = self.session(conn).await else {
            return;
        };

        let Some(room_arc) = self.registry.get(room_id).await else {
            self.reject(conn, RejectReason::RoomNotFound);
            return;
        };

        let mut room = room_arc.lock().await;
        if room.is_started {
            self.reject(conn, RejectReason::RoomAlreadyStarted);
            return;
        }
        if room.mode.single_occupant() && !room.is_empty() {
            self.reject(conn, RejectReason::PracticeRoomClosed);
            return;
        }
        if room.is_full() {
            self.reject(conn, RejectReason::RoomFull);
            return;
        }

        room.add_player(conn, &session.username);
        self.set_session_room(conn, Some(room_id.to_string())).await;
        info!("{} joined room {}", session.username, room_id);

        self.gateway.unicast(
            conn,
            ServerEvent::RoomJoined {
                room_id: room_id.to_string(),
            },
        );
        self.gateway.broadcast(
            &room.connections(),
            None,
            ServerEvent::UserJoined {
                username: session.username.clone(),
            },
        );
        self.broadcast_room_status(&room).await;
    }

    pub async fn leave_room(&self, conn: ConnectionId) {
        let Some(session) = self.session(conn).await else {
            return;
        };
        let Some(room_id) = session.room_id else {
            return;
        };
        self.set_session_room(conn, None).await;

        let Some(room_arc) = self.registry.get(&room_id).await else {
            return;
        };

        let now_empty = {
            let mut room = room_arc.lock().await;
            if !room.remove_player(&session.username) {
                return;
            }
            info!("{} left room {}", session.username, room_id);
            self.gateway.unicast(conn, ServerEvent::LeftRoom);

            if room.is_empty() {
                true
            } else {
                self.gateway.broadcast(
                    &room.connections(),
                    None,
                    ServerEvent::UserLeft {
                        username: session.username.clone(),
                    },
                );
                self.broadcast_room_status(&room).await;
                false
            }
        };

        // A room with zero players is destroyed immediately; stale timers
        // for it miss their registry lookup and fall through.
        if now_empty {
            self.registry.remove(&room_id).await;
        }
    }

    /// Connection dropped: leave whatever room the player was in, clear any
    /// matchmaking entry, and forget the session binding.
    pub async fn disconnect(&self, conn: ConnectionId) {
        if let Some(session) = self.session(conn).await {
            self.queue.remove(&session.username);
        }
        self.leave_room(conn).await;
        self.sessions.write().await.remove(&conn);
    }

    // =========================================================================
    // Ready check
    // =========================================================================

    pub async fn ready(&self, conn: ConnectionId) {
        let Some((session, room_arc)) = self.session_room(conn).await else {
            return;
        };
        let mut room = room_arc.lock().await;
        if room.is_started {
            return;
        }

        room.ready.insert(session.username.clone());

        let all_ready = room.ready.len() == room.seats.len();
        let enough = room.seats.len() >= room.mode.min_players();

        if all_ready && enough {
            self.gateway.broadcast(
                &room.connections(),
                None,
                ServerEvent::PlayerReadyStatus {
                    username: session.username.clone(),
                    ready_count: room.ready.len(),
                    total_players: room.seats.len(),
                    canceled: false,
                },
            );
            room.start_game();
            room.timer_generation += 1;
            let generation = room.timer_generation;
            let room_id = room.id.clone();
            info!("Room {} starting a {} game", room_id, room.mode);

            self.gateway.broadcast(
                &room.connections(),
                None,
                ServerEvent::GameCountdown {
                    countdown: self.config.start_countdown.as_secs(),
                },
            );
            drop(room);
            self.spawn_game_start(room_id, generation);
        } else if all_ready && !enough {
            self.gateway.broadcast(
                &room.connections(),
                None,
                ServerEvent::NotEnoughPlayers {
                    min_players: room.mode.min_players(),
                    current_players: room.seats.len(),
                    mode: room.mode,
                },
            );
        } else {
            self.gateway.broadcast(
                &room.connections(),
                None,
                ServerEvent::PlayerReadyStatus {
                    username: session.username.clone(),
                    ready_count: room.ready.len(),
                    total_players: room.seats.len(),
                    canceled: false,
                },
            );
        }
    }

    pub async fn cancel_ready(&self, conn: ConnectionId) {
        let Some((session, room_arc)) = self.session_room(conn).await else {
            return;
        };
        let mut room = room_arc.lock().await;

        if room.is_started {
            self.gateway.unicast(
                conn,
                ServerEvent::CancelReadyResponse {
                    success: false,
                    reason: Some(RejectReason::GameAlreadyStarted),
                },
            );
            return;
        }

        if room.ready.remove(&session.username) {
            self.gateway.broadcast(
                &room.connections(),
                None,
                ServerEvent::PlayerReadyStatus {
                    username: session.username.clone(),
                    ready_count: room.ready.len(),
                    total_players: room.seats.len(),
                    canceled: true,
                },
            );
            self.gateway.unicast(
                conn,
                ServerEvent::CancelReadyResponse {
                    success: true,
                    reason: None,
                },
            );
        } else {
            self.gateway.unicast(
                conn,
                ServerEvent::CancelReadyResponse {
                    success: false,
                    reason: Some(RejectReason::NotReady),
                },
            );
        }
    }

    // =========================================================================
    // Answers
    // =========================================================================

    pub async fn submit_answer(&self, conn: ConnectionId, raw: &str) {
        let Some((session, room_arc)) = self.session_room(conn).await else {
            return;
        };

        let trimmed = raw.trim();
        let valid = !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit());
        let Some(value) = valid.then(|| trimmed.parse::<u64>().ok()).flatten() else {
            self.gateway.unicast(
                conn,
                ServerEvent::AnswerRejected {
                    reason: RejectReason::InvalidInput,
                },
            );
            return;
        };

        let mut room = room_arc.lock().await;
        let username = session.username;

        // No active round: a late submission racing the reveal. Silent no-op.
        let Some(round) = room.current_round.clone() else {
            return;
        };
        // Duplicate answers are silently ignored, not an error to the caller.
        if room.answers.contains_key(&username) {
            return;
        }
        if room.scoring() == ScoringRule::FirstLock && room.first_correct_locked {
            self.gateway.unicast(
                conn,
                ServerEvent::AnswerRejected {
                    reason: RejectReason::AnswerWindowClosed,
                },
            );
            return;
        }

        // Recorded regardless of correctness; the everyone-answered advance
        // rule counts wrong answers too.
        room.answers.insert(username.clone(), value);
        let correct = value == round.answer;
        let elapsed = round.started_at.elapsed().as_secs_f64();
        let time_taken_secs = (elapsed * 100.0).round() / 100.0;

        self.gateway.broadcast(
            &room.connections(),
            Some(conn),
            ServerEvent::PlayerAnswered {
                username: username.clone(),
            },
        );

        let points = if correct {
            room.score_correct_answer(&username)
        } else {
            0
        };

        self.gateway.broadcast(
            &room.connections(),
            None,
            ServerEvent::UpdateScores {
                scores: room.scores.clone(),
            },
        );
        self.gateway.unicast(
            conn,
            ServerEvent::AnswerResult {
                correct,
                points,
                time_taken_secs,
                correct_answer: round.answer,
            },
        );

        if correct && points > 0 {
            self.gateway.broadcast(
                &room.connections(),
                None,
                ServerEvent::SomeoneAnsweredCorrectly {
                    username: username.clone(),
                    mode: room.mode,
                    // Client countdowns stop only for a First-style lock-in.
                    stop_timer: room.scoring() == ScoringRule::FirstLock,
                },
            );
        } else {
            self.gateway.broadcast(
                &room.connections(),
                None,
                ServerEvent::SomeoneAnsweredIncorrectly {
                    username: username.clone(),
                    mode: room.mode,
                },
            );
        }

        if room.advance_condition_met() {
            let generation = room.close_round();
            let room_id = room.id.clone();
            drop(room);
            self.spawn_round_schedule(room_id, generation);
        }
    }

    // =========================================================================
    // Matchmaking
    // =========================================================================

    pub async fn join_ranked_queue(&self, conn: ConnectionId) {
        let Some(session) = self.session(conn).await else {
            return;
        };

        let outcome = self.queue.join(QueueEntry {
            username: session.username.clone(),
            conn,
        });

        match outcome {
            JoinOutcome::Waiting | JoinOutcome::AlreadyQueued => {
                self.gateway.unicast(
                    conn,
                    ServerEvent::QueueStatus {
                        status: MatchStatus::Waiting,
                    },
                );
            }
            JoinOutcome::Matched(first, second) => {
                self.create_ranked_match(first, second).await;
            }
        }
    }

    async fn create_ranked_match(&self, first: QueueEntry, second: QueueEntry) {
        let rating_first = self.accounts.rating(&first.username).await;
        let rating_second = self.accounts.rating(&second.username).await;
        let (difficulty, round_count) = ranked_settings(rating_first.min(rating_second));

        let room_id = self.registry.generate_room_id().await;
        let mut room = Room::new(
            room_id.clone(),
            GameMode::Ranked,
            difficulty,
            RANKED_ROUND_TIME_SECS,
            round_count,
        );
        room.add_player(first.conn, &first.username);
        room.add_player(second.conn, &second.username);

        if !self.registry.insert(room).await {
            // Freshly generated id collided; put both back at the front of
            // their own retry by telling them to re-queue.
            warn!("Ranked room id collision on {}", room_id);
            self.gateway.unicast(
                first.conn,
                ServerEvent::QueueStatus {
                    status: MatchStatus::NotInQueue,
                },
            );
            self.gateway.unicast(
                second.conn,
                ServerEvent::QueueStatus {
                    status: MatchStatus::NotInQueue,
                },
            );
            return;
        }

        self.set_session_room(first.conn, Some(room_id.clone())).await;
        self.set_session_room(second.conn, Some(room_id.clone())).await;
        info!(
            "Ranked match: {} vs {} in room {} ({}, {} rounds)",
            first.username, second.username, room_id, difficulty, round_count
        );

        self.gateway.unicast(
            first.conn,
            ServerEvent::QueueStatus {
                status: MatchStatus::Matched {
                    room_id: room_id.clone(),
                    opponent: second.username.clone(),
                    difficulty,
                    round_count,
                },
            },
        );
        self.gateway.unicast(
            second.conn,
            ServerEvent::QueueStatus {
                status: MatchStatus::Matched {
                    room_id: room_id.clone(),
                    opponent: first.username.clone(),
                    difficulty,
                    round_count,
                },
            },
        );

        if let Some(room_arc) = self.registry.get(&room_id).await {
            let room = room_arc.lock().await;
            self.broadcast_room_status(&room).await;
        }
    }

    pub async fn cancel_ranked_queue(&self, conn: ConnectionId) {
        let Some(session) = self.session(conn).await else {
            return;
        };
        self.queue.remove(&session.username);
        self.gateway.unicast(
            conn,
            ServerEvent::QueueStatus {
                status: MatchStatus::Canceled,
            },
        );
    }

    pub async fn check_match_status(&self, conn: ConnectionId) {
        let Some(session) = self.session(conn).await else {
            return;
        };

        if let Some(room_id) = &session.room_id {
            if let Some(room_arc) = self.registry.get(room_id).await {
                let room = room_arc.lock().await;
                if room.mode.is_ranked() {
                    let opponent = room
                        .usernames()
                        .into_iter()
                        .find(|u| u != &session.username)
                        .unwrap_or_default();
                    self.gateway.unicast(
                        conn,
                        ServerEvent::QueueStatus {
                            status: MatchStatus::Matched {
                                room_id: room_id.clone(),
                                opponent,
                                difficulty: room.difficulty,
                                round_count: room.round_count,
                            },
                        },
                    );
                    return;
                }
            }
        }

        let status = if self.queue.contains(&session.username) {
            MatchStatus::Waiting
        } else {
            MatchStatus::NotInQueue
        };
        self.gateway.unicast(conn, ServerEvent::QueueStatus { status });
    }

    /// Escape hatch for a match that never got going: drop out of the
    /// ranked room (if any) and out of the queue.
    pub async fn reset_ranked_match(&self, conn: ConnectionId) {
        let Some(session) = self.session(conn).await else {
            return;
        };

        if let Some(room_id) = &session.room_id {
            if let Some(room_arc) = self.registry.get(room_id).await {
                if room_arc.lock().await.mode.is_ranked() {
                    self.leave_room(conn).await;
                }
            }
        }
        self.queue.remove(&session.username);
        self.gateway.unicast(
            conn,
            ServerEvent::QueueStatus {
                status: MatchStatus::Canceled,
            },
        );
    }

    // =========================================================================
    // Round progression (deferred tasks)
    // =========================================================================

    fn spawn_game_start(&self, room_id: String, generation: u64) {
        let Some(engine) = self.myself.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            sleep(engine.config.start_countdown).await;

            let Some(room_arc) = engine.registry.get(&room_id).await else {
                return;
            };
            let mut room = room_arc.lock().await;
            if room.timer_generation != generation {
                return;
            }

            engine.gateway.broadcast(
                &room.connections(),
                None,
                ServerEvent::GameStarted { mode: room.mode },
            );
            if let Err(e) = engine.begin_round(&room_id, &mut room).await {
                error!("Room {}: failed to begin round: {}", room_id, e);
            }
        });
    }

    /// Schedules the transition out of a settled round: result reveal,
    /// between-round countdown, then the next question (or game over). The
    /// generation stamp makes the task a no-op if anything supersedes it.
    fn spawn_round_schedule(&self, room_id: String, generation: u64) {
        let Some(engine) = self.myself.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            sleep(engine.config.result_reveal).await;

            {
                let Some(room_arc) = engine.registry.get(&room_id).await else {
                    return;
                };
                let mut room = room_arc.lock().await;
                if room.timer_generation != generation {
                    return;
                }
                if room.round_index > room.round_count {
                    engine.finish_game(&room_id, &mut room).await;
                    return;
                }
                if room.round_index > 1 {
                    engine.gateway.broadcast(
                        &room.connections(),
                        None,
                        ServerEvent::NextQuestionCountdown {
                            countdown: engine.config.between_rounds.as_secs(),
                        },
                    );
                }
            }

            sleep(engine.config.between_rounds).await;

            let Some(room_arc) = engine.registry.get(&room_id).await else {
                return;
            };
            let mut room = room_arc.lock().await;
            if room.timer_generation != generation {
                return;
            }
            if let Err(e) = engine.begin_round(&room_id, &mut room).await {
                error!("Room {}: failed to begin round: {}", room_id, e);
            }
        });
    }

    /// Starts the round at `room.round_index`, or settles the game when the
    /// index has passed the configured round count. Caller holds the lock.
    async fn begin_round(
        &self,
        room_id: &str,
        room: &mut Room,
    ) -> Result<(), ServerError> {
        if room.round_index > room.round_count {
            self.finish_game(room_id, room).await;
            return Ok(());
        }

        room.reset_for_round();
        let round = question::generate(room.difficulty)?;
        room.timer_generation += 1;
        let generation = room.timer_generation;

        self.gateway.broadcast(
            &room.connections(),
            None,
            ServerEvent::NewQuestion {
                round_index: room.round_index,
                round_count: room.round_count,
                p: round.p,
                a: round.a,
                mode: room.mode,
                round_time_secs: room.round_time_secs,
            },
        );
        info!(
            "Room {} round {}/{}: inverse of {} mod {}",
            room_id, room.round_index, room.round_count, round.a, round.p
        );
        room.current_round = Some(round);

        self.spawn_round_timer(room_id.to_string(), generation, room.round_time_secs);
        Ok(())
    }

    /// Round timeout task, tagged with the generation it was started for.
    fn spawn_round_timer(&self, room_id: String, generation: u64, time_limit_secs: u64) {
        let Some(engine) = self.myself.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            sleep(Duration::from_secs(time_limit_secs)).await;

            let Some(room_arc) = engine.registry.get(&room_id).await else {
                return;
            };
            let mut room = room_arc.lock().await;
            // Stale if an answer already advanced the round, the game was
            // settled, or the room was reset while we slept.
            if room.timer_generation != generation {
                return;
            }
            let Some(round) = &room.current_round else {
                return;
            };

            engine.gateway.broadcast(
                &room.connections(),
                None,
                ServerEvent::TimeUp {
                    correct_answer: round.answer,
                },
            );
            let next_generation = room.close_round();
            let room_id = room.id.clone();
            drop(room);
            engine.spawn_round_schedule(room_id, next_generation);
        });
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Final scoring, ranked rating settlement, broadcast, and reset back to
    /// the lobby with the roster intact. Caller holds the room lock.
    async fn finish_game(&self, room_id: &str, room: &mut Room) {
        let scores = room.scores.clone();
        let (max_score, top) = room.top_scorers();
        let tie = top.len() > 1;
        let winner = if tie { None } else { top.first().cloned() };

        let mut old_ratings = HashMap::new();
        for username in room.usernames() {
            old_ratings.insert(username.clone(), self.accounts.rating(&username).await);
        }

        let is_ranked = room.mode.is_ranked();
        let rating_changes = if is_ranked {
            crate::rating::compute_deltas(&scores, &old_ratings)
        } else {
            HashMap::new()
        };
        if is_ranked {
            self.accounts.apply_deltas(&rating_changes).await;
        }

        match &winner {
            Some(winner) => info!(
                "Room {} game over: {} wins with {} points",
                room_id, winner, max_score
            ),
            None => info!(
                "Room {} game over: tie at {} points between {:?}",
                room_id, max_score, top
            ),
        }

        self.gateway.broadcast(
            &room.connections(),
            None,
            ServerEvent::GameOver {
                tie,
                winner,
                tied_players: if tie { top } else { Vec::new() },
                scores,
                is_ranked,
                old_ratings,
                rating_changes,
            },
        );

        room.reset_to_lobby();
        self.broadcast_room_status(room).await;
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn session_room(
        &self,
        conn: ConnectionId,
    ) -> Option<(SessionBinding, crate::registry::SharedRoom)> {
        let session = self.session(conn).await?;
        let room_id = session.room_id.clone()?;
        let room = self.registry.get(&room_id).await?;
        Some((session, room))
    }

    fn reject(&self, conn: ConnectionId, reason: RejectReason) {
        self.gateway
            .unicast(conn, ServerEvent::CommandRejected { reason });
    }

    async fn broadcast_room_status(&self, room: &Room) {
        let mut ratings = HashMap::new();
        for username in room.usernames() {
            ratings.insert(username.clone(), self.accounts.rating(&username).await);
        }
        let mut ready: Vec<String> = room.ready.iter().cloned().collect();
        ready.sort();

        self.gateway.broadcast(
            &room.connections(),
            None,
            ServerEvent::RoomStatus {
                players: room.usernames(),
                scores: room.scores.clone(),
                ready,
                game_started: room.is_started,
                ratings,
                mode: room.mode,
            },
        );
    }
}
