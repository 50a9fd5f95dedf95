//! Room state and per-mode scoring rules
//!
//! A `Room` is one game session container. All of its fields are mutated
//! only while holding the room's mutex (see `registry`), which is what makes
//! the scoring and lock checks here atomic with respect to other answers in
//! the same round.

use crate::connections::ConnectionId;
use crate::question::Round;
use shared::{Difficulty, GameMode, MAX_ROOM_PLAYERS};
use std::collections::{HashMap, HashSet};

/// A joined player: connection identity plus account name, in join order.
#[derive(Debug, Clone)]
pub struct Seat {
    pub conn: ConnectionId,
    pub username: String,
}

/// How points are awarded within a round. First and Ranked games race for a
/// single point; Speed and Practice games ladder points by arrival rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringRule {
    FirstLock,
    RankLadder,
}

impl ScoringRule {
    pub fn for_mode(mode: GameMode) -> Self {
        match mode {
            GameMode::First | GameMode::Ranked => ScoringRule::FirstLock,
            GameMode::Speed | GameMode::Practice => ScoringRule::RankLadder,
        }
    }
}

#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub mode: GameMode,
    pub difficulty: Difficulty,
    pub round_count: u32,
    pub round_time_secs: u64,

    /// Join order. Used for iteration, never for ranking.
    pub seats: Vec<Seat>,
    pub ready: HashSet<String>,
    pub scores: HashMap<String, i32>,

    pub current_round: Option<Round>,
    /// 1-based; 0 means no game in progress.
    pub round_index: u32,
    pub is_started: bool,

    pub answers: HashMap<String, u64>,
    pub correct_order: Vec<String>,
    pub first_correct_locked: bool,

    /// Generation counter stamped onto every deferred task touching this
    /// room. A task whose stamp no longer matches must not act.
    pub timer_generation: u64,
}

impl Room {
    pub fn new(
        id: String,
        mode: GameMode,
        difficulty: Difficulty,
        round_time_secs: u64,
        round_count: u32,
    ) -> Self {
        Self {
            id,
            mode,
            difficulty,
            round_count,
            round_time_secs,
            seats: Vec::new(),
            ready: HashSet::new(),
            scores: HashMap::new(),
            current_round: None,
            round_index: 0,
            is_started: false,
            answers: HashMap::new(),
            correct_order: Vec::new(),
            first_correct_locked: false,
            timer_generation: 0,
        }
    }

    pub fn scoring(&self) -> ScoringRule {
        ScoringRule::for_mode(self.mode)
    }

    pub fn contains_player(&self, username: &str) -> bool {
        self.seats.iter().any(|s| s.username == username)
    }

    pub fn is_full(&self) -> bool {
        self.seats.len() >= MAX_ROOM_PLAYERS
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.seats.iter().map(|s| s.username.clone()).collect()
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.seats.iter().map(|s| s.conn).collect()
    }

    pub fn conn_of(&self, username: &str) -> Option<ConnectionId> {
        self.seats
            .iter()
            .find(|s| s.username == username)
            .map(|s| s.conn)
    }

    /// Seats a player and opens their score slot. Callers run the join
    /// validation (full/started/practice) before this.
    pub fn add_player(&mut self, conn: ConnectionId, username: &str) {
        self.seats.push(Seat {
            conn,
            username: username.to_string(),
        });
        self.scores.insert(username.to_string(), 0);
    }

    /// Removes a player and every per-player entry. Returns true when the
    /// player was actually seated.
    pub fn remove_player(&mut self, username: &str) -> bool {
        let before = self.seats.len();
        self.seats.retain(|s| s.username != username);
        if self.seats.len() == before {
            return false;
        }
        self.scores.remove(username);
        self.ready.remove(username);
        self.answers.remove(username);
        true
    }

    /// Clears per-round state ahead of a new question.
    pub fn reset_for_round(&mut self) {
        self.answers.clear();
        self.correct_order.clear();
        self.first_correct_locked = false;
    }

    /// Marks the start of a game: fresh scores, round 1, answers wiped.
    pub fn start_game(&mut self) {
        self.is_started = true;
        self.round_index = 1;
        self.answers.clear();
        for score in self.scores.values_mut() {
            *score = 0;
        }
    }

    /// Closes the current round and invalidates any pending timer for it.
    /// Returns the new generation so the caller can stamp its follow-up task.
    pub fn close_round(&mut self) -> u64 {
        self.round_index += 1;
        self.current_round = None;
        self.timer_generation += 1;
        self.timer_generation
    }

    /// Back to lobby after a game, roster intact for a rematch.
    pub fn reset_to_lobby(&mut self) {
        self.is_started = false;
        self.ready.clear();
        self.current_round = None;
        self.round_index = 0;
        self.timer_generation += 1;
    }

    /// Awards points for a correct answer under this room's scoring rule.
    /// Returns 0 when a First-style round is already locked; the caller
    /// rejects those submissions before recording, so that path only guards
    /// against misuse.
    pub fn score_correct_answer(&mut self, username: &str) -> i32 {
        let points = match self.scoring() {
            ScoringRule::FirstLock => {
                if self.first_correct_locked {
                    0
                } else {
                    self.first_correct_locked = true;
                    1
                }
            }
            ScoringRule::RankLadder => {
                let rank = self.correct_order.len() as i32;
                self.correct_order.push(username.to_string());
                (3 - rank).max(1)
            }
        };
        if points > 0 {
            *self.scores.entry(username.to_string()).or_insert(0) += points;
        }
        points
    }

    /// Whether the round should advance without waiting for the timer:
    /// a First-style lock-in, or everyone having answered.
    pub fn advance_condition_met(&self) -> bool {
        if self.scoring() == ScoringRule::FirstLock && self.first_correct_locked {
            return true;
        }
        !self.seats.is_empty() && self.answers.len() == self.seats.len()
    }

    /// Final standings: highest score plus everyone who shares it.
    pub fn top_scorers(&self) -> (i32, Vec<String>) {
        let max_score = self.scores.values().copied().max().unwrap_or(0);
        let tied: Vec<String> = self
            .seats
            .iter()
            .filter(|s| self.scores.get(&s.username).copied().unwrap_or(0) == max_score)
            .map(|s| s.username.clone())
            .collect();
        (max_score, tied)
    }
}
