//! Ranked matchmaking queue
//!
//! A plain FIFO of waiting players. Joining and pairing happen inside one
//! lock acquisition, so two concurrent joiners can never both pop the same
//! opponent.

use crate::connections::ConnectionId;
use shared::Difficulty;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub username: String,
    pub conn: ConnectionId,
}

/// Outcome of a queue join: either still waiting, or paired with the player
/// who was at the head of the line.
#[derive(Debug)]
pub enum JoinOutcome {
    Waiting,
    AlreadyQueued,
    Matched(QueueEntry, QueueEntry),
}

#[derive(Default)]
pub struct RankedQueue {
    waiting: Mutex<Vec<QueueEntry>>,
}

impl RankedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a player and immediately pairs the two oldest entries when
    /// possible. Push and pop run under the same lock.
    pub fn join(&self, entry: QueueEntry) -> JoinOutcome {
        let mut waiting = self.waiting.lock().expect("ranked queue poisoned");
        if waiting.iter().any(|e| e.username == entry.username) {
            return JoinOutcome::AlreadyQueued;
        }
        waiting.push(entry);
        if waiting.len() >= 2 {
            let first = waiting.remove(0);
            let second = waiting.remove(0);
            JoinOutcome::Matched(first, second)
        } else {
            JoinOutcome::Waiting
        }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.waiting
            .lock()
            .expect("ranked queue poisoned")
            .iter()
            .any(|e| e.username == username)
    }

    /// Removes a player from the queue. Returns true when they were waiting.
    pub fn remove(&self, username: &str) -> bool {
        let mut waiting = self.waiting.lock().expect("ranked queue poisoned");
        let before = waiting.len();
        waiting.retain(|e| e.username != username);
        waiting.len() != before
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().expect("ranked queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Difficulty tier and round count for a ranked match, chosen from the
/// lower-rated player so the weaker side gets a playable game.
pub fn ranked_settings(lower_rating: i32) -> (Difficulty, u32) {
    match lower_rating {
        r if r < 1600 => (Difficulty::Easy, 3),
        r if r < 1900 => (Difficulty::Medium, 7),
        _ => (Difficulty::Hard, 15),
    }
}
