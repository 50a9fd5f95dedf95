use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const MAX_ROOM_PLAYERS: usize = 10;
pub const DEFAULT_RATING: i32 = 1500;
pub const GAME_START_COUNTDOWN_SECS: u64 = 5;
pub const NEXT_QUESTION_COUNTDOWN_SECS: u64 = 3;
pub const RESULT_REVEAL_SECS: u64 = 3;
pub const RANKED_ROUND_TIME_SECS: u64 = 30;

/// Difficulty tier controlling the size of the prime modulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Exclusive upper bound for the prime modulus of a question.
    pub fn prime_bound(&self) -> u64 {
        match self {
            Difficulty::Easy => 50,
            Difficulty::Medium => 100,
            Difficulty::Hard => 200,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

/// How a room arbitrates answers and whether it touches persisted ratings.
///
/// Ranked rooms play with First-style arbitration but additionally apply
/// Elo deltas when the game ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    /// Only the first correct answer in a round scores.
    First,
    /// Every correct answer scores, weighted by arrival rank.
    Speed,
    /// Solo room, rank-weighted scoring with no opponents.
    Practice,
    /// Skill-matched First-style game that updates ratings.
    Ranked,
}

impl GameMode {
    /// Minimum player count required before the ready check can start a game.
    pub fn min_players(&self) -> usize {
        match self {
            GameMode::Practice => 1,
            _ => 2,
        }
    }

    /// Practice rooms never admit a second player.
    pub fn single_occupant(&self) -> bool {
        matches!(self, GameMode::Practice)
    }

    pub fn is_ranked(&self) -> bool {
        matches!(self, GameMode::Ranked)
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameMode::First => write!(f, "first"),
            GameMode::Speed => write!(f, "speed"),
            GameMode::Practice => write!(f, "practice"),
            GameMode::Ranked => write!(f, "ranked"),
        }
    }
}

/// Structured rejection codes returned to the initiating client. None of
/// these terminate the room or the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    RoomNotFound,
    RoomExists,
    RoomFull,
    RoomAlreadyStarted,
    PracticeRoomClosed,
    AnswerWindowClosed,
    InvalidInput,
    NotEnoughPlayers,
    GameAlreadyStarted,
    NotReady,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::RoomNotFound => "room not found",
            RejectReason::RoomExists => "room id already in use",
            RejectReason::RoomFull => "room is full",
            RejectReason::RoomAlreadyStarted => "game already started, cannot join",
            RejectReason::PracticeRoomClosed => "practice rooms are single player",
            RejectReason::AnswerWindowClosed => "a player already took this round",
            RejectReason::InvalidInput => "answer must be a non-negative integer",
            RejectReason::NotEnoughPlayers => "not enough players to start",
            RejectReason::GameAlreadyStarted => "game already started",
            RejectReason::NotReady => "not ready, nothing to cancel",
        };
        write!(f, "{}", text)
    }
}

/// Matchmaking queue status reported to a ranked player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Waiting,
    Matched {
        room_id: String,
        opponent: String,
        difficulty: Difficulty,
        round_count: u32,
    },
    NotInQueue,
    Canceled,
}

/// Commands sent from a client connection to the server.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ClientCommand {
    Login {
        username: String,
        password: String,
    },
    CreateRoom {
        room_id: Option<String>,
        difficulty: Difficulty,
        mode: GameMode,
        round_time_secs: u64,
        round_count: u32,
    },
    JoinRoom {
        room_id: String,
    },
    LeaveRoom,
    Ready,
    CancelReady,
    SubmitAnswer {
        answer: String,
    },
    JoinRankedQueue,
    CancelRankedQueue,
    CheckMatchStatus,
    ResetRankedMatch,
    Disconnect,
}

/// Events emitted by the server, either to one connection or to a whole room.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ServerEvent {
    LoggedIn {
        username: String,
        rating: i32,
    },
    LoginRejected,
    RoomCreated {
        room_id: String,
    },
    RoomJoined {
        room_id: String,
    },
    LeftRoom,
    UserJoined {
        username: String,
    },
    UserLeft {
        username: String,
    },
    RoomStatus {
        players: Vec<String>,
        scores: HashMap<String, i32>,
        ready: Vec<String>,
        game_started: bool,
        ratings: HashMap<String, i32>,
        mode: GameMode,
    },
    PlayerReadyStatus {
        username: String,
        ready_count: usize,
        total_players: usize,
        canceled: bool,
    },
    NotEnoughPlayers {
        min_players: usize,
        current_players: usize,
        mode: GameMode,
    },
    CancelReadyResponse {
        success: bool,
        reason: Option<RejectReason>,
    },
    GameCountdown {
        countdown: u64,
    },
    GameStarted {
        mode: GameMode,
    },
    /// The answer value is never part of this event.
    NewQuestion {
        round_index: u32,
        round_count: u32,
        p: u64,
        a: u64,
        mode: GameMode,
        round_time_secs: u64,
    },
    NextQuestionCountdown {
        countdown: u64,
    },
    PlayerAnswered {
        username: String,
    },
    AnswerResult {
        correct: bool,
        points: i32,
        time_taken_secs: f64,
        correct_answer: u64,
    },
    SomeoneAnsweredCorrectly {
        username: String,
        mode: GameMode,
        stop_timer: bool,
    },
    SomeoneAnsweredIncorrectly {
        username: String,
        mode: GameMode,
    },
    UpdateScores {
        scores: HashMap<String, i32>,
    },
    TimeUp {
        correct_answer: u64,
    },
    GameOver {
        tie: bool,
        winner: Option<String>,
        tied_players: Vec<String>,
        scores: HashMap<String, i32>,
        is_ranked: bool,
        old_ratings: HashMap<String, i32>,
        rating_changes: HashMap<String, i32>,
    },
    AnswerRejected {
        reason: RejectReason,
    },
    CommandRejected {
        reason: RejectReason,
    },
    QueueStatus {
        status: MatchStatus,
    },
}
