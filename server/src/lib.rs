//! # Quiz Game Server Library
//!
//! Authoritative server for a realtime multiplayer math quiz. Players log in
//! over UDP, gather in rooms, and race to compute modular inverses; the
//! server owns every clock and every score, and clients only ever render
//! what it broadcasts.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Sessions
//! All game state lives server-side: rooms, scores, the current question and
//! its answer, round timers, and rating updates. Clients submit answers and
//! receive events; nothing a client sends can move a timer or a score except
//! through the validated command surface.
//!
//! ### Room Lifecycle
//! A room moves from lobby through a ready check, a start countdown, a fixed
//! number of timed rounds, and a final settlement broadcast, then returns to
//! the lobby with its roster intact for a rematch. Rooms are destroyed the
//! moment their last player leaves.
//!
//! ### Ranked Play
//! A FIFO matchmaking queue pairs players into ranked rooms whose difficulty
//! and length come from the lower-rated player. Ranked games settle Elo
//! deltas against the account store when they end.
//!
//! ## Architecture Design
//!
//! The network layer runs a set of dedicated async tasks: a
//! receiver that decodes datagrams into commands, a sender that drains the
//! outgoing event queue, and a timeout checker that sweeps silent
//! connections. Commands funnel through one channel into the main loop,
//! which dispatches them into the session engine.
//!
//! Inside the engine, each room sits behind its own async mutex. Every
//! handler and every timer callback takes that lock for its whole critical
//! section, and deferred tasks carry a generation stamp they re-check under
//! the lock, so a timeout firing during an answer-triggered advance is a
//! no-op rather than a double transition.
//!
//! ## Module Organization
//!
//! - [`accounts`]: credential store and persistent ratings
//! - [`connections`]: connection identity, capacity, and timeout sweeping
//! - [`engine`]: the session state machine driving every room
//! - [`gateway`]: the event delivery seam between engine and network
//! - [`matchmaking`]: the ranked FIFO queue and match settings
//! - [`network`]: UDP socket handling and command dispatch
//! - [`question`]: prime generation and modular inverse questions
//! - [`rating`]: Elo settlement for ranked games
//! - [`registry`]: the shared room map
//! - [`room`]: per-room state and scoring rules

pub mod accounts;
pub mod connections;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod matchmaking;
pub mod network;
pub mod question;
pub mod rating;
pub mod registry;
pub mod room;
