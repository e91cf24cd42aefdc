//! The real-time quiz session engine.
//!
//! One session actor per active lobby (a Tokio task that exclusively owns
//! the lobby's [`GameState`] and its timers), plus a [`SessionRegistry`] that
//! creates, looks up and tears those actors down.
//!
//! # Key types
//!
//! - [`SessionRegistry`]: `start_session`, `submit_answer`, disconnect and
//!   reconnect handling, `teardown`, `cleanup_all`
//! - [`SessionHandle`]: send commands to one running session
//! - [`GameState`] / [`PlayerState`]: the in-memory round
//! - [`QuestionSource`], [`ScoringFunction`], [`RosterStore`],
//!   [`BroadcastGateway`]: the contracts the engine needs from the rest of
//!   the platform
//! - [`EngineConfig`]: advance delay, warning marks, reconnect grace, ...
//!
//! # Concurrency
//!
//! Every mutation of a lobby's state happens inside that lobby's actor, one
//! command or timer event at a time. Lobbies share nothing, so the only lock
//! in the engine is the registry map, and it is never held across an await.

mod collaborators;
mod config;
mod error;
mod registry;
mod session;
mod state;

pub use collaborators::{
    BroadcastGateway, LobbySettings, QuestionSource, RosterEntry, RosterStore,
    ScoreInput, ScoreOutcome, ScoringFunction,
};
pub use config::EngineConfig;
pub use error::{BroadcastError, EngineError, QuestionSourceError, RosterError};
pub use registry::SessionRegistry;
pub use session::{AnswerAck, SessionHandle, SessionInfo};
pub use state::{GameState, PlayerState};

pub use quizarena_tick::{TimerConfig, TimerStatus};
