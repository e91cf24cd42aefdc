//! # QuizArena
//!
//! Real-time multiplayer quiz server.
//!
//! Players connect over WebSocket, join a lobby, and the host starts a
//! round. From there the session engine runs the clock: each question is
//! shown, counted down and graded, and the lobby hears every step as a named
//! event.
//!
//! This crate is the gateway around the engine:
//!
//! - [`WebSocketTransport`] accepts connections and splits them into reader
//!   and writer halves.
//! - [`BroadcastHub`] maps lobbies to live connections and implements the
//!   engine's `BroadcastGateway`.
//! - An [`Authenticator`] turns the handshake token into an [`Identity`].
//! - A [`LobbyDirectory`] handles joins and leaves on top of the roster.
//! - [`QuizServer`] wires it all to a `SessionRegistry`.
//!
//! The `dev` feature (on by default) adds in-memory collaborators so a
//! server can run with no external services.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use quizarena::dev::{InMemoryQuestionBank, InMemoryRoster, NumericTokenAuth, StreakScoring};
//! use quizarena::prelude::*;
//!
//! # async fn run(questions: Vec<QuestionRecord>) -> Result<(), QuizError> {
//! let bank = InMemoryQuestionBank::new().with_set("general", questions);
//! let roster = Arc::new(InMemoryRoster::new(LobbySettings {
//!     question_set_ids: vec!["general".into()],
//!     question_count: 10,
//! }));
//! let server = QuizServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(NumericTokenAuth, bank, StreakScoring::default(), roster)
//!     .await?;
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```

mod auth;
mod directory;
mod error;
mod handler;
mod hub;
mod server;
mod transport;

#[cfg(feature = "dev")]
pub mod dev;

pub use auth::{AuthError, Authenticator, Identity};
pub use directory::LobbyDirectory;
pub use error::QuizError;
pub use hub::{BroadcastHub, Outbox};
pub use server::{QuizRegistry, QuizServer, QuizServerBuilder};
pub use transport::{
    ConnectionId, FrameReader, FrameWriter, TransportError, WebSocketConnection,
    WebSocketTransport,
};

pub mod prelude {
    pub use crate::{
        AuthError, Authenticator, BroadcastHub, Identity, LobbyDirectory, QuizError,
        QuizServer, QuizServerBuilder,
    };
    pub use quizarena_engine::{
        EngineConfig, EngineError, LobbySettings, QuestionSource, QuestionSourceError,
        RosterEntry, RosterError, RosterStore, ScoreInput, ScoreOutcome, ScoringFunction,
    };
    pub use quizarena_protocol::{
        ClientMessage, LobbyCode, PlayerId, QuestionRecord, ServerEvent,
    };
    pub use quizarena_tick::TimerConfig;
}
