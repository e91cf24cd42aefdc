//! Unified error type for the QuizArena gateway.

use quizarena_engine::{EngineError, RosterError};
use quizarena_protocol::ProtocolError;

use crate::AuthError;
use crate::transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` conversions let `?` lift sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame that didn't decode, or a message out of place.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A session operation was refused.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The client asked for something that makes no sense in its current
    /// state (e.g. starting a game before joining a lobby).
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<RosterError> for QuizError {
    fn from(err: RosterError) -> Self {
        Self::Engine(err.into())
    }
}

impl QuizError {
    /// Numeric code sent to the client in an `error` event.
    pub fn code(&self) -> u16 {
        match self {
            Self::Engine(err) => err.code(),
            Self::Protocol(_) | Self::BadRequest(_) => 400,
            Self::Auth(AuthError::Rejected(_)) => 401,
            Self::Auth(AuthError::Unavailable(_)) => 503,
            Self::Transport(_) => 500,
        }
    }

    /// Errors the client doesn't need to hear about.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Engine(err) if err.is_silent())
    }
}
