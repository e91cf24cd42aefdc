//! Error types for the engine and its collaborators.

use quizarena_protocol::{LobbyCode, PlayerId};

/// Errors reported to the single caller of an engine operation.
///
/// All of them are recoverable: they never abort a session and never reach
/// other players.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The lobby already has a running session (or one is being started).
    #[error("lobby {0} already has an active session")]
    AlreadyActive(LobbyCode),

    /// Only the lobby's host may start or end a round.
    #[error("player {player} is not the host of lobby {lobby}")]
    NotHost { lobby: LobbyCode, player: PlayerId },

    /// The lobby's configured question sets resolved to nothing.
    #[error("no questions available for lobby {0}")]
    NoQuestions(LobbyCode),

    /// No session is running for the lobby.
    #[error("no active session for lobby {0}")]
    NoActiveSession(LobbyCode),

    /// The player already answered the current question. Callers may
    /// ignore this one silently.
    #[error("player {0} already answered this question")]
    AlreadyAnswered(PlayerId),

    /// The player is not part of the session (never was, or was dropped).
    #[error("player {player} is not part of the session in lobby {lobby}")]
    UnknownPlayer { lobby: LobbyCode, player: PlayerId },

    /// An answer arrived while results were being shown.
    #[error("question is closed in lobby {0}")]
    QuestionClosed(LobbyCode),

    /// The player stayed away longer than the reconnection grace period.
    #[error("reconnection window expired for player {0}")]
    ReconnectExpired(PlayerId),

    /// The roster store doesn't know the lobby.
    #[error("lobby {0} not found")]
    LobbyNotFound(LobbyCode),

    /// A collaborator (roster store, question source) failed.
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

impl EngineError {
    /// Stable numeric code sent to clients alongside the message.
    pub fn code(&self) -> u16 {
        match self {
            Self::AlreadyAnswered(_) => 208,
            Self::NotHost { .. } => 403,
            Self::NoActiveSession(_) | Self::LobbyNotFound(_) => 404,
            Self::UnknownPlayer { .. } => 404,
            Self::AlreadyActive(_) | Self::QuestionClosed(_) => 409,
            Self::ReconnectExpired(_) => 410,
            Self::NoQuestions(_) => 422,
            Self::Collaborator(_) => 503,
        }
    }

    /// Errors a client can drop without showing anything to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::AlreadyAnswered(_))
    }
}

/// Failures of the question source.
#[derive(Debug, thiserror::Error)]
pub enum QuestionSourceError {
    /// A question-set id is invalid, or the resolved set is empty.
    #[error("question set not found: {0}")]
    NotFound(String),

    /// The backing store could not be reached.
    #[error("question source unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the roster store.
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("lobby {0} not found")]
    LobbyNotFound(LobbyCode),

    #[error("player {player} not in lobby {lobby}")]
    PlayerNotFound { lobby: LobbyCode, player: PlayerId },

    #[error("roster store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the broadcast gateway. The engine logs these and moves on.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// The target player has no live connection on the lobby channel.
    #[error("player {player} is not subscribed to lobby {lobby}")]
    NotSubscribed { lobby: LobbyCode, player: PlayerId },

    /// Some subscribers could not be reached.
    #[error("{failed} deliveries failed on lobby {lobby}")]
    Delivery { lobby: LobbyCode, failed: usize },

    /// The event could not be serialized for the wire.
    #[error("could not encode event: {0}")]
    Encode(String),
}

impl From<RosterError> for EngineError {
    fn from(err: RosterError) -> Self {
        match err {
            RosterError::LobbyNotFound(lobby) => Self::LobbyNotFound(lobby),
            other => Self::Collaborator(other.to_string()),
        }
    }
}
