//! Identity types and the per-lobby session phase.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a player.
///
/// A newtype wrapper around `u64` so a player id can never be mixed up with
/// a question index or a score. `#[serde(transparent)]` keeps it a plain
/// number on the wire: `PlayerId(42)` is `42` in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// The short code that identifies a lobby (e.g. `ABC123`).
///
/// Codes are case-insensitive for humans typing them on a phone, so the
/// constructor trims whitespace and upper-cases. Two codes that differ only
/// in case are the same lobby. Deserialization goes through the same
/// normalization, so `"abc123"` on the wire is `ABC123` in memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LobbyCode(String);

impl LobbyCode {
    /// Creates a normalized lobby code.
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    /// Returns the normalized code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A code is usable only if it has at least one character after
    /// trimming.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }
}

impl fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LobbyCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<String> for LobbyCode {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl From<LobbyCode> for String {
    fn from(code: LobbyCode) -> Self {
        code.0
    }
}

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

/// Where a lobby's question state machine currently is.
///
/// ```text
///   Idle ──→ QuestionActive ──→ Grading ──┬──→ QuestionActive (next question)
///                                         └──→ Ended
/// ```
///
/// - **Idle**: the session is registered but no question has been shown.
/// - **QuestionActive**: a question is on screen and the countdown runs.
///   Answers are accepted.
/// - **Grading**: the question closed (timer hit zero or everyone answered).
///   Results are shown while the advance timer runs.
/// - **Ended**: the sequence is exhausted or the lobby was ended. Terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    Idle,
    QuestionActive,
    Grading,
    Ended,
}

impl SessionPhase {
    /// Returns `true` while answers may be submitted.
    pub fn accepts_answers(self) -> bool {
        matches!(self, Self::QuestionActive)
    }

    /// Returns `true` once the session can never progress again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended)
    }

    /// Returns `true` if moving from `self` to `target` is a legal edge.
    ///
    /// Any non-terminal phase may jump straight to `Ended` (explicit end or
    /// teardown); everything else follows the diagram above.
    pub fn can_transition_to(self, target: Self) -> bool {
        match (self, target) {
            (Self::Idle, Self::QuestionActive) => true,
            (Self::QuestionActive, Self::Grading) => true,
            (Self::Grading, Self::QuestionActive) => true,
            (from, Self::Ended) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::QuestionActive => write!(f, "QuestionActive"),
            Self::Grading => write!(f, "Grading"),
            Self::Ended => write!(f, "Ended"),
        }
    }
}
