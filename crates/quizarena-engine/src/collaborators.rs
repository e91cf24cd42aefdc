//! Contracts the engine needs from the rest of the platform.
//!
//! The engine doesn't store questions, compute points, own lobby
//! membership, or talk to sockets. It calls out to four collaborators:
//!
//! | trait | called | may suspend |
//! |---|---|---|
//! | [`QuestionSource`] | once, at session start | yes |
//! | [`RosterStore`] | at start, and after connection changes | yes |
//! | [`ScoringFunction`] | on every answer and at grading | no |
//! | [`BroadcastGateway`] | on every state change | no |
//!
//! Scoring and broadcasting run inside the session actor on the timer path,
//! so they are synchronous: a slow collaborator there would stretch the
//! one-second countdown. The async collaborators are only awaited outside
//! the actor.

use std::future::Future;

use quizarena_protocol::{LobbyCode, PlayerId, QuestionRecord, ServerEvent};

use crate::{BroadcastError, QuestionSourceError, RosterError};

// ---------------------------------------------------------------------------
// Question source
// ---------------------------------------------------------------------------

/// Resolves a lobby's configured question sets into an ordered sequence.
pub trait QuestionSource: Send + Sync + 'static {
    /// Returns up to `count` questions drawn from `question_set_ids`, in the
    /// order they will be played.
    ///
    /// # Errors
    /// [`QuestionSourceError::NotFound`] if any id is invalid or the resolved
    /// set is empty.
    fn resolve_questions(
        &self,
        question_set_ids: &[String],
        count: usize,
    ) -> impl Future<Output = Result<Vec<QuestionRecord>, QuestionSourceError>> + Send;
}

// ---------------------------------------------------------------------------
// Roster store
// ---------------------------------------------------------------------------

/// One player as known to the roster store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub player_id: PlayerId,
    pub username: String,
    pub is_host: bool,
    pub is_connected: bool,
}

/// The parts of a lobby's configuration the engine needs at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbySettings {
    pub question_set_ids: Vec<String>,
    pub question_count: usize,
}

/// The authoritative lobby roster, shared with the REST layer.
///
/// The engine reads it once per session and writes only connection status,
/// and never assumes it is the only writer.
pub trait RosterStore: Send + Sync + 'static {
    /// Everyone currently in the lobby.
    fn get_players(
        &self,
        lobby: &LobbyCode,
    ) -> impl Future<Output = Result<Vec<RosterEntry>, RosterError>> + Send;

    /// Records a connection-status change.
    fn set_connected(
        &self,
        lobby: &LobbyCode,
        player: PlayerId,
        connected: bool,
    ) -> impl Future<Output = Result<(), RosterError>> + Send;

    /// The question sets and question count configured for the lobby.
    fn lobby_settings(
        &self,
        lobby: &LobbyCode,
    ) -> impl Future<Output = Result<LobbySettings, RosterError>> + Send;
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Everything the scorer is told about one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreInput<'a> {
    /// `None` when the player never answered before the question closed.
    pub answer: Option<&'a str>,
    pub correct_answer: &'a str,
    /// Time from question start to submission, independent of tick
    /// granularity.
    pub elapsed_ms: u64,
    pub time_limit_ms: u64,
    pub multiplier: f64,
    pub streak: u32,
}

/// The scorer's verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreOutcome {
    pub delta: i64,
    pub multiplier: f64,
    pub streak: u32,
}

/// Turns an answer into points.
///
/// Any `fn(&ScoreInput) -> ScoreOutcome` is a scoring function, which keeps
/// tests short:
///
/// ```rust
/// use quizarena_engine::{ScoreInput, ScoreOutcome, ScoringFunction};
///
/// fn flat(input: &ScoreInput<'_>) -> ScoreOutcome {
///     ScoreOutcome {
///         delta: if input.answer == Some(input.correct_answer) { 100 } else { 0 },
///         multiplier: 1.0,
///         streak: 0,
///     }
/// }
///
/// let out = flat.score(&ScoreInput {
///     answer: Some("4"),
///     correct_answer: "4",
///     elapsed_ms: 1_000,
///     time_limit_ms: 10_000,
///     multiplier: 1.0,
///     streak: 0,
/// });
/// assert_eq!(out.delta, 100);
/// ```
pub trait ScoringFunction: Send + Sync + 'static {
    fn score(&self, input: &ScoreInput<'_>) -> ScoreOutcome;
}

impl<F> ScoringFunction for F
where
    F: Fn(&ScoreInput<'_>) -> ScoreOutcome + Send + Sync + 'static,
{
    fn score(&self, input: &ScoreInput<'_>) -> ScoreOutcome {
        self(input)
    }
}

// ---------------------------------------------------------------------------
// Broadcast gateway
// ---------------------------------------------------------------------------

/// Fans events out to a lobby's connections.
pub trait BroadcastGateway: Send + Sync + 'static {
    /// Sends `event` to every connection subscribed to `lobby`.
    fn publish(
        &self,
        lobby: &LobbyCode,
        event: &ServerEvent,
    ) -> Result<(), BroadcastError>;

    /// Sends `event` to one player's connection on `lobby`.
    fn unicast(
        &self,
        lobby: &LobbyCode,
        player: PlayerId,
        event: &ServerEvent,
    ) -> Result<(), BroadcastError>;
}
