//! The in-memory record of one lobby's round.
//!
//! `GameState` is plain data plus the bookkeeping rules that don't involve
//! timers or I/O: resetting per-question flags, counting down, applying a
//! score, ranking players. The session actor owns it and drives it.

use std::collections::BTreeMap;
use std::time::Duration;

use quizarena_protocol::{
    LobbyCode, PlayerId, PlayerResult, QuestionRecord, SessionPhase,
    SessionSnapshot, Standing,
};
use tokio::time::Instant;
use tracing::warn;

use crate::{EngineError, RosterEntry, ScoreOutcome};

// ---------------------------------------------------------------------------
// PlayerState
// ---------------------------------------------------------------------------

/// One participant's state for the duration of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub player_id: PlayerId,
    pub username: String,
    pub is_host: bool,

    pub score: i64,
    pub multiplier: f64,
    pub correct_answers: u32,
    pub current_streak: u32,

    /// Set on the first accepted answer for the current question and only
    /// cleared when the next question starts.
    pub has_answered_current_question: bool,
    /// Points from the current question (0 until scored).
    pub question_delta: i64,
    /// Whether the current question was answered correctly.
    pub question_correct: bool,

    pub is_connected: bool,
    /// When the player was last seen disconnecting. `None` while connected.
    pub disconnected_at: Option<Instant>,
    /// Disconnected past the grace period. Terminal for this session.
    pub dropped: bool,
}

impl PlayerState {
    /// Fresh accumulators for a roster entry.
    pub fn new(entry: &RosterEntry, now: Instant) -> Self {
        Self {
            player_id: entry.player_id,
            username: entry.username.clone(),
            is_host: entry.is_host,
            score: 0,
            multiplier: 1.0,
            correct_answers: 0,
            current_streak: 0,
            has_answered_current_question: false,
            question_delta: 0,
            question_correct: false,
            is_connected: entry.is_connected,
            disconnected_at: (!entry.is_connected).then_some(now),
            dropped: false,
        }
    }

    /// Applies the scorer's verdict for the current question.
    pub fn apply_score(&mut self, outcome: &ScoreOutcome, correct: bool) {
        self.score += outcome.delta;
        self.multiplier = outcome.multiplier;
        self.current_streak = outcome.streak;
        self.question_delta = outcome.delta;
        self.question_correct = correct;
        if correct {
            self.correct_answers += 1;
        }
    }

    /// Whether the player still counts toward "everyone has answered".
    pub fn is_eligible(&self) -> bool {
        self.is_connected && !self.dropped
    }

    pub fn mark_disconnected(&mut self, now: Instant) {
        if self.is_connected {
            self.is_connected = false;
            self.disconnected_at = Some(now);
        }
    }

    pub fn mark_connected(&mut self) {
        self.is_connected = true;
        self.disconnected_at = None;
    }

    /// Whether a disconnect has outlived `grace`.
    pub fn grace_expired(&self, now: Instant, grace: Option<Duration>) -> bool {
        match (self.disconnected_at, grace) {
            (Some(since), Some(grace)) => now.saturating_duration_since(since) > grace,
            _ => false,
        }
    }

    fn reset_for_question(&mut self) {
        self.has_answered_current_question = false;
        self.question_delta = 0;
        self.question_correct = false;
    }
}

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// The live record of one lobby's round.
#[derive(Debug, Clone)]
pub struct GameState {
    pub lobby_code: LobbyCode,
    /// Fixed at session start.
    questions: Vec<QuestionRecord>,
    pub current_question_index: usize,
    pub time_remaining: u32,
    pub question_start_time: Instant,
    /// Ordered by player id so results and broadcasts are deterministic.
    pub players: BTreeMap<PlayerId, PlayerState>,
    pub is_active: bool,
    pub phase: SessionPhase,
    /// Warning marks already broadcast for the current question.
    warnings_sent: Vec<u32>,
}

impl GameState {
    /// Builds the state for a new session.
    ///
    /// # Errors
    /// [`EngineError::NoQuestions`] if `questions` is empty.
    pub fn new(
        lobby_code: LobbyCode,
        questions: Vec<QuestionRecord>,
        roster: &[RosterEntry],
        now: Instant,
    ) -> Result<Self, EngineError> {
        if questions.is_empty() {
            return Err(EngineError::NoQuestions(lobby_code));
        }
        let players = roster
            .iter()
            .map(|entry| (entry.player_id, PlayerState::new(entry, now)))
            .collect();
        Ok(Self {
            lobby_code,
            questions,
            current_question_index: 0,
            time_remaining: 0,
            question_start_time: now,
            players,
            is_active: true,
            phase: SessionPhase::Idle,
            warnings_sent: Vec::new(),
        })
    }

    pub fn questions(&self) -> &[QuestionRecord] {
        &self.questions
    }

    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    pub fn current_question(&self) -> Option<&QuestionRecord> {
        self.questions.get(self.current_question_index)
    }

    pub fn has_next_question(&self) -> bool {
        self.current_question_index + 1 < self.questions.len()
    }

    /// Moves to the next question. Returns `false` (and changes nothing) if
    /// the sequence is exhausted.
    pub fn advance_index(&mut self) -> bool {
        if self.has_next_question() {
            self.current_question_index += 1;
            true
        } else {
            false
        }
    }

    /// Moves the state machine along a legal edge.
    ///
    /// An illegal edge is logged and refused; callers guard on the phase
    /// first, so this only fires on a bug.
    pub fn transition(&mut self, to: SessionPhase) -> bool {
        if self.phase.can_transition_to(to) {
            self.phase = to;
            true
        } else {
            warn!(
                lobby = %self.lobby_code,
                from = %self.phase,
                %to,
                "illegal phase transition refused"
            );
            false
        }
    }

    /// Activates the question at `current_question_index`: resets the clock,
    /// every player's per-question flags, and the warning bookkeeping.
    pub fn start_question(&mut self, now: Instant) -> bool {
        let Some(limit) = self.current_question().map(|q| q.time_limit_secs) else {
            return false;
        };
        if !self.transition(SessionPhase::QuestionActive) {
            return false;
        }
        self.time_remaining = limit;
        self.question_start_time = now;
        self.warnings_sent.clear();
        for player in self.players.values_mut() {
            player.reset_for_question();
        }
        true
    }

    /// One countdown step. Never goes below zero.
    pub fn tick(&mut self) -> u32 {
        self.time_remaining = self.time_remaining.saturating_sub(1);
        self.time_remaining
    }

    /// Records that the warning for `mark` went out. Returns `false` if it
    /// already had for this question.
    pub fn mark_warning(&mut self, mark: u32) -> bool {
        if self.warnings_sent.contains(&mark) {
            false
        } else {
            self.warnings_sent.push(mark);
            true
        }
    }

    /// Milliseconds since the current question started.
    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.question_start_time)
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    /// Players who answered the current question.
    pub fn answered_count(&self) -> usize {
        self.players
            .values()
            .filter(|p| p.has_answered_current_question)
            .count()
    }

    /// Players still in the round (not dropped).
    pub fn participant_count(&self) -> usize {
        self.players.values().filter(|p| !p.dropped).count()
    }

    /// Whether every connected player has answered.
    ///
    /// With nobody connected this is `false`: an empty room waits out the
    /// clock rather than racing through the questions.
    pub fn all_connected_answered(&self) -> bool {
        let mut eligible = self.players.values().filter(|p| p.is_eligible()).peekable();
        eligible.peek().is_some() && eligible.all(|p| p.has_answered_current_question)
    }

    /// Drops every player whose disconnect outlived `grace`. Returns the ids
    /// dropped by this call.
    pub fn expire_disconnected(
        &mut self,
        now: Instant,
        grace: Option<Duration>,
    ) -> Vec<PlayerId> {
        let mut dropped = Vec::new();
        for player in self.players.values_mut() {
            if !player.dropped && player.grace_expired(now, grace) {
                player.dropped = true;
                dropped.push(player.player_id);
            }
        }
        dropped
    }

    /// Per-player results for the current question.
    pub fn question_results(&self) -> Vec<PlayerResult> {
        self.players
            .values()
            .map(|p| PlayerResult {
                player_id: p.player_id,
                username: p.username.clone(),
                answered: p.has_answered_current_question,
                correct: p.question_correct,
                delta: p.question_delta,
                score: p.score,
                streak: p.current_streak,
            })
            .collect()
    }

    /// The leaderboard: highest score first, ties share a rank, then ordered
    /// by player id.
    pub fn standings(&self) -> Vec<Standing> {
        let mut players: Vec<&PlayerState> = self.players.values().collect();
        players.sort_by(|a, b| b.score.cmp(&a.score).then(a.player_id.cmp(&b.player_id)));

        let mut standings = Vec::with_capacity(players.len());
        let mut rank = 0;
        let mut previous: Option<i64> = None;
        for (position, p) in players.into_iter().enumerate() {
            if previous != Some(p.score) {
                rank = position + 1;
                previous = Some(p.score);
            }
            standings.push(Standing {
                rank,
                player_id: p.player_id,
                username: p.username.clone(),
                score: p.score,
                correct_answers: p.correct_answers,
                dropped: p.dropped,
            });
        }
        standings
    }

    /// What `player` needs to resume rendering mid-session.
    pub fn snapshot_for(&self, player: PlayerId) -> Option<SessionSnapshot> {
        let p = self.players.get(&player)?;
        let question = match self.phase {
            SessionPhase::QuestionActive | SessionPhase::Grading => {
                self.current_question().map(QuestionRecord::public)
            }
            SessionPhase::Idle | SessionPhase::Ended => None,
        };
        Some(SessionSnapshot {
            lobby: self.lobby_code.clone(),
            phase: self.phase,
            question,
            question_index: self.current_question_index,
            total_questions: self.questions.len(),
            time_remaining: self.time_remaining,
            has_answered: p.has_answered_current_question,
            score: p.score,
            streak: p.current_streak,
            multiplier: p.multiplier,
            correct_answers: p.correct_answers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(id: u64) -> PlayerId {
        PlayerId(id)
    }

    fn entry(id: u64, host: bool) -> RosterEntry {
        RosterEntry {
            player_id: pid(id),
            username: format!("player{id}"),
            is_host: host,
            is_connected: true,
        }
    }

    fn question(id: &str, limit: u32) -> QuestionRecord {
        QuestionRecord {
            id: id.into(),
            text: format!("question {id}"),
            options: vec!["a".into(), "b".into()],
            correct_answer: "a".into(),
            time_limit_secs: limit,
        }
    }

    fn state(limit: u32) -> GameState {
        GameState::new(
            LobbyCode::new("T1"),
            vec![question("q1", limit), question("q2", limit)],
            &[entry(1, true), entry(2, false)],
            Instant::now(),
        )
        .unwrap()
    }

    fn outcome(delta: i64, streak: u32) -> ScoreOutcome {
        ScoreOutcome {
            delta,
            multiplier: 1.0,
            streak,
        }
    }

    #[test]
    fn test_new_without_questions_returns_no_questions() {
        let result = GameState::new(
            LobbyCode::new("T1"),
            vec![],
            &[entry(1, true)],
            Instant::now(),
        );
        assert!(matches!(result, Err(EngineError::NoQuestions(_))));
    }

    #[test]
    fn test_new_state_is_idle_and_active() {
        let s = state(10);
        assert_eq!(s.phase, SessionPhase::Idle);
        assert!(s.is_active);
        assert_eq!(s.players.len(), 2);
        assert_eq!(s.total_questions(), 2);
    }

    #[tokio::test]
    async fn test_start_question_resets_clock_and_flags() {
        let mut s = state(10);
        s.start_question(Instant::now());
        s.players.get_mut(&pid(1)).unwrap().has_answered_current_question = true;
        s.tick();
        s.mark_warning(10);
        s.transition(SessionPhase::Grading);
        s.advance_index();

        assert!(s.start_question(Instant::now()));

        assert_eq!(s.time_remaining, 10);
        assert_eq!(s.current_question_index, 1);
        assert!(s.players.values().all(|p| !p.has_answered_current_question));
        assert!(s.mark_warning(10), "warnings reset per question");
    }

    #[tokio::test]
    async fn test_tick_never_goes_negative() {
        let mut s = state(2);
        s.start_question(Instant::now());
        assert_eq!(s.tick(), 1);
        assert_eq!(s.tick(), 0);
        assert_eq!(s.tick(), 0);
    }

    #[test]
    fn test_advance_index_stops_at_last_question() {
        let mut s = state(10);
        assert!(s.has_next_question());
        assert!(s.advance_index());
        assert!(!s.has_next_question());
        assert!(!s.advance_index());
        assert_eq!(s.current_question_index, 1);
    }

    #[test]
    fn test_mark_warning_only_once() {
        let mut s = state(10);
        assert!(s.mark_warning(5));
        assert!(!s.mark_warning(5));
    }

    #[tokio::test]
    async fn test_all_connected_answered_ignores_disconnected() {
        let mut s = state(10);
        s.start_question(Instant::now());
        s.players.get_mut(&pid(1)).unwrap().has_answered_current_question = true;
        assert!(!s.all_connected_answered());

        s.players.get_mut(&pid(2)).unwrap().mark_disconnected(Instant::now());
        assert!(s.all_connected_answered());
    }

    #[tokio::test]
    async fn test_all_connected_answered_false_when_nobody_connected() {
        let mut s = state(10);
        for p in s.players.values_mut() {
            p.mark_disconnected(Instant::now());
        }
        assert!(!s.all_connected_answered());
    }

    #[test]
    fn test_apply_score_counts_correct_answers() {
        let mut s = state(10);
        let p = s.players.get_mut(&pid(1)).unwrap();
        p.apply_score(&outcome(500, 1), true);
        p.apply_score(&outcome(0, 0), false);
        assert_eq!(p.score, 500);
        assert_eq!(p.correct_answers, 1);
        assert_eq!(p.current_streak, 0);
    }

    #[test]
    fn test_standings_share_rank_on_ties() {
        let mut s = state(10);
        s.players.insert(pid(3), PlayerState::new(&entry(3, false), Instant::now()));
        s.players.get_mut(&pid(1)).unwrap().score = 100;
        s.players.get_mut(&pid(2)).unwrap().score = 300;
        s.players.get_mut(&pid(3)).unwrap().score = 100;

        let standings = s.standings();
        let ranks: Vec<(u64, usize)> =
            standings.iter().map(|r| (r.player_id.0, r.rank)).collect();
        assert_eq!(ranks, vec![(2, 1), (1, 2), (3, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_disconnected_respects_grace() {
        let mut s = state(10);
        s.players.get_mut(&pid(2)).unwrap().mark_disconnected(Instant::now());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(s.expire_disconnected(Instant::now(), Some(Duration::from_secs(30))).is_empty());

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(
            s.expire_disconnected(Instant::now(), Some(Duration::from_secs(30))),
            vec![pid(2)]
        );
        assert!(s.players[&pid(2)].dropped);
        assert_eq!(s.participant_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_grace_never_expires() {
        let mut s = state(10);
        s.players.get_mut(&pid(2)).unwrap().mark_disconnected(Instant::now());
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(s.expire_disconnected(Instant::now(), None).is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_hides_question_before_start() {
        let mut s = state(10);
        let before = s.snapshot_for(pid(1)).unwrap();
        assert!(before.question.is_none());

        s.start_question(Instant::now());
        let during = s.snapshot_for(pid(1)).unwrap();
        assert_eq!(during.question.unwrap().id, "q1");
        assert_eq!(during.time_remaining, 10);
        assert!(s.snapshot_for(pid(99)).is_none());
    }
}
