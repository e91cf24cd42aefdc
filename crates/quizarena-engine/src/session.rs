//! Session actor: one Tokio task per active lobby.
//!
//! The actor exclusively owns the lobby's [`GameState`] and [`LobbyTimers`].
//! Commands from the registry and timer events are multiplexed in a single
//! `select!` loop, so every mutation of one lobby happens sequentially and
//! nothing about a lobby is ever locked.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use quizarena_protocol::{
    EndReason, LobbyCode, PlayerId, ServerEvent, SessionPhase, SessionSnapshot,
};
use quizarena_tick::{LobbyTimers, TimerEvent, TimerStatus};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::{
    BroadcastGateway, EngineConfig, EngineError, GameState, ScoreInput,
    ScoringFunction,
};

/// Counter for generating unique session ids.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Run by the actor when the session ends on its own, before `game-ended`
/// goes out. The registry uses it to drop its entry for the lobby.
pub(crate) type OnExit = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What the submitter learns about their own answer.
///
/// Only the submitter sees this (as `answer-received`); the lobby gets
/// `answer-progress` with the counts and no delta.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerAck {
    pub delta: i64,
    pub correct: bool,
    pub score: i64,
    pub streak: u32,
    pub multiplier: f64,
    /// Players who have answered the current question, this one included.
    pub answered: usize,
    /// Players still in the round.
    pub total: usize,
}

/// A cheap summary of a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub lobby: LobbyCode,
    pub session_id: u64,
    pub phase: SessionPhase,
    pub question_index: usize,
    pub total_questions: usize,
    pub time_remaining: u32,
    pub player_count: usize,
    pub connected_count: usize,
    pub timers: TimerStatus,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Requests the outside world can make of a session actor. Each carries a
/// reply channel.
pub(crate) enum SessionCommand {
    SubmitAnswer {
        player: PlayerId,
        answer: String,
        reply: oneshot::Sender<Result<AnswerAck, EngineError>>,
    },
    Disconnect {
        player: PlayerId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Reconnect {
        player: PlayerId,
        reply: oneshot::Sender<Result<SessionSnapshot, EngineError>>,
    },
    /// Host-initiated end of the round.
    End {
        requester: PlayerId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Info {
        reply: oneshot::Sender<SessionInfo>,
    },
    State {
        reply: oneshot::Sender<GameState>,
    },
    /// Silent teardown: clear timers and stop without broadcasting.
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running session actor.
///
/// Cheap to clone. Every method fails with
/// [`EngineError::NoActiveSession`] once the actor has stopped.
#[derive(Clone)]
pub struct SessionHandle {
    lobby: LobbyCode,
    session_id: u64,
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn lobby(&self) -> &LobbyCode {
        &self.lobby
    }

    /// Unique per started session, so a restarted lobby gets a new id.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn submit_answer(
        &self,
        player: PlayerId,
        answer: String,
    ) -> Result<AnswerAck, EngineError> {
        self.request(|reply| SessionCommand::SubmitAnswer {
            player,
            answer,
            reply,
        })
        .await?
    }

    pub async fn disconnect(&self, player: PlayerId) -> Result<(), EngineError> {
        self.request(|reply| SessionCommand::Disconnect { player, reply })
            .await?
    }

    /// Marks the player connected again and returns their resync snapshot.
    pub async fn reconnect(
        &self,
        player: PlayerId,
    ) -> Result<SessionSnapshot, EngineError> {
        self.request(|reply| SessionCommand::Reconnect { player, reply })
            .await?
    }

    pub async fn end(&self, requester: PlayerId) -> Result<(), EngineError> {
        self.request(|reply| SessionCommand::End { requester, reply })
            .await?
    }

    pub async fn info(&self) -> Result<SessionInfo, EngineError> {
        self.request(|reply| SessionCommand::Info { reply }).await
    }

    /// A copy of the session's full state.
    pub async fn state(&self) -> Result<GameState, EngineError> {
        self.request(|reply| SessionCommand::State { reply }).await
    }

    /// Stops the actor silently and waits until its timers are cleared.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> EngineError {
        EngineError::NoActiveSession(self.lobby.clone())
    }
}

/// Creates the command channel for a new session. The registry publishes the
/// handle before the actor starts running.
pub(crate) fn session_channel(
    lobby: LobbyCode,
    buffer: usize,
) -> (SessionHandle, mpsc::Receiver<SessionCommand>) {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    let handle = SessionHandle {
        lobby,
        session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
        sender,
    };
    (handle, receiver)
}

/// Shows the first question of `state`, then spawns the actor that runs the
/// rest of the session. `question-started` is out before this returns.
pub(crate) fn spawn_session<S, B>(
    session_id: u64,
    receiver: mpsc::Receiver<SessionCommand>,
    state: GameState,
    config: Arc<EngineConfig>,
    scoring: Arc<S>,
    gateway: Arc<B>,
    on_exit: OnExit,
) -> tokio::task::JoinHandle<()>
where
    S: ScoringFunction,
    B: BroadcastGateway,
{
    let mut actor = SessionActor {
        session_id,
        timers: LobbyTimers::new(config.timers.clone()),
        state,
        config,
        scoring,
        gateway,
        receiver,
        on_exit: Some(on_exit),
    };
    info!(
        lobby = %actor.state.lobby_code,
        session_id,
        questions = actor.state.total_questions(),
        players = actor.state.players.len(),
        "session started"
    );
    actor.begin_question();
    tokio::spawn(actor.run())
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Why a question is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    TimeUp,
    AllAnswered,
}

struct SessionActor<S, B> {
    session_id: u64,
    state: GameState,
    timers: LobbyTimers,
    config: Arc<EngineConfig>,
    scoring: Arc<S>,
    gateway: Arc<B>,
    receiver: mpsc::Receiver<SessionCommand>,
    on_exit: Option<OnExit>,
}

impl<S, B> SessionActor<S, B>
where
    S: ScoringFunction,
    B: BroadcastGateway,
{
    async fn run(mut self) {
        while self.state.is_active {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        debug!(lobby = %self.state.lobby_code, "all handles dropped");
                        self.stop();
                    }
                },
                event = self.timers.next_event() => self.on_timer(event),
            }
        }

        self.timers.clear_all();
        self.deregister();
        info!(
            lobby = %self.state.lobby_code,
            session_id = self.session_id,
            "session stopped"
        );
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::SubmitAnswer {
                player,
                answer,
                reply,
            } => {
                let result = self.submit_answer(player, &answer);
                let _ = reply.send(result);
            }
            SessionCommand::Disconnect { player, reply } => {
                let result = self.disconnect(player);
                let _ = reply.send(result);
            }
            SessionCommand::Reconnect { player, reply } => {
                let result = self.reconnect(player);
                let _ = reply.send(result);
            }
            SessionCommand::End { requester, reply } => {
                let result = self.end(requester);
                let _ = reply.send(result);
            }
            SessionCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            SessionCommand::State { reply } => {
                let _ = reply.send(self.state.clone());
            }
            SessionCommand::Shutdown { reply } => {
                self.stop();
                let _ = reply.send(());
            }
        }
    }

    // -- question lifecycle ------------------------------------------------

    fn begin_question(&mut self) {
        let now = Instant::now();
        for player_id in self.state.expire_disconnected(now, self.config.reconnect_grace) {
            info!(
                lobby = %self.state.lobby_code,
                %player_id,
                "reconnection window expired, player dropped"
            );
        }

        if !self.state.start_question(now) {
            error!(
                lobby = %self.state.lobby_code,
                question = self.state.current_question_index,
                "could not start question, ending session"
            );
            self.finish(EndReason::Completed);
            return;
        }

        self.timers.cancel_advance();
        self.timers.start_countdown();

        let Some(question) = self.state.current_question().map(|q| q.public()) else {
            return;
        };
        debug!(
            lobby = %self.state.lobby_code,
            question = self.state.current_question_index,
            time_limit = question.time_limit_secs,
            "question started"
        );
        self.publish(ServerEvent::QuestionStarted {
            question,
            question_index: self.state.current_question_index,
            total_questions: self.state.total_questions(),
            time_remaining: self.state.time_remaining,
        });
    }

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Tick { seq, .. } => {
                if self.state.phase != SessionPhase::QuestionActive {
                    // Stale countdown; closing a question always stops it.
                    warn!(lobby = %self.state.lobby_code, phase = %self.state.phase, "tick outside an active question");
                    self.timers.stop_countdown();
                    return;
                }
                let remaining = self.state.tick();
                trace!(lobby = %self.state.lobby_code, seq, remaining, "tick");
                self.publish(ServerEvent::TimeUpdate {
                    time_remaining: remaining,
                });
                if self.config.is_warning_mark(remaining) && self.state.mark_warning(remaining) {
                    self.publish(ServerEvent::TimeWarning {
                        time_remaining: remaining,
                    });
                }
                if remaining == 0 {
                    self.try_close_question(CloseReason::TimeUp);
                }
            }
            TimerEvent::AdvanceDue => {
                if self.state.phase != SessionPhase::Grading {
                    return;
                }
                if self.state.advance_index() {
                    self.begin_question();
                } else {
                    self.finish(EndReason::Completed);
                }
            }
        }
    }

    /// The one place a question ends. Returns `true` if it closed the
    /// question on this call.
    ///
    /// `TimeUp` always closes an active question; `AllAnswered` only when
    /// early end is enabled and every connected player has answered. Entering
    /// Grading stops the countdown first, so a question is graded once.
    fn try_close_question(&mut self, reason: CloseReason) -> bool {
        if self.state.phase != SessionPhase::QuestionActive {
            return false;
        }
        if reason == CloseReason::AllAnswered
            && !(self.config.early_end && self.state.all_connected_answered())
        {
            return false;
        }

        self.timers.stop_countdown();
        if !self.state.transition(SessionPhase::Grading) {
            return false;
        }
        debug!(
            lobby = %self.state.lobby_code,
            question = self.state.current_question_index,
            ?reason,
            "question closed"
        );

        self.grade_unanswered();

        let correct_answer = self
            .state
            .current_question()
            .map(|q| q.correct_answer.clone())
            .unwrap_or_default();
        self.publish(ServerEvent::QuestionEnded {
            question_index: self.state.current_question_index,
            correct_answer,
            results: self.state.question_results(),
        });

        self.timers.schedule_advance(self.config.advance_delay);
        true
    }

    /// Scores everyone who didn't answer as wrong.
    fn grade_unanswered(&mut self) {
        let Some(question) = self.state.current_question().cloned() else {
            return;
        };
        let time_limit_ms = u64::from(question.time_limit_secs) * 1_000;
        for player in self.state.players.values_mut() {
            if player.has_answered_current_question {
                continue;
            }
            let outcome = self.scoring.score(&ScoreInput {
                answer: None,
                correct_answer: &question.correct_answer,
                elapsed_ms: time_limit_ms,
                time_limit_ms,
                multiplier: player.multiplier,
                streak: player.current_streak,
            });
            player.apply_score(&outcome, false);
        }
    }

    /// Ends the round and tells everyone.
    fn finish(&mut self, reason: EndReason) {
        self.timers.clear_all();
        self.state.transition(SessionPhase::Ended);
        self.state.is_active = false;
        // Deregister first so the lobby is free by the time clients hear
        // about the end.
        self.deregister();

        let final_scores = self.state.standings();
        info!(
            lobby = %self.state.lobby_code,
            ?reason,
            questions_played = self.state.current_question_index + 1,
            "session ended"
        );
        self.publish(ServerEvent::GameEnded {
            reason,
            final_scores,
        });
    }

    /// Teardown: stop without a broadcast.
    fn stop(&mut self) {
        self.timers.clear_all();
        if !self.state.phase.is_terminal() {
            self.state.transition(SessionPhase::Ended);
        }
        self.state.is_active = false;
    }

    fn deregister(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit();
        }
    }

    // -- commands ----------------------------------------------------------

    fn submit_answer(
        &mut self,
        player_id: PlayerId,
        answer: &str,
    ) -> Result<AnswerAck, EngineError> {
        let lobby = &self.state.lobby_code;
        let unknown = || EngineError::UnknownPlayer {
            lobby: lobby.clone(),
            player: player_id,
        };
        let player = self
            .state
            .players
            .get(&player_id)
            .filter(|p| !p.dropped)
            .ok_or_else(unknown)?;
        if player.has_answered_current_question {
            return Err(EngineError::AlreadyAnswered(player_id));
        }
        if !self.state.phase.accepts_answers() {
            return Err(EngineError::QuestionClosed(lobby.clone()));
        }
        let question = self
            .state
            .current_question()
            .cloned()
            .ok_or_else(|| EngineError::QuestionClosed(lobby.clone()))?;

        let correct = question.is_correct(answer);
        let outcome = self.scoring.score(&ScoreInput {
            answer: Some(answer),
            correct_answer: &question.correct_answer,
            elapsed_ms: self.state.elapsed_ms(Instant::now()),
            time_limit_ms: u64::from(question.time_limit_secs) * 1_000,
            multiplier: player.multiplier,
            streak: player.current_streak,
        });

        let player = self
            .state
            .players
            .get_mut(&player_id)
            .ok_or_else(|| EngineError::UnknownPlayer {
                lobby: self.state.lobby_code.clone(),
                player: player_id,
            })?;
        player.apply_score(&outcome, correct);
        player.has_answered_current_question = true;
        let (score, streak, multiplier) = (player.score, player.current_streak, player.multiplier);

        let ack = AnswerAck {
            delta: outcome.delta,
            correct,
            score,
            streak,
            multiplier,
            answered: self.state.answered_count(),
            total: self.state.participant_count(),
        };
        debug!(
            lobby = %self.state.lobby_code,
            %player_id,
            question = self.state.current_question_index,
            delta = ack.delta,
            "answer accepted"
        );

        self.unicast(
            player_id,
            ServerEvent::AnswerReceived {
                player_id,
                delta: ack.delta,
                correct,
                score,
                streak,
                multiplier,
            },
        );
        self.publish(ServerEvent::AnswerProgress {
            player_id,
            answered: ack.answered,
            total: ack.total,
        });

        self.try_close_question(CloseReason::AllAnswered);
        Ok(ack)
    }

    fn disconnect(&mut self, player_id: PlayerId) -> Result<(), EngineError> {
        let player = self.state.players.get_mut(&player_id).ok_or_else(|| {
            EngineError::UnknownPlayer {
                lobby: self.state.lobby_code.clone(),
                player: player_id,
            }
        })?;
        player.mark_disconnected(Instant::now());
        info!(lobby = %self.state.lobby_code, %player_id, "player disconnected");

        // The player who left may have been the last one we were waiting on.
        self.try_close_question(CloseReason::AllAnswered);
        Ok(())
    }

    fn reconnect(&mut self, player_id: PlayerId) -> Result<SessionSnapshot, EngineError> {
        let grace = self.config.reconnect_grace;
        let player = self.state.players.get_mut(&player_id).ok_or_else(|| {
            EngineError::UnknownPlayer {
                lobby: self.state.lobby_code.clone(),
                player: player_id,
            }
        })?;
        if player.dropped || player.grace_expired(Instant::now(), grace) {
            player.dropped = true;
            info!(lobby = %self.state.lobby_code, %player_id, "late reconnect refused");
            return Err(EngineError::ReconnectExpired(player_id));
        }
        player.mark_connected();

        let snapshot = self.state.snapshot_for(player_id).ok_or_else(|| {
            EngineError::UnknownPlayer {
                lobby: self.state.lobby_code.clone(),
                player: player_id,
            }
        })?;
        info!(lobby = %self.state.lobby_code, %player_id, "player reconnected");
        self.unicast(player_id, ServerEvent::SessionSnapshot(snapshot.clone()));
        Ok(snapshot)
    }

    fn end(&mut self, requester: PlayerId) -> Result<(), EngineError> {
        let is_host = self
            .state
            .players
            .get(&requester)
            .is_some_and(|p| p.is_host);
        if !is_host {
            return Err(EngineError::NotHost {
                lobby: self.state.lobby_code.clone(),
                player: requester,
            });
        }
        self.finish(EndReason::Aborted);
        Ok(())
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            lobby: self.state.lobby_code.clone(),
            session_id: self.session_id,
            phase: self.state.phase,
            question_index: self.state.current_question_index,
            total_questions: self.state.total_questions(),
            time_remaining: self.state.time_remaining,
            player_count: self.state.players.len(),
            connected_count: self.state.players.values().filter(|p| p.is_connected).count(),
            timers: self.timers.status(),
        }
    }

    // -- outbound ----------------------------------------------------------

    fn publish(&self, event: ServerEvent) {
        if let Err(err) = self.gateway.publish(&self.state.lobby_code, &event) {
            warn!(
                lobby = %self.state.lobby_code,
                event = event.name(),
                error = %err,
                "broadcast failed"
            );
        }
    }

    fn unicast(&self, player: PlayerId, event: ServerEvent) {
        if let Err(err) = self.gateway.unicast(&self.state.lobby_code, player, &event) {
            warn!(
                lobby = %self.state.lobby_code,
                %player,
                event = event.name(),
                error = %err,
                "unicast failed"
            );
        }
    }
}
