//! Session registry: creates, tracks, and tears down one session per lobby.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use quizarena_protocol::{LobbyCode, PlayerId, SessionSnapshot};
use quizarena_tick::TimerStatus;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::session::{self, OnExit};
use crate::{
    AnswerAck, BroadcastGateway, EngineConfig, EngineError, GameState,
    QuestionSource, QuestionSourceError, RosterStore, ScoringFunction,
    SessionHandle, SessionInfo,
};

static NEXT_RESERVATION: AtomicU64 = AtomicU64::new(1);

/// A lobby's entry in the registry.
enum Slot {
    /// `start_session` is resolving the roster and questions. Tagged with
    /// the reservation that owns it; teardown removes it, which cancels the
    /// start.
    Starting(u64),
    Running(SessionHandle),
}

type SessionMap = HashMap<LobbyCode, Slot>;

fn lock(sessions: &Mutex<SessionMap>) -> MutexGuard<'_, SessionMap> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a lobby's `Starting` slot while a start is in flight. Dropping it
/// without committing releases the lobby.
struct Reservation<'a> {
    sessions: &'a Mutex<SessionMap>,
    lobby: LobbyCode,
    id: u64,
    committed: bool,
}

impl Reservation<'_> {
    fn owns(&self, sessions: &SessionMap) -> bool {
        matches!(sessions.get(&self.lobby), Some(Slot::Starting(id)) if *id == self.id)
    }

    /// Swaps the `Starting` slot for the running session.
    ///
    /// Fails with [`EngineError::NoActiveSession`] if the slot was torn down
    /// while the start was in flight; the handle is dropped unused.
    fn commit(mut self, handle: SessionHandle) -> Result<(), EngineError> {
        let mut sessions = lock(self.sessions);
        if !self.owns(&sessions) {
            return Err(EngineError::NoActiveSession(self.lobby.clone()));
        }
        sessions.insert(self.lobby.clone(), Slot::Running(handle));
        self.committed = true;
        Ok(())
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut sessions = lock(self.sessions);
        if self.owns(&sessions) {
            sessions.remove(&self.lobby);
        }
    }
}

/// The single authority over which lobbies have a running session.
///
/// Every operation is keyed by lobby code and routed to that lobby's
/// session actor. The registry itself only holds handles.
pub struct SessionRegistry<Q, S, R, B> {
    questions: Arc<Q>,
    scoring: Arc<S>,
    roster: Arc<R>,
    gateway: Arc<B>,
    config: Arc<EngineConfig>,
    sessions: Arc<Mutex<SessionMap>>,
}

impl<Q, S, R, B> SessionRegistry<Q, S, R, B>
where
    Q: QuestionSource,
    S: ScoringFunction,
    R: RosterStore,
    B: BroadcastGateway,
{
    /// Creates an empty registry. `config` is validated here.
    pub fn new(
        questions: Arc<Q>,
        scoring: Arc<S>,
        roster: Arc<R>,
        gateway: Arc<B>,
        config: EngineConfig,
    ) -> Self {
        Self {
            questions,
            scoring,
            roster,
            gateway,
            config: Arc::new(config.validated()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn roster(&self) -> &Arc<R> {
        &self.roster
    }

    pub fn gateway(&self) -> &Arc<B> {
        &self.gateway
    }

    // -- lifecycle ---------------------------------------------------------

    /// Starts a round in `lobby` on behalf of `host` and shows the first
    /// question.
    ///
    /// # Errors
    /// - [`EngineError::AlreadyActive`] if a session runs or is starting
    /// - [`EngineError::NotHost`] if `host` isn't the lobby's host
    /// - [`EngineError::NoQuestions`] if the lobby's question sets resolve
    ///   to nothing
    /// - [`EngineError::LobbyNotFound`] / [`EngineError::Collaborator`] if
    ///   the roster store or question source fails
    /// - [`EngineError::NoActiveSession`] if the lobby was torn down while
    ///   the start was in flight
    ///
    /// On any error nothing is registered and no timer runs.
    pub async fn start_session(
        &self,
        lobby: &LobbyCode,
        host: PlayerId,
    ) -> Result<(), EngineError> {
        let reservation = self.reserve(lobby)?;

        let roster = self.roster.get_players(lobby).await?;
        let is_host = roster.iter().any(|p| p.player_id == host && p.is_host);
        if !is_host {
            return Err(EngineError::NotHost {
                lobby: lobby.clone(),
                player: host,
            });
        }

        let settings = self.roster.lobby_settings(lobby).await?;
        let questions = self
            .questions
            .resolve_questions(&settings.question_set_ids, settings.question_count)
            .await
            .map_err(|err| match err {
                QuestionSourceError::NotFound(set) => {
                    debug!(%lobby, %set, "question set did not resolve");
                    EngineError::NoQuestions(lobby.clone())
                }
                QuestionSourceError::Unavailable(msg) => EngineError::Collaborator(msg),
            })?;

        let state = GameState::new(lobby.clone(), questions, &roster, Instant::now())?;
        let (handle, receiver) = session::session_channel(lobby.clone(), self.config.command_buffer);
        let session_id = handle.session_id();
        if let Err(err) = reservation.commit(handle) {
            info!(%lobby, "start cancelled by teardown");
            return Err(err);
        }

        session::spawn_session(
            session_id,
            receiver,
            state,
            Arc::clone(&self.config),
            Arc::clone(&self.scoring),
            Arc::clone(&self.gateway),
            self.deregister_hook(lobby, session_id),
        );
        info!(%lobby, %host, session_id, "session registered");
        Ok(())
    }

    /// Host-initiated end of the round: broadcasts `game-ended` (reason
    /// `aborted`) with the current standings, then tears the session down.
    pub async fn end_session(
        &self,
        lobby: &LobbyCode,
        requester: PlayerId,
    ) -> Result<(), EngineError> {
        let handle = self.handle(lobby)?;
        let result = handle.end(requester).await;
        self.settle(&handle, result)
    }

    /// Stops `lobby`'s session without broadcasting anything.
    ///
    /// Idempotent: tearing down an absent lobby is a no-op. A start still in
    /// flight is cancelled: it fails with [`EngineError::NoActiveSession`]
    /// and never spawns a session.
    pub async fn teardown(&self, lobby: &LobbyCode) {
        let removed = lock(&self.sessions).remove(lobby);
        let handle = match removed {
            Some(Slot::Running(handle)) => handle,
            Some(Slot::Starting(_)) => {
                info!(%lobby, "teardown: start cancelled");
                return;
            }
            None => {
                debug!(%lobby, "teardown: no session");
                return;
            }
        };
        // An actor that already stopped has nothing left to clear.
        let _ = handle.shutdown().await;
        info!(%lobby, session_id = handle.session_id(), "session torn down");
    }

    /// Tears down every session and cancels every start in flight. For
    /// process shutdown.
    pub async fn cleanup_all(&self) {
        let handles: Vec<SessionHandle> = lock(&self.sessions)
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Running(handle) => Some(handle),
                Slot::Starting(_) => None,
            })
            .collect();
        let count = handles.len();
        for handle in handles {
            let _ = handle.shutdown().await;
        }
        info!(sessions = count, "all sessions cleaned up");
    }

    // -- player operations -------------------------------------------------

    /// Submits `player`'s answer to the current question.
    ///
    /// # Errors
    /// [`EngineError::NoActiveSession`], [`EngineError::AlreadyAnswered`]
    /// (safe to ignore), [`EngineError::UnknownPlayer`],
    /// [`EngineError::QuestionClosed`].
    pub async fn submit_answer(
        &self,
        lobby: &LobbyCode,
        player: PlayerId,
        answer: impl Into<String>,
    ) -> Result<AnswerAck, EngineError> {
        let handle = self.handle(lobby)?;
        let result = handle.submit_answer(player, answer.into()).await;
        self.settle(&handle, result)
    }

    /// Marks `player` disconnected in the session and in the roster store.
    /// The player keeps their score.
    pub async fn handle_player_disconnect(
        &self,
        lobby: &LobbyCode,
        player: PlayerId,
    ) -> Result<(), EngineError> {
        let result = match self.handle(lobby) {
            Ok(handle) => {
                let result = handle.disconnect(player).await;
                self.settle(&handle, result)
            }
            Err(err) => Err(err),
        };
        self.write_connected(lobby, player, false).await;
        result
    }

    /// Marks `player` connected again and unicasts them a snapshot of the
    /// session so they can render mid-question.
    ///
    /// # Errors
    /// [`EngineError::ReconnectExpired`] if the player stayed away past the
    /// grace period.
    pub async fn handle_player_reconnect(
        &self,
        lobby: &LobbyCode,
        player: PlayerId,
    ) -> Result<SessionSnapshot, EngineError> {
        let handle = self.handle(lobby)?;
        let result = handle.reconnect(player).await;
        let snapshot = self.settle(&handle, result)?;
        self.write_connected(lobby, player, true).await;
        Ok(snapshot)
    }

    // -- queries -----------------------------------------------------------

    /// Whether `lobby` has a running session.
    pub fn is_active(&self, lobby: &LobbyCode) -> bool {
        matches!(
            lock(&self.sessions).get(lobby),
            Some(Slot::Running(handle)) if !handle.is_closed()
        )
    }

    /// Reconnect-vs-fresh-join predicate for the gateway.
    pub fn is_game_active(&self, lobby: &LobbyCode) -> bool {
        self.is_active(lobby)
    }

    /// A copy of the lobby's full game state.
    pub async fn snapshot(&self, lobby: &LobbyCode) -> Result<GameState, EngineError> {
        let handle = self.handle(lobby)?;
        let result = handle.state().await;
        self.settle(&handle, result)
    }

    pub async fn info(&self, lobby: &LobbyCode) -> Result<SessionInfo, EngineError> {
        let handle = self.handle(lobby)?;
        let result = handle.info().await;
        self.settle(&handle, result)
    }

    /// Which of the lobby's timers are armed.
    pub async fn timer_status(&self, lobby: &LobbyCode) -> Result<TimerStatus, EngineError> {
        self.info(lobby).await.map(|info| info.timers)
    }

    /// Lobbies with a running session, sorted.
    pub fn active_lobbies(&self) -> Vec<LobbyCode> {
        let mut lobbies: Vec<LobbyCode> = lock(&self.sessions)
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
            .map(|(lobby, _)| lobby.clone())
            .collect();
        lobbies.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        lobbies
    }

    /// Number of running sessions.
    pub fn session_count(&self) -> usize {
        lock(&self.sessions)
            .values()
            .filter(|slot| matches!(slot, Slot::Running(_)))
            .count()
    }

    // -- internals ---------------------------------------------------------

    fn reserve(&self, lobby: &LobbyCode) -> Result<Reservation<'_>, EngineError> {
        let mut sessions = lock(&self.sessions);
        match sessions.get(lobby) {
            Some(Slot::Starting(_)) => return Err(EngineError::AlreadyActive(lobby.clone())),
            Some(Slot::Running(handle)) if !handle.is_closed() => {
                return Err(EngineError::AlreadyActive(lobby.clone()));
            }
            Some(Slot::Running(handle)) => {
                warn!(%lobby, session_id = handle.session_id(), "reaping dead session");
            }
            None => {}
        }
        let id = NEXT_RESERVATION.fetch_add(1, Ordering::Relaxed);
        sessions.insert(lobby.clone(), Slot::Starting(id));
        Ok(Reservation {
            sessions: &self.sessions,
            lobby: lobby.clone(),
            id,
            committed: false,
        })
    }

    fn handle(&self, lobby: &LobbyCode) -> Result<SessionHandle, EngineError> {
        match lock(&self.sessions).get(lobby) {
            Some(Slot::Running(handle)) => Ok(handle.clone()),
            _ => Err(EngineError::NoActiveSession(lobby.clone())),
        }
    }

    /// Passes `result` through, dropping the registry entry first if the
    /// call failed because the actor is gone.
    fn settle<T>(
        &self,
        handle: &SessionHandle,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        if matches!(result, Err(EngineError::NoActiveSession(_))) && handle.is_closed() {
            let mut sessions = lock(&self.sessions);
            let same = matches!(
                sessions.get(handle.lobby()),
                Some(Slot::Running(current)) if current.session_id() == handle.session_id()
            );
            if same {
                sessions.remove(handle.lobby());
                warn!(
                    lobby = %handle.lobby(),
                    session_id = handle.session_id(),
                    "reaped dead session"
                );
            }
        }
        result
    }

    /// Removes the lobby's entry if it still belongs to `session_id`.
    fn deregister_hook(&self, lobby: &LobbyCode, session_id: u64) -> OnExit {
        let sessions: Weak<Mutex<SessionMap>> = Arc::downgrade(&self.sessions);
        let lobby = lobby.clone();
        Box::new(move || {
            let Some(sessions) = sessions.upgrade() else {
                return;
            };
            let mut sessions = lock(&sessions);
            let same = matches!(
                sessions.get(&lobby),
                Some(Slot::Running(handle)) if handle.session_id() == session_id
            );
            if same {
                sessions.remove(&lobby);
                debug!(%lobby, session_id, "session deregistered");
            }
        })
    }

    async fn write_connected(&self, lobby: &LobbyCode, player: PlayerId, connected: bool) {
        if let Err(err) = self.roster.set_connected(lobby, player, connected).await {
            warn!(%lobby, %player, connected, error = %err, "roster connection update failed");
        }
    }
}
