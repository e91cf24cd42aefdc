//! In-memory collaborators for local play and tests.
//!
//! None of these persist anything or check credentials. They exist so the
//! server can run end to end without the rest of the platform.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use quizarena_engine::{
    LobbySettings, QuestionSource, QuestionSourceError, RosterEntry, RosterError,
    RosterStore, ScoreInput, ScoreOutcome, ScoringFunction,
};
use quizarena_protocol::{LobbyCode, PlayerId, QuestionRecord};
use rand::seq::SliceRandom;

use crate::{AuthError, Authenticator, Identity, LobbyDirectory};

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

/// Accepts `"<id>"` or `"<id>:<name>"` as a token.
///
/// Only for development. Anyone can claim any id.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericTokenAuth;

impl Authenticator for NumericTokenAuth {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let (id, name) = match token.split_once(':') {
            Some((id, name)) => (id, name.trim()),
            None => (token, ""),
        };
        let id: u64 = id
            .trim()
            .parse()
            .map_err(|_| AuthError::Rejected("token must start with a number".into()))?;
        let username = if name.is_empty() {
            format!("player-{id}")
        } else {
            name.to_string()
        };
        Ok(Identity {
            player_id: PlayerId(id),
            username,
        })
    }
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

struct DevLobby {
    players: BTreeMap<PlayerId, RosterEntry>,
    settings: LobbySettings,
}

/// Lobbies kept in a map. The first player to join a lobby creates it and
/// becomes its host.
pub struct InMemoryRoster {
    lobbies: Mutex<HashMap<LobbyCode, DevLobby>>,
    default_settings: LobbySettings,
}

impl InMemoryRoster {
    /// Lobbies created by a join get `default_settings`.
    pub fn new(default_settings: LobbySettings) -> Self {
        Self {
            lobbies: Mutex::new(HashMap::new()),
            default_settings,
        }
    }

    fn lobbies(&self) -> MutexGuard<'_, HashMap<LobbyCode, DevLobby>> {
        self.lobbies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates (or reconfigures) `lobby` ahead of any join.
    pub fn configure_lobby(&self, lobby: &LobbyCode, settings: LobbySettings) {
        self.lobbies()
            .entry(lobby.clone())
            .and_modify(|l| l.settings = settings.clone())
            .or_insert_with(|| DevLobby {
                players: BTreeMap::new(),
                settings,
            });
    }

    /// Current members, ordered by player id.
    pub fn members(&self, lobby: &LobbyCode) -> Vec<RosterEntry> {
        self.lobbies()
            .get(lobby)
            .map(|l| l.players.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl RosterStore for InMemoryRoster {
    async fn get_players(&self, lobby: &LobbyCode) -> Result<Vec<RosterEntry>, RosterError> {
        self.lobbies()
            .get(lobby)
            .map(|l| l.players.values().cloned().collect())
            .ok_or_else(|| RosterError::LobbyNotFound(lobby.clone()))
    }

    async fn set_connected(
        &self,
        lobby: &LobbyCode,
        player: PlayerId,
        connected: bool,
    ) -> Result<(), RosterError> {
        let mut lobbies = self.lobbies();
        let entry = lobbies
            .get_mut(lobby)
            .ok_or_else(|| RosterError::LobbyNotFound(lobby.clone()))?
            .players
            .get_mut(&player)
            .ok_or_else(|| RosterError::PlayerNotFound {
                lobby: lobby.clone(),
                player,
            })?;
        entry.is_connected = connected;
        Ok(())
    }

    async fn lobby_settings(&self, lobby: &LobbyCode) -> Result<LobbySettings, RosterError> {
        self.lobbies()
            .get(lobby)
            .map(|l| l.settings.clone())
            .ok_or_else(|| RosterError::LobbyNotFound(lobby.clone()))
    }
}

impl LobbyDirectory for InMemoryRoster {
    async fn join(&self, lobby: &LobbyCode, identity: &Identity) -> Result<RosterEntry, RosterError> {
        let mut lobbies = self.lobbies();
        let dev_lobby = lobbies.entry(lobby.clone()).or_insert_with(|| DevLobby {
            players: BTreeMap::new(),
            settings: self.default_settings.clone(),
        });
        let is_host = !dev_lobby.players.values().any(|p| p.is_host);
        let entry = dev_lobby
            .players
            .entry(identity.player_id)
            .or_insert_with(|| RosterEntry {
                player_id: identity.player_id,
                username: identity.username.clone(),
                is_host,
                is_connected: true,
            });
        entry.is_connected = true;
        Ok(entry.clone())
    }

    async fn leave(&self, lobby: &LobbyCode, player: PlayerId) -> Result<(), RosterError> {
        let mut lobbies = self.lobbies();
        let dev_lobby = lobbies
            .get_mut(lobby)
            .ok_or_else(|| RosterError::LobbyNotFound(lobby.clone()))?;
        let removed = dev_lobby
            .players
            .remove(&player)
            .ok_or_else(|| RosterError::PlayerNotFound {
                lobby: lobby.clone(),
                player,
            })?;

        // Hand the lobby to the longest-standing member.
        if removed.is_host {
            if let Some(next) = dev_lobby.players.values_mut().next() {
                next.is_host = true;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Question bank
// ---------------------------------------------------------------------------

/// Named question sets kept in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQuestionBank {
    sets: HashMap<String, Vec<QuestionRecord>>,
    shuffle: bool,
}

impl InMemoryQuestionBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_set(mut self, id: impl Into<String>, questions: Vec<QuestionRecord>) -> Self {
        self.sets.insert(id.into(), questions);
        self
    }

    /// Shuffle the resolved sequence before truncating it.
    pub fn shuffled(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }
}

impl QuestionSource for InMemoryQuestionBank {
    async fn resolve_questions(
        &self,
        question_set_ids: &[String],
        count: usize,
    ) -> Result<Vec<QuestionRecord>, QuestionSourceError> {
        let mut questions = Vec::new();
        for id in question_set_ids {
            let set = self
                .sets
                .get(id)
                .ok_or_else(|| QuestionSourceError::NotFound(id.clone()))?;
            questions.extend(set.iter().cloned());
        }
        if self.shuffle {
            questions.shuffle(&mut rand::rng());
        }
        questions.truncate(count);
        if questions.is_empty() {
            return Err(QuestionSourceError::NotFound(question_set_ids.join(",")));
        }
        Ok(questions)
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Points for speed, multiplied by a streak bonus.
///
/// A correct answer is worth between half and all of `base_points`
/// depending on how fast it came, times the player's multiplier. Each
/// consecutive correct answer raises the multiplier by `streak_step`, up to
/// `max_multiplier`. A wrong or missing answer resets both.
#[derive(Debug, Clone)]
pub struct StreakScoring {
    pub base_points: i64,
    pub streak_step: f64,
    pub max_multiplier: f64,
}

impl Default for StreakScoring {
    fn default() -> Self {
        Self {
            base_points: 1_000,
            streak_step: 0.1,
            max_multiplier: 2.0,
        }
    }
}

impl ScoringFunction for StreakScoring {
    fn score(&self, input: &ScoreInput<'_>) -> ScoreOutcome {
        let correct = input.answer.is_some_and(|answer| {
            answer.trim().eq_ignore_ascii_case(input.correct_answer.trim())
        });
        if !correct {
            return ScoreOutcome {
                delta: 0,
                multiplier: 1.0,
                streak: 0,
            };
        }

        let used = if input.time_limit_ms == 0 {
            1.0
        } else {
            (input.elapsed_ms as f64 / input.time_limit_ms as f64).clamp(0.0, 1.0)
        };
        let speed = 1.0 - used / 2.0;
        let delta = (self.base_points as f64 * speed * input.multiplier).round() as i64;

        let streak = input.streak + 1;
        let multiplier = (1.0 + self.streak_step * f64::from(streak)).min(self.max_multiplier);
        ScoreOutcome {
            delta,
            multiplier,
            streak,
        }
    }
}
