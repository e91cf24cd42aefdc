//! Inbound client messages and outbound server events.
//!
//! Outbound events use adjacent tagging so every frame has the same shape:
//!
//! ```json
//! { "event": "time-update", "data": { "timeRemaining": 7 } }
//! ```
//!
//! Inbound messages use a flat `"type"` tag:
//!
//! ```json
//! { "type": "SubmitAnswer", "answer": "Paris" }
//! ```

use serde::{Deserialize, Serialize};

use crate::{LobbyCode, PlayerId, PublicQuestion, SessionPhase};

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Everything a client can ask the server to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// First message on every connection. The token is handed to the
    /// server's authenticator.
    Handshake { token: String },

    /// Subscribe to a lobby's channel. Doubles as "reconnect" when the
    /// lobby already has a game running.
    JoinLobby { lobby: LobbyCode },

    /// Host only: start the round for the joined lobby.
    StartGame,

    /// Answer the current question.
    SubmitAnswer { answer: String },

    /// Host only: end the running round early.
    EndGame,

    /// Unsubscribe from the current lobby.
    LeaveLobby,

    /// Keep-alive; echoed back as `heartbeat-ack`.
    Heartbeat { client_time: u64 },
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Why a session reached its terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    /// Every question was played.
    Completed,
    /// The host ended the round early.
    Aborted,
}

/// One player's outcome for a graded question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    pub player_id: PlayerId,
    pub username: String,
    pub answered: bool,
    pub correct: bool,
    pub delta: i64,
    pub score: i64,
    pub streak: u32,
}

/// A row of the leaderboard sent with `game-ended`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    /// 1-based; players with equal scores share a rank.
    pub rank: usize,
    pub player_id: PlayerId,
    pub username: String,
    pub score: i64,
    pub correct_answers: u32,
    /// The player disconnected and never came back within the grace period.
    pub dropped: bool,
}

/// Everything a reconnecting client needs to render mid-question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub lobby: LobbyCode,
    pub phase: SessionPhase,
    /// `None` before the first question and after the session ended.
    pub question: Option<PublicQuestion>,
    pub question_index: usize,
    pub total_questions: usize,
    pub time_remaining: u32,
    pub has_answered: bool,
    pub score: i64,
    pub streak: u32,
    pub multiplier: f64,
    pub correct_answers: u32,
}

/// Every event the server can push to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Handshake accepted.
    Welcome { player_id: PlayerId },

    /// Subscription to a lobby confirmed. `reconnected` is true when the
    /// lobby already had a game running and the player was resynchronized.
    LobbyJoined { lobby: LobbyCode, reconnected: bool },

    HeartbeatAck { client_time: u64 },

    /// A new question is on screen. Never carries the correct answer.
    QuestionStarted {
        question: PublicQuestion,
        question_index: usize,
        total_questions: usize,
        time_remaining: u32,
    },

    /// Sent every countdown tick.
    TimeUpdate { time_remaining: u32 },

    /// Sent once per configured mark (10 s and 5 s by default).
    TimeWarning { time_remaining: u32 },

    /// Unicast to the submitter: the outcome of their own answer. Never
    /// published on the lobby channel, so other players can't read the
    /// delta (and with it, whether the answer was right) mid-question.
    AnswerReceived {
        player_id: PlayerId,
        delta: i64,
        correct: bool,
        score: i64,
        streak: u32,
        multiplier: f64,
    },

    /// Lobby-wide "N of M answered" update. The lobby's view of a
    /// submission; carries no delta or correctness.
    AnswerProgress {
        player_id: PlayerId,
        answered: usize,
        total: usize,
    },

    /// The question closed; reveals the correct answer and everyone's delta.
    QuestionEnded {
        question_index: usize,
        correct_answer: String,
        results: Vec<PlayerResult>,
    },

    /// The session is over.
    GameEnded {
        reason: EndReason,
        final_scores: Vec<Standing>,
    },

    /// Unicast to a reconnecting player.
    SessionSnapshot(SessionSnapshot),

    /// Unicast to the connection whose request failed.
    Error { code: u16, message: String },
}

impl ServerEvent {
    /// The wire name of this event (the `"event"` tag).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::LobbyJoined { .. } => "lobby-joined",
            Self::HeartbeatAck { .. } => "heartbeat-ack",
            Self::QuestionStarted { .. } => "question-started",
            Self::TimeUpdate { .. } => "time-update",
            Self::TimeWarning { .. } => "time-warning",
            Self::AnswerReceived { .. } => "answer-received",
            Self::AnswerProgress { .. } => "answer-progress",
            Self::QuestionEnded { .. } => "question-ended",
            Self::GameEnded { .. } => "game-ended",
            Self::SessionSnapshot(_) => "session-snapshot",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_time_update_json_format() {
        let json = serde_json::to_value(ServerEvent::TimeUpdate {
            time_remaining: 7,
        })
        .unwrap();
        assert_eq!(json, json!({"event": "time-update", "data": {"timeRemaining": 7}}));
    }

    #[test]
    fn test_question_started_hides_correct_answer() {
        let event = ServerEvent::QuestionStarted {
            question: PublicQuestion {
                id: "q1".into(),
                text: "2 + 2?".into(),
                options: vec!["3".into(), "4".into()],
                time_limit_secs: 10,
            },
            question_index: 0,
            total_questions: 2,
            time_remaining: 10,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "question-started");
        assert_eq!(json["data"]["totalQuestions"], 2);
        assert!(!json.to_string().contains("correct"));
    }

    #[test]
    fn test_game_ended_json_format() {
        let event = ServerEvent::GameEnded {
            reason: EndReason::Completed,
            final_scores: vec![Standing {
                rank: 1,
                player_id: PlayerId(1),
                username: "ada".into(),
                score: 1200,
                correct_answers: 2,
                dropped: false,
            }],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "game-ended");
        assert_eq!(json["data"]["reason"], "completed");
        assert_eq!(json["data"]["finalScores"][0]["playerId"], 1);
        assert_eq!(json["data"]["finalScores"][0]["correctAnswers"], 2);
    }

    #[test]
    fn test_name_matches_serialized_tag() {
        let events = [
            ServerEvent::TimeWarning { time_remaining: 5 },
            ServerEvent::Error {
                code: 404,
                message: "nope".into(),
            },
            ServerEvent::AnswerProgress {
                player_id: PlayerId(2),
                answered: 1,
                total: 3,
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
        }
    }

    #[test]
    fn test_client_message_flat_tag_and_camel_case_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"Heartbeat","clientTime":99}"#)
                .unwrap();
        assert_eq!(msg, ClientMessage::Heartbeat { client_time: 99 });

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"JoinLobby","lobby":"abc123"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinLobby {
                lobby: LobbyCode::new("ABC123")
            }
        );
    }

    #[test]
    fn test_client_message_unit_variant() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"StartGame"}"#).unwrap();
        assert_eq!(msg, ClientMessage::StartGame);
    }
}
