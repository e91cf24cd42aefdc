//! Question records as resolved by the question source, and the redacted
//! view that is safe to show players.

use serde::{Deserialize, Serialize};

/// One question in a session's sequence, including its correct answer.
///
/// This is the engine's private copy. It is never broadcast as-is: clients
/// only ever see a [`PublicQuestion`] until the question has been graded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    /// Stable identifier from the question bank.
    pub id: String,
    /// The prompt shown to players.
    pub text: String,
    /// Answer options, in display order.
    pub options: Vec<String>,
    /// The option text that counts as correct.
    pub correct_answer: String,
    /// Seconds players get to answer.
    pub time_limit_secs: u32,
}

impl QuestionRecord {
    /// Returns the redacted view of this question (no correct answer).
    pub fn public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id.clone(),
            text: self.text.clone(),
            options: self.options.clone(),
            time_limit_secs: self.time_limit_secs,
        }
    }

    /// Whether `answer` matches the correct answer.
    ///
    /// Comparison ignores surrounding whitespace and ASCII case, so
    /// `" paris"` matches `"Paris"`.
    pub fn is_correct(&self, answer: &str) -> bool {
        answer.trim().eq_ignore_ascii_case(self.correct_answer.trim())
    }
}

/// What players see while a question is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub time_limit_secs: u32,
}
