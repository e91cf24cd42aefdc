use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use quizarena::dev::{InMemoryQuestionBank, InMemoryRoster, NumericTokenAuth, StreakScoring};
use quizarena::prelude::*;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Question sets
// ---------------------------------------------------------------------------

fn q(id: &str, text: &str, options: [&str; 4], correct: &str, secs: u32) -> QuestionRecord {
    QuestionRecord {
        id: id.into(),
        text: text.into(),
        options: options.iter().map(|o| o.to_string()).collect(),
        correct_answer: correct.into(),
        time_limit_secs: secs,
    }
}

fn geography() -> Vec<QuestionRecord> {
    vec![
        q("geo-1", "Capital of Australia?", ["Sydney", "Canberra", "Melbourne", "Perth"], "Canberra", 15),
        q("geo-2", "Longest river in Europe?", ["Danube", "Rhine", "Volga", "Loire"], "Volga", 15),
        q("geo-3", "Which country has the most islands?", ["Sweden", "Indonesia", "Philippines", "Canada"], "Sweden", 20),
        q("geo-4", "Highest mountain in Africa?", ["Kenya", "Kilimanjaro", "Elgon", "Meru"], "Kilimanjaro", 10),
    ]
}

fn science() -> Vec<QuestionRecord> {
    vec![
        q("sci-1", "Chemical symbol for gold?", ["Ag", "Au", "Gd", "Go"], "Au", 10),
        q("sci-2", "Planet with the shortest day?", ["Mercury", "Earth", "Jupiter", "Mars"], "Jupiter", 15),
        q("sci-3", "How many bones in an adult human?", ["196", "206", "216", "226"], "206", 15),
        q("sci-4", "Speed of light is closest to (km/s)?", ["3,000", "30,000", "300,000", "3,000,000"], "300,000", 20),
    ]
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Reads `name` from the environment, falling back to `default` when unset
/// or unparsable.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, value = %raw, "ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}

fn engine_config() -> EngineConfig {
    let advance_ms: u64 = env_or("QUIZ_ADVANCE_DELAY_MS", 5_000);
    // 0 turns the grace period off: disconnected players can always return.
    let grace_secs: u64 = env_or("QUIZ_RECONNECT_GRACE_SECS", 30);
    EngineConfig {
        advance_delay: Duration::from_millis(advance_ms),
        reconnect_grace: (grace_secs > 0).then(|| Duration::from_secs(grace_secs)),
        ..EngineConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind: String = env_or("QUIZ_BIND", "0.0.0.0:8080".to_string());
    let bank = InMemoryQuestionBank::new()
        .with_set("geography", geography())
        .with_set("science", science())
        .shuffled(true);
    let roster = Arc::new(InMemoryRoster::new(LobbySettings {
        question_set_ids: vec!["geography".into(), "science".into()],
        question_count: 6,
    }));

    let server = QuizServer::builder()
        .bind(&bind)
        .engine_config(engine_config())
        .build(NumericTokenAuth, bank, StreakScoring::default(), roster)
        .await?;
    tracing::info!(addr = %server.local_addr()?, "quiz night is open");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_sets_answerable() {
        for question in geography().iter().chain(science().iter()) {
            assert!(
                question.options.contains(&question.correct_answer),
                "{} has no matching option",
                question.id
            );
            assert!(question.time_limit_secs > 0);
        }
    }

    #[test]
    fn test_env_or_falls_back_when_unset() {
        let value: u64 = env_or("QUIZ_NIGHT_TEST_UNSET_VARIABLE", 17);
        assert_eq!(value, 17);
    }
}
