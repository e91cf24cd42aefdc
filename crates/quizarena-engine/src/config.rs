//! Engine configuration.

use std::time::Duration;

use quizarena_tick::TimerConfig;
use tracing::warn;

/// Knobs shared by every session the registry starts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long results stay on screen before the next question starts.
    pub advance_delay: Duration,

    /// `time-warning` is broadcast once when the countdown reaches each of
    /// these values (seconds remaining).
    pub warning_marks: Vec<u32>,

    /// Close a question as soon as every connected player has answered
    /// instead of waiting out the clock.
    pub early_end: bool,

    /// How long a disconnected player may stay away before being dropped.
    /// `None` keeps disconnected players in the round indefinitely.
    pub reconnect_grace: Option<Duration>,

    /// Capacity of each session's command channel.
    pub command_buffer: usize,

    /// Countdown timer settings.
    pub timers: TimerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            advance_delay: Duration::from_secs(5),
            warning_marks: vec![10, 5],
            early_end: true,
            reconnect_grace: Some(Duration::from_secs(30)),
            command_buffer: 64,
            timers: TimerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Normalizes the config: warning marks sorted descending without
    /// duplicates or zero, a non-empty command buffer, validated timers.
    ///
    /// Called by [`SessionRegistry::new`](crate::SessionRegistry::new).
    pub fn validated(mut self) -> Self {
        self.warning_marks.retain(|&mark| mark > 0);
        self.warning_marks.sort_unstable_by(|a, b| b.cmp(a));
        self.warning_marks.dedup();
        if self.command_buffer == 0 {
            warn!("command_buffer of 0 is not allowed, using 1");
            self.command_buffer = 1;
        }
        self.timers = self.timers.validated();
        self
    }

    /// Whether `time_remaining` is a configured warning mark.
    pub fn is_warning_mark(&self, time_remaining: u32) -> bool {
        self.warning_marks.contains(&time_remaining)
    }
}
