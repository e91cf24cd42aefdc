//! Per-lobby timers for QuizArena.
//!
//! Every lobby owns one [`LobbyTimers`]: at most one repeating countdown
//! (the one-second question clock) and at most one pending "advance" timer
//! (the pause between a question's results and the next question). Arming
//! either kind first cancels the existing one of that kind, so the
//! one-of-each invariant holds by construction.
//!
//! # Integration
//!
//! `LobbyTimers` is designed to sit inside a session actor's `tokio::select!`
//! loop next to its command channel:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* answers, disconnects, ... */ }
//!         event = timers.next_event() => match event {
//!             TimerEvent::Tick { .. } => { /* decrement time remaining */ }
//!             TimerEvent::AdvanceDue => { /* next question or game over */ }
//!         }
//!     }
//! }
//! ```
//!
//! [`LobbyTimers::next_event`] pends forever while nothing is armed and is
//! cancel-safe, so losing a `select!` race never loses a tick.

use std::pin::Pin;
use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when the countdown falls behind (the actor was busy past a
/// tick deadline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPolicy {
    /// Fire once for the missed tick, then realign to the original cadence
    /// and drop the rest. A countdown never fires a burst of stale seconds.
    #[default]
    Skip,
    /// Fire every missed tick back to back until caught up.
    Burst,
    /// Fire once, then restart the cadence from now.
    Delay,
}

impl From<TickPolicy> for MissedTickBehavior {
    fn from(policy: TickPolicy) -> Self {
        match policy {
            TickPolicy::Skip => MissedTickBehavior::Skip,
            TickPolicy::Burst => MissedTickBehavior::Burst,
            TickPolicy::Delay => MissedTickBehavior::Delay,
        }
    }
}

/// Configuration shared by every lobby's timers.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Period of the countdown. One second for a human-facing clock.
    pub tick_interval: Duration,
    /// Late-tick handling policy.
    pub policy: TickPolicy,
    /// Random jitter (0–max µs) added to the *first* tick of a countdown so
    /// lobbies started in the same instant don't all tick together.
    pub initial_jitter_us: u64,
    /// A tick observed later than this fraction of `tick_interval` counts as
    /// late in [`TimerMetrics`] and is logged.
    pub late_tick_fraction: f64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            policy: TickPolicy::default(),
            initial_jitter_us: 2_000,
            late_tick_fraction: 0.10,
        }
    }
}

impl TimerConfig {
    /// Shortest countdown period accepted. `tokio::time::interval` panics on
    /// a zero period.
    pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

    /// Creates a config with the given period and default settings.
    pub fn with_interval(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`LobbyTimers::new`].
    pub fn validated(mut self) -> Self {
        if self.tick_interval < Self::MIN_TICK_INTERVAL {
            warn!(
                interval_ms = self.tick_interval.as_millis() as u64,
                min_ms = Self::MIN_TICK_INTERVAL.as_millis() as u64,
                "tick_interval below minimum, clamping"
            );
            self.tick_interval = Self::MIN_TICK_INTERVAL;
        }
        self.late_tick_fraction = self.late_tick_fraction.clamp(0.0, 1.0);
        self
    }
}

// ---------------------------------------------------------------------------
// Events, status, metrics
// ---------------------------------------------------------------------------

/// A timer that fired, returned by [`LobbyTimers::next_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// The countdown ticked.
    Tick {
        /// 1-based tick number within the current countdown. Restarts at 1
        /// every time a countdown is (re)started.
        seq: u64,
        /// How far past its deadline the tick was observed.
        late_by: Duration,
    },
    /// The advance timer elapsed. It is disarmed once this is returned.
    AdvanceDue,
}

/// Which timers are currently armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerStatus {
    pub countdown_active: bool,
    pub advance_pending: bool,
}

impl TimerStatus {
    /// Number of live timers (0, 1 or 2).
    pub fn live_count(&self) -> usize {
        usize::from(self.countdown_active) + usize::from(self.advance_pending)
    }
}

/// Counters for one lobby's timers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerMetrics {
    pub countdowns_started: u64,
    pub ticks_fired: u64,
    pub late_ticks: u64,
    pub advances_scheduled: u64,
    pub advances_fired: u64,
    /// Timers that were replaced or cancelled before firing.
    pub cancellations: u64,
}

// ---------------------------------------------------------------------------
// LobbyTimers
// ---------------------------------------------------------------------------

struct Countdown {
    interval: Interval,
    ticks: u64,
}

enum Fired {
    Tick(Instant),
    Advance,
}

/// The countdown and advance timers of a single lobby.
pub struct LobbyTimers {
    config: TimerConfig,
    countdown: Option<Countdown>,
    /// Boxed so the `Sleep` stays pinned across `select!` iterations.
    advance: Option<Pin<Box<Sleep>>>,
    metrics: TimerMetrics,
}

impl LobbyTimers {
    /// Creates a timer set with nothing armed.
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config: config.validated(),
            countdown: None,
            advance: None,
            metrics: TimerMetrics::default(),
        }
    }

    /// Starts the countdown, cancelling any countdown already running.
    ///
    /// The first tick fires one `tick_interval` from now (plus jitter), so a
    /// question with a 10 s limit reaches zero after ten ticks.
    pub fn start_countdown(&mut self) {
        if self.countdown.take().is_some() {
            self.metrics.cancellations += 1;
            debug!("replacing running countdown");
        }

        let jitter = if self.config.initial_jitter_us > 0 {
            let us = rand::rng().random_range(0..self.config.initial_jitter_us);
            Duration::from_micros(us)
        } else {
            Duration::ZERO
        };

        let period = self.config.tick_interval;
        let mut interval = time::interval_at(Instant::now() + period + jitter, period);
        interval.set_missed_tick_behavior(self.config.policy.into());

        self.countdown = Some(Countdown { interval, ticks: 0 });
        self.metrics.countdowns_started += 1;
        trace!(period_ms = period.as_millis() as u64, "countdown started");
    }

    /// Stops the countdown. Returns `true` if one was running.
    pub fn stop_countdown(&mut self) -> bool {
        let stopped = self.countdown.take().is_some();
        if stopped {
            trace!("countdown stopped");
        }
        stopped
    }

    /// Arms the advance timer, cancelling any advance already pending.
    pub fn schedule_advance(&mut self, delay: Duration) {
        if self.advance.take().is_some() {
            self.metrics.cancellations += 1;
            debug!("replacing pending advance timer");
        }
        self.advance = Some(Box::pin(time::sleep(delay)));
        self.metrics.advances_scheduled += 1;
        trace!(delay_ms = delay.as_millis() as u64, "advance scheduled");
    }

    /// Disarms the advance timer. Returns `true` if one was pending.
    pub fn cancel_advance(&mut self) -> bool {
        let cancelled = self.advance.take().is_some();
        if cancelled {
            self.metrics.cancellations += 1;
        }
        cancelled
    }

    /// Disarms everything. Safe to call in any state, any number of times.
    pub fn clear_all(&mut self) {
        self.stop_countdown();
        self.cancel_advance();
    }

    /// Waits for the next armed timer to fire.
    ///
    /// With nothing armed this future never resolves, which lets it sit in a
    /// `select!` next to a command channel. When both timers are armed and
    /// due, the advance timer wins.
    pub async fn next_event(&mut self) -> TimerEvent {
        let fired = match (self.countdown.as_mut(), self.advance.as_mut()) {
            (None, None) => return std::future::pending::<TimerEvent>().await,
            (Some(countdown), None) => Fired::Tick(countdown.interval.tick().await),
            (None, Some(advance)) => {
                advance.as_mut().await;
                Fired::Advance
            }
            (Some(countdown), Some(advance)) => tokio::select! {
                biased;
                () = advance.as_mut() => Fired::Advance,
                at = countdown.interval.tick() => Fired::Tick(at),
            },
        };

        match fired {
            Fired::Advance => {
                self.advance = None;
                self.metrics.advances_fired += 1;
                trace!("advance timer fired");
                TimerEvent::AdvanceDue
            }
            Fired::Tick(deadline) => {
                let late_by = Instant::now().saturating_duration_since(deadline);
                let threshold = self.config.tick_interval.mul_f64(self.config.late_tick_fraction);
                self.metrics.ticks_fired += 1;
                if late_by > threshold {
                    self.metrics.late_ticks += 1;
                    warn!(
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "countdown tick fired late"
                    );
                }
                let seq = match self.countdown.as_mut() {
                    Some(countdown) => {
                        countdown.ticks += 1;
                        countdown.ticks
                    }
                    None => 0,
                };
                trace!(seq, "countdown tick");
                TimerEvent::Tick { seq, late_by }
            }
        }
    }

    /// Whether a countdown is running.
    pub fn countdown_active(&self) -> bool {
        self.countdown.is_some()
    }

    /// Whether an advance timer is pending.
    pub fn advance_pending(&self) -> bool {
        self.advance.is_some()
    }

    /// Snapshot of which timers are armed.
    pub fn status(&self) -> TimerStatus {
        TimerStatus {
            countdown_active: self.countdown_active(),
            advance_pending: self.advance_pending(),
        }
    }

    /// Ticks fired by the current countdown (0 if none is running).
    pub fn countdown_ticks(&self) -> u64 {
        self.countdown.as_ref().map_or(0, |c| c.ticks)
    }

    /// Counters since creation.
    pub fn metrics(&self) -> &TimerMetrics {
        &self.metrics
    }

    /// The validated configuration.
    pub fn config(&self) -> &TimerConfig {
        &self.config
    }
}

impl Default for LobbyTimers {
    fn default() -> Self {
        Self::new(TimerConfig::default())
    }
}
