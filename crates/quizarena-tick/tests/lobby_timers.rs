//! Integration tests for per-lobby timers.
//!
//! Uses `start_paused = true` so Tokio's clock only moves when every task is
//! idle, which makes deadlines exact and the tests instant.

use std::time::Duration;

use quizarena_tick::{LobbyTimers, TickPolicy, TimerConfig, TimerEvent, TimerStatus};
use tokio::time::Instant;

// =========================================================================
// Helpers
// =========================================================================

fn timers() -> LobbyTimers {
    LobbyTimers::new(TimerConfig {
        initial_jitter_us: 0,
        ..TimerConfig::default()
    })
}

fn assert_close(actual: Duration, expected: Duration) {
    let slack = Duration::from_millis(5);
    assert!(
        actual >= expected && actual <= expected + slack,
        "expected ~{expected:?}, got {actual:?}"
    );
}

// =========================================================================
// TimerConfig
// =========================================================================

#[test]
fn test_default_config_ticks_every_second() {
    let cfg = TimerConfig::default();
    assert_eq!(cfg.tick_interval, Duration::from_secs(1));
    assert_eq!(cfg.policy, TickPolicy::Skip);
}

#[test]
fn test_validated_clamps_zero_interval() {
    let cfg = TimerConfig::with_interval(Duration::ZERO).validated();
    assert_eq!(cfg.tick_interval, TimerConfig::MIN_TICK_INTERVAL);
}

#[test]
fn test_validated_clamps_late_fraction() {
    let cfg = TimerConfig {
        late_tick_fraction: 4.0,
        ..TimerConfig::default()
    }
    .validated();
    assert_eq!(cfg.late_tick_fraction, 1.0);
}

// =========================================================================
// Nothing armed
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_next_event_pends_when_nothing_armed() {
    let mut t = timers();
    assert_eq!(t.status(), TimerStatus::default());

    let result = tokio::time::timeout(Duration::from_secs(60), t.next_event()).await;
    assert!(result.is_err(), "idle timers should never fire");
}

// =========================================================================
// Countdown
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_countdown_first_tick_after_one_interval() {
    let mut t = timers();
    let start = Instant::now();
    t.start_countdown();

    let event = t.next_event().await;

    assert!(matches!(event, TimerEvent::Tick { seq: 1, .. }));
    assert_close(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_countdown_ticks_are_sequential() {
    let mut t = timers();
    t.start_countdown();

    for expected in 1..=5 {
        match t.next_event().await {
            TimerEvent::Tick { seq, .. } => assert_eq!(seq, expected),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(t.countdown_ticks(), 5);
    assert_eq!(t.metrics().ticks_fired, 5);
    assert_eq!(t.metrics().late_ticks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_restarting_countdown_replaces_it() {
    let mut t = timers();
    t.start_countdown();
    t.next_event().await;
    t.next_event().await;

    t.start_countdown();

    assert!(t.countdown_active());
    assert_eq!(t.countdown_ticks(), 0);
    assert!(matches!(t.next_event().await, TimerEvent::Tick { seq: 1, .. }));
    assert_eq!(t.metrics().countdowns_started, 2);
    assert_eq!(t.metrics().cancellations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_countdown_silences_ticks() {
    let mut t = timers();
    t.start_countdown();

    assert!(t.stop_countdown());
    assert!(!t.stop_countdown(), "second stop is a no-op");
    assert!(!t.countdown_active());

    let result = tokio::time::timeout(Duration::from_secs(5), t.next_event()).await;
    assert!(result.is_err());
}

// =========================================================================
// Advance timer
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_advance_fires_once_after_delay() {
    let mut t = timers();
    let start = Instant::now();
    t.schedule_advance(Duration::from_secs(3));
    assert!(t.advance_pending());

    assert_eq!(t.next_event().await, TimerEvent::AdvanceDue);
    assert_close(start.elapsed(), Duration::from_secs(3));
    assert!(!t.advance_pending(), "advance disarms after firing");

    let again = tokio::time::timeout(Duration::from_secs(10), t.next_event()).await;
    assert!(again.is_err(), "advance must not fire twice");
}

#[tokio::test(start_paused = true)]
async fn test_rescheduling_advance_keeps_only_latest() {
    let mut t = timers();
    let start = Instant::now();
    t.schedule_advance(Duration::from_secs(1));
    t.schedule_advance(Duration::from_secs(4));

    assert_eq!(t.next_event().await, TimerEvent::AdvanceDue);
    assert_close(start.elapsed(), Duration::from_secs(4));
    assert_eq!(t.metrics().advances_fired, 1);
    assert_eq!(t.metrics().cancellations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_advance() {
    let mut t = timers();
    t.schedule_advance(Duration::from_secs(1));

    assert!(t.cancel_advance());
    assert!(!t.cancel_advance());

    let result = tokio::time::timeout(Duration::from_secs(5), t.next_event()).await;
    assert!(result.is_err());
}

// =========================================================================
// Both armed
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_earlier_timer_fires_first_when_both_armed() {
    let mut t = timers();
    t.start_countdown();
    t.schedule_advance(Duration::from_millis(500));
    assert_eq!(t.status().live_count(), 2);

    assert_eq!(t.next_event().await, TimerEvent::AdvanceDue);
    assert!(matches!(t.next_event().await, TimerEvent::Tick { seq: 1, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_clear_all_disarms_everything() {
    let mut t = timers();
    t.start_countdown();
    t.schedule_advance(Duration::from_secs(2));

    t.clear_all();
    t.clear_all();

    assert_eq!(t.status(), TimerStatus::default());
    let result = tokio::time::timeout(Duration::from_secs(10), t.next_event()).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_next_event_is_cancel_safe_in_select() {
    let mut t = timers();
    t.start_countdown();

    // Lose the race against a shorter sleep a few times; the countdown must
    // still deliver tick 1 at its original deadline.
    let start = Instant::now();
    for _ in 0..3 {
        tokio::select! {
            biased;
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = t.next_event() => panic!("tick fired too early"),
        }
    }
    assert!(matches!(t.next_event().await, TimerEvent::Tick { seq: 1, .. }));
    assert_close(start.elapsed(), Duration::from_secs(1));
}
