//! Play/pause/speed control for the backtester's time loop.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
    Error,
}

struct Inner {
    state: PlaybackState,
    speed: f64,
}

/// Shared, cloneable handle to the playback gate: a `parking_lot::Mutex`
/// guarding the small state enum plus a `tokio::sync::Notify` for waking a
/// suspended time loop.
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

pub const DEFAULT_TICK_DURATION: Duration = Duration::from_millis(100);

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { state: PlaybackState::Idle, speed: 1.0 })),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn play(&self, speed: f64) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return;
        }
        inner.speed = if speed > 0.0 { speed } else { 1.0 };
        inner.state = PlaybackState::Running;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.state == PlaybackState::Running {
            inner.state = PlaybackState::Paused;
        }
    }

    pub fn set_speed(&self, speed: f64) {
        if speed <= 0.0 {
            return;
        }
        self.inner.lock().speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.inner.lock().speed
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == PlaybackState::Running
    }

    pub fn mark_running_if_idle(&self) {
        let mut inner = self.inner.lock();
        if inner.state == PlaybackState::Idle {
            inner.state = PlaybackState::Running;
        }
    }

    pub fn mark_completed(&self) {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = PlaybackState::Completed;
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn mark_stopped(&self) {
        let mut inner = self.inner.lock();
        inner.state = PlaybackState::Stopped;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn mark_error(&self) {
        let mut inner = self.inner.lock();
        inner.state = PlaybackState::Error;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// The tick delay at the current speed.
    pub fn tick_delay(&self, base: Duration) -> Duration {
        base.div_f64(self.speed().max(0.000_001))
    }

    /// Suspends the caller while `Paused`, waking on `play`/`stop`/`error`.
    pub async fn wait_while_paused(&self) {
        loop {
            let notified = self.notify.notified();
            if self.state() != PlaybackState::Paused {
                return;
            }
            notified.await;
        }
    }
}

impl PlaybackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlaybackState::Stopped | PlaybackState::Completed | PlaybackState::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_transitions_idle_to_running() {
        let c = PlaybackController::new();
        assert_eq!(c.state(), PlaybackState::Idle);
        c.play(1.0);
        assert_eq!(c.state(), PlaybackState::Running);
    }

    #[test]
    fn pause_then_play_resumes_with_new_speed() {
        let c = PlaybackController::new();
        c.play(1.0);
        c.pause();
        assert_eq!(c.state(), PlaybackState::Paused);
        c.play(2.0);
        assert_eq!(c.state(), PlaybackState::Running);
        assert!((c.speed() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn wait_while_paused_returns_immediately_when_not_paused() {
        let c = PlaybackController::new();
        c.play(1.0);
        tokio::time::timeout(Duration::from_millis(50), c.wait_while_paused())
            .await
            .expect("should not block");
    }

    #[test]
    fn terminal_state_ignores_further_play_calls() {
        let c = PlaybackController::new();
        c.mark_completed();
        c.play(1.0);
        assert_eq!(c.state(), PlaybackState::Completed);
    }
}
