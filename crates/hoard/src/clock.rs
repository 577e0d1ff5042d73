// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Time abstraction for the expiration path.
//!
//! The expiration machinery needs two things from time: the current Unix
//! second (to compute a cached value's age) and a timer (to bound how long
//! a caller waits for a background reload). Both are notoriously hard to
//! test against the real clock, so they are routed through [`Clock`]: the
//! production variant reads the system clock and sleeps on the runtime,
//! while [`ClockControl`] builds frozen clocks whose time only moves when a
//! test advances it — waking any timer whose deadline has come due.
//!
//! Durations are truncated to whole seconds throughout; sub-second
//! precision is meaningless for a coarse freshness layer.
//!
//! # Examples
//!
//! ```
//! use hoard::ClockControl;
//! use std::time::Duration;
//!
//! let control = ClockControl::new_at(100);
//! let clock = control.to_clock();
//! assert_eq!(clock.unix_seconds(), 100);
//!
//! control.advance(Duration::from_secs(300));
//! assert_eq!(clock.unix_seconds(), 400);
//! ```

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Provides the current time and timers to a group.
///
/// Clones are cheap and share state: every clock built from one
/// [`ClockControl`] observes the same manually driven time.
#[derive(Clone)]
pub struct Clock {
    repr: Repr,
}

#[derive(Clone)]
enum Repr {
    System,
    Controlled(Arc<Controlled>),
}

struct Controlled {
    inner: Mutex<ControlledInner>,
}

struct ControlledInner {
    now: i64,
    sleepers: Vec<Sleeper>,
}

struct Sleeper {
    deadline: i64,
    waker: oneshot::Sender<()>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.repr {
            Repr::System => write!(f, "Clock(system)"),
            Repr::Controlled(state) => write!(f, "Clock(controlled at {})", state.inner.lock().now),
        }
    }
}

impl Clock {
    /// Returns the system clock: real time, real timers.
    #[must_use]
    pub fn system() -> Self {
        Self { repr: Repr::System }
    }

    /// Returns the current Unix time in seconds.
    #[must_use]
    pub fn unix_seconds(&self) -> i64 {
        match &self.repr {
            Repr::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            Repr::Controlled(state) => state.inner.lock().now,
        }
    }

    /// Completes after `duration` has elapsed.
    ///
    /// On a controlled clock this completes when [`ClockControl::advance`]
    /// (or [`ClockControl::set`]) moves time past the deadline; a duration
    /// that truncates to zero seconds completes immediately.
    pub async fn after(&self, duration: Duration) {
        match &self.repr {
            Repr::System => tokio::time::sleep(duration).await,
            Repr::Controlled(state) => {
                let receiver = {
                    let mut inner = state.inner.lock();
                    let deadline = inner.now + duration.as_secs() as i64;
                    if deadline <= inner.now {
                        return;
                    }
                    let (waker, receiver) = oneshot::channel();
                    inner.sleepers.push(Sleeper { deadline, waker });
                    receiver
                };
                // A dropped control side means time will never advance;
                // treat it as an elapsed timer rather than hanging.
                let _ = receiver.await;
            }
        }
    }
}

/// Builds and drives frozen [`Clock`]s in tests.
#[derive(Clone)]
pub struct ClockControl {
    state: Arc<Controlled>,
}

impl std::fmt::Debug for ClockControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClockControl(at {})", self.state.inner.lock().now)
    }
}

impl ClockControl {
    /// Creates a control whose clocks start at the given Unix second.
    #[must_use]
    pub fn new_at(unix_seconds: i64) -> Self {
        Self {
            state: Arc::new(Controlled {
                inner: Mutex::new(ControlledInner {
                    now: unix_seconds,
                    sleepers: Vec::new(),
                }),
            }),
        }
    }

    /// Returns a clock sharing this control's time.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock {
            repr: Repr::Controlled(Arc::clone(&self.state)),
        }
    }

    /// Moves time forward by `duration` (truncated to seconds).
    pub fn advance(&self, duration: Duration) {
        let now = self.state.inner.lock().now;
        self.set(now + duration.as_secs() as i64);
    }

    /// Sets the current time, waking every sleeper whose deadline has come
    /// due.
    pub fn set(&self, unix_seconds: i64) {
        let due = {
            let mut inner = self.state.inner.lock();
            inner.now = unix_seconds;
            let mut due = Vec::new();
            let mut i = 0;
            while i < inner.sleepers.len() {
                if inner.sleepers[i].deadline <= unix_seconds {
                    due.push(inner.sleepers.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            due
        };
        for sleeper in due {
            let _ = sleeper.waker.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controlled_time_only_moves_when_told() {
        let control = ClockControl::new_at(500);
        let clock = control.to_clock();
        assert_eq!(clock.unix_seconds(), 500);
        assert_eq!(clock.unix_seconds(), 500);
        control.advance(Duration::from_secs(10));
        assert_eq!(clock.unix_seconds(), 510);
    }

    #[test]
    fn clones_share_state() {
        let control = ClockControl::new_at(0);
        let a = control.to_clock();
        let b = a.clone();
        control.set(42);
        assert_eq!(a.unix_seconds(), 42);
        assert_eq!(b.unix_seconds(), 42);
    }

    #[tokio::test]
    async fn after_fires_on_advance() {
        let control = ClockControl::new_at(100);
        let clock = control.to_clock();

        let timer = tokio::spawn({
            let clock = clock.clone();
            async move { clock.after(Duration::from_secs(5)).await }
        });

        // Let the timer register its sleeper before advancing.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        control.advance(Duration::from_secs(4));
        assert!(!timer.is_finished());

        control.advance(Duration::from_secs(1));
        timer.await.unwrap();
    }

    #[tokio::test]
    async fn zero_duration_completes_immediately() {
        let control = ClockControl::new_at(100);
        let clock = control.to_clock();
        clock.after(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn system_clock_is_roughly_now() {
        let clock = Clock::system();
        let now = clock.unix_seconds();
        assert!(now > 1_600_000_000);
        clock.after(Duration::from_millis(1)).await;
    }
}
