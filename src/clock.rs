//! Timing primitives for connection retries and send pacing.
//!
//! Plain OS sleeps (and tokio's millisecond timer wheel) are too coarse for sub-millisecond
//!  pacing, so both sleeps here are hybrids: a coarse sleep for the bulk of the duration,
//!  followed by spinning on the monotonic clock for the remainder.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// The part of a wait that is spun rather than slept. Covers tokio's timer granularity
///  (1ms) plus scheduling jitter.
const SPIN_MARGIN: Duration = Duration::from_micros(1500);

/// A timer that reports whether a fixed duration has passed since it was (re)started
#[derive(Clone, Debug)]
pub struct ExpireTimer {
    duration: Duration,
    started: Instant,
}

impl ExpireTimer {
    pub fn new(duration: Duration) -> ExpireTimer {
        ExpireTimer {
            duration,
            started: Instant::now(),
        }
    }

    pub fn from_micros(micros: u64) -> ExpireTimer {
        ExpireTimer::new(Duration::from_micros(micros))
    }

    pub fn restart(&mut self) {
        self.started = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.duration
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.duration
    }
}

/// Blocks the current OS thread for `duration` with microsecond precision
pub fn precise_sleep(duration: Duration) {
    let deadline = Instant::now() + duration;
    if duration > SPIN_MARGIN {
        std::thread::sleep(duration - SPIN_MARGIN);
    }
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

/// Waits until `deadline` without blocking the runtime thread: the coarse part is a tokio
///  timer, the remainder yields to other tasks between clock checks so that receive
///  completions sharing the reactor keep getting polled.
pub async fn precise_sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline <= now {
        return;
    }
    if deadline - now > SPIN_MARGIN {
        tokio::time::sleep_until((deadline - SPIN_MARGIN).into()).await;
    }
    while Instant::now() < deadline {
        tokio::task::yield_now().await;
    }
}

/// Microseconds since the UNIX epoch, used for send timestamps in message headers
pub fn utc_time_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
