//! Minimum-duration delays on a monotonic clock
//!
//! `std::thread::sleep` may return late but never early on Linux; the
//! remainder is still spun so short settle times are honored even when the
//! scheduler rounds the sleep down on other platforms.

use std::time::{Duration, Instant};

/// Sleeps below this threshold are spun entirely
const SPIN_THRESHOLD: Duration = Duration::from_micros(200);

/// Blocking delay with a guaranteed minimum
#[cfg_attr(test, mockall::automock)]
pub trait Delay: Send + Sync {
    /// Block the calling thread for at least `duration`
    fn delay(&self, duration: Duration);
}

/// [`Delay`] on `Instant`: sleep the coarse part, spin the rest
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicDelay;

impl Delay for MonotonicDelay {
    fn delay(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }

        let deadline = Instant::now() + duration;

        if duration > SPIN_THRESHOLD {
            std::thread::sleep(duration - SPIN_THRESHOLD);
        }

        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Time `bytes` occupy on an 8N1 wire at `baud_rate` (10 bits per byte)
pub fn wire_time(bytes: usize, baud_rate: u32) -> Duration {
    if baud_rate == 0 {
        return Duration::ZERO;
    }
    let bits = bytes as u64 * 10;
    Duration::from_nanos(bits.saturating_mul(1_000_000_000) / u64::from(baud_rate))
}
