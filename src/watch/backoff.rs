use std::time::Duration;

use rand::Rng;

pub const INITIAL_DELAY_MILLIS: u64 = 1_000;
pub const BACKOFF_FACTOR: f64 = 1.5;
pub const MAX_DELAY_MILLIS: u64 = 60_000;
pub const JITTER_FACTOR: f64 = 0.5;

/// Exponential backoff between stream reconnect attempts. Each call to
/// [`Self::next_delay`] grows the base delay; a healthy stream resets it.
#[derive(Debug)]
pub struct ExponentialBackoff {
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = delay_with_rng(self.attempt, &mut rand::thread_rng());
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

fn delay_with_rng<R: Rng + ?Sized>(attempt: u32, rng: &mut R) -> Duration {
    let base = (INITIAL_DELAY_MILLIS as f64 * BACKOFF_FACTOR.powi(attempt as i32))
        .min(MAX_DELAY_MILLIS as f64);
    let jitter = JITTER_FACTOR * base * rng.gen_range(-1.0..=1.0);
    let millis = (base + jitter).round().clamp(0.0, MAX_DELAY_MILLIS as f64 * 1.5);
    Duration::from_millis(millis as u64)
}
