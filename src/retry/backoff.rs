use rand::Rng;
use std::time::Duration;

/// How long a page should wait before its next attempt
///
/// `retry` is 1 for the first retry of a page, 2 for the second, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffHint {
    /// Requeue without waiting
    None,

    /// First retry is immediate, later retries grow exponentially from `base`
    Escalating { base: Duration, max: Duration },

    /// Exponential growth from `base`, never shorter than `floor`
    Exponential {
        base: Duration,
        max: Duration,
        floor: Option<Duration>,
    },
}

impl BackoffHint {
    /// Wait before the given retry, without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Escalating { base, max } => {
                if retry <= 1 {
                    Duration::ZERO
                } else {
                    exponential(base, max, retry - 1)
                }
            }
            Self::Exponential { base, max, floor } => {
                let delay = exponential(base, max, retry);
                match floor {
                    Some(floor) => delay.max(floor),
                    None => delay,
                }
            }
        }
    }

    /// Wait before the given retry with up to 10% random jitter added
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let millis = base.as_millis() as u64;
        if millis < 10 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..millis / 10 + 1);
        base + Duration::from_millis(jitter)
    }
}

fn exponential(base: Duration, max: Duration, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(20);
    let millis = (base.as_millis() as u64).saturating_mul(2u64.saturating_pow(exponent));
    Duration::from_millis(millis).min(max)
}
