use std::time::Duration;

/// Exponential backoff with jitter: each delay is roughly twice the last,
/// plus up to 10%, capped at `max`.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    last: Option<Duration>,
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            last: None,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.last {
            None => self.base.min(self.max),
            Some(last) => {
                let factor = fastrand::f64().mul_add(0.1, 2.0);
                // Saturates at `max` instead of overflowing.
                Duration::try_from_secs_f64(last.as_secs_f64() * factor)
                    .map_or(self.max, |delay| delay.min(self.max))
            }
        };
        self.last = Some(delay);
        delay
    }

    /// Next delay, but never shorter than what the service asked for.
    pub fn next_delay_at_least(&mut self, floor: Option<Duration>) -> Duration {
        let delay = self.next_delay();
        floor.map_or(delay, |floor| delay.max(floor))
    }
}

/// Adaptive poll interval. Rate limiting doubles it up to the maximum;
/// every successful poll halves it back toward the base.
#[derive(Clone, Debug)]
pub struct PollCadence {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl PollCadence {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Returns the new interval.
    pub fn slow_down(&mut self, retry_after: Option<Duration>) -> Duration {
        let doubled = self.current.saturating_mul(2).max(Duration::from_millis(1));
        let requested = retry_after.unwrap_or_default();
        self.current = doubled.max(requested).min(self.max);
        self.current
    }

    pub fn relax(&mut self) {
        self.current = (self.current / 2).max(self.base);
    }
}
