use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Runtime fault injection for a [`MemoryChannel`](crate::MemoryChannel).
///
/// Faults apply to every backend attached to the channel and can be changed
/// while sockets are running.
#[derive(Debug, Default)]
pub struct MemoryFaults {
    failing_connects: AtomicU32,
    failing_publishes: AtomicU32,
    rejected_publishes: AtomicU32,
    rate_limited_polls: AtomicU32,
    publish_latency_ms: AtomicU64,
    unreachable: AtomicBool,
}

impl MemoryFaults {
    /// The next `count` connect attempts fail as unreachable.
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// The next `count` publishes fail transiently.
    pub fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// The next `count` publishes are refused permanently.
    pub fn reject_next_publishes(&self, count: u32) {
        self.rejected_publishes.store(count, Ordering::SeqCst);
    }

    /// The next `count` polls report rate limiting.
    pub fn rate_limit_next_polls(&self, count: u32) {
        self.rate_limited_polls.store(count, Ordering::SeqCst);
    }

    /// Delay every publish by `latency`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_publish_latency(&self, latency: Duration) {
        self.publish_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the channel unreachable, or reachable again.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Whether the channel is currently unreachable.
    pub fn is_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::SeqCst)
    }

    /// Clear every injected fault.
    pub fn reset(&self) {
        self.fail_next_connects(0);
        self.fail_next_publishes(0);
        self.reject_next_publishes(0);
        self.rate_limit_next_polls(0);
        self.set_publish_latency(Duration::ZERO);
        self.set_unreachable(false);
    }

    pub(crate) fn publish_latency(&self) -> Duration {
        Duration::from_millis(self.publish_latency_ms.load(Ordering::SeqCst))
    }

    pub(crate) fn take_connect_failure(&self) -> bool {
        take(&self.failing_connects)
    }

    pub(crate) fn take_publish_failure(&self) -> bool {
        take(&self.failing_publishes)
    }

    pub(crate) fn take_publish_rejection(&self) -> bool {
        take(&self.rejected_publishes)
    }

    pub(crate) fn take_poll_rate_limit(&self) -> bool {
        take(&self.rate_limited_polls)
    }
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
            remaining.checked_sub(1)
        })
        .is_ok()
}
