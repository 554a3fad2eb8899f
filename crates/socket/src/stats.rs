use std::sync::atomic::{AtomicU64, Ordering};

use piggyback_envelope::TrackerStats;

/// Snapshot of a socket's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketStats {
    /// Values accepted by `send`.
    pub enqueued: u64,
    /// Envelopes the backend accepted.
    pub published: u64,
    /// Publish attempts repeated after a transient failure.
    pub publish_retries: u64,
    /// Envelopes the backend permanently refused.
    pub publish_failures: u64,
    /// Raw frames returned by polls.
    pub frames_received: u64,
    /// Frames dropped for a checksum mismatch.
    pub checksum_failures: u64,
    /// Frames dropped as unparseable.
    pub malformed: u64,
    /// Envelopes dropped as already delivered.
    pub duplicates: u64,
    /// Sequence numbers skipped as lost.
    pub gaps_skipped: u64,
    /// Envelopes currently held in reorder buffers.
    pub held: u64,
    /// Envelopes dropped because no subscription matched.
    pub filtered: u64,
    /// Payloads the codec could not decode.
    pub decode_failures: u64,
    /// Values handed to the application.
    pub received: u64,
    /// Polls the backend rate limited.
    pub rate_limited_polls: u64,
    /// Sessions re-established after a fault or disconnect.
    pub reconnects: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub enqueued: AtomicU64,
    pub published: AtomicU64,
    pub publish_retries: AtomicU64,
    pub publish_failures: AtomicU64,
    pub frames_received: AtomicU64,
    pub checksum_failures: AtomicU64,
    pub malformed: AtomicU64,
    pub duplicates: AtomicU64,
    pub gaps_skipped: AtomicU64,
    pub held: AtomicU64,
    pub filtered: AtomicU64,
    pub decode_failures: AtomicU64,
    pub received: AtomicU64,
    pub rate_limited_polls: AtomicU64,
    pub reconnects: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tracker(&self, stats: TrackerStats, held: usize) {
        self.duplicates.store(stats.duplicates, Ordering::Relaxed);
        self.gaps_skipped.store(stats.skipped, Ordering::Relaxed);
        self.held.store(held as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SocketStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        SocketStats {
            enqueued: load(&self.enqueued),
            published: load(&self.published),
            publish_retries: load(&self.publish_retries),
            publish_failures: load(&self.publish_failures),
            frames_received: load(&self.frames_received),
            checksum_failures: load(&self.checksum_failures),
            malformed: load(&self.malformed),
            duplicates: load(&self.duplicates),
            gaps_skipped: load(&self.gaps_skipped),
            held: load(&self.held),
            filtered: load(&self.filtered),
            decode_failures: load(&self.decode_failures),
            received: load(&self.received),
            rate_limited_polls: load(&self.rate_limited_polls),
            reconnects: load(&self.reconnects),
        }
    }
}
