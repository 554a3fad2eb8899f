use crate::{Envelope, SenderId};

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tracing::debug;

/// Reordering limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackerConfig {
    /// How far ahead of the next expected sequence a frame may arrive and
    /// still be held. Minimum 1, which disables reordering.
    pub window: u64,

    /// How long a gap may stay open before the missing frames are skipped.
    pub gap_timeout: Duration,

    /// How long a sender with nothing held is remembered after its last
    /// frame. A sender that comes back after being forgotten is tracked as
    /// a new one.
    pub idle_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window: 32,
            gap_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Running totals across all senders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Envelopes released in order.
    pub delivered: u64,
    /// Envelopes dropped because their sequence was already seen.
    pub duplicates: u64,
    /// Sequence numbers given up on.
    pub skipped: u64,
    /// Idle senders forgotten.
    pub evicted: u64,
}

#[derive(Debug)]
struct SenderState {
    next_expected: u64,
    held: BTreeMap<u64, Envelope>,
    gap_opened_at: Option<Instant>,
    last_seen: Instant,
}

impl SenderState {
    /// Release held envelopes that are now contiguous.
    fn drain_ready(&mut self, ready: &mut Vec<Envelope>) {
        while let Some(envelope) = self.held.remove(&self.next_expected) {
            self.next_expected = self.next_expected.saturating_add(1);
            ready.push(envelope);
        }
    }

    /// Give up on everything below `floor`, releasing held envelopes in order.
    fn skip_below(&mut self, floor: u64, ready: &mut Vec<Envelope>) -> u64 {
        let mut skipped = 0;

        while self.next_expected < floor {
            let next_held = self.held.first_key_value().map(|(sequence, _)| *sequence);
            match next_held {
                Some(sequence) if sequence < floor => {
                    skipped += sequence - self.next_expected;
                    self.next_expected = sequence;
                    self.drain_ready(ready);
                }
                _ => {
                    skipped += floor - self.next_expected;
                    self.next_expected = floor;
                }
            }
        }

        self.drain_ready(ready);
        skipped
    }

    fn restart_gap_timer(&mut self, moved: bool, now: Instant) {
        if self.held.is_empty() {
            self.gap_opened_at = None;
        } else if moved || self.gap_opened_at.is_none() {
            self.gap_opened_at = Some(now);
        }
    }
}

/// Per-sender ordering and duplicate suppression.
///
/// For each sender the tracker remembers the next sequence it expects and
/// holds envelopes that arrived early. Delivery never blocks on a lost frame:
/// a frame further ahead than the window, or a gap older than the timeout,
/// makes the tracker skip the missing numbers and count them.
///
/// A sender seen for the first time with a sequence inside the first window
/// is assumed to have started at 1, so early reordering is still repaired.
/// Otherwise the receiver joined late and tracking starts at that frame.
#[derive(Debug)]
pub struct SequenceTracker {
    config: TrackerConfig,
    senders: HashMap<SenderId, SenderState>,
    stats: TrackerStats,
}

impl SequenceTracker {
    /// Create a tracker.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config: TrackerConfig {
                window: config.window.max(1),
                ..config
            },
            senders: HashMap::new(),
            stats: TrackerStats::default(),
        }
    }

    /// Offer one envelope. Returns the envelopes that became deliverable, in
    /// sequence order; empty if it was a duplicate or is being held.
    pub fn accept(&mut self, envelope: Envelope, now: Instant) -> Vec<Envelope> {
        let window = self.config.window;
        let sender = envelope.sender;
        let sequence = envelope.sequence;

        let state = self.senders.entry(sender).or_insert_with(|| SenderState {
            next_expected: if sequence <= window { 1 } else { sequence },
            held: BTreeMap::new(),
            gap_opened_at: None,
            last_seen: now,
        });
        state.last_seen = state.last_seen.max(now);

        if sequence < state.next_expected || state.held.contains_key(&sequence) {
            debug!(%sender, sequence, "dropping duplicate envelope");
            self.stats.duplicates += 1;
            return Vec::new();
        }

        let before = state.next_expected;
        let mut ready = Vec::new();
        state.held.insert(sequence, envelope);

        let mut skipped = 0;
        if sequence - state.next_expected >= window {
            skipped = state.skip_below(sequence - window + 1, &mut ready);
        } else {
            state.drain_ready(&mut ready);
        }

        state.restart_gap_timer(state.next_expected != before, now);

        if skipped > 0 {
            debug!(%sender, skipped, "reorder window overrun, skipping gap");
        }
        self.stats.skipped += skipped;
        self.stats.delivered += ready.len() as u64;
        ready
    }

    /// Skip every gap that has been open longer than the gap timeout and
    /// return the envelopes released by doing so. Senders idle for longer
    /// than the idle timeout with nothing held are forgotten.
    pub fn expire(&mut self, now: Instant) -> Vec<Envelope> {
        let timeout = self.config.gap_timeout;
        let mut ready = Vec::new();

        for (sender, state) in &mut self.senders {
            let Some(opened) = state.gap_opened_at else {
                continue;
            };
            if now.saturating_duration_since(opened) < timeout {
                continue;
            }
            let Some(first_held) = state.held.first_key_value().map(|(sequence, _)| *sequence)
            else {
                state.gap_opened_at = None;
                continue;
            };

            let skipped = first_held - state.next_expected;
            debug!(%sender, skipped, "gap timed out, skipping");
            state.next_expected = first_held;
            state.drain_ready(&mut ready);
            state.restart_gap_timer(true, now);
            self.stats.skipped += skipped;
        }

        let idle_timeout = self.config.idle_timeout;
        let before = self.senders.len();
        self.senders.retain(|sender, state| {
            let idle = state.held.is_empty()
                && now.saturating_duration_since(state.last_seen) >= idle_timeout;
            if idle {
                debug!(%sender, next_expected = state.next_expected, "forgetting idle sender");
            }
            !idle
        });
        self.stats.evicted += (before - self.senders.len()) as u64;

        self.stats.delivered += ready.len() as u64;
        ready
    }

    /// Running totals.
    #[must_use]
    pub const fn stats(&self) -> TrackerStats {
        self.stats
    }

    /// Envelopes currently held waiting for a gap to fill.
    #[must_use]
    pub fn held(&self) -> usize {
        self.senders.values().map(|state| state.held.len()).sum()
    }

    /// Number of distinct senders observed.
    #[must_use]
    pub fn senders(&self) -> usize {
        self.senders.len()
    }

    /// The sequence expected next from `sender`, if it has been seen.
    #[must_use]
    pub fn next_expected(&self, sender: &SenderId) -> Option<u64> {
        self.senders.get(sender).map(|state| state.next_expected)
    }
}
