use crate::MemoryFaults;

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

/// Channels shared by name within the process.
static GLOBAL_REGISTRY: Lazy<DashMap<String, MemoryChannel>> = Lazy::new(DashMap::new);

/// Default number of messages a channel retains.
pub const DEFAULT_RETENTION: usize = 10_000;

#[derive(Debug)]
struct ChannelState {
    history: VecDeque<(u64, Bytes)>,
    next_id: u64,
    retention: usize,
}

#[derive(Debug)]
struct ChannelInner {
    name: String,
    state: Mutex<ChannelState>,
    faults: MemoryFaults,
}

/// A simulated hosted channel.
///
/// Holds an ordered, bounded history of posted messages, each with an id
/// greater than every earlier one, the way a chat service numbers messages.
/// Cloning shares the channel.
#[derive(Clone, Debug)]
pub struct MemoryChannel {
    inner: Arc<ChannelInner>,
}

impl MemoryChannel {
    /// Create an unregistered channel.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self::with_retention(name, DEFAULT_RETENTION)
    }

    /// Create an unregistered channel that keeps at most `retention` messages.
    pub fn with_retention<N: Into<String>>(name: N, retention: usize) -> Self {
        let state = ChannelState {
            history: VecDeque::new(),
            next_id: 1,
            retention: retention.max(1),
        };

        Self {
            inner: Arc::new(ChannelInner {
                name: name.into(),
                state: Mutex::new(state),
                faults: MemoryFaults::default(),
            }),
        }
    }

    /// Look up a channel by name, creating it on first use.
    pub fn named(name: &str) -> Self {
        GLOBAL_REGISTRY
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating memory channel {}", name);
                Self::new(name)
            })
            .clone()
    }

    /// Forget a named channel. Existing handles keep working.
    pub fn remove_named(name: &str) -> Option<Self> {
        GLOBAL_REGISTRY.remove(name).map(|(_, channel)| channel)
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Fault injection controls.
    pub fn faults(&self) -> &MemoryFaults {
        &self.inner.faults
    }

    /// Append a raw payload, bypassing every fault and framing check.
    ///
    /// Use it to replay, reorder or corrupt frames as a hostile transport would.
    pub fn inject(&self, payload: Bytes) -> u64 {
        let id = self.post(payload);
        debug!("Injected message {} into memory channel {}", id, self.name());
        id
    }

    pub(crate) fn post(&self, payload: Bytes) -> u64 {
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.history.push_back((id, payload));
        while state.history.len() > state.retention {
            state.history.pop_front();
        }
        id
    }

    /// Up to `limit` messages with an id greater than `cursor`, oldest first.
    pub fn messages_after(&self, cursor: u64, limit: usize) -> Vec<(u64, Bytes)> {
        let state = self.inner.state.lock();
        let start = state.history.partition_point(|(id, _)| *id <= cursor);
        state
            .history
            .range(start..)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Every retained payload, oldest first.
    pub fn payloads(&self) -> Vec<Bytes> {
        let state = self.inner.state.lock();
        state.history.iter().map(|(_, payload)| payload.clone()).collect()
    }

    /// Id of the newest message, or 0 if nothing was ever posted.
    pub fn latest_id(&self) -> u64 {
        self.inner.state.lock().next_id - 1
    }

    /// Number of retained messages.
    pub fn len(&self) -> usize {
        self.inner.state.lock().history.len()
    }

    /// Whether the channel retains no messages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
