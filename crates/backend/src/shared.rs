use crate::{Backend, ConnectionError, PollError, PublishError};

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Payloads buffered per handle before the oldest are dropped.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

#[derive(Default)]
struct Inbox {
    /// Only connected handles are fed.
    connected: AtomicBool,
    queue: Mutex<VecDeque<Bytes>>,
}

struct Shared<B> {
    backend: B,
    /// Serializes every call into the wrapped backend.
    io: tokio::sync::Mutex<()>,
    inboxes: Mutex<Vec<Weak<Inbox>>>,
    inbox_capacity: usize,
    connections: AtomicUsize,
}

/// A clonable handle that lets several sockets use one backend instance.
///
/// Each clone is an independent reader: payloads returned by the underlying
/// `poll` are copied into the inbox of every other connected handle, so two
/// SUB sockets sharing a channel both see the full stream. A handle that is
/// connected but never polls keeps at most `inbox_capacity` payloads, newest
/// last. Disconnecting a handle empties its inbox.
///
/// Backend calls are serialized, and the session is opened on the first
/// `connect` and released when the last connected handle disconnects.
pub struct SharedBackend<B> {
    shared: Arc<Shared<B>>,
    inbox: Arc<Inbox>,
}

impl<B> SharedBackend<B>
where
    B: Backend,
{
    /// Wrap a backend.
    pub fn new(backend: B) -> Self {
        Self::with_inbox_capacity(backend, DEFAULT_INBOX_CAPACITY)
    }

    /// Wrap a backend, buffering at most `capacity` payloads per handle.
    pub fn with_inbox_capacity(backend: B, capacity: usize) -> Self {
        let inbox = Arc::new(Inbox::default());
        let shared = Shared {
            backend,
            io: tokio::sync::Mutex::new(()),
            inboxes: Mutex::new(vec![Arc::downgrade(&inbox)]),
            inbox_capacity: capacity.max(1),
            connections: AtomicUsize::new(0),
        };

        Self {
            shared: Arc::new(shared),
            inbox,
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.shared.backend
    }

    /// Number of handles currently holding a connection.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Payloads waiting in this handle's inbox.
    pub fn buffered(&self) -> usize {
        self.inbox.queue.lock().len()
    }

    fn is_own(&self, inbox: &Weak<Inbox>) -> bool {
        std::ptr::eq(inbox.as_ptr(), Arc::as_ptr(&self.inbox))
    }

    /// Copy `payloads` to the other connected handles. Must hold `io`.
    fn fan_out(&self, payloads: &[Bytes]) {
        let capacity = self.shared.inbox_capacity;
        let mut inboxes = self.shared.inboxes.lock();
        inboxes.retain(|weak| {
            if self.is_own(weak) {
                return true;
            }
            let Some(inbox) = weak.upgrade() else {
                return false;
            };
            if !inbox.connected.load(Ordering::SeqCst) {
                return true;
            }

            let mut queue = inbox.queue.lock();
            queue.extend(payloads.iter().cloned());
            let overflow = queue.len().saturating_sub(capacity);
            if overflow > 0 {
                queue.drain(..overflow);
                warn!(dropped = overflow, capacity, "shared backend inbox full, dropped oldest payloads");
            }
            true
        });
    }
}

impl<B> Clone for SharedBackend<B>
where
    B: Backend,
{
    fn clone(&self) -> Self {
        let inbox = Arc::new(Inbox::default());
        self.shared.inboxes.lock().push(Arc::downgrade(&inbox));

        Self {
            shared: self.shared.clone(),
            inbox,
        }
    }
}

impl<B> Debug for SharedBackend<B>
where
    B: Backend,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBackend")
            .field("backend", &self.shared.backend)
            .field("connected", &self.inbox.connected.load(Ordering::SeqCst))
            .field("buffered", &self.buffered())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<B> Backend for SharedBackend<B>
where
    B: Backend,
{
    fn name(&self) -> &str {
        self.shared.backend.name()
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        let _guard = self.shared.io.lock().await;

        if !self.shared.backend.is_connected() {
            self.shared.backend.connect().await?;
        }

        if !self.inbox.connected.swap(true, Ordering::SeqCst) {
            let count = self.shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(backend = self.name(), connections = count, "shared backend handle connected");
        }

        Ok(())
    }

    async fn disconnect(&self) {
        if !self.inbox.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let _guard = self.shared.io.lock().await;
        let dropped = {
            let mut queue = self.inbox.queue.lock();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        let remaining = self.shared.connections.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(
            backend = self.name(),
            connections = remaining,
            dropped,
            "shared backend handle disconnected"
        );

        if remaining == 0 {
            self.shared.backend.disconnect().await;
        }
    }

    async fn publish(&self, payload: Bytes) -> Result<(), PublishError> {
        if !self.inbox.connected.load(Ordering::SeqCst) {
            return Err(PublishError::NotConnected);
        }

        let _guard = self.shared.io.lock().await;
        self.shared.backend.publish(payload).await
    }

    async fn poll(&self) -> Result<Vec<Bytes>, PollError> {
        if !self.inbox.connected.load(Ordering::SeqCst) {
            return Err(PollError::Disconnected);
        }

        let _guard = self.shared.io.lock().await;
        let fresh = self.shared.backend.poll().await?;
        if !fresh.is_empty() {
            self.fan_out(&fresh);
        }

        // Whatever other handles polled earlier comes first.
        let mut payloads: Vec<Bytes> = self.inbox.queue.lock().drain(..).collect();
        payloads.extend(fresh);
        Ok(payloads)
    }

    fn is_connected(&self) -> bool {
        self.inbox.connected.load(Ordering::SeqCst) && self.shared.backend.is_connected()
    }

    fn max_payload_size(&self) -> Option<usize> {
        self.shared.backend.max_payload_size()
    }
}

impl<B> Drop for SharedBackend<B> {
    fn drop(&mut self) {
        // The session stays open if this was the last handle; dropping cannot await.
        if self.inbox.connected.load(Ordering::SeqCst) {
            self.shared.connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
