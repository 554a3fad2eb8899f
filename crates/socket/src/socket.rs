use crate::dispatcher::{Dispatcher, Inbound};
use crate::queue::OutboundQueue;
use crate::shared::SocketShared;
use crate::stats::Counters;
use crate::topic;
use crate::{ConnectionState, Error, Message, Result, SocketMode, SocketOptions, SocketStats};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::Stream;
use futures::stream;
use parking_lot::Mutex;
use piggyback_backend::{Backend, PublishError};
use piggyback_codec::Codec;
use piggyback_envelope::{Envelope, HEADER_SIZE, SenderId, SequenceCounter};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pieces handed to the dispatcher when it is spawned.
struct Unstarted<T> {
    outbound: mpsc::UnboundedReceiver<crate::queue::Outbound>,
    inbound: mpsc::Sender<Inbound<T>>,
}

/// A message-queue socket over a backend.
///
/// A socket is created disconnected. `connect` spawns its dispatcher, which
/// owns all backend I/O; `send` and `receive` only ever wait on local queues.
///
/// PUSH and PUB sockets send. Values are encoded, framed with this socket's
/// sender id and the next sequence number, and queued. Capacity counts
/// envelopes queued and in flight, and the [`SendPolicy`](crate::SendPolicy)
/// decides whether a full queue blocks or fails. Sending before `connect`
/// is allowed; envelopes wait in the queue.
///
/// PULL and SUB sockets receive. Frames are checked, deduplicated and
/// reordered per sender before they are decoded and queued for `receive`.
///
/// Dropping the socket cancels it.
pub struct Socket<B, C>
where
    B: Backend,
    C: Codec,
{
    mode: SocketMode,
    backend: Arc<B>,
    codec: C,
    options: SocketOptions,
    sender: SenderId,
    sequence: SequenceCounter,
    shared: Arc<SocketShared>,
    outbound: OutboundQueue,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Inbound<C::Value>>>,
    unstarted: Mutex<Option<Unstarted<C::Value>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl<B, C> Socket<B, C>
where
    B: Backend,
    C: Codec,
{
    /// Create a disconnected socket.
    pub fn new(backend: B, codec: C, mode: SocketMode, options: SocketOptions) -> Self {
        Self::with_shared_backend(Arc::new(backend), codec, mode, options)
    }

    /// Create a socket over a backend the caller keeps a handle to.
    pub fn with_shared_backend(
        backend: Arc<B>,
        codec: C,
        mode: SocketMode,
        options: SocketOptions,
    ) -> Self {
        let options = SocketOptions {
            queue_capacity: options.queue_capacity.max(1),
            inbound_capacity: options.inbound_capacity.max(1),
            reorder_window: options.reorder_window.max(1),
            ..options
        };

        let (outbound, outbound_rx) = OutboundQueue::new(options.queue_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_capacity);
        let cancel = options
            .parent
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);

        let sender = SenderId::random();
        debug!(%sender, %mode, backend = backend.name(), "socket created");

        Self {
            mode,
            backend,
            codec,
            options,
            sender,
            sequence: SequenceCounter::new(),
            shared: Arc::new(SocketShared::new()),
            outbound,
            inbound: tokio::sync::Mutex::new(inbound_rx),
            unstarted: Mutex::new(Some(Unstarted {
                outbound: outbound_rx,
                inbound: inbound_tx,
            })),
            task: tokio::sync::Mutex::new(None),
            cancel,
            closed: AtomicBool::new(false),
        }
    }

    /// Socket role.
    pub const fn mode(&self) -> SocketMode {
        self.mode
    }

    /// Identity stamped on every envelope this socket sends.
    pub const fn sender_id(&self) -> SenderId {
        self.sender
    }

    /// The backend this socket drives.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Observe connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.subscribe_state()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SocketStats {
        self.shared.counters.snapshot()
    }

    /// Observe faults and rejected publishes reported by the dispatcher.
    pub fn errors(&self) -> broadcast::Receiver<Error> {
        self.shared.errors.subscribe()
    }

    /// The error that faulted the socket most recently.
    pub fn last_fault(&self) -> Option<Error> {
        self.shared.last_fault()
    }

    /// Token that cancels this socket.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Establish the backend session.
    ///
    /// Resolves once the dispatcher is connected, or with the error that
    /// faulted it. Calling this on a faulted socket is the same as `reconnect`.
    ///
    /// # Errors
    ///
    /// Returns the fault that stopped the dispatcher, or `Closed`/`Cancelled`.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_open()?;

        if !self.spawn_dispatcher().await {
            match self.state() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Faulted => self.request_reconnect(),
                ConnectionState::Connecting | ConnectionState::Disconnected => {}
            }
        }

        self.wait_for_connection().await
    }

    /// Leave the faulted state and resume.
    ///
    /// Envelopes that were queued when the socket faulted are published
    /// after the new session is established.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn reconnect(&self) -> Result<()> {
        self.connect().await
    }

    /// Encode and queue a value.
    ///
    /// # Errors
    ///
    /// Fails if the socket does not send, is faulted, closed or cancelled, if
    /// the codec rejects the value, if the frame exceeds the backend's limit,
    /// or with `QueueFull` under the non-blocking policy.
    pub async fn send(&self, value: &C::Value) -> Result<u64> {
        let payload = self.payload(None, value, "send")?;
        self.enqueue(payload, None).await
    }

    /// Like [`send`](Self::send), but never waits for queue space.
    ///
    /// # Errors
    ///
    /// Same as `send`, with `QueueFull` whenever the queue is at capacity.
    pub fn try_send(&self, value: &C::Value) -> Result<u64> {
        let payload = self.payload(None, value, "try_send")?;
        self.ensure_sendable()?;

        let slot = self.outbound.reserve_now()?;
        self.push(slot, payload, None)
    }

    /// Queue a value and wait until the backend accepted or refused it.
    ///
    /// An envelope whose retries run out stays queued while the socket is
    /// faulted, so this keeps waiting until the socket is reconnected,
    /// closed or cancelled.
    ///
    /// # Errors
    ///
    /// Same as `send`, plus the backend's rejection of this envelope.
    pub async fn send_confirmed(&self, value: &C::Value) -> Result<u64> {
        let payload = self.payload(None, value, "send_confirmed")?;
        let (receipt, outcome) = oneshot::channel();
        let sequence = self.enqueue(payload, Some(receipt)).await?;

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            outcome = outcome => match outcome {
                Ok(result) => result.map(|()| sequence),
                Err(_) => Err(Error::Closed),
            },
        }
    }

    /// Queue a value under a topic. PUB only.
    ///
    /// # Errors
    ///
    /// Same as `send`, plus `TopicTooLong`.
    pub async fn send_topic(&self, topic: &str, value: &C::Value) -> Result<u64> {
        if self.mode != SocketMode::Pub {
            return Err(self.unsupported("send_topic"));
        }
        let payload = self.payload(Some(topic), value, "send_topic")?;
        self.enqueue(payload, None).await
    }

    /// Receive topics starting with `prefix`. The empty prefix receives
    /// everything. SUB only.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` on other modes.
    pub fn subscribe(&self, prefix: &str) -> Result<()> {
        if self.mode != SocketMode::Sub {
            return Err(self.unsupported("subscribe"));
        }
        self.shared.subscriptions.write().subscribe(prefix);
        debug!(prefix, "subscribed");
        Ok(())
    }

    /// Drop one subscription to `prefix`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` on other modes.
    pub fn unsubscribe(&self, prefix: &str) -> Result<bool> {
        if self.mode != SocketMode::Sub {
            return Err(self.unsupported("unsubscribe"));
        }
        Ok(self.shared.subscriptions.write().unsubscribe(prefix))
    }

    /// Current subscriptions.
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.subscriptions.read().topics()
    }

    /// Wait for the next value.
    ///
    /// # Errors
    ///
    /// See [`receive_message`](Self::receive_message).
    pub async fn receive(&self) -> Result<C::Value> {
        self.receive_message().await.map(Message::into_value)
    }

    /// Wait for the next value along with its sender and sequence.
    ///
    /// Values already delivered are handed out even after the socket
    /// faults; once none are left a faulted socket refuses to receive.
    ///
    /// # Errors
    ///
    /// Fails on send-only sockets, with `Codec` for a payload that did not
    /// decode, and with `Faulted`, `Closed` or `Cancelled`.
    pub async fn receive_message(&self) -> Result<Message<C::Value>> {
        if !self.mode.receives() {
            return Err(self.unsupported("receive"));
        }
        self.ensure_open()?;

        let mut inbound = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            inbound = self.inbound.lock() => inbound,
        };
        let mut state = self.shared.subscribe_state();

        loop {
            match inbound.try_recv() {
                Ok(item) => return self.delivered(item),
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(self.stopped()),
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            if *state.borrow_and_update() == ConnectionState::Faulted {
                return Err(Error::Faulted);
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                item = inbound.recv() => {
                    return match item {
                        Some(item) => self.delivered(item),
                        None => Err(self.stopped()),
                    };
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(Error::Closed);
                    }
                }
            }
        }
    }

    /// Received values as a lazy stream borrowing the socket.
    ///
    /// Codec failures are yielded and the stream continues. A fault is
    /// yielded once and ends the stream; close and cancellation end it
    /// quietly. The stream cannot be restarted.
    pub fn messages(&self) -> impl Stream<Item = Result<C::Value>> + '_ {
        stream::unfold(false, move |finished| async move {
            if finished {
                return None;
            }
            self.next_item().await
        })
    }

    /// Received values as a lazy stream that owns the socket.
    pub fn into_stream(self) -> impl Stream<Item = Result<C::Value>> {
        stream::unfold((self, false), |(socket, finished)| async move {
            if finished {
                return None;
            }
            let (item, finished) = socket.next_item().await?;
            Some((item, (socket, finished)))
        })
    }

    /// Stop the socket.
    ///
    /// From Connecting or Connected, queued envelopes are drained first,
    /// bounded by the close timeout; publishes still in flight afterwards
    /// are abandoned. From Disconnected or Faulted the transport is not
    /// touched. Calling `close` twice is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let state = self.state();
        self.outbound.close();
        self.unstarted.lock().take();

        let Some(mut task) = self.task.lock().await.take() else {
            self.cancel.cancel();
            self.shared.set_state(ConnectionState::Disconnected);
            info!(sender = %self.sender, "socket closed");
            return;
        };

        let draining = matches!(
            state,
            ConnectionState::Connecting | ConnectionState::Connected
        );
        if !(draining && self.mode.sends()) {
            self.cancel.cancel();
        }

        let timeout = self.options.close_timeout;
        if tokio::time::timeout(timeout, &mut task).await.is_err() {
            warn!(?timeout, "close timed out, abandoning in-flight work");
            self.cancel.cancel();
        }

        self.shared.set_state(ConnectionState::Disconnected);
        info!(sender = %self.sender, "socket closed");
    }

    /// Cancel the socket immediately. Pending sends and receives fail with
    /// `Cancelled`; publishes in flight finish in the background.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if self.unstarted.lock().is_some() {
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }

    async fn next_item(&self) -> Option<(Result<C::Value>, bool)> {
        match self.receive().await {
            Ok(value) => Some((Ok(value), false)),
            Err(Error::Closed | Error::Cancelled) => None,
            Err(error @ (Error::Faulted | Error::UnsupportedOperation { .. })) => {
                Some((Err(error), true))
            }
            Err(error) => Some((Err(error), false)),
        }
    }

    fn delivered(&self, item: Inbound<C::Value>) -> Result<Message<C::Value>> {
        if item.is_ok() {
            Counters::bump(&self.shared.counters.received);
        }
        item
    }

    /// Why the inbound channel ended.
    fn stopped(&self) -> Error {
        if self.cancel.is_cancelled() {
            Error::Cancelled
        } else {
            Error::Closed
        }
    }

    async fn spawn_dispatcher(&self) -> bool {
        let mut task = self.task.lock().await;
        let Some(unstarted) = self.unstarted.lock().take() else {
            return false;
        };

        self.shared.set_state(ConnectionState::Connecting);
        let dispatcher = Dispatcher::new(
            self.backend.clone(),
            self.codec.clone(),
            self.mode,
            self.options.clone(),
            self.shared.clone(),
            self.cancel.clone(),
            unstarted.outbound,
            unstarted.inbound,
        );
        *task = Some(tokio::spawn(dispatcher.run()));
        true
    }

    fn request_reconnect(&self) {
        self.shared.set_state(ConnectionState::Connecting);
        self.shared.reconnect.notify_one();
    }

    async fn wait_for_connection(&self) -> Result<()> {
        let mut state = self.shared.subscribe_state();

        let settled = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            settled = state.wait_for(|current| *current != ConnectionState::Connecting) => {
                settled.map(|current| *current)
            }
        };

        match settled {
            Ok(ConnectionState::Connected) => Ok(()),
            Ok(ConnectionState::Faulted) => Err(self.last_fault().unwrap_or(Error::Faulted)),
            Ok(ConnectionState::Disconnected | ConnectionState::Connecting) | Err(_) => {
                Err(self.stopped())
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn ensure_sendable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.state() == ConnectionState::Faulted {
            return Err(Error::Faulted);
        }
        Ok(())
    }

    const fn unsupported(&self, operation: &'static str) -> Error {
        Error::UnsupportedOperation {
            operation,
            mode: self.mode,
        }
    }

    /// Encode a value into the payload carried by the envelope.
    fn payload(&self, topic: Option<&str>, value: &C::Value, operation: &'static str) -> Result<Bytes> {
        if !self.mode.sends() {
            return Err(self.unsupported(operation));
        }

        let body = self.codec.encode(value)?;
        let payload = if self.mode.topics() {
            topic::frame(topic.unwrap_or_default(), &body)?
        } else {
            body
        };

        if let Some(max) = self.backend.max_payload_size() {
            let size = HEADER_SIZE + payload.len();
            if size > max {
                return Err(Error::Publish(PublishError::PayloadTooLarge { size, max }));
            }
        }

        Ok(payload)
    }

    async fn enqueue(&self, payload: Bytes, receipt: Option<crate::queue::Receipt>) -> Result<u64> {
        self.ensure_sendable()?;
        let slot = self
            .outbound
            .reserve(self.options.send_policy, &self.cancel)
            .await?;
        self.ensure_sendable()?;
        self.push(slot, payload, receipt)
    }

    fn push(
        &self,
        slot: crate::queue::Slot,
        payload: Bytes,
        receipt: Option<crate::queue::Receipt>,
    ) -> Result<u64> {
        let sequence = self.outbound.push(slot, receipt, || {
            let sequence = self.sequence.next_sequence()?;
            let frame = Envelope::new(self.sender, sequence, payload).encode();
            Ok((sequence, frame))
        })?;

        Counters::bump(&self.shared.counters.enqueued);
        debug!(sender = %self.sender, sequence, "queued envelope");
        Ok(sequence)
    }
}

impl<B, C> Drop for Socket<B, C>
where
    B: Backend,
    C: Codec,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
