use crate::backoff::{Backoff, PollCadence};
use crate::queue::Outbound;
use crate::shared::SocketShared;
use crate::stats::Counters;
use crate::topic;
use crate::{ConnectionState, Error, Message, SocketMode, SocketOptions};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use piggyback_backend::{Backend, PollError, PublishError};
use piggyback_codec::Codec;
use piggyback_envelope::{Envelope, SequenceTracker, TrackerConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub type Inbound<T> = crate::Result<Message<T>>;

/// Why a serving session ended.
enum Flow {
    /// Cancelled, or the outbound queue was closed and drained.
    Stop,
    /// Unrecoverable for this session; wait for `reconnect`.
    Fault(Error),
    /// The backend dropped the session; establish a new one after a backoff.
    Reconnect(PollError),
}

enum PublishFailure {
    Rejected(PublishError),
    Exhausted(Error),
    Cancelled,
}

/// Drives one backend on behalf of one socket.
///
/// All backend I/O for the socket happens here. The socket talks to the
/// dispatcher only through the outbound queue, the inbound channel and
/// [`SocketShared`].
pub struct Dispatcher<B, C>
where
    C: Codec,
{
    backend: Arc<B>,
    codec: C,
    mode: SocketMode,
    options: SocketOptions,
    shared: Arc<SocketShared>,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    pending: Option<Outbound>,
    inbound: mpsc::Sender<Inbound<C::Value>>,
    tracker: SequenceTracker,
    cadence: PollCadence,
    session_backoff: Backoff,
    drops: u32,
}

impl<B, C> Dispatcher<B, C>
where
    B: Backend,
    C: Codec,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<B>,
        codec: C,
        mode: SocketMode,
        options: SocketOptions,
        shared: Arc<SocketShared>,
        cancel: CancellationToken,
        outbound: mpsc::UnboundedReceiver<Outbound>,
        inbound: mpsc::Sender<Inbound<C::Value>>,
    ) -> Self {
        let tracker = SequenceTracker::new(TrackerConfig {
            window: options.reorder_window,
            gap_timeout: options.gap_timeout,
            idle_timeout: options.sender_idle_timeout,
        });
        let cadence = PollCadence::new(options.poll_interval, options.max_poll_interval);
        let session_backoff = Backoff::new(options.retry_base_delay, options.retry_max_delay);

        Self {
            backend,
            codec,
            mode,
            options,
            shared,
            cancel,
            outbound,
            pending: None,
            inbound,
            tracker,
            cadence,
            session_backoff,
            drops: 0,
        }
    }

    #[instrument(skip(self), fields(backend = self.backend.name(), mode = %self.mode))]
    pub async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.shared.set_state(ConnectionState::Connecting);
            match self.establish().await {
                Ok(()) => {}
                Err(Flow::Fault(error)) => {
                    self.fault(error);
                    if self.await_reconnect().await {
                        continue;
                    }
                    break;
                }
                Err(Flow::Stop | Flow::Reconnect(_)) => break,
            }

            self.shared.set_state(ConnectionState::Connected);
            let flow = if self.mode.sends() {
                self.serve_outbound().await
            } else {
                self.serve_inbound().await
            };

            match flow {
                Flow::Stop => break,
                Flow::Reconnect(last) => {
                    self.backend.disconnect().await;
                    self.drops += 1;
                    if self.drops > self.options.max_retries {
                        self.fault(Error::SessionLost {
                            drops: self.drops,
                            last,
                        });
                        if !self.await_reconnect().await {
                            break;
                        }
                        continue;
                    }

                    Counters::bump(&self.shared.counters.reconnects);
                    let delay = self.session_backoff.next_delay();
                    info!(drops = self.drops, error = %last, ?delay, "backend session lost, reconnecting");
                    if !self.pause(delay).await {
                        break;
                    }
                }
                Flow::Fault(error) => {
                    self.backend.disconnect().await;
                    self.fault(error);
                    if !self.await_reconnect().await {
                        break;
                    }
                }
            }
        }

        if self.backend.is_connected() {
            self.backend.disconnect().await;
        }
        self.shared.set_state(ConnectionState::Disconnected);
        debug!("dispatcher stopped");
    }

    fn fault(&self, error: Error) {
        error!(%error, "socket faulted");
        self.shared.fault(error);
    }

    /// Wait for `reconnect`. Returns false if cancelled first.
    async fn await_reconnect(&mut self) -> bool {
        let requested = tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = self.shared.reconnect.notified() => true,
        };
        if requested {
            Counters::bump(&self.shared.counters.reconnects);
            self.session_healthy();
        }
        requested
    }

    /// The session did useful work; forget earlier drops.
    fn session_healthy(&mut self) {
        if self.drops > 0 {
            self.drops = 0;
            self.session_backoff =
                Backoff::new(self.options.retry_base_delay, self.options.retry_max_delay);
        }
    }

    /// Sleep unless cancelled. Returns false if cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    async fn establish(&self) -> Result<(), Flow> {
        let mut backoff = Backoff::new(self.options.retry_base_delay, self.options.retry_max_delay);
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Flow::Stop),
                result = self.backend.connect() => result,
            };

            match result {
                Ok(()) => {
                    if attempts > 1 {
                        debug!(attempts, "connected after retry");
                    }
                    return Ok(());
                }
                Err(error) if !error.is_retryable() => {
                    return Err(Flow::Fault(Error::Connection(error)));
                }
                Err(error) if attempts > self.options.max_retries => {
                    return Err(Flow::Fault(Error::ConnectRetriesExhausted {
                        attempts,
                        last: error,
                    }));
                }
                Err(error) => {
                    let delay = backoff.next_delay();
                    warn!(attempts, %error, ?delay, "connect failed, retrying");
                    if !self.pause(delay).await {
                        return Err(Flow::Stop);
                    }
                }
            }
        }
    }

    /// PUSH and PUB: publish queued envelopes in order.
    async fn serve_outbound(&mut self) -> Flow {
        loop {
            let mut item = match self.pending.take() {
                Some(item) => item,
                None => {
                    let next = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Flow::Stop,
                        next = self.outbound.recv() => next,
                    };
                    match next {
                        Some(item) => item,
                        None => {
                            debug!("outbound queue closed and drained");
                            return Flow::Stop;
                        }
                    }
                }
            };

            match self.publish(&item).await {
                Ok(()) => {
                    self.session_healthy();
                    Counters::bump(&self.shared.counters.published);
                    debug!(sequence = item.sequence, len = item.frame.len(), "published envelope");
                    item.resolve(Ok(()));
                }
                Err(PublishFailure::Rejected(rejection)) => {
                    Counters::bump(&self.shared.counters.publish_failures);
                    error!(sequence = item.sequence, error = %rejection, "backend rejected envelope");
                    let error = Error::Publish(rejection);
                    item.resolve(Err(error.clone()));
                    self.shared.report(error);
                }
                Err(PublishFailure::Exhausted(error)) => {
                    self.pending = Some(item);
                    return Flow::Fault(error);
                }
                Err(PublishFailure::Cancelled) => {
                    self.pending = Some(item);
                    return Flow::Stop;
                }
            }
        }
    }

    async fn publish(&self, item: &Outbound) -> Result<(), PublishFailure> {
        let mut backoff = Backoff::new(self.options.retry_base_delay, self.options.retry_max_delay);
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match self.backend.publish(item.frame.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) if !error.is_transient() => return Err(PublishFailure::Rejected(error)),
                Err(error) if attempts > self.options.max_retries => {
                    return Err(PublishFailure::Exhausted(Error::PublishRetriesExhausted {
                        sequence: item.sequence,
                        attempts,
                        last: error,
                    }));
                }
                Err(error) => {
                    Counters::bump(&self.shared.counters.publish_retries);
                    let delay = backoff.next_delay_at_least(error.retry_after());
                    warn!(sequence = item.sequence, attempts, %error, ?delay, "publish failed, retrying");
                    if !self.pause(delay).await {
                        return Err(PublishFailure::Cancelled);
                    }
                }
            }
        }
    }

    /// PULL and SUB: poll, unwrap, reorder, decode, deliver.
    async fn serve_inbound(&mut self) -> Flow {
        let mut failures = 0u32;

        loop {
            match self.backend.poll().await {
                Ok(frames) => {
                    failures = 0;
                    self.session_healthy();
                    self.cadence.relax();
                    if let Err(flow) = self.ingest(frames).await {
                        return flow;
                    }
                }
                Err(PollError::RateLimited { retry_after }) => {
                    Counters::bump(&self.shared.counters.rate_limited_polls);
                    let interval = self.cadence.slow_down(retry_after);
                    debug!(?interval, "poll rate limited, slowing down");
                }
                Err(PollError::Transient(reason)) => {
                    failures += 1;
                    if failures > self.options.max_retries {
                        warn!(failures, %reason, "polls keep failing, starting a new session");
                        return Flow::Reconnect(PollError::Transient(reason));
                    }
                    let interval = self.cadence.slow_down(None);
                    warn!(failures, %reason, ?interval, "poll failed");
                }
                Err(PollError::Disconnected) => return Flow::Reconnect(PollError::Disconnected),
                Err(error @ PollError::Fatal(_)) => return Flow::Fault(Error::Poll(error)),
            }

            let released = self.tracker.expire(now());
            if let Err(flow) = self.deliver(released).await {
                return flow;
            }
            self.record_tracker();

            if !self.pause(self.cadence.current()).await {
                return Flow::Stop;
            }
        }
    }

    async fn ingest(&mut self, frames: Vec<Bytes>) -> Result<(), Flow> {
        let counters = &self.shared.counters;

        for frame in frames {
            Counters::bump(&counters.frames_received);

            let envelope = match Envelope::decode(frame) {
                Ok(envelope) => envelope,
                Err(error @ piggyback_envelope::Error::ChecksumMismatch { .. }) => {
                    Counters::bump(&counters.checksum_failures);
                    warn!(%error, "dropping corrupted frame");
                    continue;
                }
                Err(error) => {
                    Counters::bump(&counters.malformed);
                    debug!(%error, "dropping malformed frame");
                    continue;
                }
            };

            let released = self.tracker.accept(envelope, now());
            self.deliver(released).await?;
        }

        self.record_tracker();
        Ok(())
    }

    async fn deliver(&self, envelopes: Vec<Envelope>) -> Result<(), Flow> {
        let counters = &self.shared.counters;

        for envelope in envelopes {
            let (topic, body) = if self.mode.topics() {
                let Some((topic, body)) = topic::split(&envelope.payload) else {
                    Counters::bump(&counters.malformed);
                    debug!(sender = %envelope.sender, sequence = envelope.sequence, "dropping frame with damaged topic");
                    continue;
                };
                if !self.shared.subscriptions.read().matches(&topic) {
                    Counters::bump(&counters.filtered);
                    continue;
                }
                (Some(topic), body)
            } else {
                (None, envelope.payload)
            };

            let item = match self.codec.decode(body) {
                Ok(value) => Ok(Message {
                    value,
                    sender: envelope.sender,
                    sequence: envelope.sequence,
                    topic,
                }),
                Err(error) => {
                    Counters::bump(&counters.decode_failures);
                    warn!(sender = %envelope.sender, sequence = envelope.sequence, %error, "codec rejected payload");
                    Err(Error::Codec(error))
                }
            };

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Flow::Stop),
                sent = self.inbound.send(item) => {
                    if sent.is_err() {
                        return Err(Flow::Stop);
                    }
                }
            }
        }

        Ok(())
    }

    fn record_tracker(&self) {
        self.shared
            .counters
            .record_tracker(self.tracker.stats(), self.tracker.held());
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
