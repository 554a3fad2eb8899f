use crate::{Error, Result, SendPolicy};

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Outcome channel for `send_confirmed`.
pub type Receipt = oneshot::Sender<Result<()>>;

/// A framed envelope waiting for the dispatcher.
///
/// Holds a queue slot until dropped, so capacity covers the envelope being
/// published as well as those still queued.
#[derive(Debug)]
pub struct Outbound {
    pub frame: Bytes,
    pub sequence: u64,
    pub receipt: Option<Receipt>,
    _slot: OwnedSemaphorePermit,
}

impl Outbound {
    pub fn resolve(&mut self, outcome: Result<()>) {
        if let Some(receipt) = self.receipt.take() {
            // The caller may have stopped waiting.
            let _ = receipt.send(outcome);
        }
    }
}

/// Producer side of the outbound queue.
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    slots: Arc<Semaphore>,
    tx: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
}

/// A reserved queue slot.
#[derive(Debug)]
pub struct Slot(OwnedSemaphorePermit);

impl OutboundQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            tx: Mutex::new(Some(tx)),
        };
        (queue, rx)
    }

    pub async fn reserve(&self, policy: SendPolicy, cancel: &CancellationToken) -> Result<Slot> {
        match policy {
            SendPolicy::NonBlocking => self.reserve_now(),
            SendPolicy::Blocking => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(Error::Cancelled),
                    permit = self.slots.clone().acquire_owned() => {
                        permit.map(Slot).map_err(|_| Error::Closed)
                    }
                }
            }
        }
    }

    pub fn reserve_now(&self) -> Result<Slot> {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => Ok(Slot(permit)),
            Err(TryAcquireError::NoPermits) => Err(Error::QueueFull {
                capacity: self.capacity,
            }),
            Err(TryAcquireError::Closed) => Err(Error::Closed),
        }
    }

    /// Assign a sequence number and enqueue under one lock, so queue order
    /// always matches sequence order.
    pub fn push<F>(&self, slot: Slot, receipt: Option<Receipt>, frame_for: F) -> Result<u64>
    where
        F: FnOnce() -> Result<(u64, Bytes)>,
    {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(Error::Closed)?;
        let (sequence, frame) = frame_for()?;

        tx.send(Outbound {
            frame,
            sequence,
            receipt,
            _slot: slot.0,
        })
        .map_err(|_| Error::Closed)?;

        Ok(sequence)
    }

    /// Stop accepting envelopes. The dispatcher drains what is queued.
    pub fn close(&self) {
        self.tx.lock().take();
        self.slots.close();
    }
}
