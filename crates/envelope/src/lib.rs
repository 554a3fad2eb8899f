//! Framing that lets payload boundaries and per-producer ordering survive a
//! best-effort transport.
//!
//! Every payload travels in an [`Envelope`] stamped with the producer's
//! [`SenderId`], a per-producer sequence number and a CRC-32 checksum.
//! Receivers run envelopes through a [`SequenceTracker`] to drop duplicates,
//! restore order within a bounded window and skip frames that never arrive.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod envelope;
mod error;
mod sender;
mod tracker;

pub use envelope::{Envelope, HEADER_SIZE};
pub use error::{Error, Result};
pub use sender::{SenderId, SequenceCounter};
pub use tracker::{SequenceTracker, TrackerConfig, TrackerStats};
