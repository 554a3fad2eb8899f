use crate::{Error, Result, SenderId};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Header size: 16 bytes sender id + 8 bytes sequence + 4 bytes checksum.
pub const HEADER_SIZE: usize = SenderId::LEN + 8 + 4;

/// One framed payload.
///
/// On the wire, big-endian:
///
/// ```text
/// [sender_id: 16][sequence: 8][checksum: 4][payload: N]
/// ```
///
/// The checksum is CRC-32 over the sender id, the sequence and the payload,
/// so a frame whose header was damaged is rejected as well.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Producer of this frame.
    pub sender: SenderId,
    /// Position in the producer's stream, starting at 1.
    pub sequence: u64,
    /// Codec output.
    pub payload: Bytes,
}

impl Envelope {
    /// Create an envelope.
    #[must_use]
    pub const fn new(sender: SenderId, sequence: u64, payload: Bytes) -> Self {
        Self {
            sender,
            sequence,
            payload,
        }
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_slice(self.sender.as_bytes());
        buf.put_u64(self.sequence);
        buf.put_u32(checksum(&self.sender, self.sequence, &self.payload));
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse and verify wire bytes. The payload shares the frame's buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is shorter than a header, carries
    /// sequence zero, or fails checksum verification.
    pub fn decode(frame: Bytes) -> Result<Self> {
        if frame.len() < HEADER_SIZE {
            return Err(Error::Truncated {
                needed: HEADER_SIZE,
                have: frame.len(),
            });
        }

        let mut header = &frame[..HEADER_SIZE];
        let mut sender = [0u8; SenderId::LEN];
        header.copy_to_slice(&mut sender);
        let sender = SenderId::from_bytes(sender);
        let sequence = header.get_u64();
        let expected = header.get_u32();

        let payload = frame.slice(HEADER_SIZE..);
        let actual = checksum(&sender, sequence, &payload);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        if sequence == 0 {
            return Err(Error::ZeroSequence);
        }

        Ok(Self {
            sender,
            sequence,
            payload,
        })
    }

    /// Size of the encoded frame.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

fn checksum(sender: &SenderId, sequence: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(sender.as_bytes());
    hasher.update(&sequence.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
