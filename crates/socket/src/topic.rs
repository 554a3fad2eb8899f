//! Topic framing for PUB/SUB payloads: `[len: u16 BE][topic][body]`.

use crate::{Error, Result};

use bytes::{BufMut, Bytes, BytesMut};

pub fn frame(topic: &str, body: &[u8]) -> Result<Bytes> {
    let len = u16::try_from(topic.len()).map_err(|_| Error::TopicTooLong { len: topic.len() })?;
    let mut buf = BytesMut::with_capacity(2 + topic.len() + body.len());
    buf.put_u16(len);
    buf.put_slice(topic.as_bytes());
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Split a framed payload. `None` if the header is damaged.
pub fn split(payload: &Bytes) -> Option<(String, Bytes)> {
    let header = payload.get(..2)?;
    let len = usize::from(u16::from_be_bytes([header[0], header[1]]));
    let topic = payload.get(2..2 + len)?;
    let topic = std::str::from_utf8(topic).ok()?.to_string();
    Some((topic, payload.slice(2 + len..)))
}

/// Prefix subscriptions. The empty prefix matches every topic; no
/// subscriptions match nothing.
#[derive(Debug, Default)]
pub struct Subscriptions {
    prefixes: Vec<String>,
}

impl Subscriptions {
    pub fn subscribe(&mut self, prefix: &str) {
        self.prefixes.push(prefix.to_string());
    }

    /// Removes one matching subscription. Returns whether one existed.
    pub fn unsubscribe(&mut self, prefix: &str) -> bool {
        self.prefixes
            .iter()
            .position(|existing| existing == prefix)
            .map(|index| self.prefixes.remove(index))
            .is_some()
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.prefixes.iter().any(|prefix| topic.starts_with(prefix.as_str()))
    }

    pub fn topics(&self) -> Vec<String> {
        self.prefixes.clone()
    }
}
