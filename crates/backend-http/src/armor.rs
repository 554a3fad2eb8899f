//! Text armor for binary frames. Chat services carry text, so frames travel
//! as base64 inside a fenced block:
//!
//! ````text
//! ```pbk
//! <base64>
//! ```
//! ````

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

const OPEN: &str = "```pbk\n";
const CLOSE: &str = "\n```";

/// Characters the fence adds around the base64 body.
pub const OVERHEAD: usize = OPEN.len() + CLOSE.len();

pub fn wrap(payload: &[u8]) -> String {
    let mut content = String::with_capacity(OVERHEAD + payload.len().div_ceil(3) * 4);
    content.push_str(OPEN);
    STANDARD.encode_string(payload, &mut content);
    content.push_str(CLOSE);
    content
}

/// `None` for anything that is not an armored frame.
pub fn unwrap(content: &str) -> Option<Bytes> {
    let body = content.trim().strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    STANDARD.decode(body.trim()).ok().map(Bytes::from)
}

/// Largest payload whose armored form fits in `max_content_length` characters.
pub const fn max_payload(max_content_length: usize) -> usize {
    max_content_length.saturating_sub(OVERHEAD) / 4 * 3
}
