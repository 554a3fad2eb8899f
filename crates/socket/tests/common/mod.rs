#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use piggyback_backend_memory::{MemoryBackend, MemoryChannel};
use piggyback_codec::Utf8Codec;
use piggyback_envelope::{Envelope, SenderId};
use piggyback_socket::{Message, Socket, SocketMode, SocketOptions};
use tokio::time::timeout;

pub type TextSocket = Socket<MemoryBackend, Utf8Codec>;

/// Fast cadence so tests spend little (virtual) time waiting.
pub fn options() -> SocketOptions {
    SocketOptions::default()
        .with_poll_interval(Duration::from_millis(10), Duration::from_millis(200))
        .with_retry_delays(Duration::from_millis(10), Duration::from_millis(100))
        .with_gap_timeout(Duration::from_millis(200))
        .with_close_timeout(Duration::from_secs(1))
}

pub fn socket(channel: &MemoryChannel, mode: SocketMode, options: SocketOptions) -> TextSocket {
    Socket::new(
        MemoryBackend::new_default(channel.clone()),
        Utf8Codec,
        mode,
        options,
    )
}

pub async fn connected(channel: &MemoryChannel, mode: SocketMode) -> TextSocket {
    let socket = socket(channel, mode, options());
    socket.connect().await.unwrap();
    socket
}

pub fn text(value: &str) -> String {
    value.to_string()
}

pub async fn next(socket: &TextSocket) -> Message<String> {
    timeout(Duration::from_secs(5), socket.receive_message())
        .await
        .expect("timed out waiting for a message")
        .unwrap()
}

pub fn frame(sender: SenderId, sequence: u64, value: &str) -> Bytes {
    Envelope::new(sender, sequence, Bytes::copy_from_slice(value.as_bytes())).encode()
}
