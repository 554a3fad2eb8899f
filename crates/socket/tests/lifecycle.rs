mod common;

use common::{connected, next, options, socket, text};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use piggyback_backend::{Backend, ConnectionError, PollError, PublishError};
use piggyback_backend_memory::MemoryChannel;
use piggyback_codec::Utf8Codec;
use piggyback_socket::{ConnectionState, Error, Socket, SocketMode};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Locked;

#[async_trait]
impl Backend for Locked {
    fn name(&self) -> &str {
        "locked"
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unauthorized("bad token".to_string()))
    }

    async fn disconnect(&self) {}

    async fn publish(&self, _payload: Bytes) -> Result<(), PublishError> {
        Err(PublishError::NotConnected)
    }

    async fn poll(&self) -> Result<Vec<Bytes>, PollError> {
        Err(PollError::Disconnected)
    }

    fn is_connected(&self) -> bool {
        false
    }
}

/// Accepts every connect, then loses the session on the first poll.
#[derive(Debug, Default)]
struct Dropping {
    connected: AtomicBool,
    connects: AtomicUsize,
}

#[async_trait]
impl Backend for Dropping {
    fn name(&self) -> &str {
        "dropping"
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn publish(&self, _payload: Bytes) -> Result<(), PublishError> {
        Ok(())
    }

    async fn poll(&self) -> Result<Vec<Bytes>, PollError> {
        Err(PollError::Disconnected)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn test_state_transitions() {
    let channel = MemoryChannel::new("transitions");
    let push = socket(&channel, SocketMode::Push, options());
    assert_eq!(push.state(), ConnectionState::Disconnected);

    push.connect().await.unwrap();
    assert_eq!(push.state(), ConnectionState::Connected);
    assert!(push.backend().is_connected());

    // Connecting twice is harmless.
    push.connect().await.unwrap();

    push.close().await;
    assert_eq!(push.state(), ConnectionState::Disconnected);
    assert!(!push.backend().is_connected());
    assert_matches!(push.send(&text("late")).await, Err(Error::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_then_faults() {
    let channel = MemoryChannel::new("connect-retries");
    channel.faults().fail_next_connects(10);
    let pull = socket(&channel, SocketMode::Pull, options().with_max_retries(2));

    assert_matches!(
        pull.connect().await,
        Err(Error::ConnectRetriesExhausted { attempts: 3, last: ConnectionError::Unreachable(_) })
    );
    assert_eq!(pull.state(), ConnectionState::Faulted);
    assert_matches!(pull.receive().await, Err(Error::Faulted));

    channel.faults().reset();
    pull.reconnect().await.unwrap();
    assert_eq!(pull.state(), ConnectionState::Connected);
    assert_eq!(pull.stats().reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_is_not_retried() {
    let socket = Socket::new(Locked, Utf8Codec, SocketMode::Push, options());

    assert_matches!(
        socket.connect().await,
        Err(Error::Connection(ConnectionError::Unauthorized(_)))
    );
    assert_eq!(socket.state(), ConnectionState::Faulted);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_publish_faults_and_survives_reconnect() {
    let channel = MemoryChannel::new("exhausted");
    let push = socket(&channel, SocketMode::Push, options().with_max_retries(1));
    push.connect().await.unwrap();
    let mut states = push.state_changes();

    channel.faults().fail_next_publishes(100);
    push.send(&text("stuck")).await.unwrap();

    timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ConnectionState::Faulted),
    )
    .await
    .unwrap()
    .unwrap();

    assert_matches!(
        push.last_fault(),
        Some(Error::PublishRetriesExhausted { sequence: 1, attempts: 2, .. })
    );
    assert_matches!(push.send(&text("refused")).await, Err(Error::Faulted));
    assert!(channel.is_empty());

    channel.faults().reset();
    push.reconnect().await.unwrap();
    push.send_confirmed(&text("next")).await.unwrap();

    assert_eq!(channel.len(), 2);
    assert_eq!(push.stats().published, 2);
}

#[tokio::test(start_paused = true)]
async fn test_faulted_socket_hands_out_buffered_values_first() {
    let channel = MemoryChannel::new("faulted-buffer");
    let pull = connected(&channel, SocketMode::Pull).await;
    let push = connected(&channel, SocketMode::Push).await;

    push.send_confirmed(&text("buffered")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    channel.faults().set_unreachable(true);
    let mut states = pull.state_changes();
    timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == ConnectionState::Faulted),
    )
    .await
    .unwrap()
    .unwrap();

    // Failing polls start a new session, which cannot be established.
    assert_matches!(
        pull.last_fault(),
        Some(Error::ConnectRetriesExhausted { last: ConnectionError::Unreachable(_), .. })
    );
    assert_eq!(pull.receive().await.unwrap(), "buffered");
    assert_matches!(pull.receive().await, Err(Error::Faulted));

    channel.faults().set_unreachable(false);
    pull.reconnect().await.unwrap();
    push.send(&text("recovered")).await.unwrap();
    assert_eq!(next(&pull).await.value, "recovered");
}

#[tokio::test(start_paused = true)]
async fn test_dropping_sessions_back_off_then_fault() {
    let socket = Socket::new(
        Dropping::default(),
        Utf8Codec,
        SocketMode::Pull,
        options()
            .with_max_retries(3)
            .with_retry_delays(Duration::from_millis(100), Duration::from_secs(1)),
    );
    let mut states = socket.state_changes();

    let started = tokio::time::Instant::now();
    socket.connect().await.unwrap();
    timeout(
        Duration::from_secs(30),
        states.wait_for(|state| *state == ConnectionState::Faulted),
    )
    .await
    .unwrap()
    .unwrap();

    // Initial session plus three backed-off retries: 100ms, ~200ms, ~400ms.
    assert_eq!(socket.backend().connects.load(Ordering::SeqCst), 4);
    assert!(started.elapsed() >= Duration::from_millis(700));
    assert_matches!(
        socket.last_fault(),
        Some(Error::SessionLost { drops: 4, last: PollError::Disconnected })
    );
    assert_eq!(socket.stats().reconnects, 3);
}

#[tokio::test(start_paused = true)]
async fn test_lost_session_reconnects_without_fault() {
    let channel = MemoryChannel::new("lost-session");
    let pull = connected(&channel, SocketMode::Pull).await;
    let push = connected(&channel, SocketMode::Push).await;

    pull.backend().disconnect().await;
    push.send(&text("after")).await.unwrap();

    assert_eq!(next(&pull).await.value, "after");
    assert_eq!(pull.state(), ConnectionState::Connected);
    assert_eq!(pull.stats().reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_unblocks_receive() {
    let channel = MemoryChannel::new("cancel-receive");
    let pull = connected(&channel, SocketMode::Pull).await;
    let token = pull.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let result = timeout(Duration::from_secs(5), pull.receive()).await.unwrap();
    assert_matches!(result, Err(Error::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancellation_unblocks_send() {
    let channel = MemoryChannel::new("parent-cancel");
    let parent = CancellationToken::new();
    let push = socket(
        &channel,
        SocketMode::Push,
        options().with_queue_capacity(1).with_parent(parent.clone()),
    );

    push.send(&text("fills the queue")).await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        parent.cancel();
    });

    let result = timeout(Duration::from_secs(5), push.send(&text("blocked"))).await.unwrap();
    assert_matches!(result, Err(Error::Cancelled));
    assert_matches!(push.connect().await, Err(Error::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_close_drains_queue() {
    let channel = MemoryChannel::new("close-drain");
    channel.faults().set_publish_latency(Duration::from_millis(50));
    let push = connected(&channel, SocketMode::Push).await;

    for value in ["a", "b", "c"] {
        push.send(&text(value)).await.unwrap();
    }
    push.close().await;

    assert_eq!(channel.len(), 3);
    assert_eq!(push.state(), ConnectionState::Disconnected);
    assert_eq!(push.stats().published, 3);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_bounded() {
    let channel = MemoryChannel::new("close-bounded");
    channel.faults().set_publish_latency(Duration::from_secs(60));
    let push = connected(&channel, SocketMode::Push).await;

    push.send(&text("slow")).await.unwrap();
    let started = tokio::time::Instant::now();
    push.close().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(push.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_close_without_connect_leaves_transport_alone() {
    let channel = MemoryChannel::new("close-idle");
    let push = socket(&channel, SocketMode::Push, options());

    push.send(&text("never sent")).await.unwrap();
    push.close().await;
    push.close().await;

    assert!(channel.is_empty());
    assert_eq!(push.state(), ConnectionState::Disconnected);
    assert_matches!(push.connect().await, Err(Error::Closed));
}
