use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use piggyback_backend::{Backend, ConnectionError, PollError, PublishError};
use piggyback_backend_memory::{MemoryBackend, MemoryBackendOptions, MemoryChannel, StartFrom};

fn options(start_from: StartFrom) -> MemoryBackendOptions {
    MemoryBackendOptions {
        start_from,
        ..MemoryBackendOptions::default()
    }
}

#[tokio::test]
async fn test_publish_and_poll_between_backends() {
    let _ = tracing_subscriber::fmt::try_init();

    let channel = MemoryChannel::new("publish-poll");
    let writer = MemoryBackend::new_default(channel.clone());
    let reader = MemoryBackend::new_default(channel.clone());

    writer.connect().await.unwrap();
    reader.connect().await.unwrap();

    writer.publish(Bytes::from_static(b"one")).await.unwrap();
    writer.publish(Bytes::from_static(b"two")).await.unwrap();

    assert_eq!(reader.poll().await.unwrap(), vec!["one", "two"]);
    assert!(reader.poll().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_from_latest_skips_history() {
    let channel = MemoryChannel::new("start-latest");
    channel.inject(Bytes::from_static(b"old"));

    let latest = MemoryBackend::new(channel.clone(), options(StartFrom::Latest));
    let beginning = MemoryBackend::new(channel.clone(), options(StartFrom::Beginning));
    latest.connect().await.unwrap();
    beginning.connect().await.unwrap();

    channel.inject(Bytes::from_static(b"new"));

    assert_eq!(latest.poll().await.unwrap(), vec!["new"]);
    assert_eq!(beginning.poll().await.unwrap(), vec!["old", "new"]);
}

#[tokio::test]
async fn test_cursor_survives_reconnect() {
    let channel = MemoryChannel::new("reconnect-cursor");
    let reader = MemoryBackend::new_default(channel.clone());
    reader.connect().await.unwrap();

    channel.inject(Bytes::from_static(b"a"));
    assert_eq!(reader.poll().await.unwrap(), vec!["a"]);

    reader.disconnect().await;
    assert_matches!(reader.poll().await, Err(PollError::Disconnected));
    channel.inject(Bytes::from_static(b"b"));

    reader.connect().await.unwrap();
    assert_eq!(reader.poll().await.unwrap(), vec!["b"]);
}

#[tokio::test]
async fn test_page_size_limits_poll() {
    let channel = MemoryChannel::new("paging");
    let reader = MemoryBackend::new(
        channel.clone(),
        MemoryBackendOptions {
            page_size: 2,
            ..MemoryBackendOptions::default()
        },
    );
    reader.connect().await.unwrap();

    for payload in ["a", "b", "c"] {
        channel.inject(Bytes::from(payload));
    }

    assert_eq!(reader.poll().await.unwrap().len(), 2);
    assert_eq!(reader.poll().await.unwrap(), vec!["c"]);
}

#[tokio::test]
async fn test_payload_limit() {
    let channel = MemoryChannel::new("payload-limit");
    let writer = MemoryBackend::new(
        channel,
        MemoryBackendOptions {
            max_payload_size: Some(4),
            ..MemoryBackendOptions::default()
        },
    );
    writer.connect().await.unwrap();

    assert_eq!(writer.max_payload_size(), Some(4));
    assert_matches!(
        writer.publish(Bytes::from_static(b"too long")).await,
        Err(PublishError::PayloadTooLarge { size: 8, max: 4 })
    );
}

#[tokio::test]
async fn test_injected_faults() {
    let channel = MemoryChannel::new("faults");
    let backend = MemoryBackend::new_default(channel.clone());

    channel.faults().fail_next_connects(1);
    assert_matches!(
        backend.connect().await,
        Err(ConnectionError::Unreachable(_))
    );
    backend.connect().await.unwrap();

    channel.faults().fail_next_publishes(1);
    let error = backend.publish(Bytes::from_static(b"x")).await.unwrap_err();
    assert!(error.is_transient());

    channel.faults().reject_next_publishes(1);
    assert_matches!(
        backend.publish(Bytes::from_static(b"x")).await,
        Err(PublishError::Fatal { .. })
    );

    backend.publish(Bytes::from_static(b"x")).await.unwrap();
    assert_eq!(channel.len(), 1);

    channel.faults().rate_limit_next_polls(1);
    assert_matches!(backend.poll().await, Err(PollError::RateLimited { .. }));

    channel.faults().set_unreachable(true);
    assert_matches!(backend.poll().await, Err(PollError::Transient(_)));
}

#[tokio::test(start_paused = true)]
async fn test_publish_latency() {
    let channel = MemoryChannel::new("latency");
    let backend = MemoryBackend::new_default(channel.clone());
    backend.connect().await.unwrap();
    channel.faults().set_publish_latency(Duration::from_millis(500));

    let started = tokio::time::Instant::now();
    backend.publish(Bytes::from_static(b"slow")).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let backend = MemoryBackend::new_default(MemoryChannel::new("idempotent"));
    backend.disconnect().await;
    backend.connect().await.unwrap();
    backend.disconnect().await;
    backend.disconnect().await;

    assert!(!backend.is_connected());
    assert_matches!(
        backend.publish(Bytes::from_static(b"x")).await,
        Err(PublishError::NotConnected)
    );
}
