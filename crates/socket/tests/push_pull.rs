mod common;

use common::{connected, frame, next, options, socket, text};

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use futures::StreamExt;
use piggyback_backend::PublishError;
use piggyback_backend_memory::{MemoryBackend, MemoryBackendOptions, MemoryChannel};
use piggyback_codec::Utf8Codec;
use piggyback_envelope::{Envelope, SenderId};
use piggyback_socket::{Error, SendPolicy, Socket, SocketMode};
use tokio::time::timeout;

#[tokio::test(start_paused = true)]
async fn test_values_arrive_in_order() {
    let _ = tracing_subscriber::fmt::try_init();

    let channel = MemoryChannel::new("in-order");
    let pull = connected(&channel, SocketMode::Pull).await;
    let push = connected(&channel, SocketMode::Push).await;

    for value in ["x", "y", "z"] {
        push.send(&text(value)).await.unwrap();
    }

    for (expected, value) in (1..).zip(["x", "y", "z"]) {
        let message = next(&pull).await;
        assert_eq!(message.value, value);
        assert_eq!(message.sequence, expected);
        assert_eq!(message.sender, push.sender_id());
        assert_eq!(message.topic, None);
    }

    assert_eq!(pull.stats().received, 3);
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_blocks_until_drained() {
    let channel = MemoryChannel::new("backpressure");
    channel.faults().set_publish_latency(Duration::from_millis(500));

    let push = Arc::new(socket(&channel, SocketMode::Push, options().with_queue_capacity(1)));
    push.connect().await.unwrap();

    push.send(&text("x")).await.unwrap();

    let second = tokio::spawn({
        let push = push.clone();
        async move { push.send(&text("y")).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!second.is_finished());
    assert!(channel.is_empty());

    let sequence = timeout(Duration::from_secs(5), second)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(sequence, 2);
    assert_eq!(channel.len(), 1);
}

#[tokio::test]
async fn test_non_blocking_policy_reports_full_queue() {
    let channel = MemoryChannel::new("queue-full");
    let push = socket(
        &channel,
        SocketMode::Push,
        options()
            .with_queue_capacity(1)
            .with_send_policy(SendPolicy::NonBlocking),
    );

    push.try_send(&text("x")).unwrap();
    assert_matches!(
        push.try_send(&text("y")),
        Err(Error::QueueFull { capacity: 1 })
    );
    assert_matches!(
        push.send(&text("z")).await,
        Err(Error::QueueFull { capacity: 1 })
    );
    assert_eq!(push.stats().enqueued, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_once_delivered() {
    let channel = MemoryChannel::new("transient");
    let pull = connected(&channel, SocketMode::Pull).await;
    let push = connected(&channel, SocketMode::Push).await;

    channel.faults().fail_next_publishes(2);
    push.send_confirmed(&text("x")).await.unwrap();
    push.send(&text("after")).await.unwrap();

    assert_eq!(push.stats().publish_retries, 2);
    assert_eq!(next(&pull).await.value, "x");
    assert_eq!(next(&pull).await.value, "after");
    assert_eq!(pull.stats().duplicates, 0);
    assert_eq!(channel.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_interleaved_producers() {
    let channel = MemoryChannel::new("interleaved");
    let pull = connected(&channel, SocketMode::Pull).await;
    let a = connected(&channel, SocketMode::Push).await;
    let b = connected(&channel, SocketMode::Push).await;

    for index in 1..=3 {
        a.send(&format!("a{index}")).await.unwrap();
        b.send(&format!("b{index}")).await.unwrap();
    }

    let mut from_a = Vec::new();
    let mut from_b = Vec::new();
    for _ in 0..6 {
        let message = next(&pull).await;
        if message.sender == a.sender_id() {
            from_a.push(message.value);
        } else {
            assert_eq!(message.sender, b.sender_id());
            from_b.push(message.value);
        }
    }

    assert_eq!(from_a, vec!["a1", "a2", "a3"]);
    assert_eq!(from_b, vec!["b1", "b2", "b3"]);
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_frame_is_ignored() {
    let channel = MemoryChannel::new("duplicates");
    let pull = connected(&channel, SocketMode::Pull).await;
    let push = connected(&channel, SocketMode::Push).await;

    push.send_confirmed(&text("a")).await.unwrap();
    assert_eq!(next(&pull).await.value, "a");

    let first = channel.payloads()[0].clone();
    channel.inject(first);
    push.send(&text("b")).await.unwrap();

    assert_eq!(next(&pull).await.value, "b");
    assert_eq!(pull.stats().duplicates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reordered_frames_are_restored() {
    let channel = MemoryChannel::new("reordered");
    let pull = connected(&channel, SocketMode::Pull).await;
    let sender = SenderId::random();

    for sequence in [2, 3, 1] {
        channel.inject(frame(sender, sequence, &sequence.to_string()));
    }

    for expected in ["1", "2", "3"] {
        assert_eq!(next(&pull).await.value, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_lost_frame_does_not_block() {
    let channel = MemoryChannel::new("lost");
    let pull = connected(&channel, SocketMode::Pull).await;
    let sender = SenderId::random();

    for sequence in [1, 3, 4] {
        channel.inject(frame(sender, sequence, &sequence.to_string()));
    }

    assert_eq!(next(&pull).await.sequence, 1);
    assert_eq!(next(&pull).await.sequence, 3);
    assert_eq!(next(&pull).await.sequence, 4);
    assert_eq!(pull.stats().gaps_skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_frames_are_dropped() {
    let channel = MemoryChannel::new("corrupted");
    let pull = connected(&channel, SocketMode::Pull).await;
    let sender = SenderId::random();

    let mut corrupted = frame(sender, 1, "bad").to_vec();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;
    channel.inject(Bytes::from(corrupted));
    channel.inject(Bytes::from_static(b"hello from a human"));
    channel.inject(frame(sender, 1, "good"));

    assert_eq!(next(&pull).await.value, "good");
    let stats = pull.stats();
    assert_eq!(stats.checksum_failures + stats.malformed, 2);
    assert_eq!(stats.frames_received, 3);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_payload_is_surfaced() {
    let channel = MemoryChannel::new("undecodable");
    let pull = connected(&channel, SocketMode::Pull).await;
    let sender = SenderId::random();

    channel.inject(Envelope::new(sender, 1, Bytes::from_static(&[0xC3, 0x28])).encode());
    channel.inject(frame(sender, 2, "fine"));

    let result = timeout(Duration::from_secs(5), pull.receive()).await.unwrap();
    assert_matches!(result, Err(Error::Codec(_)));
    assert_eq!(next(&pull).await.value, "fine");
    assert_eq!(pull.stats().decode_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_publish_reaches_caller_and_observers() {
    let channel = MemoryChannel::new("rejected");
    let push = connected(&channel, SocketMode::Push).await;
    let mut errors = push.errors();

    channel.faults().reject_next_publishes(1);
    assert_matches!(
        push.send_confirmed(&text("refused")).await,
        Err(Error::Publish(PublishError::Fatal { .. }))
    );
    assert_matches!(
        errors.recv().await,
        Ok(Error::Publish(PublishError::Fatal { .. }))
    );

    push.send_confirmed(&text("accepted")).await.unwrap();
    assert_eq!(channel.len(), 1);
    assert_eq!(push.stats().publish_failures, 1);
}

#[tokio::test]
async fn test_oversize_value_fails_fast() {
    let channel = MemoryChannel::new("oversize");
    let backend = MemoryBackend::new(
        channel,
        MemoryBackendOptions {
            max_payload_size: Some(40),
            ..MemoryBackendOptions::default()
        },
    );
    let push = Socket::new(backend, Utf8Codec, SocketMode::Push, options());

    push.send(&text("short")).await.unwrap();
    assert_matches!(
        push.send(&"x".repeat(64)).await,
        Err(Error::Publish(PublishError::PayloadTooLarge { size: 92, max: 40 }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiting_slows_but_does_not_stop_polling() {
    let channel = MemoryChannel::new("rate-limited");
    let pull = connected(&channel, SocketMode::Pull).await;
    let push = connected(&channel, SocketMode::Push).await;

    channel.faults().rate_limit_next_polls(3);
    push.send(&text("eventually")).await.unwrap();

    assert_eq!(next(&pull).await.value, "eventually");
    assert_eq!(pull.stats().rate_limited_polls, 3);
}

#[tokio::test(start_paused = true)]
async fn test_stream_yields_values() {
    let channel = MemoryChannel::new("stream");
    let pull = connected(&channel, SocketMode::Pull).await;
    let push = connected(&channel, SocketMode::Push).await;

    for value in ["one", "two", "three"] {
        push.send(&text(value)).await.unwrap();
    }

    let values: Vec<String> = pull
        .into_stream()
        .take(3)
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(values, vec!["one", "two", "three"]);
}

#[tokio::test(start_paused = true)]
async fn test_stream_ends_on_cancel() {
    let channel = MemoryChannel::new("stream-cancel");
    let pull = connected(&channel, SocketMode::Pull).await;
    let token = pull.cancellation_token();

    let collector = tokio::spawn(async move { pull.into_stream().collect::<Vec<_>>().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let items = timeout(Duration::from_secs(5), collector).await.unwrap().unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_mode_restrictions() {
    let channel = MemoryChannel::new("modes");
    let pull = socket(&channel, SocketMode::Pull, options());
    let push = socket(&channel, SocketMode::Push, options());

    assert_matches!(
        pull.send(&text("x")).await,
        Err(Error::UnsupportedOperation { operation: "send", mode: SocketMode::Pull })
    );
    assert_matches!(
        push.receive().await,
        Err(Error::UnsupportedOperation { operation: "receive", mode: SocketMode::Push })
    );
    assert_matches!(
        push.subscribe("topic"),
        Err(Error::UnsupportedOperation { .. })
    );
    assert_matches!(
        push.send_topic("topic", &text("x")).await,
        Err(Error::UnsupportedOperation { .. })
    );
}
