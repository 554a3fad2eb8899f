use crate::Error;

use std::io::Write;

use piggyback_backend::Backend;
use piggyback_codec::Utf8Codec;
use piggyback_socket::{Error as SocketError, Message, Socket};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type TextSocket<B> = Socket<B, Utf8Codec>;

/// Send each input line. Returns the number of lines sent.
pub async fn push<B, R>(
    socket: &TextSocket<B>,
    input: R,
    topic: Option<&str>,
    shutdown: &CancellationToken,
) -> Result<u64, Error>
where
    B: Backend,
    R: AsyncBufRead + Unpin,
{
    socket.connect().await?;

    let mut lines = input.lines();
    let mut sent = 0;
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        let result = match topic {
            Some(topic) => socket.send_topic(topic, &line).await,
            None => socket.send(&line).await,
        };
        match result {
            Ok(sequence) => {
                debug!(sequence, "queued line");
                sent += 1;
            }
            Err(SocketError::Cancelled) => break,
            Err(error) => return Err(error.into()),
        }
    }

    socket.close().await;
    info!(sent, published = socket.stats().published, "push finished");
    Ok(sent)
}

/// Print received values until cancelled or `count` values were printed.
/// Returns the number printed.
pub async fn pull<B, W>(
    socket: &TextSocket<B>,
    output: &mut W,
    subscriptions: &[String],
    count: Option<u64>,
) -> Result<u64, Error>
where
    B: Backend,
    W: Write,
{
    for prefix in subscriptions {
        socket.subscribe(prefix)?;
    }
    socket.connect().await?;

    let mut printed = 0;
    while count.is_none_or(|count| printed < count) {
        match socket.receive_message().await {
            Ok(message) => {
                writeln!(output, "{}", render(&message))?;
                output.flush()?;
                printed += 1;
            }
            Err(SocketError::Codec(error)) => warn!(%error, "skipping value that is not UTF-8"),
            Err(SocketError::Cancelled | SocketError::Closed) => break,
            Err(error) => return Err(error.into()),
        }
    }

    socket.close().await;
    Ok(printed)
}

/// Send each input line through `push` and print it once `pull` receives it.
pub async fn loopback<B, R, W>(
    push: &TextSocket<B>,
    pull: &TextSocket<B>,
    input: R,
    output: &mut W,
    shutdown: &CancellationToken,
) -> Result<u64, Error>
where
    B: Backend,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pull.connect().await?;
    push.connect().await?;

    let mut lines = input.lines();
    let mut echoed = 0;
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        match push.send_confirmed(&line).await {
            Ok(_) => {}
            Err(SocketError::Cancelled) => break,
            Err(error) => return Err(error.into()),
        }
        match pull.receive_message().await {
            Ok(message) => {
                writeln!(output, "{}", render(&message))?;
                output.flush()?;
                echoed += 1;
            }
            Err(SocketError::Cancelled) => break,
            Err(error) => return Err(error.into()),
        }
    }

    push.close().await;
    pull.close().await;
    Ok(echoed)
}

fn render(message: &Message<String>) -> String {
    match &message.topic {
        Some(topic) => format!(
            "{} #{} [{topic}] {}",
            message.sender, message.sequence, message.value
        ),
        None => format!("{} #{} {}", message.sender, message.sequence, message.value),
    }
}
