//! Backend over a chat service's REST API.
//!
//! Frames are posted as text messages to one channel and read back by
//! paging through the channel history with an `after` cursor. The service
//! is expected to expose:
//!
//! - `GET  {base}/channels/{id}` to check access
//! - `POST {base}/channels/{id}/messages` with `{"content": "..."}`
//! - `GET  {base}/channels/{id}/messages?after={id}&limit={n}`
//! - `DELETE {base}/channels/{id}/messages/{message}` when frames expire
//!
//! Message ids are decimal strings that grow over time. Messages that are not
//! armored frames, such as human chatter in the same channel, are skipped.
//!
//! Frames can be posted to a different channel than the one read from, so two
//! peers can each own a channel. With a message TTL, frames this backend posted
//! are deleted again once they are older than the TTL.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod armor;
mod error;

pub use error::Error;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use piggyback_backend::{Backend, ConnectionError, PollError, PublishError};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

/// Options for [`HttpBackend`], usually read from `[backend.http]`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpBackendOptions {
    /// API root, e.g. `https://chat.example.com/api/v10`.
    pub base_url: String,

    /// Channel id read from, and posted to unless `outbound_channel` is set.
    pub channel: String,

    /// Channel id posted to.
    #[serde(default)]
    pub outbound_channel: Option<String>,

    /// Bot token. Sent as `Authorization: {auth_scheme} {token}`.
    #[serde(default)]
    pub token: Option<String>,

    /// Authorization scheme.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,

    /// Most messages requested per poll.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Longest message the service accepts, in characters.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Read the retained history on first connect instead of only new
    /// messages.
    #[serde(default)]
    pub start_from_beginning: bool,

    /// Delete posted frames once they are this old.
    #[serde(default)]
    pub message_ttl_ms: Option<u64>,
}

fn default_auth_scheme() -> String {
    "Bot".to_string()
}

const fn default_page_size() -> u32 {
    100
}

const fn default_max_content_length() -> usize {
    2000
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

impl HttpBackendOptions {
    /// Options with defaults for everything but the endpoint.
    pub fn new(base_url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            channel: channel.into(),
            outbound_channel: None,
            token: None,
            auth_scheme: default_auth_scheme(),
            page_size: default_page_size(),
            max_content_length: default_max_content_length(),
            request_timeout_ms: default_request_timeout_ms(),
            start_from_beginning: false,
            message_ttl_ms: None,
        }
    }

    /// Set the token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Channel frames are posted to.
    pub fn outbound_channel(&self) -> &str {
        self.outbound_channel.as_deref().unwrap_or(&self.channel)
    }
}

/// Longest `Retry-After` honoured.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

#[derive(Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct CreatedMessage {
    id: String,
}

#[derive(Deserialize)]
struct ChannelMessage {
    id: String,
    #[serde(default)]
    content: String,
}

/// Backend posting frames to a chat channel over HTTP.
///
/// The read cursor is the highest message id seen. It is positioned on the
/// first connect and kept across reconnects.
#[derive(Debug)]
pub struct HttpBackend {
    client: Client,
    options: HttpBackendOptions,
    channel_url: Url,
    messages_url: Url,
    /// Set when posting goes to another channel.
    outbound_channel_url: Option<Url>,
    outbound_url: Url,
    cursor: Mutex<Option<u64>>,
    /// Frames awaiting deletion, oldest first.
    posted: Mutex<VecDeque<(u64, Instant)>>,
    connected: AtomicBool,
}

impl HttpBackend {
    /// Build a backend. Nothing is sent until [`Backend::connect`].
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse, the token is not a
    /// valid header value, or the HTTP client cannot be built.
    pub fn new(options: HttpBackendOptions) -> Result<Self, Error> {
        let mut base = Url::parse(&options.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let channel_url = base.join(&format!("channels/{}", options.channel))?;
        let messages_url = base.join(&format!("channels/{}/messages", options.channel))?;
        let outbound = options.outbound_channel();
        let (outbound_channel_url, outbound_url) = if outbound == options.channel {
            (None, messages_url.clone())
        } else {
            (
                Some(base.join(&format!("channels/{outbound}"))?),
                base.join(&format!("channels/{outbound}/messages"))?,
            )
        };

        let mut headers = HeaderMap::new();
        if let Some(token) = &options.token {
            let mut value = HeaderValue::from_str(&format!("{} {token}", options.auth_scheme))
                .map_err(|_| Error::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(options.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            options,
            channel_url,
            messages_url,
            outbound_channel_url,
            outbound_url,
            cursor: Mutex::new(None),
            posted: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(false),
        })
    }

    /// Highest message id read so far.
    pub fn cursor(&self) -> Option<u64> {
        *self.cursor.lock()
    }

    fn message_ttl(&self) -> Option<Duration> {
        self.options.message_ttl_ms.map(Duration::from_millis)
    }

    /// Delete posted frames older than the message TTL. Returns how many are
    /// gone. Frames that fail to delete are retried on the next sweep.
    pub async fn sweep_expired(&self) -> usize {
        let Some(ttl) = self.message_ttl() else {
            return 0;
        };

        let expired: Vec<(u64, Instant)> = {
            let mut posted = self.posted.lock();
            let mut expired = Vec::new();
            while let Some(&(id, at)) = posted.front() {
                if at.elapsed() < ttl {
                    break;
                }
                posted.pop_front();
                expired.push((id, at));
            }
            expired
        };

        let mut deleted = 0;
        for (index, (id, _)) in expired.iter().enumerate() {
            if let Err(reason) = self.delete(*id).await {
                warn!(id, %reason, "failed to delete expired frame");
                let mut posted = self.posted.lock();
                for entry in expired[index..].iter().rev() {
                    posted.push_front(*entry);
                }
                break;
            }
            deleted += 1;
        }
        if deleted > 0 {
            debug!(deleted, "deleted expired frames");
        }
        deleted
    }

    async fn delete(&self, id: u64) -> Result<(), String> {
        let mut url = self.outbound_url.clone();
        url.path_segments_mut()
            .map_err(|()| format!("cannot extend {}", self.outbound_url))?
            .push(&id.to_string());

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|error| error.to_string())?;
        match response.status() {
            status if status.is_success() => Ok(()),
            // Already gone.
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(format!("delete rejected with {status}")),
        }
    }

    /// Remember a posted frame for deletion.
    async fn track(&self, response: Response) {
        if self.message_ttl().is_none() {
            return;
        }
        match response.json::<CreatedMessage>().await {
            Ok(created) => match created.id.parse::<u64>() {
                Ok(id) => self.posted.lock().push_back((id, Instant::now())),
                Err(_) => warn!(id = %created.id, "posted frame has non-numeric id"),
            },
            Err(error) => warn!(%error, "posted frame id missing from response"),
        }
    }

    async fn check_access(&self, url: &Url) -> Result<(), ConnectionError> {
        let response = self.client.get(url.clone()).send().await.map_err(unreachable)?;
        let status = response.status();
        if !status.is_success() {
            return Err(connection_error(status));
        }
        Ok(())
    }

    async fn fetch(&self, after: Option<u64>, limit: u32) -> Result<Response, reqwest::Error> {
        let mut request = self
            .client
            .get(self.messages_url.clone())
            .query(&[("limit", limit)]);
        if let Some(after) = after {
            request = request.query(&[("after", after)]);
        }
        request.send().await
    }

    /// Id of the newest message in the channel, or 0 if it is empty.
    async fn latest_id(&self) -> Result<u64, ConnectionError> {
        let response = self.fetch(None, 1).await.map_err(unreachable)?;
        let status = response.status();
        if !status.is_success() {
            return Err(connection_error(status));
        }

        let messages: Vec<ChannelMessage> = response
            .json()
            .await
            .map_err(|error| ConnectionError::Other(error.to_string()))?;
        Ok(messages
            .iter()
            .filter_map(|message| message.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        self.check_access(&self.channel_url).await?;
        if let Some(outbound) = &self.outbound_channel_url {
            self.check_access(outbound).await?;
        }

        if self.cursor.lock().is_none() {
            let position = if self.options.start_from_beginning {
                0
            } else {
                self.latest_id().await?
            };
            let mut cursor = self.cursor.lock();
            if cursor.is_none() {
                *cursor = Some(position);
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(
            "Connected to channel {} at {}, posting to {}",
            self.options.channel,
            self.channel_url,
            self.options.outbound_channel()
        );
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!("Disconnected from channel {}", self.options.channel);
        }
    }

    async fn publish(&self, payload: Bytes) -> Result<(), PublishError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PublishError::NotConnected);
        }
        self.sweep_expired().await;

        let content = armor::wrap(&payload);
        if content.len() > self.options.max_content_length {
            return Err(PublishError::PayloadTooLarge {
                size: payload.len(),
                max: armor::max_payload(self.options.max_content_length),
            });
        }

        let response = self
            .client
            .post(self.outbound_url.clone())
            .json(&CreateMessage { content: &content })
            .send()
            .await
            .map_err(|error| PublishError::transient(error.to_string()))?;

        let status = response.status();
        match status {
            status if status.is_success() => {
                debug!(len = payload.len(), "posted frame");
                self.track(response).await;
                Ok(())
            }
            StatusCode::TOO_MANY_REQUESTS => match retry_after(&response) {
                Some(delay) => Err(PublishError::rate_limited(delay)),
                None => Err(PublishError::transient("rate limited")),
            },
            StatusCode::PAYLOAD_TOO_LARGE => Err(PublishError::PayloadTooLarge {
                size: payload.len(),
                max: armor::max_payload(self.options.max_content_length),
            }),
            status if status.is_server_error() => {
                Err(PublishError::transient(format!("server error {status}")))
            }
            status => Err(PublishError::fatal(format!("request rejected with {status}"))),
        }
    }

    async fn poll(&self) -> Result<Vec<Bytes>, PollError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PollError::Disconnected);
        }
        self.sweep_expired().await;

        let after = self.cursor().unwrap_or(0);
        let response = self
            .fetch(Some(after), self.options.page_size)
            .await
            .map_err(|error| PollError::Transient(error.to_string()))?;

        let status = response.status();
        match status {
            status if status.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(PollError::RateLimited {
                    retry_after: retry_after(&response),
                });
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                return Err(PollError::Fatal(format!("channel read rejected with {status}")));
            }
            status if status.is_server_error() => {
                return Err(PollError::Transient(format!("server error {status}")));
            }
            status => return Err(PollError::Fatal(format!("request rejected with {status}"))),
        }

        let messages: Vec<ChannelMessage> = response
            .json()
            .await
            .map_err(|error| PollError::Transient(error.to_string()))?;

        let mut messages: Vec<(u64, String)> = messages
            .into_iter()
            .filter_map(|message| match message.id.parse::<u64>() {
                Ok(id) => Some((id, message.content)),
                Err(_) => {
                    warn!(id = %message.id, "skipping message with non-numeric id");
                    None
                }
            })
            .filter(|(id, _)| *id > after)
            .collect();
        messages.sort_unstable_by_key(|(id, _)| *id);

        if let Some((newest, _)) = messages.last() {
            let mut cursor = self.cursor.lock();
            *cursor = Some(cursor.map_or(*newest, |current| current.max(*newest)));
        }

        let total = messages.len();
        let frames: Vec<Bytes> = messages
            .into_iter()
            .filter_map(|(_, content)| armor::unwrap(&content))
            .collect();
        if frames.len() < total {
            debug!(skipped = total - frames.len(), "skipped messages that are not frames");
        }

        Ok(frames)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn max_payload_size(&self) -> Option<usize> {
        Some(armor::max_payload(self.options.max_content_length))
    }
}

fn unreachable(error: reqwest::Error) -> ConnectionError {
    ConnectionError::Unreachable(error.to_string())
}

fn connection_error(status: StatusCode) -> ConnectionError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ConnectionError::Unauthorized(format!("channel access rejected with {status}"))
        }
        StatusCode::NOT_FOUND => ConnectionError::NotFound("channel not found".to_string()),
        StatusCode::TOO_MANY_REQUESTS => ConnectionError::Unreachable("rate limited".to_string()),
        status if status.is_server_error() => {
            ConnectionError::Unreachable(format!("server error {status}"))
        }
        status => ConnectionError::Other(format!("unexpected status {status}")),
    }
}

/// `Retry-After` in seconds; fractions allowed. Capped at [`MAX_RETRY_AFTER`].
fn retry_after(response: &Response) -> Option<Duration> {
    let seconds: f64 = response.headers().get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    parse_delay(seconds)
}

fn parse_delay(seconds: f64) -> Option<Duration> {
    if seconds.is_nan() || seconds < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(seconds).map_or(MAX_RETRY_AFTER, |delay| delay.min(MAX_RETRY_AFTER)))
}
