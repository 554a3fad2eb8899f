use crate::Error;

use async_trait::async_trait;
use bytes::Bytes;
use piggyback_backend::{Backend, ConnectionError, PollError, PublishError};
use piggyback_backend_http::{HttpBackend, HttpBackendOptions};
use piggyback_backend_memory::{MemoryBackend, MemoryBackendOptions, MemoryChannel, StartFrom};
use piggyback_socket::Settings;
use serde::Deserialize;

/// `[backend.memory]`
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MemorySection {
    channel: String,
    page_size: usize,
    max_payload_size: Option<usize>,
    start_from_beginning: bool,
}

impl Default for MemorySection {
    fn default() -> Self {
        let defaults = MemoryBackendOptions::default();
        Self {
            channel: "default".to_string(),
            page_size: defaults.page_size,
            max_payload_size: defaults.max_payload_size,
            start_from_beginning: false,
        }
    }
}

/// Backend chosen by name in the settings.
#[derive(Debug)]
pub enum ConfiguredBackend {
    Memory(MemoryBackend),
    Http(HttpBackend),
}

impl ConfiguredBackend {
    pub fn from_settings(settings: &Settings, name: &str) -> Result<Self, Error> {
        match name {
            "memory" => {
                let section: MemorySection = settings.backend_section(name)?;
                let options = MemoryBackendOptions {
                    start_from: if section.start_from_beginning {
                        StartFrom::Beginning
                    } else {
                        StartFrom::Latest
                    },
                    page_size: section.page_size,
                    max_payload_size: section.max_payload_size,
                };
                Ok(Self::Memory(MemoryBackend::new(
                    MemoryChannel::named(&section.channel),
                    options,
                )))
            }
            "http" => {
                let options: HttpBackendOptions = settings.backend_section(name)?;
                Ok(Self::Http(HttpBackend::new(options)?))
            }
            other => Err(Error::UnknownBackend(other.to_string())),
        }
    }
}

#[async_trait]
impl Backend for ConfiguredBackend {
    fn name(&self) -> &str {
        match self {
            Self::Memory(backend) => backend.name(),
            Self::Http(backend) => backend.name(),
        }
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        match self {
            Self::Memory(backend) => backend.connect().await,
            Self::Http(backend) => backend.connect().await,
        }
    }

    async fn disconnect(&self) {
        match self {
            Self::Memory(backend) => backend.disconnect().await,
            Self::Http(backend) => backend.disconnect().await,
        }
    }

    async fn publish(&self, payload: Bytes) -> Result<(), PublishError> {
        match self {
            Self::Memory(backend) => backend.publish(payload).await,
            Self::Http(backend) => backend.publish(payload).await,
        }
    }

    async fn poll(&self) -> Result<Vec<Bytes>, PollError> {
        match self {
            Self::Memory(backend) => backend.poll().await,
            Self::Http(backend) => backend.poll().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Memory(backend) => backend.is_connected(),
            Self::Http(backend) => backend.is_connected(),
        }
    }

    fn max_payload_size(&self) -> Option<usize> {
        match self {
            Self::Memory(backend) => backend.max_payload_size(),
            Self::Http(backend) => backend.max_payload_size(),
        }
    }
}
