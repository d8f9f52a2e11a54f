//! Error taxonomy for entity deployments.

use entity_storage::StorageError;

use crate::classify::{classify, FailureClass};
use crate::config::ConfigError;
use crate::domain::entity::{DeployableEntity, EntityType};
use crate::fetcher::FetchError;
use crate::publisher::message::ChannelType;
use crate::publisher::transport::TransportError;
use crate::queue::QueueError;

/// Why a download failed.
#[derive(Debug, thiserror::Error)]
pub enum DownloadFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid entity file: {0}")]
    InvalidEntityFile(String),

    #[error("no content servers were offered")]
    NoServers,

    /// Failure reported by a downloader that only has text to offer.
    #[error("{0}")]
    Other(String),
}

impl DownloadFailure {
    /// Transport status carried by the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DownloadFailure::Fetch(e) => e.status(),
            _ => None,
        }
    }
}

/// Download or persistence failure for one entity.
///
/// Permanent and retryable failures share this type; [`Self::class`]
/// tells them apart from the carried transport status.
#[derive(Debug, thiserror::Error)]
#[error("failed to download entity {entity_id}: {cause}")]
pub struct EntityDownloadError {
    pub entity_id: String,
    pub entity_type: EntityType,
    #[source]
    pub cause: DownloadFailure,
}

impl EntityDownloadError {
    pub fn new(entity: &DeployableEntity, cause: impl Into<DownloadFailure>) -> Self {
        Self {
            entity_id: entity.entity_id.clone(),
            entity_type: entity.entity_type.clone(),
            cause: cause.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.cause.status()
    }

    pub fn class(&self) -> FailureClass {
        classify(self.status(), &self.cause.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }
}

/// Notification channel failure for one entity.
#[derive(Debug, thiserror::Error)]
#[error("failed to publish {entity_id} to the {channel} channel: {cause}")]
pub struct PublishError {
    pub channel: ChannelType,
    pub entity_id: String,
    pub entity_type: EntityType,
    #[source]
    pub cause: TransportError,
}

impl PublishError {
    pub fn new(channel: ChannelType, entity: &DeployableEntity, cause: TransportError) -> Self {
        Self {
            channel,
            entity_id: entity.entity_id.clone(),
            entity_type: entity.entity_type.clone(),
            cause,
        }
    }
}

/// Top-level notifier errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Download(#[from] EntityDownloadError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for notifier operations.
pub type Result<T> = std::result::Result<T, NotifierError>;
