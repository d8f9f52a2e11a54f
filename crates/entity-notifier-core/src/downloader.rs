//! Entity downloader.
//!
//! Fetches the entity file and every content file it references from the
//! offered servers (in priority order), persists them, and classifies
//! failures. Only content files are persisted here. The entity file is
//! handed back and written by the orchestrator once every notification is
//! out, so an existing entity record implies its content is present and
//! its notifications were sent.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use entity_storage::ContentStorage;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::classify::{classify_status, FailureClass};
use crate::config::RetryConfig;
use crate::domain::{Completion, DeployableEntity, DownloadFailure, EntityDownloadError};
use crate::fetcher::{content_url, ContentFetcher, FetchError};
use crate::metrics::{Metrics, ENTITY_DOWNLOAD_FAILURE, ENTITY_DOWNLOAD_SUCCESS};

/// One `{file, hash}` entry of an entity's content manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMapping {
    pub file: String,
    pub hash: String,
}

/// Entity file as served by content servers.
#[derive(Debug, Clone, Deserialize)]
struct EntityFile {
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    pointers: Vec<String>,
    #[serde(default)]
    content: Vec<ContentMapping>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// A downloaded entity whose content files are persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedEntity {
    pub entity_type: String,
    pub pointers: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub content: Vec<ContentMapping>,
    /// Raw entity file, not yet stored.
    pub entity_file: Vec<u8>,
}

/// Download result, with failures split by class.
#[derive(Debug)]
pub enum DownloadOutcome {
    Success(DownloadedEntity),
    RetryableFailure(EntityDownloadError),
    PermanentFailure(EntityDownloadError),
}

impl From<Result<DownloadedEntity, EntityDownloadError>> for DownloadOutcome {
    fn from(result: Result<DownloadedEntity, EntityDownloadError>) -> Self {
        match result {
            Ok(downloaded) => DownloadOutcome::Success(downloaded),
            Err(e) if e.is_retryable() => DownloadOutcome::RetryableFailure(e),
            Err(e) => DownloadOutcome::PermanentFailure(e),
        }
    }
}

/// Acquires an entity's content.
///
/// On a permanent failure the implementation completes `completion` so the
/// announcement is not retried upstream; on a retryable failure it must not.
#[async_trait]
pub trait EntityDownloader: Send + Sync {
    async fn download_entity(
        &self,
        entity: &DeployableEntity,
        servers: &[String],
        completion: &Completion,
    ) -> Result<DownloadedEntity, EntityDownloadError>;
}

/// [`EntityDownloader`] that talks to content servers.
pub struct ContentServerDownloader {
    storage: Arc<dyn ContentStorage>,
    fetcher: Arc<dyn ContentFetcher>,
    metrics: Arc<Metrics>,
    retry: RetryConfig,
}

impl ContentServerDownloader {
    pub fn new(
        storage: Arc<dyn ContentStorage>,
        fetcher: Arc<dyn ContentFetcher>,
        metrics: Arc<Metrics>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            storage,
            fetcher,
            metrics,
            retry,
        }
    }

    /// Fetch `id`, walking `servers` in order on every attempt.
    ///
    /// Stops early when every server answered with a client error in the
    /// same attempt.
    async fn fetch_with_retries(&self, id: &str, servers: &[String]) -> Result<Vec<u8>, FetchError> {
        let attempts = self.retry.max_retries.max(1);
        let mut surfaced: Option<FetchError> = None;

        for attempt in 1..=attempts {
            let mut round: Vec<FetchError> = Vec::with_capacity(servers.len());
            for server in servers {
                let url = content_url(server, id);
                match self.fetcher.fetch(&url).await {
                    Ok(bytes) => return Ok(bytes),
                    Err(e) => {
                        debug!(%url, attempt, error = %e, "fetch failed");
                        round.push(e);
                    }
                }
            }

            let all_permanent = round
                .iter()
                .all(|e| e.status().map(classify_status) == Some(FailureClass::Permanent));
            surfaced = round
                .iter()
                .find(|e| e.status().map(classify_status) != Some(FailureClass::Permanent))
                .or_else(|| round.first())
                .cloned();

            if all_permanent {
                break;
            }
            if attempt < attempts {
                warn!(content_id = %id, attempt, "retrying fetch");
                tokio::time::sleep(self.retry.wait_between_retries).await;
            }
        }

        Err(surfaced.unwrap_or_else(|| FetchError::Transport {
            url: id.to_string(),
            message: "no fetch attempt was made".to_string(),
        }))
    }

    async fn fetch_and_store(
        &self,
        entity: &DeployableEntity,
        servers: &[String],
    ) -> Result<DownloadedEntity, DownloadFailure> {
        if servers.is_empty() {
            return Err(DownloadFailure::NoServers);
        }

        let raw = self.fetch_with_retries(&entity.entity_id, servers).await?;
        let file: EntityFile = serde_json::from_slice(&raw)
            .map_err(|e| DownloadFailure::InvalidEntityFile(e.to_string()))?;

        let mut seen = HashSet::new();
        for mapping in &file.content {
            if !seen.insert(mapping.hash.as_str()) {
                continue;
            }
            if self.storage.exist(&mapping.hash).await? {
                continue;
            }
            let bytes = self.fetch_with_retries(&mapping.hash, servers).await?;
            self.storage.store_stream(&mapping.hash, bytes).await?;
            debug!(file = %mapping.file, hash = %mapping.hash, "content file stored");
        }

        Ok(DownloadedEntity {
            entity_type: file.entity_type,
            pointers: file.pointers,
            metadata: file.metadata,
            content: file.content,
            entity_file: raw,
        })
    }
}

#[async_trait]
impl EntityDownloader for ContentServerDownloader {
    #[instrument(
        skip_all,
        fields(entity_id = %entity.entity_id, entity_type = %entity.entity_type)
    )]
    async fn download_entity(
        &self,
        entity: &DeployableEntity,
        servers: &[String],
        completion: &Completion,
    ) -> Result<DownloadedEntity, EntityDownloadError> {
        let entity_type = entity.entity_type.as_str();
        info!(servers = %servers.join(","), "downloading entity");

        match self.fetch_and_store(entity, servers).await {
            Ok(downloaded) => {
                self.metrics
                    .increment(ENTITY_DOWNLOAD_SUCCESS, &[("entityType", entity_type)]);
                info!(files = downloaded.content.len(), "entity content stored");
                Ok(downloaded)
            }
            Err(cause) => {
                let err = EntityDownloadError::new(entity, cause);
                error!(error = %err, status = ?err.status(), "failed to download entity");
                self.metrics
                    .increment(ENTITY_DOWNLOAD_FAILURE, &[("entityType", entity_type)]);

                if !err.is_retryable() {
                    completion.complete().await;
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::StubFetcher;
    use entity_storage::fakes::MemoryContentStorage;
    use std::time::Duration;

    const SERVER: &str = "https://peer.example/content";

    fn retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            wait_between_retries: Duration::from_millis(1000),
        }
    }

    fn entity_file() -> Vec<u8> {
        serde_json::json!({
            "version": "v3",
            "type": "scene",
            "pointers": ["0,0"],
            "timestamp": 1_700_000_000_000i64,
            "content": [
                {"file": "main.js", "hash": "bafy-main"},
                {"file": "copy.js", "hash": "bafy-main"},
                {"file": "scene.json", "hash": "bafy-scene-json"}
            ],
            "metadata": {"display": {"title": "Genesis Plaza"}}
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test(start_paused = true)]
    async fn failing_server_falls_through_to_the_next_one() {
        let storage = Arc::new(MemoryContentStorage::new());
        let fetcher = Arc::new(
            StubFetcher::new()
                .fail("https://down.example/contents/bafy-e", 503)
                .respond(&content_url(SERVER, "bafy-e"), entity_file())
                .respond(&content_url(SERVER, "bafy-main"), b"main".to_vec())
                .respond(&content_url(SERVER, "bafy-scene-json"), b"{}".to_vec()),
        );
        let downloader = ContentServerDownloader::new(
            storage.clone(),
            fetcher.clone(),
            Arc::new(Metrics::new()),
            retry(3),
        );
        let entity = DeployableEntity::new("bafy-e", "scene", vec!["0,0".into()], 0);
        let servers = vec!["https://down.example".to_string(), SERVER.to_string()];

        let downloaded = downloader
            .download_entity(&entity, &servers, &Completion::for_entity(&entity))
            .await
            .unwrap();

        assert_eq!(downloaded.entity_type, "scene");
        assert_eq!(downloaded.content.len(), 3);
        assert_eq!(downloaded.entity_file, entity_file());
        // The entity record itself is left to the caller.
        assert_eq!(storage.stored_ids(), vec!["bafy-main", "bafy-scene-json"]);
        // Duplicate hash fetched once.
        assert_eq!(fetcher.calls_to(&content_url(SERVER, "bafy-main")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_stored_content_is_not_fetched_again() {
        let storage = Arc::new(MemoryContentStorage::new().with_content("bafy-main", b"main"));
        let fetcher = Arc::new(
            StubFetcher::new()
                .respond(&content_url(SERVER, "bafy-e"), entity_file())
                .respond(&content_url(SERVER, "bafy-scene-json"), b"{}".to_vec()),
        );
        let downloader = ContentServerDownloader::new(
            storage,
            fetcher.clone(),
            Arc::new(Metrics::new()),
            retry(1),
        );
        let entity = DeployableEntity::new("bafy-e", "scene", vec![], 0);

        downloader
            .download_entity(&entity, &[SERVER.to_string()], &Completion::for_entity(&entity))
            .await
            .unwrap();
        assert_eq!(fetcher.calls_to(&content_url(SERVER, "bafy-main")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_stop_retrying_early() {
        let fetcher = Arc::new(StubFetcher::new().fail(&content_url(SERVER, "bafy-gone"), 404));
        let metrics = Arc::new(Metrics::new());
        let downloader = ContentServerDownloader::new(
            Arc::new(MemoryContentStorage::new()),
            fetcher.clone(),
            metrics.clone(),
            retry(10),
        );
        let entity = DeployableEntity::new("bafy-gone", "wearable", vec![], 0);
        let completion = Completion::for_entity(&entity);

        let err = downloader
            .download_entity(&entity, &[SERVER.to_string()], &completion)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(fetcher.calls_to(&content_url(SERVER, "bafy-gone")), 1);
        assert!(completion.is_completed());
        assert_eq!(
            metrics.get(ENTITY_DOWNLOAD_FAILURE, &[("entityType", "wearable")]),
            1
        );
        assert_eq!(metrics.total(ENTITY_DOWNLOAD_SUCCESS), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_use_the_whole_retry_budget() {
        let fetcher = Arc::new(StubFetcher::new().fail(&content_url(SERVER, "bafy-flaky"), 502));
        let metrics = Arc::new(Metrics::new());
        let downloader = ContentServerDownloader::new(
            Arc::new(MemoryContentStorage::new()),
            fetcher.clone(),
            metrics.clone(),
            retry(4),
        );
        let entity = DeployableEntity::new("bafy-flaky", "emote", vec![], 0);
        let completion = Completion::for_entity(&entity);

        let err = downloader
            .download_entity(&entity, &[SERVER.to_string()], &completion)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(fetcher.calls_to(&content_url(SERVER, "bafy-flaky")), 4);
        assert!(!completion.is_completed());
        assert_eq!(
            metrics.get(ENTITY_DOWNLOAD_FAILURE, &[("entityType", "emote")]),
            1
        );
    }

    #[tokio::test]
    async fn mixed_round_surfaces_the_retryable_error() {
        let fetcher = Arc::new(
            StubFetcher::new()
                .fail("https://a.example/contents/bafy-x", 404)
                .fail("https://b.example/contents/bafy-x", 500),
        );
        let downloader = ContentServerDownloader::new(
            Arc::new(MemoryContentStorage::new()),
            fetcher,
            Arc::new(Metrics::new()),
            RetryConfig {
                max_retries: 1,
                wait_between_retries: Duration::from_millis(1),
            },
        );
        let err = downloader
            .fetch_with_retries(
                "bafy-x",
                &["https://a.example".to_string(), "https://b.example".to_string()],
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn malformed_entity_file_is_retryable() {
        let fetcher = Arc::new(
            StubFetcher::new().respond(&content_url(SERVER, "bafy-bad"), b"not json".to_vec()),
        );
        let downloader = ContentServerDownloader::new(
            Arc::new(MemoryContentStorage::new()),
            fetcher,
            Arc::new(Metrics::new()),
            retry(1),
        );
        let entity = DeployableEntity::new("bafy-bad", "scene", vec![], 0);
        let err = downloader
            .download_entity(&entity, &[SERVER.to_string()], &Completion::for_entity(&entity))
            .await
            .unwrap_err();
        assert!(matches!(err.cause, DownloadFailure::InvalidEntityFile(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn outcome_splits_by_class() {
        let entity = DeployableEntity::new("bafy", "scene", vec![], 0);
        let permanent = EntityDownloadError::new(
            &entity,
            FetchError::Status {
                url: "u".into(),
                status: 404,
            },
        );
        assert!(matches!(
            DownloadOutcome::from(Err(permanent)),
            DownloadOutcome::PermanentFailure(_)
        ));
        let retryable = EntityDownloadError::new(&entity, DownloadFailure::NoServers);
        assert!(matches!(
            DownloadOutcome::from(Err(retryable)),
            DownloadOutcome::RetryableFailure(_)
        ));
    }
}
