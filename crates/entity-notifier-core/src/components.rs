//! Production wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use entity_storage::{ContentStorage, FolderContentStorage};
use tracing::info;

use crate::config::NotifierConfig;
use crate::downloader::ContentServerDownloader;
use crate::fetcher::HttpFetcher;
use crate::metrics::Metrics;
use crate::orchestrator::DeploymentOrchestrator;
use crate::publisher::{
    ChannelType, NotificationPublisher, PublishTransport, SnsPublisher, SnsTransport,
};
use crate::queue::{JobQueue, TokioJobQueue};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fully wired notifier.
pub struct NotifierComponents {
    pub config: NotifierConfig,
    pub metrics: Arc<Metrics>,
    pub storage: Arc<dyn ContentStorage>,
    pub queue: TokioJobQueue,
    pub deployer: DeploymentOrchestrator,
}

/// Build every component from `config`, backed by the folder store, HTTP
/// fetcher and SNS. `SNS_ENDPOINT`, when set, overrides the SNS service URL.
pub async fn build_components(config: NotifierConfig) -> Result<NotifierComponents> {
    let transport = SnsTransport::connect(config.publish_endpoint.as_deref()).await;
    build_components_with_transport(config, Arc::new(transport)).await
}

/// Same as [`build_components`] with a caller-supplied publish transport.
pub async fn build_components_with_transport(
    config: NotifierConfig,
    transport: Arc<dyn PublishTransport>,
) -> Result<NotifierComponents> {
    let storage: Arc<dyn ContentStorage> = Arc::new(
        FolderContentStorage::new(&config.storage_folder)
            .await
            .with_context(|| format!("failed to open storage folder {}", config.storage_folder))?,
    );
    let fetcher =
        Arc::new(HttpFetcher::new(FETCH_TIMEOUT).context("failed to build content fetcher")?);

    let metrics = Arc::new(Metrics::new());
    let queue = TokioJobQueue::new(config.queue);
    let downloader = Arc::new(ContentServerDownloader::new(
        Arc::clone(&storage),
        fetcher,
        Arc::clone(&metrics),
        config.retry,
    ));

    let publishers: Vec<Arc<dyn NotificationPublisher>> = vec![
        Arc::new(SnsPublisher::new(
            ChannelType::Deployment,
            config.deployment_topic.clone(),
            Arc::clone(&transport),
            Arc::clone(&metrics),
        )),
        Arc::new(SnsPublisher::new(
            ChannelType::Event,
            config.event_topic.clone(),
            transport,
            Arc::clone(&metrics),
        )),
    ];

    let shared_queue: Arc<dyn JobQueue> = Arc::new(queue.clone());
    let deployer = DeploymentOrchestrator::new(
        Arc::clone(&storage),
        shared_queue,
        downloader,
        publishers,
        Arc::clone(&metrics),
    )
    .with_admission_threshold(config.queue.admission_threshold);

    info!(
        storage_folder = %config.storage_folder,
        concurrency = config.queue.concurrency,
        max_retries = config.retry.max_retries,
        "notifier components ready"
    );

    Ok(NotifierComponents {
        config,
        metrics,
        storage,
        queue,
        deployer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MapConfig, QueueConfig, RetryConfig};
    use crate::domain::DeployableEntity;
    use crate::fakes::RecordingTransport;
    use crate::orchestrator::Deployer;

    fn config(storage_folder: &str, endpoint: Option<&str>) -> NotifierConfig {
        NotifierConfig {
            deployment_topic: "arn:deployments".into(),
            event_topic: "arn:events".into(),
            publish_endpoint: endpoint.map(str::to_string),
            storage_folder: storage_folder.to_string(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
        }
    }

    #[tokio::test]
    async fn wires_without_an_endpoint_override() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let components = build_components_with_transport(
            config(dir.path().to_str().unwrap(), None),
            transport.clone(),
        )
        .await
        .unwrap();

        components
            .deployer
            .schedule_entity_deployment(DeployableEntity::new("bafy-c", "scene", vec![], 0), vec![])
            .await;
        components.deployer.on_idle().await;

        // No content server to download from, so nothing is published.
        assert!(transport.requests().is_empty());
        assert_eq!(components.queue.size(), 0);
    }

    #[tokio::test]
    async fn wires_from_loaded_config() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("content");
        let loaded = NotifierConfig::load(
            &MapConfig::new()
                .with("SNS_ARN", "arn:deployments")
                .with("EVENTS_SNS_ARN", "arn:events")
                .with("SNS_ENDPOINT", "http://localhost:4566")
                .with("STORAGE_FOLDER", folder.to_str().unwrap()),
        )
        .unwrap();

        let components = build_components_with_transport(loaded, Arc::new(RecordingTransport::new()))
            .await
            .unwrap();
        assert!(folder.is_dir());
        assert_eq!(components.queue.size(), 0);
        components.deployer.on_idle().await;
    }
}
