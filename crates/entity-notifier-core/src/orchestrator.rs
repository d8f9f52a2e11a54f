//! Deployment orchestration.
//!
//! `schedule_entity_deployment` is the single entry point for announced
//! entities. It checks storage, waits for queue room and hands a download
//! and notify job to the queue. It never fails to its caller: every failure
//! ends up as a log line, a counter and callback state.
//!
//! The completion callback fires at most once per scheduling call:
//!
//! | path                          | callback |
//! |-------------------------------|----------|
//! | unstorable entity id          | yes      |
//! | already stored                | yes      |
//! | existence check / admission   | no       |
//! | permanent download failure    | yes      |
//! | retryable download failure    | no       |
//! | publish failure or timeout    | no       |
//! | downloaded and published      | yes      |
//!
//! Content files are written by the downloader, the entity record only
//! after every applicable channel accepted its notification. A job cut
//! short anywhere before that leaves the entity pending.

use std::sync::Arc;

use async_trait::async_trait;
use entity_storage::{validate_content_id, ContentStorage};
use futures::future::join_all;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::classify::FailureClass;
use crate::domain::{Completion, DeployableEntity, PublishError, Result, TimeRange};
use crate::downloader::{DownloadOutcome, EntityDownloader};
use crate::metrics::{
    Metrics, ENTITY_ALREADY_STORED, ENTITY_DEPLOYMENT_FAILURE, ENTITY_DEPLOYMENT_SUCCESS,
    SCHEDULE_ENTITY_DEPLOYMENT_ATTEMPT,
};
use crate::publisher::NotificationPublisher;
use crate::queue::JobQueue;

/// What the discovery component talks to.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn schedule_entity_deployment(&self, entity: DeployableEntity, servers: Vec<String>);

    /// Wait for every in-flight job to finish.
    async fn on_idle(&self);

    /// Hint about an upcoming batch of announcements.
    async fn prepare_for_deployments_in(&self, ranges: &[TimeRange]);
}

pub struct DeploymentOrchestrator {
    storage: Arc<dyn ContentStorage>,
    queue: Arc<dyn JobQueue>,
    downloader: Arc<dyn EntityDownloader>,
    publishers: Vec<Arc<dyn NotificationPublisher>>,
    metrics: Arc<Metrics>,
    admission_threshold: usize,
}

impl DeploymentOrchestrator {
    pub fn new(
        storage: Arc<dyn ContentStorage>,
        queue: Arc<dyn JobQueue>,
        downloader: Arc<dyn EntityDownloader>,
        publishers: Vec<Arc<dyn NotificationPublisher>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            storage,
            queue,
            downloader,
            publishers,
            metrics,
            admission_threshold: 1000,
        }
    }

    /// Queue size below which new jobs are admitted.
    pub fn with_admission_threshold(mut self, threshold: usize) -> Self {
        self.admission_threshold = threshold.max(1);
        self
    }

    async fn try_schedule(
        &self,
        entity: DeployableEntity,
        servers: Vec<String>,
        completion: Completion,
    ) -> Result<()> {
        let entity_type = entity.entity_type.to_string();

        if self.storage.exist(&entity.entity_id).await? {
            info!("entity already stored");
            completion.complete().await;
            self.metrics
                .increment(ENTITY_ALREADY_STORED, &[("entityType", entity_type.as_str())]);
            return Ok(());
        }

        self.queue.on_size_less_than(self.admission_threshold).await?;

        let publishers = self
            .publishers
            .iter()
            .filter(|p| p.channel().accepts(&entity.entity_type))
            .cloned()
            .collect();
        let job = DeploymentJob {
            storage: Arc::clone(&self.storage),
            downloader: Arc::clone(&self.downloader),
            publishers,
            metrics: Arc::clone(&self.metrics),
            span: info_span!(
                "deployment_job",
                entity_id = %entity.entity_id,
                entity_type = %entity_type
            ),
            entity,
            servers,
            completion,
        };
        self.queue.schedule_job(Box::pin(job.run()))?;
        debug!(queue_size = self.queue.size(), "deployment job scheduled");
        Ok(())
    }
}

#[async_trait]
impl Deployer for DeploymentOrchestrator {
    #[instrument(
        skip_all,
        fields(entity_id = %entity.entity_id, entity_type = %entity.entity_type)
    )]
    async fn schedule_entity_deployment(&self, entity: DeployableEntity, servers: Vec<String>) {
        let entity_type = entity.entity_type.to_string();
        self.metrics.increment(
            SCHEDULE_ENTITY_DEPLOYMENT_ATTEMPT,
            &[("entityType", entity_type.as_str())],
        );

        let completion = Completion::for_entity(&entity);
        if let Err(e) = validate_content_id(&entity.entity_id) {
            // Storage can never hold this id; not retried.
            warn!(error = %e, "rejecting entity");
            completion.complete().await;
            self.metrics.increment(
                ENTITY_DEPLOYMENT_FAILURE,
                &[
                    ("retryable", FailureClass::Permanent.retryable_label()),
                    ("entityType", entity_type.as_str()),
                ],
            );
            return;
        }
        if let Err(e) = self.try_schedule(entity, servers, completion).await {
            error!(error = %e, "failed to schedule entity deployment");
            self.metrics
                .increment(ENTITY_DEPLOYMENT_FAILURE, &[("entityType", entity_type.as_str())]);
        }
    }

    async fn on_idle(&self) {
        self.queue.on_idle().await
    }

    async fn prepare_for_deployments_in(&self, ranges: &[TimeRange]) {
        debug!(ranges = ranges.len(), "deployment window announced");
    }
}

/// Download then notify, owned by the queue.
struct DeploymentJob {
    storage: Arc<dyn ContentStorage>,
    downloader: Arc<dyn EntityDownloader>,
    publishers: Vec<Arc<dyn NotificationPublisher>>,
    metrics: Arc<Metrics>,
    span: tracing::Span,
    entity: DeployableEntity,
    servers: Vec<String>,
    completion: Completion,
}

impl DeploymentJob {
    async fn run(self) {
        let span = self.span.clone();
        self.execute().instrument(span).await
    }

    async fn execute(self) {
        let entity_type = self.entity.entity_type.to_string();

        let outcome: DownloadOutcome = self
            .downloader
            .download_entity(&self.entity, &self.servers, &self.completion)
            .await
            .into();

        let downloaded = match outcome {
            DownloadOutcome::Success(downloaded) => downloaded,
            DownloadOutcome::PermanentFailure(e) => {
                warn!(error = %e, "entity will not be retried");
                // No-op when the downloader already completed.
                self.completion.complete().await;
                self.record_failure(FailureClass::Permanent, &entity_type);
                return;
            }
            DownloadOutcome::RetryableFailure(e) => {
                warn!(error = %e, "entity left pending for a later announcement");
                self.record_failure(FailureClass::Retryable, &entity_type);
                return;
            }
        };

        let metadata = downloaded.metadata.as_ref();
        let results = join_all(
            self.publishers
                .iter()
                .map(|publisher| publisher.publish(&self.entity, &self.servers, metadata)),
        )
        .await;
        let failures: Vec<PublishError> = results.into_iter().filter_map(|r| r.err()).collect();

        if !failures.is_empty() {
            for failure in &failures {
                error!(error = %failure, channel = %failure.channel, "notification failed");
            }
            self.record_failure(FailureClass::Retryable, &entity_type);
            return;
        }

        // The entity record marks the entity deployed.
        if let Err(e) = self
            .storage
            .store_stream(&self.entity.entity_id, downloaded.entity_file)
            .await
        {
            error!(error = %e, "failed to store entity record after notifying");
            self.record_failure(FailureClass::Retryable, &entity_type);
            return;
        }

        self.completion.complete().await;
        self.metrics
            .increment(ENTITY_DEPLOYMENT_SUCCESS, &[("entityType", entity_type.as_str())]);
        info!(channels = self.publishers.len(), "entity deployed");
    }

    fn record_failure(&self, class: FailureClass, entity_type: &str) {
        self.metrics.increment(
            ENTITY_DEPLOYMENT_FAILURE,
            &[
                ("retryable", class.retryable_label()),
                ("entityType", entity_type),
            ],
        );
    }
}
