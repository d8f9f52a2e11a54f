//! Per-channel deployment notifications.

pub mod message;
pub mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::config::{ConfigError, ConfigSource};
use crate::domain::{DeployableEntity, PublishError};
use crate::metrics::{Metrics, SNS_PUBLISH_FAILURE, SNS_PUBLISH_SUCCESS};

pub use message::{build_deployment_message, build_message_attributes, ChannelType};
pub use transport::{
    PublishReceipt, PublishRequest, PublishTransport, SnsTransport, TransportError,
};

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub channel: ChannelType,
    pub success: bool,
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    fn channel(&self) -> ChannelType;

    /// Publish `entity` together with the entity file's metadata, which
    /// feeds the `isMultiplayer` attribute.
    async fn publish(
        &self,
        entity: &DeployableEntity,
        content_server_urls: &[String],
        metadata: Option<&Value>,
    ) -> Result<PublishOutcome, PublishError>;

    async fn publish_message(
        &self,
        entity: &DeployableEntity,
        content_server_urls: &[String],
    ) -> Result<PublishOutcome, PublishError> {
        self.publish(entity, content_server_urls, None).await
    }
}

/// Topic-based publisher for one [`ChannelType`].
pub struct SnsPublisher {
    channel: ChannelType,
    topic_arn: String,
    transport: Arc<dyn PublishTransport>,
    metrics: Arc<Metrics>,
}

impl SnsPublisher {
    pub fn new(
        channel: ChannelType,
        topic_arn: impl Into<String>,
        transport: Arc<dyn PublishTransport>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            channel,
            topic_arn: topic_arn.into(),
            transport,
            metrics,
        }
    }

    /// Resolve the channel's topic from `config`, failing when it is unset.
    pub fn from_config(
        channel: ChannelType,
        config: &dyn ConfigSource,
        transport: Arc<dyn PublishTransport>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ConfigError> {
        let topic_arn = config.require_string(channel.topic_config_key())?;
        Ok(Self::new(channel, topic_arn, transport, metrics))
    }

    pub fn topic_arn(&self) -> &str {
        &self.topic_arn
    }

    async fn send(
        &self,
        entity: &DeployableEntity,
        content_server_urls: &[String],
        metadata: Option<&Value>,
    ) -> Result<PublishReceipt, TransportError> {
        let message = build_deployment_message(self.channel, entity, content_server_urls);
        let request = PublishRequest {
            topic_arn: self.topic_arn.clone(),
            message: serde_json::to_string(&message)?,
            message_attributes: build_message_attributes(entity, metadata),
        };
        self.transport.publish(request).await
    }
}

#[async_trait]
impl NotificationPublisher for SnsPublisher {
    fn channel(&self) -> ChannelType {
        self.channel
    }

    #[instrument(
        skip_all,
        fields(channel = %self.channel, entity_id = %entity.entity_id)
    )]
    async fn publish(
        &self,
        entity: &DeployableEntity,
        content_server_urls: &[String],
        metadata: Option<&Value>,
    ) -> Result<PublishOutcome, PublishError> {
        let labels = [("type", self.channel.as_str())];

        match self.send(entity, content_server_urls, metadata).await {
            Ok(receipt) => {
                info!(
                    message_id = receipt.message_id.as_deref().unwrap_or("-"),
                    sequence_number = receipt.sequence_number.as_deref().unwrap_or("-"),
                    "notification sent"
                );
                self.metrics.increment(SNS_PUBLISH_SUCCESS, &labels);
                Ok(PublishOutcome {
                    channel: self.channel,
                    success: true,
                    provider_message_id: receipt.message_id,
                })
            }
            Err(cause) => {
                error!(error = %cause, "failed to publish notification");
                self.metrics.increment(SNS_PUBLISH_FAILURE, &labels);
                Err(PublishError::new(self.channel, entity, cause))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::fakes::RecordingTransport;

    fn publisher(channel: ChannelType, transport: Arc<RecordingTransport>) -> SnsPublisher {
        SnsPublisher::new(channel, "arn:deployments", transport, Arc::new(Metrics::new()))
    }

    #[test]
    fn from_config_fails_fast_without_topic() {
        let config = MapConfig::new().with("SNS_ARN", "arn:deployments");
        let transport = Arc::new(RecordingTransport::new());
        let metrics = Arc::new(Metrics::new());

        let deployment = SnsPublisher::from_config(
            ChannelType::Deployment,
            &config,
            transport.clone(),
            metrics.clone(),
        )
        .unwrap();
        assert_eq!(deployment.topic_arn(), "arn:deployments");

        let err = SnsPublisher::from_config(ChannelType::Event, &config, transport, metrics)
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Missing(key) if key == "EVENTS_SNS_ARN"));
    }

    #[tokio::test]
    async fn publish_sends_body_and_attributes() {
        let transport = Arc::new(RecordingTransport::new());
        let publisher = publisher(ChannelType::Deployment, transport.clone());
        let entity = DeployableEntity::new("bafy-scene", "scene", vec!["0,0".into()], 0);
        let urls = vec!["https://peer.example/content".to_string()];
        let metadata = serde_json::json!({"multiplayerId": "room"});

        let outcome = publisher.publish(&entity, &urls, Some(&metadata)).await.unwrap();
        assert_eq!(outcome.channel, ChannelType::Deployment);
        assert!(outcome.success);
        assert_eq!(outcome.provider_message_id.as_deref(), Some("message-1"));

        let requests = transport.requests_to("arn:deployments");
        assert_eq!(requests.len(), 1);
        let body: Value = serde_json::from_str(&requests[0].message).unwrap();
        assert_eq!(body["entity"]["entityId"], "bafy-scene");
        assert_eq!(body["contentServerUrls"][0], "https://peer.example/content");
        assert_eq!(requests[0].message_attributes["isMultiplayer"], "true");
        assert_eq!(requests[0].message_attributes["subType"], "scene");
    }

    #[tokio::test]
    async fn failure_is_counted_and_returned() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_topic("arn:events", "throttled");
        let metrics = Arc::new(Metrics::new());
        let publisher =
            SnsPublisher::new(ChannelType::Event, "arn:events", transport, metrics.clone());
        let entity = DeployableEntity::new("bafy-profile", "profile", vec![], 0);

        let err = publisher.publish_message(&entity, &[]).await.unwrap_err();
        assert_eq!(err.channel, ChannelType::Event);
        assert_eq!(err.entity_id, "bafy-profile");
        assert_eq!(metrics.get(SNS_PUBLISH_FAILURE, &[("type", "event")]), 1);
        assert_eq!(metrics.get(SNS_PUBLISH_SUCCESS, &[("type", "event")]), 0);
    }
}
