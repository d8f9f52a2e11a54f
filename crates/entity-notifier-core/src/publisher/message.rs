//! Channel-specific notification payloads.
//!
//! Everything here is pure: building a message or its attributes never
//! touches the network, so the shapes can be checked in isolation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{EVENTS_SNS_ARN, SNS_ARN};
use crate::domain::{DeployableEntity, EntityType};

/// Event type shared by both channels' attributes and the event envelope.
pub const CATALYST_DEPLOYMENT: &str = "catalyst-deployment";

/// Notification destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Primary deployment channel, consumed by content processors.
    Deployment,
    /// Generic platform event channel.
    Event,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::Deployment => "deployment",
            ChannelType::Event => "event",
        }
    }

    /// Configuration key holding this channel's topic.
    pub fn topic_config_key(self) -> &'static str {
        match self {
            ChannelType::Deployment => SNS_ARN,
            ChannelType::Event => EVENTS_SNS_ARN,
        }
    }

    /// Whether entities of `entity_type` are published on this channel.
    pub fn accepts(self, entity_type: &EntityType) -> bool {
        match self {
            ChannelType::Deployment => matches!(
                entity_type,
                EntityType::Scene | EntityType::Wearable | EntityType::Emote
            ),
            ChannelType::Event => true,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment channel payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentToSqs<'a> {
    pub entity: &'a DeployableEntity,
    pub content_server_urls: &'a [String],
}

/// Event channel payload: the deployment wrapped in an event envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalystDeploymentEvent<'a> {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub sub_type: &'a str,
    pub entity: &'a DeployableEntity,
    pub content_server_urls: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum NotificationMessage<'a> {
    Deployment(DeploymentToSqs<'a>),
    Event(CatalystDeploymentEvent<'a>),
}

/// Build the payload `channel` publishes for `entity`.
pub fn build_deployment_message<'a>(
    channel: ChannelType,
    entity: &'a DeployableEntity,
    content_server_urls: &'a [String],
) -> NotificationMessage<'a> {
    match channel {
        ChannelType::Deployment => NotificationMessage::Deployment(DeploymentToSqs {
            entity,
            content_server_urls,
        }),
        ChannelType::Event => NotificationMessage::Event(CatalystDeploymentEvent {
            event_type: CATALYST_DEPLOYMENT,
            sub_type: entity.entity_type.as_str(),
            entity,
            content_server_urls,
        }),
    }
}

/// Filterable attributes sent alongside the body.
///
/// `isMultiplayer` is set for scenes whose metadata names a
/// `multiplayerId`.
pub fn build_message_attributes(
    entity: &DeployableEntity,
    metadata: Option<&serde_json::Value>,
) -> BTreeMap<String, String> {
    let is_multiplayer_scene = entity.entity_type == EntityType::Scene
        && metadata
            .and_then(|m| m.get("multiplayerId"))
            .is_some_and(|id| !id.is_null());

    BTreeMap::from([
        ("type".to_string(), CATALYST_DEPLOYMENT.to_string()),
        ("subType".to_string(), entity.entity_type.to_string()),
        ("priority".to_string(), "1".to_string()),
        ("isMultiplayer".to_string(), is_multiplayer_scene.to_string()),
    ])
}
