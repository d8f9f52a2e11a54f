//! Deployable entities and their completion callback.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Caller-supplied "mark entity as processed" callback.
pub type MarkAsDeployedFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Kind of content an entity carries.
///
/// Unknown kinds are kept verbatim in `Other` so they pass through to
/// notifications unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    Scene,
    Wearable,
    Emote,
    Profile,
    Other(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Scene => "scene",
            EntityType::Wearable => "wearable",
            EntityType::Emote => "emote",
            EntityType::Profile => "profile",
            EntityType::Other(kind) => kind,
        }
    }
}

impl From<String> for EntityType {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "scene" => EntityType::Scene,
            "wearable" => EntityType::Wearable,
            "emote" => EntityType::Emote,
            "profile" => EntityType::Profile,
            _ => EntityType::Other(kind),
        }
    }
}

impl From<&str> for EntityType {
    fn from(kind: &str) -> Self {
        EntityType::from(kind.to_string())
    }
}

impl From<EntityType> for String {
    fn from(kind: EntityType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An announced entity, as handed over by the discovery component.
///
/// `entity_id` is content-addressed and doubles as the idempotency key.
/// The callback is never serialized into notifications.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployableEntity {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub pointers: Vec<String>,
    /// Signature chain, passed through untouched.
    #[serde(default)]
    pub auth_chain: Vec<serde_json::Value>,
    pub entity_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_timestamp: Option<i64>,
    #[serde(skip)]
    pub mark_as_deployed: Option<MarkAsDeployedFn>,
}

impl DeployableEntity {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: impl Into<EntityType>,
        pointers: Vec<String>,
        entity_timestamp: i64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            pointers,
            auth_chain: Vec::new(),
            entity_timestamp,
            local_timestamp: None,
            mark_as_deployed: None,
        }
    }

    pub fn with_auth_chain(mut self, auth_chain: Vec<serde_json::Value>) -> Self {
        self.auth_chain = auth_chain;
        self
    }

    /// Attach the completion callback.
    pub fn with_mark_as_deployed<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: MarkAsDeployedFn = Arc::new(move || -> BoxFuture<'static, ()> {
            Box::pin(callback())
        });
        self.mark_as_deployed = Some(callback);
        self
    }
}

impl fmt::Debug for DeployableEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployableEntity")
            .field("entity_id", &self.entity_id)
            .field("entity_type", &self.entity_type)
            .field("pointers", &self.pointers)
            .field("entity_timestamp", &self.entity_timestamp)
            .field("mark_as_deployed", &self.mark_as_deployed.is_some())
            .finish()
    }
}

/// Once-guarded completion for a single scheduling call.
///
/// Built from the entity's optional callback at the orchestrator entry; an
/// absent callback becomes a no-op. Clones share the guard, so whichever
/// component completes first is the only one that reaches the callback.
#[derive(Clone)]
pub struct Completion {
    callback: Option<MarkAsDeployedFn>,
    fired: Arc<AtomicBool>,
}

impl Completion {
    pub fn for_entity(entity: &DeployableEntity) -> Self {
        Self {
            callback: entity.mark_as_deployed.clone(),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the callback unless this completion already fired.
    ///
    /// Returns `true` only for the call that actually fired.
    pub async fn complete(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(callback) = &self.callback {
            callback().await;
        }
        true
    }

    pub fn is_completed(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("has_callback", &self.callback.is_some())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Window of deployments the discovery component is about to announce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub init_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
}
