//! Core domain types for entity deployments.

pub mod entity;
pub mod error;

pub use entity::{Completion, DeployableEntity, EntityType, MarkAsDeployedFn, TimeRange};
pub use error::{DownloadFailure, EntityDownloadError, NotifierError, PublishError, Result};
