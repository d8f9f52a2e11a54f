//! Entity Notifier Core Library
//!
//! Turns entity announcements into stored content and per-channel
//! notifications: existence check, bounded download queue, download with
//! failure classification, then concurrent publishing.

pub mod classify;
pub mod components;
pub mod config;
pub mod domain;
pub mod downloader;
pub mod fakes;
pub mod fetcher;
pub mod metrics;
pub mod orchestrator;
pub mod publisher;
pub mod queue;
pub mod telemetry;

pub use classify::{classify, classify_status, FailureClass};
pub use components::{build_components, build_components_with_transport, NotifierComponents};
pub use config::{ConfigError, ConfigSource, EnvConfig, MapConfig, NotifierConfig};
pub use domain::{
    Completion, DeployableEntity, DownloadFailure, EntityDownloadError, EntityType,
    MarkAsDeployedFn, NotifierError, PublishError, Result, TimeRange,
};
pub use downloader::{ContentServerDownloader, DownloadOutcome, DownloadedEntity, EntityDownloader};
pub use fetcher::{ContentFetcher, FetchError, HttpFetcher};
pub use metrics::Metrics;
pub use orchestrator::{Deployer, DeploymentOrchestrator};
pub use publisher::{
    ChannelType, NotificationPublisher, PublishOutcome, PublishTransport, SnsPublisher,
    SnsTransport,
};
pub use queue::{JobQueue, QueueError, TokioJobQueue};
pub use telemetry::{init_tracing, LogFormat};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
