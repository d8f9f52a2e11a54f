//! Entity-Storage: content storage for the entity notifier
//!
//! This crate answers the one question the deployment orchestrator needs
//! before doing any work ("has this entity already been persisted?") and
//! persists downloaded entity files and their content files.
//!
//! ## Key Components
//!
//! - `ContentStorage`: async, backend-agnostic storage trait
//! - `FolderContentStorage`: one file per content id under a root folder
//! - `fakes::MemoryContentStorage`: in-memory fake with failure injection

mod error;
pub mod fakes;
pub mod folder;
pub mod storage_traits;

pub use error::StorageError;
pub use folder::FolderContentStorage;
pub use storage_traits::{validate_content_id, ContentStorage, StorageResult};
