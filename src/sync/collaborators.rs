//! Contracts for the services the pipeline talks to.
//!
//! The core never speaks HTTP itself. Source retrieval, artifact staging and the
//! destination bulk-import API sit behind these traits so the orchestrator can
//! be driven by real clients, by [`super::simulated`], or by test fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::model::Record;
use crate::error::SyncError;

/// Reads profiles from the source collection by offset.
#[async_trait]
pub trait SourceRecordProvider: Send + Sync {
    /// Returns up to `count` records starting at `offset`. Fewer records near
    /// the end of the collection is normal.
    async fn fetch(
        &self,
        source_type: &str,
        source_id: &str,
        offset: i64,
        count: i64,
    ) -> Result<Vec<Record>, SyncError>;

    /// Total size of the collection, if the source can tell.
    async fn count(&self, source_type: &str, source_id: &str) -> Result<Option<i64>, SyncError>;
}

/// Reference to a staged artifact the destination can download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub url: String,
    pub records: usize,
}

/// Turns destination records into a transferable artifact.
#[async_trait]
pub trait ArtifactStager: Send + Sync {
    /// Must return an error rather than an empty artifact when `records` is empty.
    async fn stage(&self, records: &[Record]) -> Result<ArtifactHandle, SyncError>;
}

/// Where a chunk's import lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationTarget {
    /// Append to an existing list.
    Existing { list_id: String },
    /// Ask the destination to create a list with this name.
    Create { name: String },
}

/// Acknowledgement of an accepted import submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub import_id: String,
    /// Identifier of the list written to, when the destination already knows it.
    pub list_id: Option<String>,
}

/// Remote state of an import as reported by the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteImportState {
    Queued,
    Processing,
    Complete,
    Error,
}

/// One status poll result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStatus {
    pub processed: i64,
    pub total: i64,
    pub errors: i64,
    pub complete: bool,
    pub status: RemoteImportState,
    pub list_id: Option<String>,
    pub detail: Option<String>,
}

impl ImportStatus {
    pub fn is_success(&self) -> bool {
        self.complete || self.status == RemoteImportState::Complete
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success() && self.status == RemoteImportState::Error
    }
}

/// Destination bulk-import API.
#[async_trait]
pub trait DestinationImporter: Send + Sync {
    async fn submit(
        &self,
        artifact: &ArtifactHandle,
        target: &DestinationTarget,
    ) -> Result<SubmitReceipt, SyncError>;

    async fn poll_status(&self, import_id: &str) -> Result<ImportStatus, SyncError>;
}

/// Lookup of existing destination lists.
#[async_trait]
pub trait DestinationDirectory: Send + Sync {
    /// Name of the list, or `None` when it does not exist.
    async fn resolve(&self, list_id: &str) -> Result<Option<String>, SyncError>;
}

/// The four services a pipeline run needs, bundled for wiring.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn SourceRecordProvider>,
    pub stager: Arc<dyn ArtifactStager>,
    pub importer: Arc<dyn DestinationImporter>,
    pub directory: Arc<dyn DestinationDirectory>,
}
