use std::sync::Arc;
use tracing::{debug, warn};

use super::collaborators::{DestinationDirectory, DestinationTarget};
use super::model::{Chunk, Job};
use crate::error::SyncError;

/// Where a resolved target came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Chunk 0 writing to a list id the caller picked.
    CallerSupplied,
    /// Chunk 0 asking the destination to create a list.
    NewList,
    /// The job already carries a resolved list id.
    JobResolved,
    /// Chunk 0 recorded the list it wrote to.
    ChunkZero,
    /// Nothing resolved yet; reusing the caller's name may create a second list.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub target: DestinationTarget,
    pub source: ResolutionSource,
    /// List name reported by the directory, when it was consulted.
    pub list_name: Option<String>,
}

impl Resolution {
    fn new(target: DestinationTarget, source: ResolutionSource) -> Self {
        Self {
            target,
            source,
            list_name: None,
        }
    }

    pub fn list_id(&self) -> Option<&str> {
        match &self.target {
            DestinationTarget::Existing { list_id } => Some(list_id),
            DestinationTarget::Create { .. } => None,
        }
    }
}

/// Name used when the caller gave neither a list id nor a list name.
pub fn synthesized_name(job: &Job) -> String {
    let base = job.source_name.as_deref().unwrap_or(&job.source_id);
    format!("{} (synced {})", base, job.created_at.format("%Y-%m-%d"))
}

fn requested_name(job: &Job) -> String {
    job.destination_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| synthesized_name(job))
}

/// Decides which destination list each chunk of a job writes to.
#[derive(Clone)]
pub struct DestinationResolver {
    directory: Arc<dyn DestinationDirectory>,
}

impl DestinationResolver {
    pub fn new(directory: Arc<dyn DestinationDirectory>) -> Self {
        Self { directory }
    }

    /// Resolves the target for chunk `index`.
    ///
    /// `chunk_zero` is the current record of the job's first chunk, if known.
    /// Never waits on chunk 0: without a resolved id later chunks fall back to
    /// the caller's original name.
    pub async fn resolve(
        &self,
        job: &Job,
        index: i32,
        chunk_zero: Option<&Chunk>,
    ) -> Result<Resolution, SyncError> {
        if index == 0 {
            return self.resolve_first(job).await;
        }

        if let Some(list_id) = &job.destination_id {
            return Ok(Resolution::new(
                DestinationTarget::Existing {
                    list_id: list_id.clone(),
                },
                ResolutionSource::JobResolved,
            ));
        }

        if let Some(list_id) = chunk_zero.and_then(|c| c.resolved_destination_list_id.clone()) {
            debug!("Job {} chunk {} reusing list {} from chunk 0", job.id, index, list_id);
            return Ok(Resolution::new(
                DestinationTarget::Existing { list_id },
                ResolutionSource::ChunkZero,
            ));
        }

        let name = requested_name(job);
        warn!(
            "Job {} chunk {}: destination list not resolved yet, falling back to name '{}'",
            job.id, index, name
        );
        Ok(Resolution::new(
            DestinationTarget::Create { name },
            ResolutionSource::Fallback,
        ))
    }

    async fn resolve_first(&self, job: &Job) -> Result<Resolution, SyncError> {
        match &job.destination_id {
            Some(list_id) => {
                let name = self
                    .directory
                    .resolve(list_id)
                    .await?
                    .ok_or_else(|| SyncError::DestinationNotFound(list_id.clone()))?;
                Ok(Resolution {
                    target: DestinationTarget::Existing {
                        list_id: list_id.clone(),
                    },
                    source: ResolutionSource::CallerSupplied,
                    list_name: Some(name),
                })
            }
            None => Ok(Resolution::new(
                DestinationTarget::Create {
                    name: requested_name(job),
                },
                ResolutionSource::NewList,
            )),
        }
    }
}
