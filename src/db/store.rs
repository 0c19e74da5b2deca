use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SyncError;
use crate::sync::model::{Chunk, ChunkPatch, ChunkStatus, Job, JobPatch};

/// Authoritative home of job and chunk state.
///
/// Every update is a field-level merge: callers send only the fields they own,
/// so the orchestrator and a chunk processor can write the same job without
/// clobbering each other.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Persists a new job together with its planned chunks.
    async fn insert_job(&self, job: &Job, chunks: &[Chunk]) -> Result<(), SyncError>;

    /// `Ok(None)` means the id is unknown.
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, SyncError>;

    /// Chunks of a job ordered by index. Empty for unknown jobs.
    async fn list_chunks(&self, job_id: Uuid) -> Result<Vec<Chunk>, SyncError>;

    async fn get_chunk(&self, chunk_id: Uuid) -> Result<Option<Chunk>, SyncError>;

    async fn update_job(&self, job_id: Uuid, patch: &JobPatch) -> Result<Job, SyncError>;

    async fn update_chunk(&self, chunk_id: Uuid, patch: &ChunkPatch) -> Result<Chunk, SyncError>;

    /// Applies `patch` only while the chunk still has status `expected`.
    /// `Ok(None)` when the chunk moved on (or does not exist).
    async fn update_chunk_if_status(
        &self,
        chunk_id: Uuid,
        expected: ChunkStatus,
        patch: &ChunkPatch,
    ) -> Result<Option<Chunk>, SyncError>;

    /// Recomputes the job's chunk and profile counters from its chunk set in
    /// one atomic step and returns the updated job.
    async fn refresh_aggregates(&self, job_id: Uuid) -> Result<Job, SyncError>;

    /// Adds a chunk to an existing job (open-ended plans).
    async fn append_chunk(&self, chunk: &Chunk) -> Result<(), SyncError>;

    /// Ids of jobs that have not reached a terminal status.
    async fn list_unsettled_jobs(&self) -> Result<Vec<Uuid>, SyncError>;

    async fn ping(&self) -> Result<(), SyncError>;

    async fn close(&self);

    async fn find_chunk(&self, job_id: Uuid, index: i32) -> Result<Option<Chunk>, SyncError> {
        Ok(self
            .list_chunks(job_id)
            .await?
            .into_iter()
            .find(|c| c.index == index))
    }
}
