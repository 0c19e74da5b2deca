use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::store::ProgressStore;
use crate::error::SyncError;
use crate::sync::model::{Aggregates, Chunk, ChunkPatch, ChunkStatus, Job, JobPatch};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    chunks: HashMap<Uuid, Chunk>,
    job_chunks: HashMap<Uuid, Vec<Uuid>>,
}

impl Inner {
    fn chunks_of(&self, job_id: Uuid) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = self
            .job_chunks
            .get(&job_id)
            .map(|ids| ids.iter().filter_map(|id| self.chunks.get(id).cloned()).collect())
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.index);
        chunks
    }
}

/// In-process store used when no database is configured.
///
/// A single lock guards jobs and chunks together, so aggregate refreshes see a
/// consistent chunk set.
#[derive(Default)]
pub struct MemoryProgressStore {
    inner: RwLock<Inner>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn insert_job(&self, job: &Job, chunks: &[Chunk]) -> Result<(), SyncError> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(SyncError::Store(format!("job {} already exists", job.id)));
        }
        inner.jobs.insert(job.id, job.clone());
        let ids = chunks.iter().map(|c| c.id).collect();
        for chunk in chunks {
            inner.chunks.insert(chunk.id, chunk.clone());
        }
        inner.job_chunks.insert(job.id, ids);
        debug!("Stored job {} with {} chunks", job.id, chunks.len());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, SyncError> {
        Ok(self.inner.read().await.jobs.get(&job_id).cloned())
    }

    async fn list_chunks(&self, job_id: Uuid) -> Result<Vec<Chunk>, SyncError> {
        Ok(self.inner.read().await.chunks_of(job_id))
    }

    async fn get_chunk(&self, chunk_id: Uuid) -> Result<Option<Chunk>, SyncError> {
        Ok(self.inner.read().await.chunks.get(&chunk_id).cloned())
    }

    async fn update_job(&self, job_id: Uuid, patch: &JobPatch) -> Result<Job, SyncError> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(SyncError::JobNotFound(job_id))?;
        patch.apply(job);
        Ok(job.clone())
    }

    async fn update_chunk(&self, chunk_id: Uuid, patch: &ChunkPatch) -> Result<Chunk, SyncError> {
        let mut inner = self.inner.write().await;
        let chunk = inner
            .chunks
            .get_mut(&chunk_id)
            .ok_or(SyncError::UnknownChunk(chunk_id))?;
        patch.apply(chunk);
        Ok(chunk.clone())
    }

    async fn update_chunk_if_status(
        &self,
        chunk_id: Uuid,
        expected: ChunkStatus,
        patch: &ChunkPatch,
    ) -> Result<Option<Chunk>, SyncError> {
        let mut inner = self.inner.write().await;
        match inner.chunks.get_mut(&chunk_id) {
            Some(chunk) if chunk.status == expected => {
                patch.apply(chunk);
                Ok(Some(chunk.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn refresh_aggregates(&self, job_id: Uuid) -> Result<Job, SyncError> {
        let mut inner = self.inner.write().await;
        let aggregates = Aggregates::from_chunks(&inner.chunks_of(job_id));
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(SyncError::JobNotFound(job_id))?;
        aggregates.apply(job);
        Ok(job.clone())
    }

    async fn append_chunk(&self, chunk: &Chunk) -> Result<(), SyncError> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&chunk.job_id) {
            return Err(SyncError::JobNotFound(chunk.job_id));
        }
        inner.chunks.insert(chunk.id, chunk.clone());
        inner
            .job_chunks
            .entry(chunk.job_id)
            .or_default()
            .push(chunk.id);
        Ok(())
    }

    async fn list_unsettled_jobs(&self) -> Result<Vec<Uuid>, SyncError> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .map(|j| j.id)
            .collect())
    }

    async fn ping(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn close(&self) {}
}
