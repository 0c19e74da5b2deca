use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::models::{ChunkRow, JobRow};
use super::store::ProgressStore;
use crate::error::SyncError;
use crate::sync::model::{Chunk, ChunkPatch, ChunkStatus, Job, JobPatch, JobStatus};

/// Rows per multi-value chunk insert; keeps bind counts well under Postgres' limit.
const CHUNK_INSERT_BATCH: usize = 1000;

/// PostgreSQL-backed progress store
pub struct JobRepository {
    pool: Pool<Postgres>,
}

impl JobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn push_job_patch(qb: &mut QueryBuilder<'_, Postgres>, patch: &JobPatch) {
    let mut set = qb.separated(", ");
    if let Some(status) = patch.status {
        set.push("status = ").push_bind_unseparated(status.as_str());
    }
    if let Some(name) = &patch.source_name {
        set.push("source_name = ").push_bind_unseparated(name.clone());
    }
    if let Some(id) = &patch.destination_id {
        set.push("destination_id = ").push_bind_unseparated(id.clone());
    }
    if let Some(name) = &patch.destination_name {
        set.push("destination_name = ").push_bind_unseparated(name.clone());
    }
    if let Some(total) = patch.total_profiles {
        set.push("total_profiles = ").push_bind_unseparated(total);
    }
    if let Some(known) = patch.profiles_known {
        set.push("profiles_known = ").push_bind_unseparated(known);
    }
    if let Some(at) = patch.started_at {
        set.push("started_at = ").push_bind_unseparated(at);
    }
    if let Some(at) = patch.completed_at {
        set.push("completed_at = ").push_bind_unseparated(at);
    }
    if let Some(msg) = &patch.error_message {
        set.push("error_message = ").push_bind_unseparated(msg.clone());
    }
}

fn push_chunk_patch(qb: &mut QueryBuilder<'_, Postgres>, patch: &ChunkPatch) {
    let mut set = qb.separated(", ");
    if let Some(status) = patch.status {
        set.push("status = ").push_bind_unseparated(status.as_str());
    }
    if let Some(v) = patch.profiles_count {
        set.push("profiles_count = ").push_bind_unseparated(v);
    }
    if let Some(v) = patch.success_count {
        set.push("success_count = ").push_bind_unseparated(v);
    }
    if let Some(v) = patch.error_count {
        set.push("error_count = ").push_bind_unseparated(v);
    }
    if let Some(v) = patch.skipped_count {
        set.push("skipped_count = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.artifact_url {
        set.push("artifact_url = ").push_bind_unseparated(v.clone());
    }
    if let Some(v) = &patch.destination_import_id {
        set.push("destination_import_id = ").push_bind_unseparated(v.clone());
    }
    if let Some(v) = &patch.resolved_destination_list_id {
        set.push("resolved_destination_list_id = ").push_bind_unseparated(v.clone());
    }
    if let Some(v) = patch.started_at {
        set.push("started_at = ").push_bind_unseparated(v);
    }
    if let Some(v) = patch.completed_at {
        set.push("completed_at = ").push_bind_unseparated(v);
    }
    if let Some(v) = &patch.error_message {
        set.push("error_message = ").push_bind_unseparated(v.clone());
    }
}

fn job_update(job_id: Uuid, patch: &JobPatch) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("UPDATE sync_jobs SET ");
    push_job_patch(&mut qb, patch);
    qb.push(" WHERE id = ").push_bind(job_id).push(" RETURNING *");
    qb
}

/// `UPDATE sync_chunks`, optionally restricted to rows still in `expected`.
fn chunk_update(
    chunk_id: Uuid,
    patch: &ChunkPatch,
    expected: Option<ChunkStatus>,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("UPDATE sync_chunks SET ");
    push_chunk_patch(&mut qb, patch);
    qb.push(" WHERE id = ").push_bind(chunk_id);
    if let Some(status) = expected {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    qb.push(" RETURNING *");
    qb
}

fn push_chunk_values<'a>(qb: &mut QueryBuilder<'a, Postgres>, chunks: &'a [Chunk]) {
    qb.push(
        "INSERT INTO sync_chunks \
         (id, job_id, chunk_index, status, start_offset, end_offset, profiles_count) ",
    );
    qb.push_values(chunks, |mut row, chunk| {
        row.push_bind(chunk.id)
            .push_bind(chunk.job_id)
            .push_bind(chunk.index)
            .push_bind(chunk.status.as_str())
            .push_bind(chunk.start_offset)
            .push_bind(chunk.end_offset)
            .push_bind(chunk.profiles_count);
    });
}

#[async_trait]
impl ProgressStore for JobRepository {
    async fn insert_job(&self, job: &Job, chunks: &[Chunk]) -> Result<(), SyncError> {
        debug!("Creating job: id={}, chunks={}", job.id, chunks.len());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                id, status, source_type, source_id, source_name,
                destination_id, destination_name, field_mappings,
                total_chunks, total_profiles, profiles_known, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.source_type)
        .bind(&job.source_id)
        .bind(&job.source_name)
        .bind(&job.destination_id)
        .bind(&job.destination_name)
        .bind(Json(&job.field_mappings))
        .bind(job.total_chunks)
        .bind(job.total_profiles)
        .bind(job.profiles_known)
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;

        for batch in chunks.chunks(CHUNK_INSERT_BATCH) {
            let mut qb = QueryBuilder::new("");
            push_chunk_values(&mut qb, batch);
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!("Job {} stored", job.id);
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, SyncError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM sync_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list_chunks(&self, job_id: Uuid) -> Result<Vec<Chunk>, SyncError> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT * FROM sync_chunks WHERE job_id = $1 ORDER BY chunk_index",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Chunk::try_from).collect()
    }

    async fn get_chunk(&self, chunk_id: Uuid) -> Result<Option<Chunk>, SyncError> {
        let row = sqlx::query_as::<_, ChunkRow>("SELECT * FROM sync_chunks WHERE id = $1")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Chunk::try_from).transpose()
    }

    async fn update_job(&self, job_id: Uuid, patch: &JobPatch) -> Result<Job, SyncError> {
        if patch.is_empty() {
            return self
                .get_job(job_id)
                .await?
                .ok_or(SyncError::JobNotFound(job_id));
        }

        let row = job_update(job_id, patch)
            .build_query_as::<JobRow>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))?;
        row.try_into()
    }

    async fn update_chunk(&self, chunk_id: Uuid, patch: &ChunkPatch) -> Result<Chunk, SyncError> {
        if patch.is_empty() {
            return self
                .get_chunk(chunk_id)
                .await?
                .ok_or(SyncError::UnknownChunk(chunk_id));
        }

        let row = chunk_update(chunk_id, patch, None)
            .build_query_as::<ChunkRow>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SyncError::UnknownChunk(chunk_id))?;
        row.try_into()
    }

    async fn update_chunk_if_status(
        &self,
        chunk_id: Uuid,
        expected: ChunkStatus,
        patch: &ChunkPatch,
    ) -> Result<Option<Chunk>, SyncError> {
        if patch.is_empty() {
            return Ok(self
                .get_chunk(chunk_id)
                .await?
                .filter(|c| c.status == expected));
        }

        let row = chunk_update(chunk_id, patch, Some(expected))
            .build_query_as::<ChunkRow>()
            .fetch_optional(&self.pool)
            .await?;
        if row.is_none() {
            debug!("Chunk {} is no longer {}, update skipped", chunk_id, expected);
        }
        row.map(Chunk::try_from).transpose()
    }

    async fn refresh_aggregates(&self, job_id: Uuid) -> Result<Job, SyncError> {
        let mut tx = self.pool.begin().await?;

        // The row lock is taken before the aggregate statement so its snapshot
        // includes every chunk write committed by a competing refresh.
        let locked = sqlx::query("SELECT id FROM sync_jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(SyncError::JobNotFound(job_id));
        }

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE sync_jobs AS j SET
                total_chunks       = s.total,
                completed_chunks   = s.completed,
                failed_chunks      = s.failed,
                processed_profiles = s.processed,
                success_profiles   = s.success,
                error_profiles     = s.errors,
                skipped_profiles   = s.skipped
            FROM (
                SELECT
                    COUNT(*)::INT                                          AS total,
                    (COUNT(*) FILTER (WHERE status = 'completed'))::INT    AS completed,
                    (COUNT(*) FILTER (WHERE status = 'failed'))::INT       AS failed,
                    COALESCE(SUM(profiles_count) FILTER (
                        WHERE status IN ('completed', 'failed', 'monitoring')
                    ), 0)::BIGINT                                          AS processed,
                    COALESCE(SUM(success_count), 0)::BIGINT                AS success,
                    COALESCE(SUM(error_count), 0)::BIGINT                  AS errors,
                    COALESCE(SUM(skipped_count), 0)::BIGINT                AS skipped
                FROM sync_chunks
                WHERE job_id = $1
            ) AS s
            WHERE j.id = $1
            RETURNING j.*
            "#,
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn append_chunk(&self, chunk: &Chunk) -> Result<(), SyncError> {
        let mut qb = QueryBuilder::new("");
        push_chunk_values(&mut qb, std::slice::from_ref(chunk));
        qb.build().execute(&self.pool).await?;
        debug!("Appended chunk {} to job {}", chunk.index, chunk.job_id);
        Ok(())
    }

    async fn list_unsettled_jobs(&self) -> Result<Vec<Uuid>, SyncError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM sync_jobs WHERE status NOT IN ($1, $2, $3) ORDER BY created_at",
        )
        .bind(JobStatus::Complete.as_str())
        .bind(JobStatus::CompletedWithErrors.as_str())
        .bind(JobStatus::Error.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn ping(&self) -> Result<(), SyncError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
