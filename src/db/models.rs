use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::SyncError;
use crate::sync::model::{Chunk, FieldMapping, Job};

/// Database representation of a sync job
#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub status: String,
    pub source_type: String,
    pub source_id: String,
    pub source_name: Option<String>,
    pub destination_id: Option<String>,
    pub destination_name: Option<String>,
    pub field_mappings: Json<Vec<FieldMapping>>,
    pub total_chunks: i32,
    pub completed_chunks: i32,
    pub failed_chunks: i32,
    pub total_profiles: i64,
    pub profiles_known: bool,
    pub processed_profiles: i64,
    pub success_profiles: i64,
    pub error_profiles: i64,
    pub skipped_profiles: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = SyncError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            status: row.status.parse().map_err(SyncError::Store)?,
            source_type: row.source_type,
            source_id: row.source_id,
            source_name: row.source_name,
            destination_id: row.destination_id,
            destination_name: row.destination_name,
            field_mappings: row.field_mappings.0,
            total_chunks: row.total_chunks,
            completed_chunks: row.completed_chunks,
            failed_chunks: row.failed_chunks,
            total_profiles: row.total_profiles,
            profiles_known: row.profiles_known,
            processed_profiles: row.processed_profiles,
            success_profiles: row.success_profiles,
            error_profiles: row.error_profiles,
            skipped_profiles: row.skipped_profiles,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        })
    }
}

/// Database representation of a chunk
#[derive(Debug, FromRow)]
pub struct ChunkRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub chunk_index: i32,
    pub status: String,
    pub start_offset: i64,
    pub end_offset: i64,
    pub profiles_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub skipped_count: i64,
    pub artifact_url: Option<String>,
    pub destination_import_id: Option<String>,
    pub resolved_destination_list_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl TryFrom<ChunkRow> for Chunk {
    type Error = SyncError;

    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        Ok(Chunk {
            id: row.id,
            job_id: row.job_id,
            index: row.chunk_index,
            status: row.status.parse().map_err(SyncError::Store)?,
            start_offset: row.start_offset,
            end_offset: row.end_offset,
            profiles_count: row.profiles_count,
            success_count: row.success_count,
            error_count: row.error_count,
            skipped_count: row.skipped_count,
            artifact_url: row.artifact_url,
            destination_import_id: row.destination_import_id,
            resolved_destination_list_id: row.resolved_destination_list_id,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        })
    }
}
