use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One source or destination record, keyed by field name.
pub type Record = serde_json::Map<String, serde_json::Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Statuses
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a synchronization job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Retrieving,
    Processing,
    Uploading,
    Importing,
    Monitoring,
    Complete,
    CompletedWithErrors,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Retrieving => "retrieving",
            JobStatus::Processing => "processing",
            JobStatus::Uploading => "uploading",
            JobStatus::Importing => "importing",
            JobStatus::Monitoring => "monitoring",
            JobStatus::Complete => "complete",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::CompletedWithErrors | JobStatus::Error
        )
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => JobStatus::Pending,
            "retrieving" => JobStatus::Retrieving,
            "processing" => JobStatus::Processing,
            "uploading" => JobStatus::Uploading,
            "importing" => JobStatus::Importing,
            "monitoring" => JobStatus::Monitoring,
            "complete" => JobStatus::Complete,
            "completed_with_errors" => JobStatus::CompletedWithErrors,
            "error" => JobStatus::Error,
            other => return Err(format!("unknown job status: {other}")),
        })
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Uploading,
    Importing,
    Monitoring,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Processing => "processing",
            ChunkStatus::Uploading => "uploading",
            ChunkStatus::Importing => "importing",
            ChunkStatus::Monitoring => "monitoring",
            ChunkStatus::Completed => "completed",
            ChunkStatus::Failed => "failed",
        }
    }

    /// Completed or failed: the chunk will not move again unless retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkStatus::Completed | ChunkStatus::Failed)
    }

    /// A processor currently owns the chunk.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ChunkStatus::Processing | ChunkStatus::Uploading | ChunkStatus::Importing
        )
    }
}

impl FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => ChunkStatus::Pending,
            "processing" => ChunkStatus::Processing,
            "uploading" => ChunkStatus::Uploading,
            "importing" => ChunkStatus::Importing,
            "monitoring" => ChunkStatus::Monitoring,
            "completed" => ChunkStatus::Completed,
            "failed" => ChunkStatus::Failed,
            other => return Err(format!("unknown chunk status: {other}")),
        })
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Maps one destination field to the source field it is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub destination_field: String,
    pub source_field: String,
}

impl FieldMapping {
    pub fn new(destination_field: impl Into<String>, source_field: impl Into<String>) -> Self {
        Self {
            destination_field: destination_field.into(),
            source_field: source_field.into(),
        }
    }
}

/// One synchronization request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub source_type: String,
    pub source_id: String,
    pub source_name: Option<String>,
    pub destination_id: Option<String>,
    pub destination_name: Option<String>,
    pub field_mappings: Vec<FieldMapping>,
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

/// One bounded slice `[start_offset, end_offset)` of a job's source records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub job_id: Uuid,
    pub index: i32,
    pub status: ChunkStatus,
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

impl Chunk {
    /// Number of records this chunk asks the source for.
    pub fn requested_count(&self) -> i64 {
        self.end_offset - self.start_offset
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Patches
// ─────────────────────────────────────────────────────────────────────────────

/// Field-level update for a job. `None` leaves a field untouched; for nullable
/// columns `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub source_name: Option<String>,
    pub destination_id: Option<Option<String>>,
    pub destination_name: Option<Option<String>>,
    pub total_profiles: Option<i64>,
    pub profiles_known: Option<bool>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub error_message: Option<Option<String>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(name) = &self.source_name {
            job.source_name = Some(name.clone());
        }
        if let Some(id) = &self.destination_id {
            job.destination_id = id.clone();
        }
        if let Some(name) = &self.destination_name {
            job.destination_name = name.clone();
        }
        if let Some(total) = self.total_profiles {
            job.total_profiles = total;
        }
        if let Some(known) = self.profiles_known {
            job.profiles_known = known;
        }
        if let Some(at) = self.started_at {
            job.started_at = at;
        }
        if let Some(at) = self.completed_at {
            job.completed_at = at;
        }
        if let Some(msg) = &self.error_message {
            job.error_message = msg.clone();
        }
    }
}

/// Field-level update for a chunk, same conventions as [`JobPatch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkPatch {
    pub status: Option<ChunkStatus>,
    pub profiles_count: Option<i64>,
    pub success_count: Option<i64>,
    pub error_count: Option<i64>,
    pub skipped_count: Option<i64>,
    pub artifact_url: Option<Option<String>>,
    pub destination_import_id: Option<Option<String>>,
    pub resolved_destination_list_id: Option<Option<String>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub error_message: Option<Option<String>>,
}

impl ChunkPatch {
    pub fn status(status: ChunkStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Returns a chunk to `pending` and clears everything a previous run wrote.
    pub fn reset() -> Self {
        Self {
            status: Some(ChunkStatus::Pending),
            success_count: Some(0),
            error_count: Some(0),
            skipped_count: Some(0),
            artifact_url: Some(None),
            destination_import_id: Some(None),
            resolved_destination_list_id: Some(None),
            started_at: Some(None),
            completed_at: Some(None),
            error_message: Some(None),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, chunk: &mut Chunk) {
        if let Some(status) = self.status {
            chunk.status = status;
        }
        if let Some(v) = self.profiles_count {
            chunk.profiles_count = v;
        }
        if let Some(v) = self.success_count {
            chunk.success_count = v;
        }
        if let Some(v) = self.error_count {
            chunk.error_count = v;
        }
        if let Some(v) = self.skipped_count {
            chunk.skipped_count = v;
        }
        if let Some(v) = &self.artifact_url {
            chunk.artifact_url = v.clone();
        }
        if let Some(v) = &self.destination_import_id {
            chunk.destination_import_id = v.clone();
        }
        if let Some(v) = &self.resolved_destination_list_id {
            chunk.resolved_destination_list_id = v.clone();
        }
        if let Some(v) = self.started_at {
            chunk.started_at = v;
        }
        if let Some(v) = self.completed_at {
            chunk.completed_at = v;
        }
        if let Some(v) = &self.error_message {
            chunk.error_message = v.clone();
        }
    }
}

/// Counters recomputed from a job's chunk set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregates {
    pub total_chunks: i32,
    pub completed_chunks: i32,
    pub failed_chunks: i32,
    pub processed_profiles: i64,
    pub success_profiles: i64,
    pub error_profiles: i64,
    pub skipped_profiles: i64,
}

impl Aggregates {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        let mut agg = Aggregates {
            total_chunks: chunks.len() as i32,
            ..Default::default()
        };
        for chunk in chunks {
            match chunk.status {
                ChunkStatus::Completed => agg.completed_chunks += 1,
                ChunkStatus::Failed => agg.failed_chunks += 1,
                _ => {}
            }
            if chunk.status.is_terminal() || chunk.status == ChunkStatus::Monitoring {
                agg.processed_profiles += chunk.profiles_count;
            }
            agg.success_profiles += chunk.success_count;
            agg.error_profiles += chunk.error_count;
            agg.skipped_profiles += chunk.skipped_count;
        }
        agg
    }

    pub fn apply(&self, job: &mut Job) {
        job.total_chunks = self.total_chunks;
        job.completed_chunks = self.completed_chunks;
        job.failed_chunks = self.failed_chunks;
        job.processed_profiles = self.processed_profiles;
        job.success_profiles = self.success_profiles;
        job.error_profiles = self.error_profiles;
        job.skipped_profiles = self.skipped_profiles;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Monitoring,
            JobStatus::CompletedWithErrors,
            JobStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("done".parse::<ChunkStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&JobStatus::CompletedWithErrors).unwrap();
        assert_eq!(json, "\"completed_with_errors\"");
    }

    #[test]
    fn test_chunk_reset_patch_clears_results() {
        let mut chunk = crate::sync::testing::chunk(Uuid::new_v4(), 1, 5000, 10000);
        chunk.status = ChunkStatus::Failed;
        chunk.error_message = Some("boom".into());
        chunk.error_count = 7;
        chunk.destination_import_id = Some("imp-1".into());

        ChunkPatch::reset().apply(&mut chunk);

        assert_eq!(chunk.status, ChunkStatus::Pending);
        assert_eq!(chunk.error_message, None);
        assert_eq!(chunk.error_count, 0);
        assert_eq!(chunk.destination_import_id, None);
        assert_eq!(chunk.start_offset, 5000);
    }

    #[test]
    fn test_aggregates_count_monitoring_as_processed() {
        let job_id = Uuid::new_v4();
        let mut a = crate::sync::testing::chunk(job_id, 0, 0, 100);
        a.status = ChunkStatus::Completed;
        a.profiles_count = 100;
        a.success_count = 95;
        a.error_count = 5;
        let mut b = crate::sync::testing::chunk(job_id, 1, 100, 200);
        b.status = ChunkStatus::Monitoring;
        b.profiles_count = 100;
        let c = crate::sync::testing::chunk(job_id, 2, 200, 250);

        let agg = Aggregates::from_chunks(&[a, b, c]);
        assert_eq!(agg.total_chunks, 3);
        assert_eq!(agg.completed_chunks, 1);
        assert_eq!(agg.failed_chunks, 0);
        assert_eq!(agg.processed_profiles, 200);
        assert_eq!(agg.success_profiles, 95);
        assert_eq!(agg.error_profiles, 5);
    }
}
