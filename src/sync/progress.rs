use chrono::{DateTime, Utc};
use serde::Serialize;

use super::model::{Chunk, ChunkStatus, Job};

/// Read model returned by progress queries.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub job: Job,
    /// Share of chunks that reached `completed` or `failed`, 0 to 100.
    pub percent: u8,
    pub summary: ProgressSummary,
    pub chunks: Vec<ChunkSummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub total_chunks: usize,
    pub pending_chunks: usize,
    pub active_chunks: usize,
    pub monitoring_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    pub success_profiles: i64,
    pub error_profiles: i64,
    pub skipped_profiles: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkSummary {
    pub index: i32,
    pub status: ChunkStatus,
    pub start_offset: i64,
    pub end_offset: i64,
    pub profiles_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub skipped_count: i64,
    pub destination_import_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<&Chunk> for ChunkSummary {
    fn from(chunk: &Chunk) -> Self {
        Self {
            index: chunk.index,
            status: chunk.status,
            start_offset: chunk.start_offset,
            end_offset: chunk.end_offset,
            profiles_count: chunk.profiles_count,
            success_count: chunk.success_count,
            error_count: chunk.error_count,
            skipped_count: chunk.skipped_count,
            destination_import_id: chunk.destination_import_id.clone(),
            started_at: chunk.started_at,
            completed_at: chunk.completed_at,
            error_message: chunk.error_message.clone(),
        }
    }
}

impl ProgressSummary {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        let mut summary = ProgressSummary {
            total_chunks: chunks.len(),
            ..Default::default()
        };
        for chunk in chunks {
            match chunk.status {
                ChunkStatus::Pending => summary.pending_chunks += 1,
                ChunkStatus::Monitoring => summary.monitoring_chunks += 1,
                ChunkStatus::Completed => summary.completed_chunks += 1,
                ChunkStatus::Failed => summary.failed_chunks += 1,
                _ => summary.active_chunks += 1,
            }
            summary.success_profiles += chunk.success_count;
            summary.error_profiles += chunk.error_count;
            summary.skipped_profiles += chunk.skipped_count;
        }
        summary
    }

    pub fn percent(&self) -> u8 {
        if self.total_chunks == 0 {
            return 0;
        }
        let done = self.completed_chunks + self.failed_chunks;
        ((done * 100) / self.total_chunks).min(100) as u8
    }
}

impl JobProgress {
    pub fn new(job: Job, chunks: &[Chunk]) -> Self {
        let summary = ProgressSummary::from_chunks(chunks);
        Self {
            job,
            percent: summary.percent(),
            summary,
            chunks: chunks.iter().map(ChunkSummary::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing;

    #[test]
    fn test_percent_counts_failed_as_done() {
        let job = testing::job();
        let mut chunks: Vec<Chunk> = (0..4)
            .map(|i| testing::chunk(job.id, i, i as i64 * 10, i as i64 * 10 + 10))
            .collect();
        chunks[0].status = ChunkStatus::Completed;
        chunks[0].success_count = 9;
        chunks[0].error_count = 1;
        chunks[1].status = ChunkStatus::Failed;
        chunks[2].status = ChunkStatus::Monitoring;

        let progress = JobProgress::new(job, &chunks);
        assert_eq!(progress.percent, 50);
        assert_eq!(progress.summary.pending_chunks, 1);
        assert_eq!(progress.summary.monitoring_chunks, 1);
        assert_eq!(progress.summary.success_profiles, 9);
        assert_eq!(progress.chunks.len(), 4);
        assert_eq!(progress.chunks[1].status, ChunkStatus::Failed);
    }

    #[test]
    fn test_empty_chunk_set_is_zero_percent() {
        assert_eq!(ProgressSummary::from_chunks(&[]).percent(), 0);
    }

    #[test]
    fn test_serializes_statuses_as_strings() {
        let job = testing::job();
        let chunks = vec![testing::chunk(job.id, 0, 0, 10)];
        let value = serde_json::to_value(JobProgress::new(job, &chunks)).unwrap();
        assert_eq!(value["chunks"][0]["status"], "pending");
        assert_eq!(value["job"]["status"], "pending");
    }
}
