use serde::Serialize;
use uuid::Uuid;

use crate::sync::model::Job;
use crate::sync::progress::ChunkSummary;

/// Response for job creation
#[derive(Serialize)]
pub struct JobResponse {
    pub message: String,
    pub job: Job,
}

/// Response for a continuation request
#[derive(Serialize)]
pub struct ContinueResponse {
    pub message: String,
    pub job_id: Uuid,
    /// False when a driver was already running or nothing was pending
    pub started: bool,
}

/// Response for a chunk retry
#[derive(Serialize)]
pub struct RetryResponse {
    pub message: String,
    pub job_id: Uuid,
    pub chunk: ChunkSummary,
}
