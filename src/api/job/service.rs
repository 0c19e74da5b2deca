use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::dto::{ContinueResponse, JobResponse, RetryResponse};
use super::models::CreateJobRequest;
use crate::api::validation::ErrorResponse;
use crate::error::{ErrorKind, SyncError};
use crate::sync::progress::ChunkSummary;
use crate::sync::{JobOrchestrator, JobProgress};

/// Service-level errors
#[derive(Debug)]
pub enum ServiceError {
    /// Store operation failed
    StoreError(String),

    /// Validation failed
    ValidationError(String),

    /// Job or chunk not found
    NotFound(String),

    /// Chunk is owned by a running driver
    Conflict(String),

    /// A collaborator error escaped the pipeline
    Upstream(ErrorKind, String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::StoreError(_) => ErrorKind::Store,
            ServiceError::ValidationError(_) => ErrorKind::Validation,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::Upstream(kind, _) => *kind,
        }
    }

    fn message(&self) -> &str {
        match self {
            ServiceError::StoreError(msg)
            | ServiceError::ValidationError(msg)
            | ServiceError::NotFound(msg)
            | ServiceError::Conflict(msg)
            | ServiceError::Upstream(_, msg) => msg,
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::StoreError(e) => write!(f, "Store error: {}", e),
            ServiceError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ServiceError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ServiceError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ServiceError::Upstream(_, msg) => write!(f, "Upstream error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<SyncError> for ServiceError {
    fn from(e: SyncError) -> Self {
        let kind = e.kind();
        let message = e.to_string();
        match kind {
            ErrorKind::Validation => ServiceError::ValidationError(message),
            ErrorKind::NotFound => ServiceError::NotFound(message),
            ErrorKind::Conflict => ServiceError::Conflict(message),
            ErrorKind::Store => ServiceError::StoreError(message),
            ErrorKind::Collaborator | ErrorKind::DestinationMissing => {
                ServiceError::Upstream(kind, message)
            }
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::StoreError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Upstream(_, _) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let suggestion = self.kind().suggestion();
        // Store failures are logged in full but reported generically
        let message = match self {
            ServiceError::StoreError(e) => {
                error!("Store error: {}", e);
                "Storage error occurred".to_string()
            }
            other => {
                warn!("{}", other);
                other.message().to_string()
            }
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: suggestion.title.to_string(),
            fields: serde_json::json!({
                "message": message,
                "suggestion": suggestion.action,
            }),
        })
    }
}

/// Job service sitting between the HTTP handlers and the orchestrator
pub struct JobService {
    orchestrator: Arc<JobOrchestrator>,
}

impl JobService {
    pub fn new(orchestrator: Arc<JobOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Plans and starts a job. Returns once the job is persisted; chunks run
    /// in the background.
    pub async fn create_job(&self, req: CreateJobRequest) -> Result<JobResponse, ServiceError> {
        info!(
            "Service: Creating sync job for {} {}",
            req.source_type, req.source_id
        );
        let job = self.orchestrator.create_job(req.into()).await?;
        info!("Service: Job created successfully with id={}", job.id);

        Ok(JobResponse {
            message: format!("Job created with {} chunks", job.total_chunks),
            job,
        })
    }

    pub async fn get_progress(&self, job_id: Uuid) -> Result<JobProgress, ServiceError> {
        Ok(self.orchestrator.get_job_progress(job_id).await?)
    }

    pub async fn continue_job(&self, job_id: Uuid) -> Result<ContinueResponse, ServiceError> {
        let started = self.orchestrator.continue_job(job_id).await?;
        let message = if started {
            "Job resumed"
        } else {
            "Nothing to resume"
        };
        Ok(ContinueResponse {
            message: message.to_string(),
            job_id,
            started,
        })
    }

    pub async fn retry_chunk(
        &self,
        job_id: Uuid,
        index: i32,
    ) -> Result<RetryResponse, ServiceError> {
        info!("Service: Retrying chunk {} of job {}", index, job_id);
        let chunk = self.orchestrator.retry_chunk(job_id, index).await?;
        Ok(RetryResponse {
            message: format!("Chunk {} queued for retry", index),
            job_id,
            chunk: ChunkSummary::from(&chunk),
        })
    }
}
