use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the synchronization core.
#[derive(Debug, Error)]
pub enum SyncError {
    // ── Caller input ─────────────────────────────────────────────────────────
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Chunk {index} not found in job {job_id}")]
    ChunkNotFound { job_id: Uuid, index: i32 },

    #[error("Chunk not found: {0}")]
    UnknownChunk(Uuid),

    #[error("Chunk {index} of job {job_id} is in flight")]
    ChunkInFlight { job_id: Uuid, index: i32 },

    // ── Collaborators ────────────────────────────────────────────────────────
    #[error("Source fetch failed: {0}")]
    Source(String),

    #[error("Staging failed: {0}")]
    Staging(String),

    #[error("Destination import failed: {0}")]
    Import(String),

    #[error("Destination directory lookup failed: {0}")]
    Directory(String),

    #[error("Destination list {0} does not exist")]
    DestinationNotFound(String),

    // ── Persistence ──────────────────────────────────────────────────────────
    #[error("Store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Store(e.to_string())
    }
}

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Collaborator,
    DestinationMissing,
    Store,
}

/// User-facing hint attached to error responses.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub title: &'static str,
    pub action: &'static str,
}

static SUGGESTIONS: &[(ErrorKind, Suggestion)] = &[
    (
        ErrorKind::Validation,
        Suggestion {
            title: "Invalid request",
            action: "Check the source id and field mappings and submit again",
        },
    ),
    (
        ErrorKind::NotFound,
        Suggestion {
            title: "Not found",
            action: "Verify the job id or chunk index",
        },
    ),
    (
        ErrorKind::Conflict,
        Suggestion {
            title: "Chunk busy",
            action: "Wait for the chunk to finish before retrying it",
        },
    ),
    (
        ErrorKind::Collaborator,
        Suggestion {
            title: "Upstream service error",
            action: "Retry the failed chunk once the service is reachable",
        },
    ),
    (
        ErrorKind::DestinationMissing,
        Suggestion {
            title: "Destination list missing",
            action: "Pick an existing list or supply a name to create one",
        },
    ),
    (
        ErrorKind::Store,
        Suggestion {
            title: "Storage unavailable",
            action: "Try again shortly",
        },
    ),
];

impl ErrorKind {
    pub fn suggestion(self) -> &'static Suggestion {
        SUGGESTIONS
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, s)| s)
            .unwrap_or(&SUGGESTIONS[SUGGESTIONS.len() - 1].1)
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::JobNotFound(_)
            | SyncError::ChunkNotFound { .. }
            | SyncError::UnknownChunk(_) => ErrorKind::NotFound,
            SyncError::ChunkInFlight { .. } => ErrorKind::Conflict,
            SyncError::Source(_)
            | SyncError::Staging(_)
            | SyncError::Import(_)
            | SyncError::Directory(_) => ErrorKind::Collaborator,
            SyncError::DestinationNotFound(_) => ErrorKind::DestinationMissing,
            SyncError::Store(_) => ErrorKind::Store,
        }
    }

    /// Errors that belong to a single chunk and must not escape the chunk processor.
    pub fn is_chunk_local(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Collaborator | ErrorKind::DestinationMissing
        )
    }
}
