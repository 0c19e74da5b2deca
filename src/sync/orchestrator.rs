use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::collaborators::{Collaborators, DestinationDirectory, SourceRecordProvider};
use super::mapper::FieldMapper;
use super::model::{Chunk, ChunkPatch, ChunkStatus, FieldMapping, Job, JobPatch, JobStatus};
use super::planner::{next_open_chunk, plan_chunks, DEFAULT_CHUNK_SIZE};
use super::processor::{ChunkProcessor, PollSettings};
use super::progress::JobProgress;
use crate::db::ProgressStore;
use crate::error::SyncError;
use crate::worker::ChunkScheduler;

/// Everything a caller supplies to start a sync.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub source_type: String,
    pub source_id: String,
    pub source_name: Option<String>,
    pub destination_id: Option<String>,
    pub destination_name: Option<String>,
    pub field_mappings: Vec<FieldMapping>,
    /// Skips the source count lookup when the caller already knows the size.
    pub total_profiles: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub chunk_size: i64,
    pub max_concurrent_chunks: usize,
    pub poll: PollSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_chunks: 4,
            poll: PollSettings::default(),
        }
    }
}

/// Derives a job's status from its chunk set.
///
/// `current` is only consulted while a chunk is in flight, to keep reporting
/// the phase the processor last set.
pub fn derive_job_status(chunks: &[Chunk], current: JobStatus) -> JobStatus {
    if chunks.is_empty() {
        return current;
    }
    if chunks.iter().all(|c| c.status == ChunkStatus::Completed) {
        return JobStatus::Complete;
    }
    if chunks.iter().all(|c| c.status.is_terminal()) {
        return JobStatus::CompletedWithErrors;
    }
    if chunks.iter().any(|c| c.status.is_in_flight()) {
        return match current {
            JobStatus::Retrieving
            | JobStatus::Processing
            | JobStatus::Uploading
            | JobStatus::Importing => current,
            _ => JobStatus::Importing,
        };
    }

    let pending = chunks.iter().any(|c| c.status == ChunkStatus::Pending);
    if !pending {
        return JobStatus::Monitoring;
    }
    if chunks.iter().all(|c| c.status == ChunkStatus::Pending) {
        return JobStatus::Pending;
    }
    JobStatus::Importing
}

/// Owns job lifecycles: planning, sequencing chunks and settling status.
///
/// Each job is advanced by at most one driver task at a time. Drivers hold
/// their own `Arc` to the orchestrator, so a job keeps moving after the
/// request that started it has returned. Their handles stay in the registry
/// so [`shutdown`](Self::shutdown) can wait for them.
pub struct JobOrchestrator {
    store: Arc<dyn ProgressStore>,
    processor: ChunkProcessor,
    source: Arc<dyn SourceRecordProvider>,
    directory: Arc<dyn DestinationDirectory>,
    scheduler: ChunkScheduler,
    drivers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    closing: watch::Sender<bool>,
    chunk_size: i64,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        collaborators: Collaborators,
        mapper: FieldMapper,
        settings: OrchestratorSettings,
    ) -> Arc<Self> {
        let (closing, closing_rx) = watch::channel(false);
        let source = collaborators.source.clone();
        let directory = collaborators.directory.clone();
        let processor = ChunkProcessor::new(store.clone(), collaborators, mapper, settings.poll)
            .with_shutdown(closing_rx);
        Arc::new(Self {
            store,
            processor,
            source,
            directory,
            scheduler: ChunkScheduler::new(settings.max_concurrent_chunks),
            drivers: Mutex::new(HashMap::new()),
            closing,
            chunk_size: settings.chunk_size.max(1),
        })
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Validates, plans and persists a job, then starts it.
    ///
    /// A caller-supplied list id must be known to the destination directory;
    /// otherwise the job is rejected and nothing is stored.
    pub async fn create_job(self: &Arc<Self>, input: NewJob) -> Result<Job, SyncError> {
        validate(&input)?;

        let mut destination_name = non_blank(input.destination_name);
        let destination_id = non_blank(input.destination_id);
        if let Some(list_id) = &destination_id {
            let Some(name) = self.directory.resolve(list_id).await? else {
                return Err(SyncError::Validation(format!(
                    "destination list {list_id} does not exist"
                )));
            };
            destination_name.get_or_insert(name);
        }

        let (total_profiles, profiles_known) = match input.total_profiles {
            Some(total) => (total, true),
            None => match self.source.count(&input.source_type, &input.source_id).await {
                Ok(Some(total)) => (total.max(0), true),
                Ok(None) => (0, false),
                Err(e) => {
                    warn!(
                        "Count of {} {} unavailable, planning open-ended: {}",
                        input.source_type, input.source_id, e
                    );
                    (0, false)
                }
            },
        };

        let job_id = Uuid::new_v4();
        let chunks: Vec<Chunk> = plan_chunks(total_profiles, self.chunk_size)
            .into_iter()
            .map(|bounds| bounds.into_chunk(job_id))
            .collect();

        let job = Job {
            id: job_id,
            status: JobStatus::Pending,
            source_type: input.source_type.trim().to_string(),
            source_id: input.source_id.trim().to_string(),
            source_name: non_blank(input.source_name),
            destination_id,
            destination_name,
            field_mappings: input.field_mappings,
            total_chunks: chunks.len() as i32,
            completed_chunks: 0,
            failed_chunks: 0,
            total_profiles,
            profiles_known,
            processed_profiles: 0,
            success_profiles: 0,
            error_profiles: 0,
            skipped_profiles: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        };

        self.store.insert_job(&job, &chunks).await?;
        info!(
            "Created job {} for {} {}: {} profiles in {} chunks{}",
            job.id,
            job.source_type,
            job.source_id,
            job.total_profiles,
            job.total_chunks,
            if profiles_known { "" } else { " (open-ended)" }
        );

        self.continue_job(job.id).await?;
        Ok(job)
    }

    /// Starts a driver for the job unless one is running or there is nothing
    /// pending. Returns whether a driver was started.
    pub async fn continue_job(self: &Arc<Self>, job_id: Uuid) -> Result<bool, SyncError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))?;
        if job.status == JobStatus::Error {
            debug!("Job {} stopped on an error, waiting for a retry", job_id);
            return Ok(false);
        }
        if self.is_closing() {
            debug!("Shutting down, not starting a driver for job {}", job_id);
            return Ok(false);
        }

        let mut drivers = self.drivers.lock().await;
        if drivers.contains_key(&job_id) {
            debug!("Job {} already has an active driver", job_id);
            return Ok(false);
        }
        let chunks = self.store.list_chunks(job_id).await?;
        if !chunks.iter().any(|c| c.status == ChunkStatus::Pending) {
            drop(drivers);
            self.settle(job_id).await?;
            return Ok(false);
        }

        // Registered before the task can reach the registry itself
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.drive(job_id).await });
        drivers.insert(job_id, handle);
        Ok(true)
    }

    /// Resets one chunk to `pending` and resumes the job. Other chunks are
    /// left exactly as they are.
    pub async fn retry_chunk(
        self: &Arc<Self>,
        job_id: Uuid,
        index: i32,
    ) -> Result<Chunk, SyncError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))?;

        let drivers = self.drivers.lock().await;
        let chunk = self
            .store
            .find_chunk(job_id, index)
            .await?
            .ok_or(SyncError::ChunkNotFound { job_id, index })?;

        // Without a live driver an in-flight status is left over from a
        // previous process and may be reset.
        if chunk.status.is_in_flight() && drivers.contains_key(&job_id) {
            return Err(SyncError::ChunkInFlight { job_id, index });
        }

        info!("Retrying job {} chunk {} (was {})", job_id, index, chunk.status);
        let chunk = if chunk.status == ChunkStatus::Pending {
            chunk
        } else {
            self.store.update_chunk(chunk.id, &ChunkPatch::reset()).await?
        };

        let mut reopen = JobPatch {
            completed_at: Some(None),
            ..Default::default()
        };
        if job.status == JobStatus::Error {
            reopen.status = Some(JobStatus::Importing);
            reopen.error_message = Some(None);
        }
        self.store.update_job(job_id, &reopen).await?;
        drop(drivers);

        self.settle(job_id).await?;
        self.continue_job(job_id).await?;
        Ok(chunk)
    }

    /// Rechecks monitoring chunks, settles the job, nudges it forward and
    /// returns the current view.
    pub async fn get_job_progress(
        self: &Arc<Self>,
        job_id: Uuid,
    ) -> Result<JobProgress, SyncError> {
        self.refresh(job_id).await?;

        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))?;
        let chunks = self.store.list_chunks(job_id).await?;
        Ok(JobProgress::new(job, &chunks))
    }

    /// Brings a job up to date without building a view.
    pub async fn refresh(self: &Arc<Self>, job_id: Uuid) -> Result<(), SyncError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))?;

        let mut settled = !self.is_closing() && self.recover_stranded(job_id).await? > 0;

        let chunks = self.store.list_chunks(job_id).await?;
        for chunk in chunks.iter().filter(|c| c.status == ChunkStatus::Monitoring) {
            if let Some(outcome) = self.processor.recheck(chunk).await? {
                info!(
                    "Monitored import for job {} chunk {} settled: {:?}",
                    job_id, chunk.index, outcome
                );
                settled = true;
            }
        }
        if settled {
            self.settle(job_id).await?;
        }

        self.continue_job(job_id).await?;
        Ok(())
    }

    /// Resumes every job that has not reached a terminal status.
    pub async fn resume_unsettled(self: &Arc<Self>) -> Result<usize, SyncError> {
        if self.is_closing() {
            return Ok(0);
        }
        let ids = self.store.list_unsettled_jobs().await?;
        for job_id in &ids {
            if let Err(e) = self.refresh(*job_id).await {
                warn!("Failed to resume job {}: {}", job_id, e);
            }
        }
        Ok(ids.len())
    }

    /// Stops starting chunks, hands chunks still polling over to monitoring
    /// and waits for every driver to exit.
    ///
    /// Chunks left pending stay pending; a later process picks them up.
    pub async fn shutdown(&self) {
        self.closing.send_replace(true);
        self.scheduler.close();

        let handles: Vec<(Uuid, JoinHandle<()>)> = self.drivers.lock().await.drain().collect();
        info!("Waiting for {} chunk drivers to exit...", handles.len());
        for (job_id, handle) in handles {
            match handle.await {
                Ok(()) => debug!("Driver for job {} exited", job_id),
                Err(e) => error!("Driver for job {} failed to exit cleanly: {:?}", job_id, e),
            }
        }
        info!("All chunk drivers stopped");
    }

    /// Whether a driver is currently advancing the job.
    #[cfg(test)]
    pub async fn is_driving(&self, job_id: Uuid) -> bool {
        self.drivers.lock().await.contains_key(&job_id)
    }

    /// Hands back chunks left in flight with no driver to own them, as after
    /// a crash. A submitted import goes to monitoring so it is rechecked
    /// rather than sent twice; anything earlier returns to pending.
    async fn recover_stranded(&self, job_id: Uuid) -> Result<usize, SyncError> {
        let drivers = self.drivers.lock().await;
        if drivers.contains_key(&job_id) {
            return Ok(0);
        }

        let chunks = self.store.list_chunks(job_id).await?;
        let mut recovered = 0;
        for chunk in chunks.iter().filter(|c| c.status.is_in_flight()) {
            let patch = if chunk.destination_import_id.is_some() {
                ChunkPatch::status(ChunkStatus::Monitoring)
            } else {
                ChunkPatch::reset()
            };
            warn!(
                "Job {} chunk {} was left {} without a driver; moving it to {}",
                job_id,
                chunk.index,
                chunk.status,
                patch.status.unwrap_or(ChunkStatus::Pending)
            );
            self.store.update_chunk(chunk.id, &patch).await?;
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn drive(self: Arc<Self>, job_id: Uuid) {
        if let Err(e) = self.run_driver(job_id).await {
            error!("Driver for job {} stopped: {}", job_id, e);
            let patch = JobPatch {
                status: Some(JobStatus::Error),
                error_message: Some(Some(e.to_string())),
                completed_at: Some(Some(Utc::now())),
                ..Default::default()
            };
            if let Err(e) = self.store.update_job(job_id, &patch).await {
                error!("Could not mark job {} as failed: {}", job_id, e);
            }
            self.drivers.lock().await.remove(&job_id);
        }
    }

    async fn run_driver(&self, job_id: Uuid) -> Result<(), SyncError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))?;
        if job.started_at.is_none() {
            self.store
                .update_job(
                    job_id,
                    &JobPatch {
                        started_at: Some(Some(Utc::now())),
                        ..Default::default()
                    },
                )
                .await?;
        }

        loop {
            if self.is_closing() {
                debug!("Driver for job {} stopping for shutdown", job_id);
                return self.release(job_id).await;
            }
            let Some(chunk) = self.claim_next(job_id).await? else {
                return Ok(());
            };

            let outcome = {
                let _permit = match self.scheduler.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        debug!(
                            "Chunk slots closed; job {} chunk {} stays pending",
                            job_id, chunk.index
                        );
                        return self.release(job_id).await;
                    }
                };
                debug!(
                    "Job {} chunk {} took a slot ({}/{} in use)",
                    job_id,
                    chunk.index,
                    self.scheduler.active(),
                    self.scheduler.capacity()
                );
                self.processor.process(job_id, chunk.id).await?
            };
            debug!("Job {} chunk {} run ended: {:?}", job_id, chunk.index, outcome);

            self.extend_open_plan(job_id, chunk.id).await?;
            self.settle(job_id).await?;
        }
    }

    /// Lowest-index pending chunk, or `None` after settling the job and
    /// releasing the driver slot.
    ///
    /// The second look happens under the registry lock so a retry landing
    /// while the driver winds down is never stranded.
    async fn claim_next(&self, job_id: Uuid) -> Result<Option<Chunk>, SyncError> {
        if let Some(chunk) = self.first_pending(job_id).await? {
            return Ok(Some(chunk));
        }

        let mut drivers = self.drivers.lock().await;
        if let Some(chunk) = self.first_pending(job_id).await? {
            return Ok(Some(chunk));
        }
        self.settle(job_id).await?;
        drivers.remove(&job_id);
        debug!("Driver for job {} finished", job_id);
        Ok(None)
    }

    /// Settles the job and drops its registration without looking for more work.
    async fn release(&self, job_id: Uuid) -> Result<(), SyncError> {
        let mut drivers = self.drivers.lock().await;
        self.settle(job_id).await?;
        drivers.remove(&job_id);
        Ok(())
    }

    async fn first_pending(&self, job_id: Uuid) -> Result<Option<Chunk>, SyncError> {
        Ok(self
            .store
            .list_chunks(job_id)
            .await?
            .into_iter()
            .find(|c| c.status == ChunkStatus::Pending))
    }

    /// For jobs planned without a known count: appends the next chunk while
    /// the last one came back full, and closes the plan once one comes back
    /// short.
    async fn extend_open_plan(&self, job_id: Uuid, chunk_id: Uuid) -> Result<(), SyncError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))?;
        if job.profiles_known {
            return Ok(());
        }

        let chunks = self.store.list_chunks(job_id).await?;
        let Some(last) = chunks.last() else {
            return Ok(());
        };
        if last.id != chunk_id || last.started_at.is_none() {
            return Ok(());
        }

        let seen: i64 = chunks.iter().map(|c| c.profiles_count).sum();
        let mut patch = JobPatch {
            total_profiles: Some(seen),
            ..Default::default()
        };

        if last.profiles_count >= last.requested_count() {
            let next = next_open_chunk(last, self.chunk_size).into_chunk(job_id);
            debug!(
                "Job {} extending open plan with chunk {} [{}, {})",
                job_id, next.index, next.start_offset, next.end_offset
            );
            self.store.append_chunk(&next).await?;
        } else if last.status != ChunkStatus::Failed || last.profiles_count > 0 {
            info!("Job {} source exhausted at {} profiles", job_id, seen);
            patch.profiles_known = Some(true);
        }

        self.store.update_job(job_id, &patch).await?;
        Ok(())
    }

    /// Refreshes aggregates and writes the derived status. A job in `error`
    /// (its driver hit a store failure) keeps that status until a retry
    /// reopens it.
    async fn settle(&self, job_id: Uuid) -> Result<Job, SyncError> {
        let job = self.store.refresh_aggregates(job_id).await?;
        if job.status == JobStatus::Error {
            return Ok(job);
        }

        let chunks = self.store.list_chunks(job_id).await?;
        let next = derive_job_status(&chunks, job.status);

        let mut patch = JobPatch::default();
        if next != job.status {
            patch.status = Some(next);
        }
        if next.is_terminal() && job.completed_at.is_none() {
            patch.completed_at = Some(Some(Utc::now()));
        } else if !next.is_terminal() && job.completed_at.is_some() {
            patch.completed_at = Some(None);
        }
        if patch.is_empty() {
            return Ok(job);
        }

        if next.is_terminal() && next != job.status {
            info!(
                "Job {} finished as {}: {} completed, {} failed, {} imported, {} rejected",
                job_id,
                next,
                job.completed_chunks,
                job.failed_chunks,
                job.success_profiles,
                job.error_profiles
            );
        }
        self.store.update_job(job_id, &patch).await
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate(input: &NewJob) -> Result<(), SyncError> {
    if input.source_type.trim().is_empty() {
        return Err(SyncError::Validation("source_type is required".into()));
    }
    if input.source_id.trim().is_empty() {
        return Err(SyncError::Validation("source_id is required".into()));
    }
    if input.field_mappings.is_empty() {
        return Err(SyncError::Validation(
            "field_mappings must contain at least one mapping".into(),
        ));
    }
    for (i, mapping) in input.field_mappings.iter().enumerate() {
        if mapping.destination_field.trim().is_empty() || mapping.source_field.trim().is_empty() {
            return Err(SyncError::Validation(format!(
                "field_mappings[{i}] needs both destination_field and source_field"
            )));
        }
    }
    if let Some(total) = input.total_profiles {
        if total < 0 {
            return Err(SyncError::Validation(
                "total_profiles cannot be negative".into(),
            ));
        }
    }
    if matches!(&input.destination_id, Some(id) if id.trim().is_empty()) {
        return Err(SyncError::Validation(
            "destination_id cannot be blank".into(),
        ));
    }
    Ok(())
}
