use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::collaborators::{
    ArtifactStager, Collaborators, DestinationImporter, ImportStatus, SourceRecordProvider,
};
use super::mapper::FieldMapper;
use super::model::{Chunk, ChunkPatch, ChunkStatus, Job, JobPatch, JobStatus};
use super::resolver::DestinationResolver;
use crate::db::ProgressStore;
use crate::error::SyncError;

pub const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 40;

/// How long a chunk waits on the destination before handing over to monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            delay: DEFAULT_POLL_DELAY,
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        }
    }
}

/// Where a chunk ended up after one processing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Completed { success: i64, errors: i64 },
    Failed { message: String },
    /// Polling gave up (or the process is stopping); the import is presumed
    /// still running remotely.
    Monitoring,
}

/// Drives one chunk through fetch → map → stage → submit → poll.
///
/// Collaborator failures are recorded on the chunk and reported as
/// [`ChunkOutcome::Failed`]; only store failures and unknown ids come back as
/// errors.
pub struct ChunkProcessor {
    store: Arc<dyn ProgressStore>,
    source: Arc<dyn SourceRecordProvider>,
    stager: Arc<dyn ArtifactStager>,
    importer: Arc<dyn DestinationImporter>,
    resolver: DestinationResolver,
    mapper: FieldMapper,
    poll: PollSettings,
    closing: Option<watch::Receiver<bool>>,
}

impl ChunkProcessor {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        collaborators: Collaborators,
        mapper: FieldMapper,
        poll: PollSettings,
    ) -> Self {
        Self {
            store,
            source: collaborators.source,
            stager: collaborators.stager,
            importer: collaborators.importer,
            resolver: DestinationResolver::new(collaborators.directory),
            mapper,
            poll,
            closing: None,
        }
    }

    /// Stops waiting on imports once `closing` turns true; chunks still being
    /// polled are left in monitoring.
    pub fn with_shutdown(mut self, closing: watch::Receiver<bool>) -> Self {
        self.closing = Some(closing);
        self
    }

    /// Runs the chunk to a terminal or monitoring state.
    pub async fn process(&self, job_id: Uuid, chunk_id: Uuid) -> Result<ChunkOutcome, SyncError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(SyncError::JobNotFound(job_id))?;
        let chunk = self
            .store
            .get_chunk(chunk_id)
            .await?
            .filter(|c| c.job_id == job_id)
            .ok_or(SyncError::UnknownChunk(chunk_id))?;

        info!(
            "Processing job {} chunk {} [{}, {})",
            job.id, chunk.index, chunk.start_offset, chunk.end_offset
        );

        match self.drive(&job, &chunk).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_chunk_local() => {
                error!("Job {} chunk {} failed: {}", job.id, chunk.index, e);
                self.fail(&chunk, e.to_string()).await
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(&self, job: &Job, chunk: &Chunk) -> Result<ChunkOutcome, SyncError> {
        // processing
        self.store
            .update_chunk(
                chunk.id,
                &ChunkPatch {
                    status: Some(ChunkStatus::Processing),
                    started_at: Some(Some(Utc::now())),
                    completed_at: Some(None),
                    error_message: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        self.set_job_phase(job.id, JobStatus::Retrieving).await?;

        let records = self
            .source
            .fetch(
                &job.source_type,
                &job.source_id,
                chunk.start_offset,
                chunk.requested_count(),
            )
            .await?;

        self.set_job_phase(job.id, JobStatus::Processing).await?;
        let (valid, skipped) = self.mapper.map_all(&records, &job.field_mappings);
        let fetched = records.len() as i64;
        debug!(
            "Job {} chunk {}: fetched {}, valid {}, skipped {}",
            job.id,
            chunk.index,
            fetched,
            valid.len(),
            skipped
        );

        self.store
            .update_chunk(
                chunk.id,
                &ChunkPatch {
                    profiles_count: Some(fetched),
                    skipped_count: Some(skipped as i64),
                    ..Default::default()
                },
            )
            .await?;

        if fetched == 0 {
            info!("Job {} chunk {} has no records, nothing to import", job.id, chunk.index);
            return self.complete(chunk, 0, 0).await;
        }
        if valid.is_empty() {
            let message = format!(
                "No records carried a {} value ({} skipped)",
                self.mapper.contact_key(),
                skipped
            );
            warn!("Job {} chunk {}: {}", job.id, chunk.index, message);
            return self.fail(chunk, message).await;
        }

        // uploading
        self.store
            .update_chunk(chunk.id, &ChunkPatch::status(ChunkStatus::Uploading))
            .await?;
        self.set_job_phase(job.id, JobStatus::Uploading).await?;

        let artifact = self.stager.stage(&valid).await?;
        self.store
            .update_chunk(
                chunk.id,
                &ChunkPatch {
                    artifact_url: Some(Some(artifact.url.clone())),
                    ..Default::default()
                },
            )
            .await?;

        // importing
        self.store
            .update_chunk(chunk.id, &ChunkPatch::status(ChunkStatus::Importing))
            .await?;
        self.set_job_phase(job.id, JobStatus::Importing).await?;

        let chunk_zero = if chunk.index > 0 {
            self.store.find_chunk(job.id, 0).await?
        } else {
            None
        };
        let resolution = match self
            .resolver
            .resolve(job, chunk.index, chunk_zero.as_ref())
            .await
        {
            Err(SyncError::DestinationNotFound(list_id)) => {
                self.forget_missing_list(job, &list_id).await?;
                return Err(SyncError::DestinationNotFound(list_id));
            }
            resolved => resolved?,
        };
        if let (Some(name), None) = (&resolution.list_name, &job.destination_name) {
            self.store
                .update_job(
                    job.id,
                    &JobPatch {
                        destination_name: Some(Some(name.clone())),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let receipt = self.importer.submit(&artifact, &resolution.target).await?;
        info!(
            "Job {} chunk {} submitted as import {} ({:?})",
            job.id, chunk.index, receipt.import_id, resolution.source
        );
        self.store
            .update_chunk(
                chunk.id,
                &ChunkPatch {
                    destination_import_id: Some(Some(receipt.import_id.clone())),
                    ..Default::default()
                },
            )
            .await?;

        let mut list_known = false;
        if let Some(list_id) = receipt
            .list_id
            .clone()
            .or_else(|| resolution.list_id().map(str::to_string))
        {
            self.record_list(job, chunk, &list_id).await?;
            list_known = true;
        }

        self.poll_until_settled(job, chunk, &receipt.import_id, list_known)
            .await
    }

    async fn poll_until_settled(
        &self,
        job: &Job,
        chunk: &Chunk,
        import_id: &str,
        mut list_known: bool,
    ) -> Result<ChunkOutcome, SyncError> {
        for attempt in 1..=self.poll.max_attempts {
            if self.wait_or_close().await {
                info!(
                    "Stopping; import {} for job {} chunk {} left to monitoring",
                    import_id, job.id, chunk.index
                );
                return self.hand_to_monitoring(chunk).await;
            }

            let status = self.importer.poll_status(import_id).await?;
            debug!(
                "Import {} attempt {}/{}: {:?} {}/{} errors={}",
                import_id,
                attempt,
                self.poll.max_attempts,
                status.status,
                status.processed,
                status.total,
                status.errors
            );

            if !list_known {
                if let Some(list_id) = &status.list_id {
                    self.record_list(job, chunk, list_id).await?;
                    list_known = true;
                }
            }

            if let Some(outcome) = self.apply_remote_status(chunk, &status, None).await? {
                return Ok(outcome);
            }
        }

        warn!(
            "Import {} for job {} chunk {} not finished after {} polls; monitoring",
            import_id, job.id, chunk.index, self.poll.max_attempts
        );
        self.hand_to_monitoring(chunk).await
    }

    /// Sleeps one poll interval. Returns true instead when the process is
    /// shutting down.
    async fn wait_or_close(&self) -> bool {
        let Some(closing) = &self.closing else {
            sleep(self.poll.delay).await;
            return false;
        };
        let mut closing = closing.clone();
        if *closing.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = sleep(self.poll.delay) => false,
            changed = closing.changed() => changed.is_ok() && *closing.borrow(),
        }
    }

    async fn hand_to_monitoring(&self, chunk: &Chunk) -> Result<ChunkOutcome, SyncError> {
        self.store
            .update_chunk(chunk.id, &ChunkPatch::status(ChunkStatus::Monitoring))
            .await?;
        Ok(ChunkOutcome::Monitoring)
    }

    /// Polls a monitoring chunk once and records a terminal outcome if the
    /// destination has one. Poll failures leave the chunk in monitoring.
    ///
    /// The outcome is only written while the chunk is still in monitoring, so
    /// a chunk retried in the meantime keeps its new run.
    pub async fn recheck(&self, chunk: &Chunk) -> Result<Option<ChunkOutcome>, SyncError> {
        let Some(import_id) = chunk.destination_import_id.as_deref() else {
            return Ok(None);
        };
        let status = match self.importer.poll_status(import_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Recheck of import {} failed: {}", import_id, e);
                return Ok(None);
            }
        };

        let outcome = self
            .apply_remote_status(chunk, &status, Some(ChunkStatus::Monitoring))
            .await?;
        if outcome.is_some() && chunk.resolved_destination_list_id.is_none() {
            if let Some(list_id) = &status.list_id {
                let job = self
                    .store
                    .get_job(chunk.job_id)
                    .await?
                    .ok_or(SyncError::JobNotFound(chunk.job_id))?;
                self.record_list(&job, chunk, list_id).await?;
            }
        }
        Ok(outcome)
    }

    /// Records a terminal remote status. With `from` set the write only lands
    /// while the chunk still has that status.
    async fn apply_remote_status(
        &self,
        chunk: &Chunk,
        status: &ImportStatus,
        from: Option<ChunkStatus>,
    ) -> Result<Option<ChunkOutcome>, SyncError> {
        let (patch, outcome) = if status.is_success() {
            let errors = status.errors.max(0);
            let success = (status.processed - errors).max(0);
            (
                completed_patch(success, errors),
                ChunkOutcome::Completed { success, errors },
            )
        } else if status.is_failure() {
            let message = status
                .detail
                .clone()
                .unwrap_or_else(|| "Destination reported the import as failed".to_string());
            (failed_patch(&message), ChunkOutcome::Failed { message })
        } else {
            return Ok(None);
        };

        match from {
            None => {
                self.store.update_chunk(chunk.id, &patch).await?;
            }
            Some(expected) => {
                let applied = self
                    .store
                    .update_chunk_if_status(chunk.id, expected, &patch)
                    .await?;
                if applied.is_none() {
                    debug!(
                        "Job {} chunk {} moved on since it was read; dropping stale result",
                        chunk.job_id, chunk.index
                    );
                    return Ok(None);
                }
            }
        }
        log_outcome(chunk, &outcome);
        Ok(Some(outcome))
    }

    /// Records the list a chunk wrote to. Chunk 0 always hands its list to
    /// the job; any other chunk only does so while the job has none, so a
    /// degraded fallback creates at most one extra list.
    async fn record_list(&self, job: &Job, chunk: &Chunk, list_id: &str) -> Result<(), SyncError> {
        self.store
            .update_chunk(
                chunk.id,
                &ChunkPatch {
                    resolved_destination_list_id: Some(Some(list_id.to_string())),
                    ..Default::default()
                },
            )
            .await?;

        let adopt = if chunk.index == 0 {
            job.destination_id.as_deref() != Some(list_id)
        } else {
            self.store
                .get_job(job.id)
                .await?
                .ok_or(SyncError::JobNotFound(job.id))?
                .destination_id
                .is_none()
        };
        if adopt {
            info!(
                "Job {} resolved destination list {} (from chunk {})",
                job.id, list_id, chunk.index
            );
            self.store
                .update_job(
                    job.id,
                    &JobPatch {
                        destination_id: Some(Some(list_id.to_string())),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// The caller's list vanished after the job was created. Later chunks
    /// fall back to creating a list by name instead.
    async fn forget_missing_list(&self, job: &Job, list_id: &str) -> Result<(), SyncError> {
        warn!(
            "Job {} destination list {} no longer exists; later chunks will create one by name",
            job.id, list_id
        );
        self.store
            .update_job(
                job.id,
                &JobPatch {
                    destination_id: Some(None),
                    ..Default::default()
                },
            )
            .await
            .map(|_| ())
    }

    async fn complete(
        &self,
        chunk: &Chunk,
        success: i64,
        errors: i64,
    ) -> Result<ChunkOutcome, SyncError> {
        self.store
            .update_chunk(chunk.id, &completed_patch(success, errors))
            .await?;
        let outcome = ChunkOutcome::Completed { success, errors };
        log_outcome(chunk, &outcome);
        Ok(outcome)
    }

    async fn fail(&self, chunk: &Chunk, message: String) -> Result<ChunkOutcome, SyncError> {
        self.store
            .update_chunk(chunk.id, &failed_patch(&message))
            .await?;
        Ok(ChunkOutcome::Failed { message })
    }

    async fn set_job_phase(&self, job_id: Uuid, status: JobStatus) -> Result<(), SyncError> {
        self.store
            .update_job(job_id, &JobPatch::status(status))
            .await
            .map(|_| ())
    }
}

fn completed_patch(success: i64, errors: i64) -> ChunkPatch {
    ChunkPatch {
        status: Some(ChunkStatus::Completed),
        success_count: Some(success),
        error_count: Some(errors),
        completed_at: Some(Some(Utc::now())),
        error_message: Some(None),
        ..Default::default()
    }
}

fn failed_patch(message: &str) -> ChunkPatch {
    ChunkPatch {
        status: Some(ChunkStatus::Failed),
        completed_at: Some(Some(Utc::now())),
        error_message: Some(Some(message.to_string())),
        ..Default::default()
    }
}

fn log_outcome(chunk: &Chunk, outcome: &ChunkOutcome) {
    match outcome {
        ChunkOutcome::Completed { success, errors } => info!(
            "Job {} chunk {} completed: {} imported, {} rejected by destination",
            chunk.job_id, chunk.index, success, errors
        ),
        ChunkOutcome::Failed { message } => warn!(
            "Job {} chunk {} failed at the destination: {}",
            chunk.job_id, chunk.index, message
        ),
        ChunkOutcome::Monitoring => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryProgressStore;
    use crate::sync::collaborators::{DestinationTarget, RemoteImportState};
    use crate::sync::planner::plan_chunks;
    use crate::sync::testing::{self, Fakes};

    async fn setup(
        fakes: &Fakes,
        total: i64,
        size: i64,
    ) -> (Arc<MemoryProgressStore>, ChunkProcessor, Job, Vec<Chunk>) {
        let store = Arc::new(MemoryProgressStore::new());
        let mut job = testing::job();
        job.total_profiles = total;
        job.profiles_known = true;
        let chunks: Vec<Chunk> = plan_chunks(total, size)
            .into_iter()
            .map(|b| b.into_chunk(job.id))
            .collect();
        job.total_chunks = chunks.len() as i32;
        store.insert_job(&job, &chunks).await.unwrap();

        let processor = ChunkProcessor::new(
            store.clone(),
            fakes.collaborators(),
            FieldMapper::default(),
            testing::fast_poll(),
        );
        (store, processor, job, chunks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_chunk_records_destination_counts() {
        let fakes = Fakes::new(100);
        fakes.importer.script(vec![testing::status(100, 100, 5, true)]);
        let (store, processor, job, chunks) = setup(&fakes, 100, 100).await;

        let outcome = processor.process(job.id, chunks[0].id).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Completed { success: 95, errors: 5 });

        let chunk = store.get_chunk(chunks[0].id).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Completed);
        assert_eq!(chunk.success_count, 95);
        assert_eq!(chunk.error_count, 5);
        assert_eq!(chunk.destination_import_id.as_deref(), Some("X"));
        assert!(chunk.artifact_url.is_some());
        assert!(chunk.completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_fails_chunk_with_detail() {
        let fakes = Fakes::new(10);
        let mut failed = testing::status(0, 10, 0, false);
        failed.status = RemoteImportState::Error;
        failed.detail = Some("invalid phone column".into());
        fakes.importer.script(vec![failed]);
        let (store, processor, job, chunks) = setup(&fakes, 10, 10).await;

        let outcome = processor.process(job.id, chunks[0].id).await.unwrap();
        assert!(matches!(outcome, ChunkOutcome::Failed { .. }));
        let chunk = store.get_chunk(chunks[0].id).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Failed);
        assert_eq!(chunk.error_message.as_deref(), Some("invalid phone column"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_polls_leave_chunk_monitoring() {
        let fakes = Fakes::new(10);
        fakes.importer.script(vec![testing::status(3, 10, 0, false)]);
        let (store, _, job, chunks) = setup(&fakes, 10, 10).await;
        let processor = ChunkProcessor::new(
            store.clone(),
            fakes.collaborators(),
            FieldMapper::default(),
            PollSettings::default(),
        );

        let outcome = processor.process(job.id, chunks[0].id).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Monitoring);
        assert_eq!(fakes.importer.polls(), DEFAULT_POLL_MAX_ATTEMPTS as usize);

        let chunk = store.get_chunk(chunks[0].id).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Monitoring);
        assert_eq!(chunk.error_message, None);
        assert_eq!(chunk.completed_at, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staging_error_fails_chunk() {
        let fakes = Fakes::new(10);
        fakes.stager.fail_on_call(1);
        let (store, processor, job, chunks) = setup(&fakes, 10, 10).await;

        let outcome = processor.process(job.id, chunks[0].id).await.unwrap();
        let ChunkOutcome::Failed { message, .. } = outcome else {
            panic!("expected failure");
        };
        assert!(message.contains("Staging failed"));
        let chunk = store.get_chunk(chunks[0].id).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Failed);
        assert_eq!(fakes.importer.submissions().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_records_rejected_fails_without_staging() {
        let fakes = Fakes::new(5);
        fakes.source.without_contacts();
        let (store, processor, job, chunks) = setup(&fakes, 5, 5).await;

        let outcome = processor.process(job.id, chunks[0].id).await.unwrap();
        assert!(matches!(outcome, ChunkOutcome::Failed { .. }));
        let chunk = store.get_chunk(chunks[0].id).await.unwrap().unwrap();
        assert_eq!(chunk.skipped_count, 5);
        assert_eq!(fakes.stager.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_fetch_completes_with_zero_counts() {
        let fakes = Fakes::new(0);
        let (store, processor, job, chunks) = setup(&fakes, 0, 50).await;

        let outcome = processor.process(job.id, chunks[0].id).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Completed { success: 0, errors: 0 });
        let chunk = store.get_chunk(chunks[0].id).await.unwrap().unwrap();
        assert_eq!(chunk.profiles_count, 0);
        assert_eq!(fakes.stager.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_zero_propagates_created_list_to_job() {
        let fakes = Fakes::new(10);
        fakes.importer.assign_list_on_poll("L-created");
        fakes.importer.script(vec![
            testing::status(0, 10, 0, false),
            testing::status(10, 10, 0, true),
        ]);
        let (store, processor, job, chunks) = setup(&fakes, 10, 10).await;

        processor.process(job.id, chunks[0].id).await.unwrap();

        let chunk = store.get_chunk(chunks[0].id).await.unwrap().unwrap();
        assert_eq!(chunk.resolved_destination_list_id.as_deref(), Some("L-created"));
        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.destination_id.as_deref(), Some("L-created"));
        assert!(matches!(
            fakes.importer.submissions()[0],
            DestinationTarget::Create { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_destination_fails_only_this_chunk() {
        let fakes = Fakes::new(10);
        let (store, processor, job, chunks) = setup(&fakes, 10, 10).await;
        store
            .update_job(
                job.id,
                &JobPatch {
                    destination_id: Some(Some("gone".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = processor.process(job.id, chunks[0].id).await.unwrap();
        let ChunkOutcome::Failed { message } = outcome else {
            panic!("expected failure");
        };
        assert!(message.contains("gone"));
        assert_eq!(fakes.importer.submissions().len(), 0);

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.destination_id, None);
        assert_eq!(job.status, JobStatus::Importing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_fails_chunk() {
        let fakes = Fakes::new(10);
        fakes.importer.fail_next_polls(1);
        let (store, processor, job, chunks) = setup(&fakes, 10, 10).await;

        let outcome = processor.process(job.id, chunks[0].id).await.unwrap();
        let ChunkOutcome::Failed { message } = outcome else {
            panic!("expected failure");
        };
        assert!(message.starts_with("Destination import failed"));
        let chunk = store.get_chunk(chunks[0].id).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Failed);
        assert_eq!(chunk.destination_import_id.as_deref(), Some("X"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_error_fails_chunk_before_staging() {
        let fakes = Fakes::new(10);
        fakes.source.fail_fetch_once_at(0);
        let (store, processor, job, chunks) = setup(&fakes, 10, 10).await;

        let outcome = processor.process(job.id, chunks[0].id).await.unwrap();
        assert!(matches!(outcome, ChunkOutcome::Failed { .. }));
        let chunk = store.get_chunk(chunks[0].id).await.unwrap().unwrap();
        assert!(chunk.error_message.unwrap().starts_with("Source fetch failed"));
        assert_eq!(fakes.stager.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_chunk_hands_its_list_to_the_job() {
        let fakes = Fakes::new(20);
        fakes.importer.assign_list_on_poll("L-fallback");
        let (store, processor, job, chunks) = setup(&fakes, 20, 10).await;

        processor.process(job.id, chunks[1].id).await.unwrap();
        assert!(matches!(
            fakes.importer.submissions()[0],
            DestinationTarget::Create { .. }
        ));
        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.destination_id.as_deref(), Some("L-fallback"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_polling_chunk_in_monitoring() {
        let fakes = Fakes::new(10);
        fakes.importer.script(vec![testing::status(1, 10, 0, false)]);
        let (store, _, job, chunks) = setup(&fakes, 10, 10).await;
        let (tx, rx) = watch::channel(false);
        let processor = Arc::new(
            ChunkProcessor::new(
                store.clone(),
                fakes.collaborators(),
                FieldMapper::default(),
                PollSettings::default(),
            )
            .with_shutdown(rx),
        );

        let running = processor.clone();
        let chunk_id = chunks[0].id;
        let handle = tokio::spawn(async move { running.process(job.id, chunk_id).await });
        while fakes.importer.polls() < 2 {
            sleep(Duration::from_millis(500)).await;
        }
        tx.send(true).unwrap();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, ChunkOutcome::Monitoring);
        assert!(fakes.importer.polls() < DEFAULT_POLL_MAX_ATTEMPTS as usize);
        let chunk = store.get_chunk(chunk_id).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Monitoring);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_errors() {
        let fakes = Fakes::new(10);
        let (_, processor, job, _) = setup(&fakes, 10, 10).await;
        let err = processor.process(job.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SyncError::UnknownChunk(_)));
        let err = processor.process(Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SyncError::JobNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_settles_monitoring_chunk() {
        let fakes = Fakes::new(10);
        fakes.importer.script(vec![testing::status(10, 10, 1, true)]);
        let (store, processor, _, chunks) = setup(&fakes, 10, 10).await;
        let chunk = store
            .update_chunk(
                chunks[0].id,
                &ChunkPatch {
                    status: Some(ChunkStatus::Monitoring),
                    destination_import_id: Some(Some("X".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = processor.recheck(&chunk).await.unwrap();
        assert_eq!(outcome, Some(ChunkOutcome::Completed { success: 9, errors: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_recheck_keeps_the_new_run() {
        let fakes = Fakes::new(10);
        fakes.importer.script(vec![testing::status(10, 10, 1, true)]);
        let (store, processor, _, chunks) = setup(&fakes, 10, 10).await;
        let stale = store
            .update_chunk(
                chunks[0].id,
                &ChunkPatch {
                    status: Some(ChunkStatus::Monitoring),
                    destination_import_id: Some(Some("X".into())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Retried and picked up by a new run before the recheck lands
        store.update_chunk(stale.id, &ChunkPatch::reset()).await.unwrap();
        store
            .update_chunk(stale.id, &ChunkPatch::status(ChunkStatus::Processing))
            .await
            .unwrap();

        assert_eq!(processor.recheck(&stale).await.unwrap(), None);
        let chunk = store.get_chunk(stale.id).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Processing);
        assert_eq!(chunk.success_count, 0);
    }
}
