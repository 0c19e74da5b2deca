//! Builders and fake collaborators shared by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::collaborators::{
    ArtifactHandle, ArtifactStager, Collaborators, DestinationDirectory, DestinationImporter,
    DestinationTarget, ImportStatus, RemoteImportState, SourceRecordProvider, SubmitReceipt,
};
use super::model::{Chunk, FieldMapping, Job, JobStatus, Record};
use super::planner::ChunkBounds;
use super::processor::PollSettings;
use crate::error::SyncError;

pub fn job() -> Job {
    Job {
        id: Uuid::new_v4(),
        status: JobStatus::Pending,
        source_type: "segment".into(),
        source_id: "seg-1".into(),
        source_name: Some("Spring Promo".into()),
        destination_id: None,
        destination_name: None,
        field_mappings: vec![
            FieldMapping::new("phone_number", "phone"),
            FieldMapping::new("first_name", "first_name"),
        ],
        total_chunks: 0,
        completed_chunks: 0,
        failed_chunks: 0,
        total_profiles: 0,
        profiles_known: false,
        processed_profiles: 0,
        success_profiles: 0,
        error_profiles: 0,
        skipped_profiles: 0,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        error_message: None,
    }
}

pub fn chunk(job_id: Uuid, index: i32, start: i64, end: i64) -> Chunk {
    ChunkBounds {
        index,
        start_offset: start,
        end_offset: end,
        profiles_count: end - start,
    }
    .into_chunk(job_id)
}

pub fn status(processed: i64, total: i64, errors: i64, complete: bool) -> ImportStatus {
    ImportStatus {
        processed,
        total,
        errors,
        complete,
        status: if complete {
            RemoteImportState::Complete
        } else {
            RemoteImportState::Processing
        },
        list_id: None,
        detail: None,
    }
}

pub fn fast_poll() -> PollSettings {
    PollSettings {
        delay: Duration::from_millis(10),
        max_attempts: 5,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

/// Serves `total` synthetic profiles.
pub struct FakeSource {
    total: i64,
    count_known: AtomicBool,
    contacts: AtomicBool,
    fetches: AtomicUsize,
    fail_at: Mutex<HashSet<i64>>,
}

impl FakeSource {
    pub fn without_contacts(&self) {
        self.contacts.store(false, Ordering::SeqCst);
    }

    pub fn hide_count(&self) {
        self.count_known.store(false, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// The next fetch starting at `offset` fails; later ones succeed.
    pub fn fail_fetch_once_at(&self, offset: i64) {
        self.fail_at.lock().unwrap().insert(offset);
    }
}

#[async_trait]
impl SourceRecordProvider for FakeSource {
    async fn fetch(
        &self,
        _source_type: &str,
        _source_id: &str,
        offset: i64,
        count: i64,
    ) -> Result<Vec<Record>, SyncError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_at.lock().unwrap().remove(&offset) {
            return Err(SyncError::Source(format!("connection reset at offset {offset}")));
        }
        let end = (offset + count).min(self.total);
        let contacts = self.contacts.load(Ordering::SeqCst);
        Ok((offset..end.max(offset))
            .map(|i| {
                let mut record = json!({ "first_name": format!("P{i}") });
                if contacts {
                    record["phone"] = json!(format!("+1555{i:07}"));
                }
                record.as_object().cloned().unwrap_or_default()
            })
            .collect())
    }

    async fn count(&self, _source_type: &str, _source_id: &str) -> Result<Option<i64>, SyncError> {
        Ok(self
            .count_known
            .load(Ordering::SeqCst)
            .then_some(self.total))
    }
}

/// Stages in memory; can be told to fail on specific call numbers (1-based).
#[derive(Default)]
pub struct FakeStager {
    calls: AtomicUsize,
    fail_on: Mutex<HashSet<usize>>,
}

impl FakeStager {
    pub fn fail_on_call(&self, call: usize) {
        self.fail_on.lock().unwrap().insert(call);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStager for FakeStager {
    async fn stage(&self, records: &[Record]) -> Result<ArtifactHandle, SyncError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if records.is_empty() {
            return Err(SyncError::Staging("refusing to stage zero records".into()));
        }
        if self.fail_on.lock().unwrap().contains(&call) {
            return Err(SyncError::Staging("network unreachable".into()));
        }
        Ok(ArtifactHandle {
            url: format!("https://files.test/artifact-{call}.csv"),
            records: records.len(),
        })
    }
}

#[derive(Default)]
struct ImporterState {
    script: Vec<ImportStatus>,
    submissions: Vec<DestinationTarget>,
    records: HashMap<String, usize>,
    poll_counts: HashMap<String, usize>,
    polls: usize,
    failing_polls: usize,
    list_on_poll: Option<String>,
}

/// Replays a scripted sequence of statuses for every import it accepts.
///
/// With no script each import completes on the first poll without errors.
/// Import ids are `X`, `X-2`, `X-3`, ...
#[derive(Default)]
pub struct FakeImporter {
    state: Mutex<ImporterState>,
}

impl FakeImporter {
    pub fn script(&self, statuses: Vec<ImportStatus>) {
        self.state.lock().unwrap().script = statuses;
    }

    pub fn assign_list_on_poll(&self, list_id: &str) {
        self.state.lock().unwrap().list_on_poll = Some(list_id.to_string());
    }

    /// The next `n` polls, of any import, return an error.
    pub fn fail_next_polls(&self, n: usize) {
        self.state.lock().unwrap().failing_polls = n;
    }

    pub fn submissions(&self) -> Vec<DestinationTarget> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }
}

#[async_trait]
impl DestinationImporter for FakeImporter {
    async fn submit(
        &self,
        artifact: &ArtifactHandle,
        target: &DestinationTarget,
    ) -> Result<SubmitReceipt, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.submissions.push(target.clone());
        let n = state.submissions.len();
        let import_id = if n == 1 { "X".to_string() } else { format!("X-{n}") };
        state.records.insert(import_id.clone(), artifact.records);
        let list_id = match target {
            DestinationTarget::Existing { list_id } => Some(list_id.clone()),
            DestinationTarget::Create { .. } => None,
        };
        Ok(SubmitReceipt { import_id, list_id })
    }

    async fn poll_status(&self, import_id: &str) -> Result<ImportStatus, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.polls += 1;
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(SyncError::Import("status endpoint timed out".into()));
        }
        let records = state.records.get(import_id).copied().unwrap_or(0) as i64;
        let attempt = {
            let counter = state.poll_counts.entry(import_id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let mut reply = if state.script.is_empty() {
            status(records, records, 0, true)
        } else {
            let idx = (attempt - 1).min(state.script.len() - 1);
            state.script[idx].clone()
        };
        if reply.list_id.is_none() {
            reply.list_id = state.list_on_poll.clone();
        }
        Ok(reply)
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    lists: HashMap<String, String>,
}

impl FakeDirectory {
    pub fn with_lists(lists: &[(&str, &str)]) -> Self {
        Self {
            lists: lists
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl DestinationDirectory for FakeDirectory {
    async fn resolve(&self, list_id: &str) -> Result<Option<String>, SyncError> {
        Ok(self.lists.get(list_id).cloned())
    }
}

/// One set of fakes plus handles to inspect them after a run.
pub struct Fakes {
    pub source: Arc<FakeSource>,
    pub stager: Arc<FakeStager>,
    pub importer: Arc<FakeImporter>,
    pub directory: Arc<FakeDirectory>,
}

impl Fakes {
    pub fn new(total_records: i64) -> Self {
        Self::with_directory(total_records, FakeDirectory::default())
    }

    pub fn with_directory(total_records: i64, directory: FakeDirectory) -> Self {
        Self {
            source: Arc::new(FakeSource {
                total: total_records,
                count_known: AtomicBool::new(true),
                contacts: AtomicBool::new(true),
                fetches: AtomicUsize::new(0),
                fail_at: Mutex::new(HashSet::new()),
            }),
            stager: Arc::new(FakeStager::default()),
            importer: Arc::new(FakeImporter::default()),
            directory: Arc::new(directory),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            source: self.source.clone(),
            stager: self.stager.clone(),
            importer: self.importer.clone(),
            directory: self.directory.clone(),
        }
    }
}
