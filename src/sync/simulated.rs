//! In-process stand-ins for the source and the destination.
//!
//! Used by the binary so the service runs end-to-end without third-party
//! accounts. Latency, rejected rows and import duration are randomized.

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};
use tracing::debug;
use uuid::Uuid;

use super::collaborators::{
    ArtifactHandle, ArtifactStager, Collaborators, DestinationDirectory, DestinationImporter,
    DestinationTarget, ImportStatus, RemoteImportState, SourceRecordProvider, SubmitReceipt,
};
use super::model::Record;
use crate::error::SyncError;

/// Builds a full set of simulated collaborators sharing one list directory.
pub fn collaborators(profiles_per_source: i64) -> Collaborators {
    let lists = Arc::new(RwLock::new(HashMap::new()));
    Collaborators {
        source: Arc::new(SimulatedSource::new(profiles_per_source)),
        stager: Arc::new(SimulatedStager),
        importer: Arc::new(SimulatedImporter::new(lists.clone())),
        directory: Arc::new(SimulatedDirectory { lists }),
    }
}

/// Collection kinds the simulated source knows how to read.
const SOURCE_TYPES: &[&str] = &["segment", "list", "audience"];

fn check_source_type(source_type: &str) -> Result<(), SyncError> {
    if SOURCE_TYPES.contains(&source_type) {
        Ok(())
    } else {
        Err(SyncError::Source(format!(
            "unsupported source type '{source_type}'"
        )))
    }
}

async fn jitter(min_ms: u64, max_ms: u64) {
    let delay = rand::thread_rng().gen_range(min_ms..=max_ms);
    sleep(Duration::from_millis(delay)).await;
}

/// Every collection holds the same number of generated profiles. Roughly one
/// in thirty has no phone number.
pub struct SimulatedSource {
    profiles: i64,
}

impl SimulatedSource {
    pub fn new(profiles: i64) -> Self {
        Self {
            profiles: profiles.max(0),
        }
    }
}

#[async_trait]
impl SourceRecordProvider for SimulatedSource {
    async fn fetch(
        &self,
        source_type: &str,
        source_id: &str,
        offset: i64,
        count: i64,
    ) -> Result<Vec<Record>, SyncError> {
        check_source_type(source_type)?;
        jitter(20, 120).await;

        let end = (offset + count.max(0)).min(self.profiles);
        let mut rng = rand::thread_rng();
        let records = (offset..end.max(offset))
            .map(|i| {
                let mut record = json!({
                    "id": format!("{source_id}-{i}"),
                    "first_name": format!("Profile{i}"),
                    "email": format!("profile{i}@example.com"),
                    "location": { "city": "Springfield" },
                });
                if rng.gen_range(0..30) != 0 {
                    record["phone"] = json!(format!("+1555{:07}", i % 10_000_000));
                }
                record.as_object().cloned().unwrap_or_default()
            })
            .collect::<Vec<Record>>();

        debug!(
            "Simulated {} {} returned {} records from offset {}",
            source_type,
            source_id,
            records.len(),
            offset
        );
        Ok(records)
    }

    async fn count(&self, source_type: &str, _source_id: &str) -> Result<Option<i64>, SyncError> {
        check_source_type(source_type)?;
        Ok(Some(self.profiles))
    }
}

/// Pretends to upload the artifact and hands back a URL.
pub struct SimulatedStager;

#[async_trait]
impl ArtifactStager for SimulatedStager {
    async fn stage(&self, records: &[Record]) -> Result<ArtifactHandle, SyncError> {
        if records.is_empty() {
            return Err(SyncError::Staging("no records to stage".into()));
        }
        jitter(10, 60).await;
        Ok(ArtifactHandle {
            url: format!("memory://artifacts/{}.csv", Uuid::new_v4()),
            records: records.len(),
        })
    }
}

struct SimulatedImport {
    total: i64,
    errors: i64,
    polls_needed: u32,
    polls: u32,
    list_id: String,
}

/// Accepts imports and completes each one after a random number of polls.
pub struct SimulatedImporter {
    imports: Mutex<HashMap<String, SimulatedImport>>,
    lists: Arc<RwLock<HashMap<String, String>>>,
}

impl SimulatedImporter {
    fn new(lists: Arc<RwLock<HashMap<String, String>>>) -> Self {
        Self {
            imports: Mutex::new(HashMap::new()),
            lists,
        }
    }
}

#[async_trait]
impl DestinationImporter for SimulatedImporter {
    async fn submit(
        &self,
        artifact: &ArtifactHandle,
        target: &DestinationTarget,
    ) -> Result<SubmitReceipt, SyncError> {
        let list_id = match target {
            DestinationTarget::Existing { list_id } => list_id.clone(),
            DestinationTarget::Create { name } => {
                let list_id = format!("list-{}", Uuid::new_v4().simple());
                self.lists.write().await.insert(list_id.clone(), name.clone());
                debug!("Simulated destination created list {} '{}'", list_id, name);
                list_id
            }
        };

        let total = artifact.records as i64;
        let (errors, polls_needed) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..=total / 50), rng.gen_range(1..=3))
        };
        let import_id = format!("imp-{}", Uuid::new_v4().simple());
        self.imports.lock().await.insert(
            import_id.clone(),
            SimulatedImport {
                total,
                errors,
                polls_needed,
                polls: 0,
                list_id,
            },
        );

        Ok(SubmitReceipt {
            import_id,
            list_id: None,
        })
    }

    async fn poll_status(&self, import_id: &str) -> Result<ImportStatus, SyncError> {
        let mut imports = self.imports.lock().await;
        let import = imports
            .get_mut(import_id)
            .ok_or_else(|| SyncError::Import(format!("unknown import {import_id}")))?;

        import.polls += 1;
        let complete = import.polls >= import.polls_needed;
        let processed = if complete {
            import.total
        } else {
            import.total * i64::from(import.polls) / i64::from(import.polls_needed)
        };

        Ok(ImportStatus {
            processed,
            total: import.total,
            errors: if complete { import.errors } else { 0 },
            complete,
            status: if complete {
                RemoteImportState::Complete
            } else {
                RemoteImportState::Processing
            },
            list_id: Some(import.list_id.clone()),
            detail: None,
        })
    }
}

/// Lists known to the simulated destination, including ones created by imports.
pub struct SimulatedDirectory {
    lists: Arc<RwLock<HashMap<String, String>>>,
}

#[async_trait]
impl DestinationDirectory for SimulatedDirectory {
    async fn resolve(&self, list_id: &str) -> Result<Option<String>, SyncError> {
        if list_id.chars().any(char::is_whitespace) {
            return Err(SyncError::Directory(format!("malformed list id '{list_id}'")));
        }
        Ok(self.lists.read().await.get(list_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_source_stops_at_collection_end() {
        let source = SimulatedSource::new(25);
        let records = source.fetch("segment", "s1", 20, 10).await.unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0]["id"], "s1-20");
        assert!(source.fetch("segment", "s1", 30, 10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_list_becomes_resolvable() {
        let c = collaborators(10);
        let records = c.source.fetch("segment", "s1", 0, 10).await.unwrap();
        let artifact = c.stager.stage(&records).await.unwrap();
        let receipt = c
            .importer
            .submit(&artifact, &DestinationTarget::Create { name: "New".into() })
            .await
            .unwrap();

        let mut status = c.importer.poll_status(&receipt.import_id).await.unwrap();
        while !status.is_success() {
            status = c.importer.poll_status(&receipt.import_id).await.unwrap();
        }
        assert_eq!(status.total, 10);
        assert!(status.errors <= status.total);

        let list_id = status.list_id.unwrap();
        assert_eq!(c.directory.resolve(&list_id).await.unwrap().as_deref(), Some("New"));
    }

    #[tokio::test]
    async fn test_source_rejects_unknown_collection_kind() {
        let source = SimulatedSource::new(10);
        let err = source.fetch("spreadsheet", "s1", 0, 10).await.unwrap_err();
        assert!(matches!(&err, SyncError::Source(m) if m.contains("spreadsheet")));
        assert!(source.count("spreadsheet", "s1").await.is_err());
        assert_eq!(source.count("audience", "a1").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_directory_rejects_malformed_list_id() {
        let c = collaborators(0);
        let err = c.directory.resolve("list 42").await.unwrap_err();
        assert!(matches!(err, SyncError::Directory(_)));
        assert_eq!(c.directory.resolve("list-42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stager_refuses_empty_input() {
        assert!(SimulatedStager.stage(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_import_is_an_error() {
        let c = collaborators(0);
        assert!(c.importer.poll_status("nope").await.is_err());
    }
}
