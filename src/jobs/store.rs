//! Durable storage of analysis jobs.
//!
//! One record per job identity. Writes overwrite by key; there are no
//! cross-job transactions.

use crate::error::{CasaError, CasaResult};
use crate::models::AnalysisJob;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Key-value store for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or overwrite the record of `job.id`.
    async fn put(&self, job: &AnalysisJob) -> CasaResult<()>;

    async fn get(&self, id: &str) -> CasaResult<Option<AnalysisJob>>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, id: &str) -> CasaResult<bool>;

    async fn list(&self) -> CasaResult<Vec<AnalysisJob>>;
}

/// Stores each job as `<id>.json` in a directory.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> CasaResult<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CasaError::NotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn put(&self, job: &AnalysisJob) -> CasaResult<()> {
        let path = self.record_path(&job.id)?;
        let persistence = |e: std::io::Error| {
            CasaError::Persistence(format!("failed to write {}: {}", path.display(), e))
        };

        let content = serde_json::to_vec_pretty(job)
            .map_err(|e| CasaError::Persistence(format!("failed to serialize {}: {}", job.id, e)))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(persistence)?;

        // Write then rename so a reader never sees a half-written record.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &content).await.map_err(persistence)?;
        tokio::fs::rename(&tmp, &path).await.map_err(persistence)?;

        debug!("Saved analysis {} to {}", job.id, path.display());
        Ok(())
    }

    async fn get(&self, id: &str) -> CasaResult<Option<AnalysisJob>> {
        let path = match self.record_path(id) {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &str) -> CasaResult<bool> {
        let path = match self.record_path(id) {
            Ok(path) => path,
            Err(_) => return Ok(false),
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> CasaResult<Vec<AnalysisJob>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<AnalysisJob>(&bytes).map_err(CasaError::from),
                Err(e) => Err(CasaError::from(e)),
            };
            match parsed {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }

        Ok(jobs)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisType, JobStatus};
    use tokio_test::assert_ok;

    fn job(id: &str) -> AnalysisJob {
        let mut job = AnalysisJob::new(
            id.to_string(),
            "sample.json".to_string(),
            PathBuf::from("sample.json"),
            AnalysisType::Video,
        );
        job.status = JobStatus::Completed;
        job
    }

    #[tokio::test]
    async fn test_file_store_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path().join("results"));

        let original = job("a1");
        assert_ok!(store.put(&original).await);
        let loaded = store.get("a1").await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(dir.path().join("results/a1.json").exists());
        assert!(!dir.path().join("results/a1.json.tmp").exists());

        assert!(store.delete("a1").await.unwrap());
        assert!(!store.delete("a1").await.unwrap());
        assert!(store.get("a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_list_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());

        store.put(&job("one")).await.unwrap();
        store.put(&job("two")).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        let mut ids: Vec<String> = store.list().await.unwrap().into_iter().map(|j| j.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_missing_dir_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path());

        let mut bad = job("x");
        bad.id = "../escape".to_string();
        assert!(store.put(&bad).await.is_err());
        assert!(store.get("../escape").await.unwrap().is_none());
        assert!(!store.delete("../escape").await.unwrap());
    }
}
