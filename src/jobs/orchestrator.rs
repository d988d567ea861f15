//! Lifecycle of analysis jobs.
//!
//! The orchestrator owns the in-memory job table, runs each job's pipeline
//! on a background task, and mirrors terminal states to a [`JobStore`].
//!
//! Lock order is always table, then job entry, then cache. No lock is held
//! across an `.await`.

use super::pipeline::{self, AnalysisSettings};
use super::store::JobStore;
use crate::error::{CasaError, CasaResult};
use crate::models::{
    AnalysisJob, AnalysisResult, AnalysisType, FailureKind, JobFailure, JobStatus, JobStatusView,
    JobSummary,
};
use crate::tracking::TrackingSource;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct JobEntry {
    job: AnalysisJob,
    updates: watch::Sender<JobStatusView>,
    started: Instant,
    /// Set once a terminal transition has been claimed.
    finalizing: bool,
}

impl JobEntry {
    fn publish(&self) {
        self.updates.send_replace(self.job.status_view());
    }
}

type JobCell = Arc<Mutex<JobEntry>>;

struct Inner {
    store: Arc<dyn JobStore>,
    source: Arc<dyn TrackingSource>,
    settings: AnalysisSettings,
    jobs: RwLock<HashMap<String, JobCell>>,
    /// Shared snapshots of terminal jobs, handed to readers without cloning
    /// the result. The entry keeps its own copy for transition checks and
    /// persistence retries.
    cache: RwLock<HashMap<String, Arc<AnalysisJob>>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    permits: Arc<Semaphore>,
}

/// Handle returned by [`Orchestrator::submit`].
#[derive(Debug)]
pub struct Submission {
    id: String,
    updates: watch::Receiver<JobStatusView>,
}

impl Submission {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A fresh receiver of status updates for this job.
    pub fn subscribe(&self) -> watch::Receiver<JobStatusView> {
        self.updates.clone()
    }

    /// Wait until the job reaches a terminal state.
    ///
    /// If the job is deleted first, the last observed status is returned.
    pub async fn wait(mut self) -> JobStatusView {
        loop {
            let current = self.updates.borrow_and_update().clone();
            if current.status.is_terminal() {
                return current;
            }
            if self.updates.changed().await.is_err() {
                return self.updates.borrow().clone();
            }
        }
    }
}

/// Runs and tracks analysis jobs. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn failure_kind(error: &CasaError) -> FailureKind {
    match error {
        CasaError::Upstream(_) => FailureKind::Upstream,
        CasaError::Persistence(_) => FailureKind::Persistence,
        _ => FailureKind::Internal,
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        source: Arc<dyn TrackingSource>,
        settings: AnalysisSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                settings,
                jobs: RwLock::new(HashMap::new()),
                cache: RwLock::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
                permits,
            }),
        }
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.inner.settings
    }

    /// Create a job for `input_path` and start processing it in the background.
    ///
    /// The job is already `processing` when this returns. Must be called from
    /// within a Tokio runtime.
    pub fn submit(
        &self,
        input_path: PathBuf,
        analysis_type: AnalysisType,
        filename: Option<String>,
    ) -> Submission {
        let id = uuid::Uuid::new_v4().to_string();
        let filename = filename.unwrap_or_else(|| {
            input_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| input_path.display().to_string())
        });

        let mut job = AnalysisJob::new(id.clone(), filename, input_path, analysis_type);
        job.status = JobStatus::Processing;
        job.message = "Initializing analysis...".to_string();

        let (updates, receiver) = watch::channel(job.status_view());
        let entry = JobEntry {
            job,
            updates,
            started: Instant::now(),
            finalizing: false,
        };
        write(&self.inner.jobs).insert(id.clone(), Arc::new(Mutex::new(entry)));
        info!("Submitted {} analysis {}", analysis_type, id);

        // Hold the task map while spawning so the task cannot remove its
        // handle before it has been inserted.
        {
            let mut tasks = lock(&self.inner.tasks);
            let handle = tokio::spawn(self.clone().run_job(id.clone()));
            tasks.insert(id.clone(), handle);
        }

        Submission {
            id,
            updates: receiver,
        }
    }

    async fn run_job(self, id: String) {
        match self.inner.permits.clone().acquire_owned().await {
            Ok(_permit) => self.process(&id).await,
            Err(e) => error!("Worker pool closed: {}", e),
        }
        lock(&self.inner.tasks).remove(&id);
    }

    async fn process(&self, id: &str) {
        let (input, analysis_type) = match self.cell(id) {
            Ok(cell) => {
                let entry = lock(&cell);
                (entry.job.input_path.clone(), entry.job.analysis_type)
            }
            Err(_) => {
                debug!("Analysis {} was deleted before it started", id);
                return;
            }
        };

        let outcome = pipeline::run_analysis(
            self.inner.source.as_ref(),
            &self.inner.settings,
            &input,
            analysis_type,
            |pct, msg| self.advance_progress(id, pct, msg),
        )
        .await;

        let finished = match outcome {
            Ok(result) => self.complete(id, result).await,
            Err(CasaError::NotFound(_)) => {
                debug!("Analysis {} was deleted while running", id);
                Ok(())
            }
            Err(e) => {
                warn!("Analysis {} failed: {}", id, e);
                let failure = JobFailure {
                    kind: failure_kind(&e),
                    message: format!("Analysis failed: {}", e),
                };
                self.fail(id, failure).await
            }
        };
        if let Err(e) = finished {
            debug!("Analysis {} ended without a terminal write: {}", id, e);
        }
    }

    fn cell(&self, id: &str) -> CasaResult<JobCell> {
        read(&self.inner.jobs)
            .get(id)
            .cloned()
            .ok_or_else(|| CasaError::NotFound(id.to_string()))
    }

    /// Record progress of a running job.
    ///
    /// `percent` is clamped to 0..=100 and never lowers the stored progress.
    pub fn advance_progress(&self, id: &str, percent: f64, message: &str) -> CasaResult<()> {
        let cell = self.cell(id)?;
        let mut entry = lock(&cell);
        if entry.job.status.is_terminal() || entry.finalizing {
            return Err(CasaError::JobTerminal(id.to_string()));
        }

        if percent.is_finite() {
            entry.job.progress = entry.job.progress.max(percent.clamp(0.0, 100.0));
        }
        entry.job.message = message.to_string();
        entry.publish();

        debug!("Analysis {}: {:.0}% {}", id, entry.job.progress, message);
        Ok(())
    }

    /// Claim the terminal transition of a job and build its final snapshot.
    fn begin_terminal(
        &self,
        id: &str,
        finish: impl FnOnce(&mut AnalysisJob),
    ) -> CasaResult<AnalysisJob> {
        let cell = self.cell(id)?;
        let mut entry = lock(&cell);
        if entry.job.status.is_terminal() || entry.finalizing {
            return Err(CasaError::JobTerminal(id.to_string()));
        }
        entry.finalizing = true;

        let mut snapshot = entry.job.clone();
        snapshot.completed_at = Some(Utc::now());
        snapshot.processing_time = Some(entry.started.elapsed().as_secs_f64());
        finish(&mut snapshot);
        Ok(snapshot)
    }

    /// Write a terminal snapshot to the store and report the outcome on it.
    async fn persist(&self, snapshot: &mut AnalysisJob) {
        snapshot.persisted = true;
        snapshot.persistence_error = None;
        if let Err(e) = self.inner.store.put(snapshot).await {
            error!("Failed to persist analysis {}: {}", snapshot.id, e);
            snapshot.persisted = false;
            snapshot.persistence_error = Some(e.to_string());
        }
    }

    /// Make a terminal snapshot visible to readers.
    ///
    /// If the job was deleted while the snapshot was being written, the
    /// stored record is removed again instead.
    async fn commit(&self, snapshot: AnalysisJob) -> CasaResult<()> {
        let id = snapshot.id.clone();
        let mut committed = false;
        {
            let jobs = read(&self.inner.jobs);
            if let Some(cell) = jobs.get(&id) {
                let mut entry = lock(cell);
                entry.job = snapshot.clone();
                entry.publish();
                write(&self.inner.cache).insert(id.clone(), Arc::new(snapshot));
                committed = true;
            }
        }

        if committed {
            Ok(())
        } else {
            debug!("Analysis {} was deleted during its final write", id);
            if let Err(e) = self.inner.store.delete(&id).await {
                warn!("Failed to remove record of deleted analysis {}: {}", id, e);
            }
            Err(CasaError::NotFound(id))
        }
    }

    /// Mark a job completed with `result`.
    ///
    /// The record is written to the store before the new state becomes
    /// visible. A failed write still completes the job, flagged as not
    /// persisted.
    pub async fn complete(&self, id: &str, result: AnalysisResult) -> CasaResult<()> {
        let mut snapshot = self.begin_terminal(id, |job| {
            job.status = JobStatus::Completed;
            job.progress = 100.0;
            job.message = "Analysis completed successfully".to_string();
            job.result = Some(result);
            job.error = None;
        })?;

        self.persist(&mut snapshot).await;
        if let Some(e) = &snapshot.persistence_error {
            snapshot.message = format!("Analysis completed, but saving failed: {}", e);
        }

        let processing_time = snapshot.processing_time.unwrap_or_default();
        self.commit(snapshot).await?;
        info!("Analysis {} completed in {:.2}s", id, processing_time);
        Ok(())
    }

    /// Mark a job failed. No partial result is kept.
    pub async fn fail(&self, id: &str, failure: JobFailure) -> CasaResult<()> {
        let mut snapshot = self.begin_terminal(id, |job| {
            job.status = JobStatus::Failed;
            job.message = failure.message.clone();
            job.result = None;
            job.error = Some(failure);
        })?;

        self.persist(&mut snapshot).await;
        self.commit(snapshot).await?;
        info!("Analysis {} marked as failed", id);
        Ok(())
    }

    /// Retry the durable write of a terminal job whose write failed.
    pub async fn retry_persistence(&self, id: &str) -> CasaResult<()> {
        let mut snapshot = {
            let cell = self.cell(id)?;
            let entry = lock(&cell);
            if !entry.job.status.is_terminal() {
                return Err(CasaError::NotReady {
                    id: id.to_string(),
                    status: entry.job.status.to_string(),
                });
            }
            if entry.job.persisted {
                return Ok(());
            }
            entry.job.clone()
        };

        self.persist(&mut snapshot).await;
        if let Some(e) = snapshot.persistence_error.clone() {
            return Err(CasaError::Persistence(e));
        }
        if snapshot.status == JobStatus::Completed {
            snapshot.message = "Analysis completed successfully".to_string();
        }

        self.commit(snapshot).await?;
        info!("Analysis {} saved on retry", id);
        Ok(())
    }

    /// Full record of a job, from memory or from the store.
    pub async fn get_job(&self, id: &str) -> CasaResult<Arc<AnalysisJob>> {
        if let Some(job) = read(&self.inner.cache).get(id) {
            return Ok(Arc::clone(job));
        }
        if let Ok(cell) = self.cell(id) {
            return Ok(Arc::new(lock(&cell).job.clone()));
        }

        match self.inner.store.get(id).await? {
            Some(job) => Ok(Arc::new(job)),
            None => Err(CasaError::NotFound(id.to_string())),
        }
    }

    pub async fn get_status(&self, id: &str) -> CasaResult<JobStatusView> {
        if let Ok(cell) = self.cell(id) {
            return Ok(lock(&cell).job.status_view());
        }
        Ok(self.get_job(id).await?.status_view())
    }

    /// Result of a completed job.
    pub async fn get_result(&self, id: &str) -> CasaResult<AnalysisResult> {
        let job = self.get_job(id).await?;
        match (&job.status, &job.result) {
            (JobStatus::Completed, Some(result)) => Ok(result.clone()),
            (JobStatus::Completed, None) => Err(CasaError::Internal(format!(
                "analysis {} is completed but has no result",
                id
            ))),
            (status, _) => Err(CasaError::NotReady {
                id: id.to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Remove a job from memory and from the store.
    ///
    /// A running job is not interrupted; its eventual result is discarded.
    pub async fn delete(&self, id: &str) -> CasaResult<()> {
        let in_memory = {
            let mut jobs = write(&self.inner.jobs);
            let removed = jobs.remove(id).is_some();
            let cached = write(&self.inner.cache).remove(id).is_some();
            removed || cached
        };

        let on_disk = self.inner.store.delete(id).await?;
        if !in_memory && !on_disk {
            return Err(CasaError::NotFound(id.to_string()));
        }

        info!("Deleted analysis {}", id);
        Ok(())
    }

    /// All known jobs, newest first.
    pub async fn list(&self) -> CasaResult<Vec<JobSummary>> {
        let mut summaries: Vec<JobSummary> = Vec::new();
        {
            let jobs = read(&self.inner.jobs);
            for cell in jobs.values() {
                summaries.push(lock(cell).job.summary());
            }
        }
        let mut seen: HashSet<String> = summaries.iter().map(|s| s.id.clone()).collect();

        for job in self.inner.store.list().await? {
            if seen.insert(job.id.clone()) {
                summaries.push(job.summary());
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// Wait until a job reaches a terminal state and return its record.
    pub async fn wait(&self, id: &str) -> CasaResult<Arc<AnalysisJob>> {
        let receiver = match self.cell(id) {
            Ok(cell) => {
                let entry = lock(&cell);
                Some(entry.updates.subscribe())
            }
            Err(_) => None,
        };

        if let Some(updates) = receiver {
            Submission {
                id: id.to_string(),
                updates,
            }
            .wait()
            .await;
        }
        self.get_job(id).await
    }

    /// Wait for every background job started so far.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> =
            lock(&self.inner.tasks).drain().map(|(_, h)| h).collect();
        if handles.is_empty() {
            return;
        }

        debug!("Waiting for {} running analyses", handles.len());
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Analysis task panicked: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::memory::MemoryJobStore;
    use crate::jobs::store::FileJobStore;
    use crate::models::{CasaMetrics, Detection, ImageMetrics, SampleMetrics, VideoProperties};
    use crate::tracking::{ImageDetections, ImageProperties, VideoTracking};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tokio::sync::Notify;

    /// Serves a fixed sample; fails for inputs named `broken.json`.
    #[derive(Default)]
    struct StubSource {
        gate: Option<Arc<Notify>>,
        /// When set, only this input waits on the gate.
        held_input: Option<&'static str>,
    }

    impl StubSource {
        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                held_input: None,
            }
        }

        fn holding(input: &'static str, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                held_input: Some(input),
            }
        }
    }

    #[async_trait]
    impl TrackingSource for StubSource {
        async fn process_video(&self, input: &Path) -> CasaResult<VideoTracking> {
            if let Some(gate) = &self.gate {
                if self.held_input.map_or(true, |held| input.ends_with(held)) {
                    gate.notified().await;
                }
            }
            if input.ends_with("broken.json") {
                return Err(CasaError::Upstream("decoder crashed".to_string()));
            }

            let mut tracks = BTreeMap::new();
            for id in 0..3u64 {
                let step = 20.0 * (id + 1) as f64;
                tracks.insert(
                    id,
                    (0..8)
                        .map(|i| {
                            Detection::new(i as f64 * step, id as f64 * 10.0, i, i as f64 * 0.1)
                        })
                        .collect(),
                );
            }
            Ok(VideoTracking {
                video_properties: VideoProperties {
                    width: 640,
                    height: 480,
                    fps: 10.0,
                    total_frames: 8,
                    duration: 0.8,
                },
                frame_detections: vec![],
                tracks,
            })
        }

        async fn process_image(&self, _input: &Path) -> CasaResult<ImageDetections> {
            Ok(ImageDetections {
                image_properties: ImageProperties {
                    width: 100,
                    height: 100,
                },
                detections: vec![Detection::new(5.0, 5.0, 0, 0.0)],
            })
        }
    }

    fn orchestrator(store: Arc<dyn JobStore>, source: StubSource) -> Orchestrator {
        Orchestrator::new(store, Arc::new(source), AnalysisSettings::default())
    }

    fn sample_result() -> AnalysisResult {
        AnalysisResult {
            file_size: 42,
            casa_metrics: CasaMetrics::immotile_sample(3, 1.5),
            tracks: vec![],
            sample_metrics: SampleMetrics::Image(ImageMetrics {
                width: 10,
                height: 10,
                detection_regions: vec![],
            }),
            assessment: None,
        }
    }

    #[tokio::test]
    async fn test_status_is_processing_right_after_submit() {
        let orch = orchestrator(Arc::new(MemoryJobStore::new()), StubSource::default());
        let submission = orch.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);

        let status = orch.get_status(submission.id()).await.unwrap();
        assert_eq!(status.status, JobStatus::Processing);
        assert!((0.0..=10.0).contains(&status.progress));

        let done = submission.wait().await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100.0);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_completed_job_exposes_result() {
        let store = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(store.clone(), StubSource::default());
        let submission = orch.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);
        let id = submission.id().to_string();
        submission.wait().await;

        let result = orch.get_result(&id).await.unwrap();
        assert_eq!(result.casa_metrics.total_count, 3);
        assert_eq!(result.tracks.len(), 3);
        assert!(result.assessment.is_some());

        let job = orch.get_job(&id).await.unwrap();
        assert!(job.persisted);
        assert!(job.processing_time.is_some());
        assert_eq!(job.filename, "sample.json");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_result_not_ready_while_running() {
        let gate = Arc::new(Notify::new());
        let orch = orchestrator(
            Arc::new(MemoryJobStore::new()),
            StubSource::gated(gate.clone()),
        );
        let submission = orch.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);

        let err = orch.get_result(submission.id()).await.unwrap_err();
        assert!(matches!(err, CasaError::NotReady { .. }));

        gate.notify_one();
        assert_eq!(submission.wait().await.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let orch = orchestrator(Arc::new(MemoryJobStore::new()), StubSource::default());
        let submission = orch.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);
        let id = submission.id().to_string();
        submission.wait().await;

        orch.delete(&id).await.unwrap();
        assert!(matches!(orch.delete(&id).await, Err(CasaError::NotFound(_))));
        assert!(matches!(orch.get_status(&id).await, Err(CasaError::NotFound(_))));
        assert!(matches!(orch.get_result(&id).await, Err(CasaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_in_flight_job_is_not_resurrected() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MemoryJobStore::new());
        let orch = orchestrator(store.clone(), StubSource::gated(gate.clone()));
        let submission = orch.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);
        let id = submission.id().to_string();

        // Let the job start and block inside the tracking source.
        while orch.get_status(&id).await.unwrap().progress < 10.0 {
            tokio::task::yield_now().await;
        }

        orch.delete(&id).await.unwrap();
        gate.notify_one();
        orch.drain().await;

        assert!(matches!(orch.get_status(&id).await, Err(CasaError::NotFound(_))));
        assert_eq!(store.len(), 0);
        assert!(orch.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_during_final_write_removes_record() {
        let store = Arc::new(MemoryJobStore::new());
        let gate = store.hold_writes();
        let orch = orchestrator(store.clone(), StubSource::default());
        let submission = orch.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);
        let id = submission.id().to_string();

        // The terminal record is being written but is not visible yet.
        gate.entered.notified().await;
        let status = orch.get_status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::Processing);
        assert_eq!(status.progress, 90.0);

        orch.delete(&id).await.unwrap();
        gate.release.notify_one();
        orch.drain().await;

        assert!(matches!(orch.get_status(&id).await, Err(CasaError::NotFound(_))));
        assert!(matches!(orch.get_job(&id).await, Err(CasaError::NotFound(_))));
        assert_eq!(store.len(), 0);
        assert!(orch.list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_stay_independent() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MemoryJobStore::new());
        let orch = Orchestrator::new(
            store.clone(),
            Arc::new(StubSource::holding("held.json", gate.clone())),
            AnalysisSettings {
                concurrency: 8,
                ..AnalysisSettings::default()
            },
        );

        let held = orch.submit(PathBuf::from("held.json"), AnalysisType::Video, None);
        let held_id = held.id().to_string();

        let handles: Vec<_> = (0..7)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    orch.submit(
                        PathBuf::from(format!("sample-{}.json", i)),
                        AnalysisType::Video,
                        None,
                    )
                })
            })
            .collect();
        let submissions: Vec<Submission> = join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let ids: HashSet<String> = submissions.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids.len(), 7);
        assert!(!ids.contains(&held_id));

        for submission in submissions {
            let done = submission.wait().await;
            assert_eq!(done.status, JobStatus::Completed);
            assert_eq!(done.progress, 100.0);
        }
        assert_eq!(store.len(), 7);

        let status = orch.get_status(&held_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Processing);
        assert!(status.progress < 100.0);

        gate.notify_one();
        assert_eq!(held.wait().await.status, JobStatus::Completed);
        assert_eq!(orch.list().await.unwrap().len(), 8);
        assert_eq!(store.len(), 8);
    }

    #[tokio::test]
    async fn test_progress_is_clamped_and_non_decreasing() {
        let gate = Arc::new(Notify::new());
        let orch = orchestrator(
            Arc::new(MemoryJobStore::new()),
            StubSource::gated(gate.clone()),
        );
        let submission = orch.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);
        let id = submission.id().to_string();

        orch.advance_progress(&id, 50.0, "halfway").unwrap();
        orch.advance_progress(&id, 20.0, "backwards").unwrap();
        assert_eq!(orch.get_status(&id).await.unwrap().progress, 50.0);

        orch.advance_progress(&id, 250.0, "overflow").unwrap();
        assert_eq!(orch.get_status(&id).await.unwrap().progress, 100.0);

        orch.advance_progress(&id, f64::NAN, "nan").unwrap();
        assert_eq!(orch.get_status(&id).await.unwrap().progress, 100.0);

        gate.notify_one();
        submission.wait().await;
    }

    #[tokio::test]
    async fn test_observed_progress_never_decreases() {
        let orch = orchestrator(Arc::new(MemoryJobStore::new()), StubSource::default());
        let submission = orch.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);
        let mut updates = submission.subscribe();

        let mut last = updates.borrow_and_update().progress;
        loop {
            let view = updates.borrow_and_update().clone();
            assert!(view.progress >= last);
            last = view.progress;
            if view.status.is_terminal() || updates.changed().await.is_err() {
                break;
            }
        }
        assert_eq!(last, 100.0);
    }

    #[tokio::test]
    async fn test_terminal_jobs_reject_writes() {
        let orch = orchestrator(Arc::new(MemoryJobStore::new()), StubSource::default());
        let submission = orch.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);
        let id = submission.id().to_string();
        submission.wait().await;

        assert!(matches!(
            orch.advance_progress(&id, 10.0, "late"),
            Err(CasaError::JobTerminal(_))
        ));
        assert!(matches!(
            orch.complete(&id, sample_result()).await,
            Err(CasaError::JobTerminal(_))
        ));
        let failure = JobFailure {
            kind: FailureKind::Internal,
            message: "late".to_string(),
        };
        assert!(matches!(
            orch.fail(&id, failure).await,
            Err(CasaError::JobTerminal(_))
        ));
        assert_eq!(
            orch.get_status(&id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_fails_job_without_result() {
        let orch = orchestrator(Arc::new(MemoryJobStore::new()), StubSource::default());
        let submission = orch.submit(PathBuf::from("broken.json"), AnalysisType::Video, None);
        let id = submission.id().to_string();

        let done = submission.wait().await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.message.contains("decoder crashed"));

        let job = orch.get_job(&id).await.unwrap();
        assert!(job.result.is_none());
        assert_eq!(job.error.as_ref().map(|e| e.kind), Some(FailureKind::Upstream));
        assert!(matches!(
            orch.get_result(&id).await,
            Err(CasaError::NotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_flagged_and_retried() {
        let store = Arc::new(MemoryJobStore::new());
        store.set_fail_writes(true);
        let orch = orchestrator(store.clone(), StubSource::default());
        let submission = orch.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);
        let id = submission.id().to_string();

        assert_eq!(submission.wait().await.status, JobStatus::Completed);
        let job = orch.get_job(&id).await.unwrap();
        assert!(!job.persisted);
        assert!(job.persistence_error.is_some());
        assert_eq!(store.len(), 0);

        assert!(matches!(
            orch.retry_persistence(&id).await,
            Err(CasaError::Persistence(_))
        ));

        store.set_fail_writes(false);
        orch.retry_persistence(&id).await.unwrap();
        let job = orch.get_job(&id).await.unwrap();
        assert!(job.persisted);
        assert!(job.persistence_error.is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_results_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let first = orchestrator(
            Arc::new(FileJobStore::new(dir.path())),
            StubSource::default(),
        );
        let submission = first.submit(PathBuf::from("sample.json"), AnalysisType::Video, None);
        let id = submission.id().to_string();
        submission.wait().await;
        let before = first.get_result(&id).await.unwrap();

        let second = orchestrator(
            Arc::new(FileJobStore::new(dir.path())),
            StubSource::default(),
        );
        let status = second.get_status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        let after = second.get_result(&id).await.unwrap();
        assert_eq!(after.casa_metrics, before.casa_metrics);
        assert_eq!(after.tracks, before.tracks);
    }

    #[tokio::test]
    async fn test_list_merges_memory_and_store_newest_first() {
        let store = Arc::new(MemoryJobStore::new());
        let mut old = AnalysisJob::new(
            "stored-1".to_string(),
            "old.json".to_string(),
            PathBuf::from("old.json"),
            AnalysisType::Image,
        );
        old.created_at = Utc::now() - chrono::Duration::hours(1);
        old.status = JobStatus::Completed;
        store.put(&old).await.unwrap();

        let orch = orchestrator(store.clone(), StubSource::default());
        let submission = orch.submit(PathBuf::from("new.json"), AnalysisType::Video, None);
        let id = submission.id().to_string();
        submission.wait().await;

        let listing = orch.list().await.unwrap();
        let ids: Vec<&str> = listing.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![id.as_str(), "stored-1"]);
    }

    #[tokio::test]
    async fn test_image_job_and_wait_by_id() {
        let orch = orchestrator(Arc::new(MemoryJobStore::new()), StubSource::default());
        let submission = orch.submit(
            PathBuf::from("slide.json"),
            AnalysisType::Image,
            Some("Slide 4".to_string()),
        );
        let id = submission.id().to_string();

        let job = orch.wait(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.filename, "Slide 4");
        let result = job.result.as_ref().unwrap();
        assert_eq!(result.casa_metrics.immotile, 100.0);
        assert_eq!(result.casa_metrics.concentration, 100.0);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let orch = orchestrator(Arc::new(MemoryJobStore::new()), StubSource::default());
        assert!(matches!(orch.get_status("nope").await, Err(CasaError::NotFound(_))));
        assert!(matches!(
            orch.advance_progress("nope", 5.0, "x"),
            Err(CasaError::NotFound(_))
        ));
        assert!(matches!(orch.delete("nope").await, Err(CasaError::NotFound(_))));
    }
}
