//! In-memory download jobs.
//!
//! Each job owns its own progress record, keyed by a `download-{n}` id. Jobs
//! are never persisted; restarting the server forgets them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::extractor::{DownloadRequest, MediaExtractor, ProgressSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Downloading,
    Finished,
    Failed,
}

#[derive(Clone, Debug)]
struct DownloadJob {
    id: String,
    status: JobStatus,
    progress: u8,
    file: Option<PathBuf>,
    message: String,
    started_at: DateTime<Utc>,
}

/// What `/progress/{id}` returns. Only the file name leaves the server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub filename: Option<String>,
    pub message: String,
    pub started_at: DateTime<Utc>,
}

impl From<&DownloadJob> for JobSnapshot {
    fn from(job: &DownloadJob) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            filename: job
                .file
                .as_deref()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned()),
            message: job.message.clone(),
            started_at: job.started_at,
        }
    }
}

/// Handle returned by [`DownloadManager::start`].
pub struct StartedJob {
    pub id: String,
    pub task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<DownloadManagerInner>,
}

struct DownloadManagerInner {
    jobs: Mutex<HashMap<String, DownloadJob>>,
    counter: AtomicUsize,
    extractor: Arc<dyn MediaExtractor>,
}

/// Progress sink bound to a single job.
struct JobProgress {
    inner: Arc<DownloadManagerInner>,
    job_id: String,
}

impl ProgressSink for JobProgress {
    fn report(&self, percent: u8) {
        if let Some(job) = self.inner.jobs.lock().get_mut(&self.job_id) {
            // The last few percent can arrive after a failure was recorded.
            if job.status == JobStatus::Starting || job.status == JobStatus::Downloading {
                job.status = JobStatus::Downloading;
                job.progress = percent.min(100);
                job.message = format!("Downloading {}%", job.progress);
            }
        }
    }
}

impl DownloadManager {
    pub fn new(extractor: Arc<dyn MediaExtractor>) -> Self {
        Self {
            inner: Arc::new(DownloadManagerInner {
                jobs: Mutex::new(HashMap::new()),
                counter: AtomicUsize::new(1),
                extractor,
            }),
        }
    }

    /// Registers a job and runs the download on the blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: DownloadRequest) -> StartedJob {
        let job_id = self.next_job_id();
        self.inner.jobs.lock().insert(
            job_id.clone(),
            DownloadJob {
                id: job_id.clone(),
                status: JobStatus::Starting,
                progress: 0,
                file: None,
                message: "Starting".to_string(),
                started_at: Utc::now(),
            },
        );
        log::info!("{job_id}: downloading {} as {:?}", request.url, request.target);

        let inner = self.inner.clone();
        let job_id_clone = job_id.clone();
        let task = tokio::spawn(async move {
            let sink = JobProgress {
                inner: inner.clone(),
                job_id: job_id_clone.clone(),
            };
            let extractor = inner.extractor.clone();
            let outcome =
                tokio::task::spawn_blocking(move || extractor.download(&request, &sink)).await;

            match outcome {
                Ok(Ok(path)) => {
                    log::info!("{job_id_clone}: finished {}", path.display());
                    finish_job(&inner, &job_id_clone, path);
                }
                Ok(Err(err)) => {
                    log::warn!("{job_id_clone}: download failed: {err:#}");
                    fail_job(&inner, &job_id_clone, &format!("{err:#}"));
                }
                Err(err) => {
                    log::error!("{job_id_clone}: download task aborted: {err}");
                    fail_job(&inner, &job_id_clone, &err.to_string());
                }
            }
        });

        StartedJob { id: job_id, task }
    }

    pub fn status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.inner.jobs.lock().get(job_id).map(JobSnapshot::from)
    }

    /// Path of a finished job's file, `None` for unknown or unfinished jobs.
    pub fn finished_file(&self, job_id: &str) -> Option<PathBuf> {
        let jobs = self.inner.jobs.lock();
        let job = jobs.get(job_id)?;
        if job.status != JobStatus::Finished {
            return None;
        }
        job.file.clone()
    }

    fn next_job_id(&self) -> String {
        let id = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        format!("download-{id}")
    }
}

fn finish_job(inner: &DownloadManagerInner, job_id: &str, path: PathBuf) {
    if let Some(job) = inner.jobs.lock().get_mut(job_id) {
        job.status = JobStatus::Finished;
        job.progress = 100;
        job.file = Some(path);
        job.message = "Done".to_string();
    }
}

fn fail_job(inner: &DownloadManagerInner, job_id: &str, reason: &str) {
    if let Some(job) = inner.jobs.lock().get_mut(job_id) {
        job.status = JobStatus::Failed;
        job.message = format!("Failed: {reason}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::DownloadTarget;
    use crate::formats::MediaInfo;
    use anyhow::{Result, bail};
    use std::sync::mpsc;

    /// Reports a fixed sequence of percentages, then returns `outcome`.
    struct ScriptedExtractor {
        steps: Vec<u8>,
        outcome: Option<PathBuf>,
    }

    impl MediaExtractor for ScriptedExtractor {
        fn probe(&self, _url: &str) -> Result<MediaInfo> {
            Ok(MediaInfo::default())
        }

        fn download(&self, _request: &DownloadRequest, progress: &dyn ProgressSink) -> Result<PathBuf> {
            for step in &self.steps {
                progress.report(*step);
            }
            match &self.outcome {
                Some(path) => Ok(path.clone()),
                None => bail!("ERROR: video unavailable"),
            }
        }
    }

    /// Blocks inside `download` until the test lets it continue.
    struct GatedExtractor {
        gate: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl MediaExtractor for GatedExtractor {
        fn probe(&self, _url: &str) -> Result<MediaInfo> {
            Ok(MediaInfo::default())
        }

        fn download(&self, _request: &DownloadRequest, progress: &dyn ProgressSink) -> Result<PathBuf> {
            progress.report(40);
            if let Some(gate) = self.gate.lock().take() {
                let _ = gate.recv();
            }
            Ok(PathBuf::from("/srv/downloads/Gated.mp4"))
        }
    }

    fn request() -> DownloadRequest {
        DownloadRequest {
            url: "https://example.com/watch?v=abc".into(),
            target: DownloadTarget::Format("22".into()),
        }
    }

    #[tokio::test]
    async fn finished_job_exposes_file_name_only() {
        let manager = DownloadManager::new(Arc::new(ScriptedExtractor {
            steps: vec![10, 55, 100],
            outcome: Some(PathBuf::from("/srv/downloads/Sample Clip.mp4")),
        }));
        let job = manager.start(request());
        job.task.await.unwrap();

        let snapshot = manager.status(&job.id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Finished);
        assert_eq!(snapshot.progress, 100);
        assert_eq!(snapshot.filename.as_deref(), Some("Sample Clip.mp4"));
        assert_eq!(snapshot.message, "Done");
        assert_eq!(
            manager.finished_file(&job.id),
            Some(PathBuf::from("/srv/downloads/Sample Clip.mp4"))
        );

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "finished");
        assert!(json.get("startedAt").is_some());
        assert!(!json.to_string().contains("/srv/downloads"));
    }

    #[tokio::test]
    async fn failed_job_records_reason() {
        let manager = DownloadManager::new(Arc::new(ScriptedExtractor {
            steps: vec![12],
            outcome: None,
        }));
        let job = manager.start(request());
        job.task.await.unwrap();

        let snapshot = manager.status(&job.id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.progress, 12);
        assert_eq!(snapshot.message, "Failed: ERROR: video unavailable");
        assert_eq!(snapshot.filename, None);
        assert_eq!(manager.finished_file(&job.id), None);
    }

    #[tokio::test]
    async fn job_reports_progress_while_running() {
        let (release, gate) = mpsc::channel();
        let manager = DownloadManager::new(Arc::new(GatedExtractor {
            gate: Mutex::new(Some(gate)),
        }));
        let job = manager.start(request());

        let observed = tokio::task::spawn_blocking({
            let manager = manager.clone();
            let id = job.id.clone();
            move || loop {
                let snapshot = manager.status(&id).unwrap();
                if snapshot.status == JobStatus::Downloading {
                    return snapshot;
                }
                std::thread::yield_now();
            }
        })
        .await
        .unwrap();
        assert_eq!(observed.progress, 40);
        assert_eq!(manager.finished_file(&job.id), None);

        release.send(()).unwrap();
        job.task.await.unwrap();
        assert_eq!(manager.status(&job.id).unwrap().status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn job_ids_are_sequential_and_independent() {
        let manager = DownloadManager::new(Arc::new(ScriptedExtractor {
            steps: vec![],
            outcome: Some(PathBuf::from("/tmp/a.mp4")),
        }));
        let first = manager.start(request());
        let second = manager.start(request());
        assert_eq!(first.id, "download-1");
        assert_eq!(second.id, "download-2");
        first.task.await.unwrap();
        second.task.await.unwrap();
        assert!(manager.status("download-3").is_none());
        assert!(manager.finished_file("download-3").is_none());
    }

    #[test]
    fn progress_after_failure_is_ignored() {
        let manager = DownloadManager::new(Arc::new(ScriptedExtractor {
            steps: vec![],
            outcome: None,
        }));
        manager.inner.jobs.lock().insert(
            "download-9".into(),
            DownloadJob {
                id: "download-9".into(),
                status: JobStatus::Failed,
                progress: 30,
                file: None,
                message: "Failed: boom".into(),
                started_at: Utc::now(),
            },
        );
        let sink = JobProgress {
            inner: manager.inner.clone(),
            job_id: "download-9".into(),
        };
        sink.report(80);
        let snapshot = manager.status("download-9").unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.progress, 30);
    }
}
