use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use timeline::{MediaRef, SharedTimeline};
use uuid::Uuid;

use crate::pipeline::{validate, ExportPipeline};
use crate::{ExportArtifact, ExportConfig, ExportError, ExportServices};

/// What the UI observes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportStatus {
    pub is_exporting: bool,
    /// 0 to 100, never decreasing while one export runs.
    pub progress: f32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    Started { job: Uuid },
    Progress { job: Uuid, progress: f32 },
    Completed { job: Uuid, artifact: ExportArtifact },
    Failed { job: Option<Uuid>, error: String },
    Cancelled { job: Uuid },
}

#[derive(Default)]
struct Shared {
    status: ExportStatus,
    // Only the worker of the current job may write the status.
    job: Option<Uuid>,
    cancel: Option<Arc<AtomicBool>>,
    // Held while a request is validated, so a second caller cannot slip in before
    // `is_exporting` flips. Never visible in the status.
    reserved: bool,
}

impl Shared {
    fn busy(&self) -> bool { self.reserved || self.status.is_exporting }
}

type Subscribers = Arc<Mutex<Vec<Sender<ExportEvent>>>>;

fn emit(subscribers: &Subscribers, event: ExportEvent) {
    subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
}

/// Handle to one running export.
pub struct ExportHandle {
    job: Uuid,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<ExportArtifact, ExportError>>>,
}

impl ExportHandle {
    pub fn id(&self) -> Uuid { self.job }

    pub fn cancel(&self) { self.cancel.store(true, Ordering::SeqCst); }

    pub fn is_finished(&self) -> bool { self.thread.as_ref().map_or(true, JoinHandle::is_finished) }

    /// Blocks until the pipeline thread is done and returns its outcome.
    pub fn wait(mut self) -> Result<ExportArtifact, ExportError> {
        match self.thread.take() {
            Some(h) => h.join().unwrap_or(Err(ExportError::WorkerLost)),
            None => Err(ExportError::WorkerLost),
        }
    }
}

/// Owns the export lifecycle: precondition checks, the pipeline thread, status and events.
pub struct ExportController {
    timeline: SharedTimeline,
    services: ExportServices,
    config: ExportConfig,
    video: Mutex<Option<MediaRef>>,
    shared: Arc<Mutex<Shared>>,
    subscribers: Subscribers,
}

impl ExportController {
    pub fn new(timeline: SharedTimeline, services: ExportServices, config: ExportConfig) -> Self {
        Self {
            timeline,
            services,
            config,
            video: Mutex::new(None),
            shared: Arc::default(),
            subscribers: Arc::default(),
        }
    }

    /// Selects (or clears) the source video whose picture track gets exported.
    pub fn select_video(&self, video: Option<MediaRef>) { *self.video.lock() = video; }

    pub fn status(&self) -> ExportStatus { self.shared.lock().status.clone() }

    pub fn subscribe(&self) -> Receiver<ExportEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn export_video(&self) -> Result<ExportHandle, ExportError> {
        {
            let mut shared = self.shared.lock();
            if shared.busy() {
                return Err(ExportError::AlreadyRunning);
            }
            shared.reserved = true;
        }
        let request = {
            let video = self.video.lock();
            validate(&self.timeline.read(), video.as_ref())
        };
        let request = match request {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(error = %err, "export rejected");
                {
                    let mut shared = self.shared.lock();
                    shared.reserved = false;
                    shared.status.error = Some(err.to_string());
                }
                emit(&self.subscribers, ExportEvent::Failed { job: None, error: err.to_string() });
                return Err(err);
            }
        };

        let job = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut shared = self.shared.lock();
            shared.reserved = false;
            shared.status = ExportStatus { is_exporting: true, progress: 0.0, error: None };
            shared.job = Some(job);
            shared.cancel = Some(cancel.clone());
        }
        emit(&self.subscribers, ExportEvent::Started { job });

        let pipeline = ExportPipeline::new(self.timeline.clone(), self.services.clone(), self.config.clone());
        let shared = self.shared.clone();
        let subscribers = self.subscribers.clone();
        let flag = cancel.clone();
        let spawned = thread::Builder::new().name("export-pipeline".into()).spawn(move || {
            let mut on_progress = |p: f32| {
                {
                    let mut s = shared.lock();
                    if s.job != Some(job) || flag.load(Ordering::SeqCst) { return; }
                    s.status.progress = p;
                }
                emit(&subscribers, ExportEvent::Progress { job, progress: p });
            };
            let result = pipeline.run(request, &flag, &mut on_progress);
            finish_job(&shared, &subscribers, job, &result);
            result
        });
        let thread = match spawned {
            Ok(h) => h,
            Err(e) => {
                let err = ExportError::Io(e);
                let mut s = self.shared.lock();
                s.status = ExportStatus { is_exporting: false, progress: 0.0, error: Some(err.to_string()) };
                s.job = None;
                s.cancel = None;
                return Err(err);
            }
        };
        Ok(ExportHandle { job, cancel, thread: Some(thread) })
    }

    /// Requests cancellation. The status flips right away; the worker releases its resources
    /// on its own and delivers nothing.
    pub fn cancel_export(&self) {
        let mut shared = self.shared.lock();
        let Some(cancel) = shared.cancel.take() else { return };
        cancel.store(true, Ordering::SeqCst);
        shared.status = ExportStatus { is_exporting: false, progress: 0.0, error: None };
        tracing::info!(job = ?shared.job, "export cancellation requested");
    }
}

/// Publishes the outcome of a job. The status is only written while `job` is still the current
/// one; the terminal event always goes out.
fn finish_job(shared: &Mutex<Shared>, subscribers: &Subscribers, job: Uuid, result: &Result<ExportArtifact, ExportError>) {
    {
        let mut s = shared.lock();
        if s.job == Some(job) {
            s.job = None;
            s.cancel = None;
            s.status = match result {
                Ok(_) => ExportStatus { is_exporting: false, progress: 100.0, error: None },
                Err(ExportError::Cancelled) => ExportStatus { is_exporting: false, progress: 0.0, error: None },
                Err(err) => ExportStatus { is_exporting: false, progress: 0.0, error: Some(err.to_string()) },
            };
        } else {
            tracing::debug!(%job, "superseded export finished");
        }
    }
    let event = match result {
        Ok(artifact) => ExportEvent::Completed { job, artifact: artifact.clone() },
        Err(ExportError::Cancelled) => ExportEvent::Cancelled { job },
        Err(err) => {
            tracing::error!(%job, error = %err, "export failed");
            ExportEvent::Failed { job: Some(job), error: err.to_string() }
        }
    };
    emit(subscribers, event);
}
