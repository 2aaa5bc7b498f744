use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::backend::{AnalysisBackend, FlightSummary};
use crate::classify::{classify, EndpointKind};
use crate::error::{UploadError, ValidationError};

/// Largest accepted log file (100 MiB).
pub const MAX_LOG_BYTES: u64 = 100 * 1024 * 1024;

pub const LOG_EXTENSION: &str = ".bin";

/// A file the operator picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl LogFile {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            name,
            path: path.to_path_buf(),
            size: meta.len(),
        })
    }
}

/// Check a selection before anything is sent.
pub fn validate(files: &[LogFile]) -> Result<&LogFile, ValidationError> {
    let file = match files {
        [] => return Err(ValidationError::NoFile),
        [file] => file,
        _ => return Err(ValidationError::MultipleFiles(files.len())),
    };

    if !file.name.ends_with(LOG_EXTENSION) {
        return Err(ValidationError::WrongExtension(file.name.clone()));
    }

    if file.size > MAX_LOG_BYTES {
        return Err(ValidationError::TooLarge {
            name: file.name.clone(),
            size: file.size,
            limit: MAX_LOG_BYTES,
        });
    }

    Ok(file)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStatus {
    #[default]
    Idle,
    Uploading,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub log_id: String,
    pub summary: FlightSummary,
}

/// Snapshot of the controller's current upload.
#[derive(Debug, Clone, PartialEq)]
pub struct LogUpload {
    pub file_name: String,
    pub status: UploadStatus,
    pub progress_percent: u8,
    pub result: Option<UploadResult>,
}

/// Where the transport reports bytes sent. Percent only ever increases.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Arc<watch::Sender<u8>>,
}

impl ProgressSink {
    pub(crate) fn new(tx: Arc<watch::Sender<u8>>) -> Self {
        Self { tx }
    }

    pub fn report(&self, sent: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = ((sent.min(total) as f64 * 100.0) / total as f64).round() as u8;
        self.tx.send_if_modified(|current| {
            if percent > *current {
                *current = percent;
                true
            } else {
                false
            }
        });
    }
}

#[derive(Debug, Default)]
struct UploadState {
    file_name: String,
    status: UploadStatus,
    result: Option<UploadResult>,
}

type CompletionCallback = Box<dyn Fn(&UploadResult) + Send + Sync>;

pub struct UploadController<B> {
    backend: B,
    state: Mutex<UploadState>,
    progress: Arc<watch::Sender<u8>>,
    on_success: Option<CompletionCallback>,
}

impl<B: AnalysisBackend> UploadController<B> {
    pub fn new(backend: B) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            backend,
            state: Mutex::new(UploadState::default()),
            progress: Arc::new(tx),
            on_success: None,
        }
    }

    /// Called with the parsed result after every successful upload.
    pub fn on_success(mut self, callback: impl Fn(&UploadResult) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    pub fn status(&self) -> UploadStatus {
        self.state().status
    }

    pub fn snapshot(&self) -> LogUpload {
        let state = self.state();
        LogUpload {
            file_name: state.file_name.clone(),
            status: state.status,
            progress_percent: *self.progress.borrow(),
            result: state.result.clone(),
        }
    }

    /// Validate and upload. Nothing is sent if validation fails or another
    /// upload is still running; in the latter case the call is dropped.
    pub async fn submit(&self, files: &[LogFile]) -> Result<UploadResult, UploadError> {
        let file = validate(files)?;

        {
            let mut state = self.state();
            if state.status == UploadStatus::Uploading {
                warn!("Upload of {} dropped, {} still in flight", file.name, state.file_name);
                return Err(UploadError::Busy);
            }
            state.file_name = file.name.clone();
            state.status = UploadStatus::Uploading;
            state.result = None;
        }
        self.progress.send_replace(0);
        let mut in_flight = InFlight {
            controller: self,
            armed: true,
        };

        info!("Uploading {} ({} bytes)", file.name, file.size);
        let outcome = self.transmit(file).await;
        in_flight.armed = false;

        match outcome {
            Ok(result) => {
                self.finish(UploadStatus::Succeeded, Some(result.clone()));
                info!("Upload of {} accepted as log {}", file.name, result.log_id);
                if let Some(ref callback) = self.on_success {
                    callback(&result);
                }
                Ok(result)
            }
            Err(e) => {
                self.finish(UploadStatus::Failed, None);
                warn!("Upload of {} failed: {}", file.name, e);
                Err(e)
            }
        }
    }

    async fn transmit(&self, file: &LogFile) -> Result<UploadResult, UploadError> {
        let contents = tokio::fs::read(&file.path)
            .await
            .map_err(|source| UploadError::Io {
                name: file.name.clone(),
                source,
            })?;

        let sink = ProgressSink::new(Arc::clone(&self.progress));
        let response = self
            .backend
            .upload(&file.name, contents, sink)
            .await
            .map_err(|failure| {
                debug!("Upload request failed: {}", failure);
                UploadError::Request(classify(EndpointKind::Upload, &failure))
            })?;

        Ok(UploadResult {
            log_id: response.log_id,
            summary: response.summary.unwrap_or_default(),
        })
    }

    fn finish(&self, status: UploadStatus, result: Option<UploadResult>) {
        let mut state = self.state();
        state.status = status;
        state.result = result;
        self.progress.send_replace(0);
    }

    fn state(&self) -> MutexGuard<'_, UploadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks the upload failed if `submit` is dropped before it finishes.
struct InFlight<'a, B: AnalysisBackend> {
    controller: &'a UploadController<B>,
    armed: bool,
}

impl<B: AnalysisBackend> Drop for InFlight<'_, B> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Upload abandoned before completion");
            self.controller.finish(UploadStatus::Failed, None);
        }
    }
}
