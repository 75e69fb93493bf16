use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::entities::import_job::{
    FieldMapping, ImportJob, ImportProgress, JobError, RowOutcome, RowStatus, SourceFile,
    ACCEPTED_MIME_TYPES, MAX_UPLOAD_BYTES, PERSON_MAPPING,
};
use crate::infra::import::parse_source;
use crate::usecase::ports::api::{ApiError, DirectoryApi, ProgressEvent, ProgressFeed};
use crate::usecase::services::grid_controller::RefreshHandle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("{0}")]
    Validation(String),
    #[error("could not read spreadsheet: {0}")]
    Parse(String),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("import task stopped: {0}")]
    Interrupted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportConfig {
    /// Rows submitted at once; outcomes are still recorded in row order.
    pub concurrency: usize,
    /// How long a server-side import may stay silent before it is given up.
    pub idle_timeout: Duration,
    pub max_bytes: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            idle_timeout: Duration::from_secs(60),
            max_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Clone)]
pub struct ImportService {
    api: Arc<dyn DirectoryApi>,
    config: ImportConfig,
    mapping: FieldMapping,
    refresh: Option<Arc<dyn RefreshHandle>>,
}

impl ImportService {
    pub fn new(api: Arc<dyn DirectoryApi>, config: ImportConfig) -> Self {
        Self {
            api,
            config,
            mapping: PERSON_MAPPING,
            refresh: None,
        }
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Grid to reload once a job reaches a terminal state.
    pub fn with_refresh(mut self, refresh: Arc<dyn RefreshHandle>) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub fn validate(&self, file: &SourceFile) -> Result<(), ImportError> {
        if !ACCEPTED_MIME_TYPES.contains(&file.mime_type.as_str()) {
            return Err(ImportError::Validation(format!(
                "{} is not a spreadsheet ({}); use .xls, .xlsx or .csv",
                file.name, file.mime_type
            )));
        }
        if file.size > self.config.max_bytes {
            return Err(ImportError::Validation(format!(
                "{} is {} bytes; the upload limit is {} bytes",
                file.name, file.size, self.config.max_bytes
            )));
        }
        Ok(())
    }

    /// Validates, parses and maps `file` into a job ready to run.
    pub fn prepare(&self, file: &SourceFile) -> Result<ImportJob, ImportError> {
        self.validate(file)?;
        let data = parse_source(file).map_err(|err| ImportError::Parse(format!("{err:#}")))?;
        let (rows, skipped) = self.mapping.map_table(&data);
        if !skipped.is_empty() {
            info!(
                file = %file.name,
                skipped = skipped.len(),
                required = self.mapping.required,
                "rows without required field left out"
            );
        }
        Ok(ImportJob::local(file.name.clone(), rows, skipped))
    }

    /// Submits every row of a local job through create-record.
    ///
    /// Failed rows are logged and the job moves on; cancelling `cancel`
    /// aborts the rows not yet submitted.
    pub async fn run(
        &self,
        mut job: ImportJob,
        progress: &watch::Sender<ImportProgress>,
        cancel: CancellationToken,
    ) -> Result<ImportJob, ImportError> {
        let rows = job.start()?;
        progress.send_replace(job.progress());
        info!(file = job.file_name(), total = rows.len(), "import started");

        let resource = self.mapping.resource;
        let mut submissions = stream::iter(rows.into_iter().map(|row| {
            let api = Arc::clone(&self.api);
            async move {
                let body = serde_json::Value::Object(
                    row.record
                        .into_iter()
                        .map(|(field, value)| (field, serde_json::Value::String(value)))
                        .collect(),
                );
                let result = api.create(resource, &body).await;
                (row.row_index, result)
            }
        }))
        .buffered(self.config.concurrency.max(1));

        while !job.state().is_terminal() {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(file = job.file_name(), "import cancelled");
                    job.abort("import cancelled")?;
                    break;
                }
                next = submissions.next() => next,
            };
            let Some((row_index, result)) = next else {
                break;
            };
            job.record(row_outcome(row_index, result))?;
            progress.send_replace(job.progress());
        }

        let summary = job.progress();
        info!(
            file = job.file_name(),
            state = ?job.state(),
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duplicates = summary.duplicates,
            "import finished"
        );
        self.notify_refresh();
        Ok(job)
    }

    /// Uploads the raw file once and follows the progress the server pushes.
    pub async fn upload(
        &self,
        file: SourceFile,
        progress: &watch::Sender<ImportProgress>,
        cancel: CancellationToken,
    ) -> Result<ImportJob, ImportError> {
        self.validate(&file)?;
        let session = Uuid::new_v4().to_string();
        let mut job = ImportJob::remote(file.name.clone());
        job.start()?;
        progress.send_replace(job.progress());
        info!(file = %file.name, %session, "server-side import started");

        let idle = self.config.idle_timeout;
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = tokio::time::timeout(idle, self.api.open_progress_feed(&session)) => {
                Some(opened)
            }
        };
        let mut feed = match opened {
            None => {
                job.abort("import cancelled")?;
                None
            }
            Some(Ok(Ok(feed))) => Some(feed),
            Some(Ok(Err(err))) => {
                warn!(%session, error = %err, "progress feed unavailable");
                None
            }
            Some(Err(_)) => {
                warn!(%session, ?idle, "progress feed did not open; uploading without it");
                None
            }
        };

        if !job.state().is_terminal() {
            let ack = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                ack = self.api.upload_spreadsheet(&file, Some(&session)) => Some(ack),
            };
            match ack {
                None => job.abort("import cancelled")?,
                Some(Err(err)) => {
                    warn!(file = %file.name, error = %err, "upload failed");
                    job.abort(format!("upload failed: {err}"))?;
                }
                Some(Ok(ack)) => {
                    if let Some(snapshot) = ack.progress {
                        job.observe(snapshot)?;
                        progress.send_replace(job.progress());
                    }
                    if ack.completed {
                        job.complete()?;
                    }
                }
            }
        }

        if !job.state().is_terminal() {
            match feed.as_mut() {
                Some(feed) => self.follow(&mut job, &mut **feed, progress, &cancel).await?,
                None => job.abort("upload accepted but progress cannot be followed")?,
            }
        }
        drop(feed);

        progress.send_replace(job.progress());
        info!(file = job.file_name(), state = ?job.state(), "server-side import finished");
        self.notify_refresh();
        Ok(job)
    }

    async fn follow(
        &self,
        job: &mut ImportJob,
        feed: &mut dyn ProgressFeed,
        progress: &watch::Sender<ImportProgress>,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        let idle = self.config.idle_timeout;
        while !job.state().is_terminal() {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    job.abort("import cancelled")?;
                    break;
                }
                event = tokio::time::timeout(idle, feed.next_event()) => event,
            };

            match event {
                Err(_) => {
                    warn!(file = job.file_name(), ?idle, "no progress from server");
                    job.abort(format!("no progress received for {}s", idle.as_secs()))?;
                }
                Ok(Ok(Some(ProgressEvent::Progress(snapshot)))) => {
                    if job.observe(snapshot)? {
                        debug!(processed = snapshot.processed, total = snapshot.total, "progress");
                        progress.send_replace(job.progress());
                    }
                }
                Ok(Ok(Some(ProgressEvent::Completed(snapshot)))) => {
                    if let Some(snapshot) = snapshot {
                        job.observe(snapshot)?;
                    }
                    job.complete()?;
                }
                Ok(Ok(Some(ProgressEvent::Error(message)))) => {
                    warn!(file = job.file_name(), %message, "server reported import error");
                    job.abort(message)?;
                }
                Ok(Ok(None)) => job.abort("progress stream closed before completion")?,
                Ok(Err(err)) => job.abort(format!("progress stream failed: {err}"))?,
            }
        }
        Ok(())
    }

    /// Runs a prepared job in the background.
    pub fn start(&self, job: ImportJob) -> ImportHandle {
        let (tx, rx) = watch::channel(job.progress());
        let cancel = CancellationToken::new();
        let service = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { service.run(job, &tx, token).await });
        ImportHandle {
            progress: rx,
            cancel,
            task,
            release: None,
        }
    }

    /// Starts a server-side import in the background; invalid files are
    /// rejected before anything is sent.
    ///
    /// Dropping the returned handle cancels the job and closes its progress feed.
    pub fn start_upload(&self, file: SourceFile) -> Result<ImportHandle, ImportError> {
        self.validate(&file)?;
        let (tx, rx) = watch::channel(ImportProgress::default());
        let cancel = CancellationToken::new();
        let service = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { service.upload(file, &tx, token).await });
        Ok(ImportHandle {
            progress: rx,
            release: Some(cancel.clone().drop_guard()),
            cancel,
            task,
        })
    }

    fn notify_refresh(&self) {
        if let Some(refresh) = &self.refresh {
            refresh.request_refresh();
        }
    }
}

fn row_outcome(row_index: usize, result: Result<(), ApiError>) -> RowOutcome {
    match result {
        Ok(()) => RowOutcome {
            row_index,
            status: RowStatus::Success,
            message: None,
        },
        Err(ApiError::Duplicate { message }) => {
            debug!(row_index, %message, "duplicate row");
            RowOutcome {
                row_index,
                status: RowStatus::Duplicate,
                message: Some(message),
            }
        }
        Err(err) => {
            warn!(row_index, error = %err, "row failed");
            RowOutcome {
                row_index,
                status: RowStatus::Failure,
                message: Some(err.to_string()),
            }
        }
    }
}

/// A running import.
///
/// Dropping the handle of a per-row import leaves it running; dropping the
/// handle of a server-side import cancels it.
pub struct ImportHandle {
    progress: watch::Receiver<ImportProgress>,
    cancel: CancellationToken,
    task: JoinHandle<Result<ImportJob, ImportError>>,
    release: Option<DropGuard>,
}

impl ImportHandle {
    pub fn progress(&self) -> ImportProgress {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ImportProgress> {
        self.progress.clone()
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub async fn finish(self) -> Result<ImportJob, ImportError> {
        let Self { task, release, .. } = self;
        let result = task.await;
        if let Some(release) = release {
            release.disarm();
        }
        result.map_err(|err| ImportError::Interrupted(err.to_string()))?
    }
}
