use async_trait::async_trait;

use crate::domain::entities::import_job::{ImportProgress, SourceFile};
use crate::domain::entities::query::FetchRequest;
use crate::domain::entities::record::{RecordId, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    /// A 4xx the server explained; the request should not be repeated as is.
    #[error("rejected ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("duplicate record: {message}")]
    Duplicate { message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_client_error(&self) -> bool {
        match self {
            ApiError::Rejected { .. } | ApiError::Duplicate { .. } => true,
            ApiError::Http { status, .. } => (400..500).contains(status),
            ApiError::Network(_) | ApiError::Decode(_) => false,
        }
    }
}

/// One page of rows as the server returned them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPage {
    pub rows: Vec<serde_json::Value>,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOp {
    Edit(serde_json::Map<String, serde_json::Value>),
    SoftDelete,
    Restore,
}

impl MutationOp {
    pub fn name(&self) -> &'static str {
        match self {
            MutationOp::Edit(_) => "edit",
            MutationOp::SoftDelete => "soft delete",
            MutationOp::Restore => "restore",
        }
    }
}

/// What the upload endpoint said about the job it accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadAck {
    pub progress: Option<ImportProgress>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Progress(ImportProgress),
    Completed(Option<ImportProgress>),
    Error(String),
}

/// Server-pushed progress for one upload session.
///
/// Dropping the feed releases the underlying connection.
#[async_trait]
pub trait ProgressFeed: Send {
    /// `Ok(None)` once the server closed the stream.
    async fn next_event(&mut self) -> Result<Option<ProgressEvent>, ApiError>;
}

#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn list(
        &self,
        resource: ResourceKind,
        request: &FetchRequest,
    ) -> Result<RawPage, ApiError>;

    async fn create(
        &self,
        resource: ResourceKind,
        record: &serde_json::Value,
    ) -> Result<(), ApiError>;
    async fn update(
        &self,
        resource: ResourceKind,
        id: RecordId,
        fields: &serde_json::Value,
    ) -> Result<(), ApiError>;
    async fn soft_delete(&self, resource: ResourceKind, id: RecordId) -> Result<(), ApiError>;
    async fn restore(&self, resource: ResourceKind, id: RecordId) -> Result<(), ApiError>;

    async fn export_csv(&self, resource: ResourceKind) -> Result<Vec<u8>, ApiError>;

    async fn upload_spreadsheet(
        &self,
        file: &SourceFile,
        session: Option<&str>,
    ) -> Result<UploadAck, ApiError>;
    async fn open_progress_feed(&self, session: &str) -> Result<Box<dyn ProgressFeed>, ApiError>;
}
