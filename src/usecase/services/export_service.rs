use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::domain::entities::record::ResourceKind;
use crate::usecase::ports::api::DirectoryApi;

pub struct ExportService {
    api: Arc<dyn DirectoryApi>,
}

impl ExportService {
    pub fn new(api: Arc<dyn DirectoryApi>) -> Self {
        Self { api }
    }

    /// Downloads every record of `resource` as CSV into `dir`.
    pub async fn export(&self, resource: ResourceKind, dir: &Path) -> Result<PathBuf> {
        let bytes = self
            .api
            .export_csv(resource)
            .await
            .with_context(|| format!("failed to export {resource} records"))?;

        let path = dir.join(resource.export_file_name());
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!(%resource, path = %path.display(), bytes = bytes.len(), "export written");
        Ok(path)
    }
}
