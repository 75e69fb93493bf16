use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::domain::entities::import_job::MAX_UPLOAD_BYTES;
use crate::domain::entities::query::PageSize;
use crate::infra::http::client::HttpSettings;
use crate::usecase::services::import_service::ImportConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend_url: String,
    pub auth_header: Option<String>,
    pub debounce_ms: u64,
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub duplicate_codes: Vec<String>,
    pub import: ImportSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImportSection {
    pub concurrency: usize,
    pub idle_timeout_secs: u64,
    pub max_upload_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            auth_header: None,
            debounce_ms: 300,
            page_size: 10,
            request_timeout_secs: 30,
            duplicate_codes: vec!["duplicate_record".to_string()],
            import: ImportSection::default(),
        }
    }
}

impl Default for ImportSection {
    fn default() -> Self {
        Self {
            concurrency: 1,
            idle_timeout_secs: 60,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "contact-directory")
        .ok_or_else(|| anyhow!("unable to resolve config directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

impl AppConfig {
    /// Reads `path`, or the default location when `None`; a missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config: {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        PageSize::try_from(config.page_size)?;
        Ok(config)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn page_size(&self) -> PageSize {
        PageSize::try_from(self.page_size).unwrap_or_default()
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            base_url: self.backend_url.clone(),
            auth_header: self.auth_header.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            duplicate_codes: self.duplicate_codes.clone(),
        }
    }

    pub fn import_config(&self) -> ImportConfig {
        ImportConfig {
            concurrency: self.import.concurrency.max(1),
            idle_timeout: Duration::from_secs(self.import.idle_timeout_secs),
            max_bytes: self.import.max_upload_bytes,
        }
    }
}
