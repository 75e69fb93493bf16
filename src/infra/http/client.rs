//! reqwest implementation of [`DirectoryApi`].
//!
//! Every request carries the configured `Authorization` header verbatim.
//! Non-success responses are classified into [`ApiError`] from the status
//! code and the `{ code, message }` body the API returns on rejection.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use tracing::debug;

use crate::domain::entities::import_job::{ImportProgress, SourceFile};
use crate::domain::entities::query::FetchRequest;
use crate::domain::entities::record::{RecordId, ResourceKind};
use crate::infra::http::progress::SseProgressFeed;
use crate::usecase::ports::api::{ApiError, DirectoryApi, ProgressFeed, RawPage, UploadAck};

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub base_url: String,
    pub auth_header: Option<String>,
    pub timeout: Duration,
    pub duplicate_codes: Vec<String>,
}

#[derive(Clone)]
pub struct HttpDirectoryApi {
    http: reqwest::Client,
    base: Url,
    auth_header: Option<String>,
    timeout: Duration,
    duplicate_codes: Vec<String>,
}

impl HttpDirectoryApi {
    pub fn new(settings: HttpSettings) -> Result<Self> {
        let base = Url::parse(&settings.base_url)
            .with_context(|| format!("invalid backend URL: {}", settings.base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("backend URL cannot carry a path: {}", settings.base_url)
        }

        // No client-wide timeout: the progress feed is a long-lived response.
        let http = reqwest::Client::builder()
            .user_agent(format!("contact-directory/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            http,
            base,
            auth_header: settings.auth_header,
            timeout: settings.timeout,
            duplicate_codes: settings.duplicate_codes,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_header {
            Some(auth) => request.header(AUTHORIZATION, auth),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self
            .authorized(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(network_error)?;
        self.check(response).await
    }

    async fn check(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), &body, &self.duplicate_codes))
    }
}

fn network_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Network(format!("request timed out: {err}"))
    } else {
        ApiError::Network(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Maps a failed response to an [`ApiError`].
///
/// A duplicate is a 409, or a 4xx whose body `code` is one of
/// `duplicate_codes`; the message text is never inspected.
pub fn classify_error(status: u16, body: &str, duplicate_codes: &[String]) -> ApiError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|body| body.code.as_ref())
        .and_then(|code| match code {
            serde_json::Value::String(text) => Some(text.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    let message = parsed
        .and_then(|body| body.message)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("status {status}")
            } else {
                trimmed.to_string()
            }
        });

    let is_client_error = (400..500).contains(&status);
    let is_duplicate = status == 409
        || (is_client_error
            && code
                .as_ref()
                .is_some_and(|code| duplicate_codes.iter().any(|known| known == code)));

    if is_duplicate {
        ApiError::Duplicate { message }
    } else if is_client_error {
        ApiError::Rejected {
            status,
            code,
            message,
        }
    } else {
        ApiError::Http { status, message }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListEnvelope {
    Results {
        results: Vec<serde_json::Value>,
        #[serde(default, rename = "totalCount", alias = "total_count", alias = "total")]
        total_count: Option<u64>,
    },
    Data {
        data: Vec<serde_json::Value>,
        meta: ListMeta,
    },
}

#[derive(Debug, Deserialize)]
struct ListMeta {
    total: u64,
}

impl From<ListEnvelope> for RawPage {
    fn from(envelope: ListEnvelope) -> Self {
        match envelope {
            ListEnvelope::Results {
                results,
                total_count,
            } => {
                let total_count = total_count.unwrap_or(results.len() as u64);
                RawPage {
                    rows: results,
                    total_count,
                }
            }
            ListEnvelope::Data { data, meta } => RawPage {
                rows: data,
                total_count: meta.total,
            },
        }
    }
}

pub fn parse_list_body(body: &str) -> Result<RawPage, ApiError> {
    serde_json::from_str::<ListEnvelope>(body)
        .map(RawPage::from)
        .map_err(|err| ApiError::Decode(format!("list response: {err}")))
}

/// Reads whatever progress the upload response carried; an empty or
/// non-JSON body means "accepted, follow the feed".
pub fn parse_upload_ack(body: &str) -> UploadAck {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) else {
        return UploadAck::default();
    };

    let completed = map
        .get("status")
        .and_then(|status| status.as_str())
        .is_some_and(|status| matches!(status, "completed" | "complete" | "done"));
    let progress = if map.contains_key("processed") || map.contains_key("total") {
        serde_json::from_value::<ImportProgress>(serde_json::Value::Object(map)).ok()
    } else {
        None
    };

    UploadAck {
        progress,
        completed,
    }
}

#[async_trait]
impl DirectoryApi for HttpDirectoryApi {
    async fn list(
        &self,
        resource: ResourceKind,
        request: &FetchRequest,
    ) -> Result<RawPage, ApiError> {
        let mut url = self.endpoint(&[resource.path()]);
        url.set_query(Some(&request.query_string()));
        debug!(%url, "list request");

        let response = self.send(self.http.get(url)).await?;
        let body = response.text().await.map_err(network_error)?;
        parse_list_body(&body)
    }

    async fn create(
        &self,
        resource: ResourceKind,
        record: &serde_json::Value,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&[resource.path()]);
        debug!(%url, "create request");
        self.send(self.http.post(url).json(record)).await?;
        Ok(())
    }

    async fn update(
        &self,
        resource: ResourceKind,
        id: RecordId,
        fields: &serde_json::Value,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&[resource.path(), &id.to_string()]);
        debug!(%url, "update request");
        self.send(self.http.patch(url).json(fields)).await?;
        Ok(())
    }

    async fn soft_delete(&self, resource: ResourceKind, id: RecordId) -> Result<(), ApiError> {
        let url = self.endpoint(&[resource.path(), &id.to_string()]);
        debug!(%url, "soft delete request");
        self.send(self.http.put(url)).await?;
        Ok(())
    }

    async fn restore(&self, resource: ResourceKind, id: RecordId) -> Result<(), ApiError> {
        let url = self.endpoint(&[resource.path(), &id.to_string(), "restore"]);
        debug!(%url, "restore request");
        self.send(self.http.put(url)).await?;
        Ok(())
    }

    async fn export_csv(&self, resource: ResourceKind) -> Result<Vec<u8>, ApiError> {
        let url = self.endpoint(&[resource.path(), "export", "csv"]);
        debug!(%url, "export request");
        let response = self.send(self.http.get(url)).await?;
        let bytes = response.bytes().await.map_err(network_error)?;
        Ok(bytes.to_vec())
    }

    async fn upload_spreadsheet(
        &self,
        file: &SourceFile,
        session: Option<&str>,
    ) -> Result<UploadAck, ApiError> {
        let url = self.endpoint(&["excel", "upload"]);
        let part = reqwest::multipart::Part::bytes(file.content.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|err| {
                ApiError::Decode(format!("invalid MIME type {}: {err}", file.mime_type))
            })?;
        let mut form = reqwest::multipart::Form::new().part("excel", part);
        if let Some(session) = session {
            form = form.text("sessionId", session.to_string());
        }
        debug!(%url, file = %file.name, size = file.size, "upload request");

        let response = self.send(self.http.post(url).multipart(form)).await?;
        let body = response.text().await.unwrap_or_default();
        Ok(parse_upload_ack(&body))
    }

    async fn open_progress_feed(&self, session: &str) -> Result<Box<dyn ProgressFeed>, ApiError> {
        let url = self.endpoint(&["excel", "progress", session]);
        debug!(%url, "opening progress feed");

        let request = self
            .authorized(self.http.get(url))
            .header(ACCEPT, "text/event-stream");
        let response = request.send().await.map_err(network_error)?;
        let response = self.check(response).await?;
        Ok(Box::new(SseProgressFeed::new(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes() -> Vec<String> {
        vec!["duplicate_record".to_string(), "400".to_string()]
    }

    #[test]
    fn duplicate_is_a_declared_code_not_a_message() {
        let declared = classify_error(
            400,
            r#"{"code":"duplicate_record","message":"Person already exists"}"#,
            &codes(),
        );
        assert_eq!(
            declared,
            ApiError::Duplicate {
                message: "Person already exists".to_string()
            }
        );

        let numeric = classify_error(400, r#"{"code":400,"message":"exists"}"#, &codes());
        assert!(matches!(numeric, ApiError::Duplicate { .. }));

        let same_words = classify_error(
            400,
            r#"{"code":"invalid","message":"Person already exists"}"#,
            &codes(),
        );
        assert!(matches!(same_words, ApiError::Rejected { .. }));

        assert!(matches!(
            classify_error(409, "", &[]),
            ApiError::Duplicate { .. }
        ));
    }

    #[test]
    fn server_errors_are_not_rejections() {
        let error = classify_error(503, "upstream down", &codes());
        assert_eq!(
            error,
            ApiError::Http {
                status: 503,
                message: "upstream down".to_string()
            }
        );
        assert!(!error.is_client_error());
        assert!(classify_error(422, "", &codes()).is_client_error());
    }

    #[test]
    fn both_list_envelopes_are_accepted() {
        let persons = parse_list_body(r#"{"results":[{"id":1},{"id":2}],"totalCount":23}"#)
            .expect("persons envelope");
        assert_eq!(persons.rows.len(), 2);
        assert_eq!(persons.total_count, 23);

        let interactions = parse_list_body(r#"{"data":[{"id":5}],"meta":{"total":41}}"#)
            .expect("interactions envelope");
        assert_eq!(interactions.rows.len(), 1);
        assert_eq!(interactions.total_count, 41);

        assert!(matches!(
            parse_list_body(r#"{"items":[]}"#),
            Err(ApiError::Decode(_))
        ));
    }

    #[test]
    fn upload_ack_reads_optional_progress() {
        assert_eq!(parse_upload_ack(""), UploadAck::default());
        assert_eq!(parse_upload_ack("File uploaded"), UploadAck::default());

        let ack =
            parse_upload_ack(r#"{"status":"completed","processed":4,"total":4,"succeeded":4}"#);
        assert!(ack.completed);
        assert_eq!(ack.progress.map(|p| p.processed), Some(4));
    }

    #[test]
    fn endpoints_extend_the_base_path() {
        let api = HttpDirectoryApi::new(HttpSettings {
            base_url: "https://crm.example.com/wp-json/directory/v1/".to_string(),
            auth_header: Some("Bearer token".to_string()),
            timeout: Duration::from_secs(5),
            duplicate_codes: codes(),
        })
        .expect("client should build");

        assert_eq!(
            api.endpoint(&["person", "12", "restore"]).as_str(),
            "https://crm.example.com/wp-json/directory/v1/person/12/restore"
        );
        assert_eq!(
            api.endpoint(&["excel", "upload"]).as_str(),
            "https://crm.example.com/wp-json/directory/v1/excel/upload"
        );
    }
}
