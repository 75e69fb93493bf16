//! In-memory [`DirectoryApi`] that records every call for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::entities::import_job::SourceFile;
use crate::domain::entities::query::FetchRequest;
use crate::domain::entities::record::{RecordId, ResourceKind};
use crate::usecase::ports::api::{
    ApiError, DirectoryApi, ProgressEvent, ProgressFeed, RawPage, UploadAck,
};
use crate::usecase::services::grid_controller::RefreshHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    List {
        resource: ResourceKind,
        request: FetchRequest,
    },
    Create {
        resource: ResourceKind,
        record: Value,
    },
    Update {
        resource: ResourceKind,
        id: RecordId,
        fields: Value,
    },
    SoftDelete {
        resource: ResourceKind,
        id: RecordId,
    },
    Restore {
        resource: ResourceKind,
        id: RecordId,
    },
    Export {
        resource: ResourceKind,
    },
    Upload {
        file: String,
        session: Option<String>,
    },
    OpenFeed {
        session: String,
    },
}

#[derive(Default)]
pub struct FakeApi {
    calls: Mutex<Vec<ApiCall>>,
    total_count: Mutex<u64>,
    people: Mutex<Vec<Value>>,
    page_latency: Mutex<HashMap<u32, Duration>>,
    create_latency: Mutex<Option<Duration>>,
    fail_lists: AtomicBool,
    rejected_names: Mutex<HashMap<String, ApiError>>,
    mutation_error: Mutex<Option<ApiError>>,
    upload_ack: Mutex<UploadAck>,
    feed_events: Mutex<VecDeque<ProgressEvent>>,
    feed_hangs: AtomicBool,
    feed_open_hangs: AtomicBool,
    live_feeds: Arc<AtomicUsize>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total(total: u64) -> Self {
        let api = Self::default();
        api.set_total(total);
        api
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn list_requests(&self) -> Vec<FetchRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::List { request, .. } => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn created(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::Create { record, .. } => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn set_total(&self, total: u64) {
        *self.total_count.lock().expect("lock") = total;
    }

    /// Serves these rows (filtered by the `name` parameter) instead of generated ones.
    pub fn set_people(&self, people: Vec<Value>) {
        *self.people.lock().expect("lock") = people;
    }

    pub fn set_page_latency(&self, page: u32, latency: Duration) {
        self.page_latency.lock().expect("lock").insert(page, latency);
    }

    pub fn set_create_latency(&self, latency: Duration) {
        *self.create_latency.lock().expect("lock") = Some(latency);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn reject_name(&self, name: &str, error: ApiError) {
        self.rejected_names
            .lock()
            .expect("lock")
            .insert(name.to_string(), error);
    }

    pub fn fail_mutations(&self, error: ApiError) {
        *self.mutation_error.lock().expect("lock") = Some(error);
    }

    pub fn set_upload_ack(&self, ack: UploadAck) {
        *self.upload_ack.lock().expect("lock") = ack;
    }

    pub fn push_feed_event(&self, event: ProgressEvent) {
        self.feed_events.lock().expect("lock").push_back(event);
    }

    /// Once its events run out the feed stays open without sending anything.
    pub fn hang_feed(&self) {
        self.feed_hangs.store(true, Ordering::SeqCst);
    }

    /// Opening the feed never resolves.
    pub fn hang_feed_open(&self) {
        self.feed_open_hangs.store(true, Ordering::SeqCst);
    }

    /// Feeds handed out and not yet dropped.
    pub fn live_feeds(&self) -> usize {
        self.live_feeds.load(Ordering::SeqCst)
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().expect("lock").push(call);
    }

    fn mutation_result(&self) -> Result<(), ApiError> {
        match self.mutation_error.lock().expect("lock").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn page_of(&self, request: &FetchRequest) -> RawPage {
        let people = self.people.lock().expect("lock").clone();
        if !people.is_empty() {
            let term = request.get("name").unwrap_or("").to_lowercase();
            let rows: Vec<Value> = people
                .into_iter()
                .filter(|person| {
                    person["name"]
                        .as_str()
                        .is_some_and(|name| name.to_lowercase().contains(&term))
                })
                .collect();
            let total_count = rows.len() as u64;
            return RawPage { rows, total_count };
        }

        let total = *self.total_count.lock().expect("lock");
        let page: u64 = request.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
        let limit: u64 = request.get("limit").and_then(|l| l.parse().ok()).unwrap_or(10);
        let first = (page - 1) * limit + 1;
        let last = (page * limit).min(total);
        let rows = (first..=last)
            .map(|id| json!({ "id": id, "name": format!("Person {id}") }))
            .collect();
        RawPage {
            rows,
            total_count: total,
        }
    }
}

#[async_trait]
impl DirectoryApi for FakeApi {
    async fn list(
        &self,
        resource: ResourceKind,
        request: &FetchRequest,
    ) -> Result<RawPage, ApiError> {
        self.record(ApiCall::List {
            resource,
            request: request.clone(),
        });
        let page = request.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
        let latency = self.page_latency.lock().expect("lock").get(&page).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(ApiError::Network("connection refused".to_string()));
        }
        Ok(self.page_of(request))
    }

    async fn create(&self, resource: ResourceKind, record: &Value) -> Result<(), ApiError> {
        self.record(ApiCall::Create {
            resource,
            record: record.clone(),
        });
        let latency = *self.create_latency.lock().expect("lock");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let name = record["name"].as_str().unwrap_or_default();
        match self.rejected_names.lock().expect("lock").get(name) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn update(
        &self,
        resource: ResourceKind,
        id: RecordId,
        fields: &Value,
    ) -> Result<(), ApiError> {
        self.record(ApiCall::Update {
            resource,
            id,
            fields: fields.clone(),
        });
        self.mutation_result()
    }

    async fn soft_delete(&self, resource: ResourceKind, id: RecordId) -> Result<(), ApiError> {
        self.record(ApiCall::SoftDelete { resource, id });
        self.mutation_result()
    }

    async fn restore(&self, resource: ResourceKind, id: RecordId) -> Result<(), ApiError> {
        self.record(ApiCall::Restore { resource, id });
        self.mutation_result()
    }

    async fn export_csv(&self, resource: ResourceKind) -> Result<Vec<u8>, ApiError> {
        self.record(ApiCall::Export { resource });
        Ok(b"id,name\n1,Ann Smith\n".to_vec())
    }

    async fn upload_spreadsheet(
        &self,
        file: &SourceFile,
        session: Option<&str>,
    ) -> Result<UploadAck, ApiError> {
        self.record(ApiCall::Upload {
            file: file.name.clone(),
            session: session.map(str::to_string),
        });
        Ok(self.upload_ack.lock().expect("lock").clone())
    }

    async fn open_progress_feed(&self, session: &str) -> Result<Box<dyn ProgressFeed>, ApiError> {
        self.record(ApiCall::OpenFeed {
            session: session.to_string(),
        });
        if self.feed_open_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let events = std::mem::take(&mut *self.feed_events.lock().expect("lock"));
        self.live_feeds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeFeed {
            events,
            hangs: self.feed_hangs.load(Ordering::SeqCst),
            live: Arc::clone(&self.live_feeds),
        }))
    }
}

struct FakeFeed {
    events: VecDeque<ProgressEvent>,
    hangs: bool,
    live: Arc<AtomicUsize>,
}

impl Drop for FakeFeed {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProgressFeed for FakeFeed {
    async fn next_event(&mut self) -> Result<Option<ProgressEvent>, ApiError> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        if self.hangs {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }
}

#[derive(Default)]
pub struct CountingRefresh {
    count: AtomicUsize,
}

impl CountingRefresh {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl RefreshHandle for CountingRefresh {
    fn request_refresh(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn shared(api: FakeApi) -> (Arc<FakeApi>, Arc<dyn DirectoryApi>) {
    let api = Arc::new(api);
    let port: Arc<dyn DirectoryApi> = api.clone();
    (api, port)
}
