use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::entities::query::{
    total_pages, FetchRequest, FilterValue, PageSize, QueryError, QueryState,
};
use crate::domain::entities::record::{RecordId, Resource};
use crate::usecase::ports::api::{ApiError, DirectoryApi, MutationOp, RawPage};
use crate::usecase::services::fetch_scheduler::{FetchScheduler, FetchTarget};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("could not decode row: {0}")]
    Decode(String),
}

/// Something that can be asked to reload what it shows.
pub trait RefreshHandle: Send + Sync {
    fn request_refresh(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page: u32,
    pub total_pages: u32,
}

struct GridView<T> {
    rows: Vec<T>,
    total_count: Option<u64>,
    applied_seq: u64,
    last_error: Option<GridError>,
}

struct GridState<R: Resource> {
    query: QueryState,
    view: GridView<R::Record>,
}

struct GridCore<R: Resource> {
    api: Arc<dyn DirectoryApi>,
    state: Mutex<GridState<R>>,
    _resource: PhantomData<fn() -> R>,
}

impl<R: Resource> GridCore<R> {
    fn lock(&self) -> MutexGuard<'_, GridState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decode(page: RawPage) -> Result<(Vec<R::Record>, u64), GridError> {
        let rows = page
            .rows
            .into_iter()
            .map(serde_json::from_value::<R::Record>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| GridError::Decode(err.to_string()))?;
        Ok((rows, page.total_count))
    }
}

#[async_trait]
impl<R: Resource> FetchTarget for GridCore<R> {
    async fn fetch(&self, seq: u64, request: FetchRequest) -> Option<FetchRequest> {
        let result = self
            .api
            .list(R::KIND, &request)
            .await
            .map_err(GridError::from)
            .and_then(Self::decode);

        let mut state = self.lock();
        if seq <= state.view.applied_seq {
            debug!(seq, applied = state.view.applied_seq, "discarding stale response");
            return None;
        }
        state.view.applied_seq = seq;

        match result {
            Ok((rows, total_count)) => {
                debug!(seq, rows = rows.len(), total_count, "applied page");
                state.view.rows = rows;
                state.view.total_count = Some(total_count);
                state.view.last_error = None;

                // A newer query still waiting out its debounce gets its own response.
                if request != state.query.fetch_request() {
                    return None;
                }
                let pages = total_pages(total_count, state.query.page_size());
                if pages > 0 && state.query.page() > pages {
                    debug!(page = state.query.page(), pages, "page out of range; clamping");
                    state.query = state.query.clamp_page(pages);
                    return Some(state.query.fetch_request());
                }
                None
            }
            Err(err) => {
                warn!(resource = %R::KIND, error = %err, "list request failed");
                state.view.last_error = Some(err);
                None
            }
        }
    }
}

/// Server-paginated grid over one resource.
///
/// Every change to the query goes through the fetch scheduler; the rows
/// shown are always those of the newest applied response.
pub struct GridController<R: Resource> {
    core: Arc<GridCore<R>>,
    scheduler: FetchScheduler,
}

impl<R: Resource> GridController<R> {
    /// Builds the controller and issues the initial load right away.
    pub fn new(api: Arc<dyn DirectoryApi>, page_size: PageSize, quiet: Duration) -> Self {
        let core = Arc::new(GridCore {
            api,
            state: Mutex::new(GridState {
                query: QueryState::new(page_size),
                view: GridView {
                    rows: Vec::new(),
                    total_count: None,
                    applied_seq: 0,
                    last_error: None,
                },
            }),
            _resource: PhantomData,
        });
        let scheduler = FetchScheduler::spawn(Arc::clone(&core), quiet);
        let controller = Self { core, scheduler };
        controller.refresh();
        controller
    }

    pub fn query(&self) -> QueryState {
        self.core.lock().query.clone()
    }

    pub fn set_filter(&self, field: &str, value: Option<FilterValue>) -> Result<(), GridError> {
        let column =
            R::column(field).ok_or_else(|| QueryError::UnknownColumn(field.to_string()))?;
        if let Some(value) = &value {
            column.check_filter(value)?;
        }
        self.transition(|query| query.set_filter(field, value));
        Ok(())
    }

    pub fn clear_filters(&self) {
        self.transition(QueryState::clear_filters);
    }

    pub fn set_sort(&self, field: &str) -> Result<(), GridError> {
        let column =
            R::column(field).ok_or_else(|| QueryError::UnknownColumn(field.to_string()))?;
        if !column.sortable {
            return Err(QueryError::NotSortable(field.to_string()).into());
        }
        self.transition(|query| query.set_sort(field));
        Ok(())
    }

    /// Moves to `page`, clamped to the last known page count.
    pub fn set_page(&self, page: u32) {
        let total = self.current_page_info().total_pages;
        let page = if total > 0 { page.min(total) } else { page };
        self.transition(|query| query.set_page(page));
    }

    pub fn next_page(&self) {
        let info = self.current_page_info();
        self.set_page(info.page.saturating_add(1));
    }

    pub fn prev_page(&self) {
        let info = self.current_page_info();
        self.set_page(info.page.saturating_sub(1).max(1));
    }

    pub fn set_page_size(&self, page_size: PageSize) {
        self.transition(|query| query.set_page_size(page_size));
    }

    /// Re-fetches the current query without waiting for the quiet interval.
    pub fn refresh(&self) {
        let request = self.core.lock().query.fetch_request();
        self.scheduler.refresh_now(request);
    }

    /// Waits until every change made so far has been answered.
    pub async fn settled(&self) {
        self.scheduler.settled().await;
    }

    /// Empty until the first successful fetch.
    pub fn current_rows(&self) -> Vec<R::Record> {
        self.core.lock().view.rows.clone()
    }

    pub fn current_page_info(&self) -> PageInfo {
        let state = self.core.lock();
        PageInfo {
            page: state.query.page(),
            total_pages: state
                .view
                .total_count
                .map(|count| total_pages(count, state.query.page_size()))
                .unwrap_or(0),
        }
    }

    pub fn total_count(&self) -> Option<u64> {
        self.core.lock().view.total_count
    }

    pub fn last_error(&self) -> Option<GridError> {
        self.core.lock().view.last_error.clone()
    }

    /// Runs one row mutation; on success the current page is re-fetched.
    pub async fn mutate(&self, id: RecordId, op: MutationOp) -> Result<(), GridError> {
        let api = &self.core.api;
        let result = match &op {
            MutationOp::Edit(fields) => {
                let body = serde_json::Value::Object(fields.clone());
                api.update(R::KIND, id, &body).await
            }
            MutationOp::SoftDelete => api.soft_delete(R::KIND, id).await,
            MutationOp::Restore => api.restore(R::KIND, id).await,
        };

        match result {
            Ok(()) => {
                info!(resource = %R::KIND, %id, op = op.name(), "row updated");
                self.refresh();
                Ok(())
            }
            Err(err) => {
                warn!(resource = %R::KIND, %id, op = op.name(), error = %err, "row update failed");
                Err(err.into())
            }
        }
    }

    /// Active filters as `(column label, description)` pairs.
    pub fn filter_summary(&self) -> Vec<(&'static str, String)> {
        let query = self.query();
        query
            .filters()
            .iter()
            .map(|(field, value)| {
                let label = R::column(field).map(|column| column.label).unwrap_or("?");
                (label, value.to_string())
            })
            .collect()
    }

    /// Whether `record` satisfies every active filter.
    pub fn row_matches_filters(&self, record: &R::Record) -> bool {
        let query = self.query();
        query.filters().iter().all(|(field, value)| {
            R::cell(record, field).is_some_and(|cell| value.matches(&cell))
        })
    }

    fn transition(&self, change: impl FnOnce(&QueryState) -> QueryState) {
        let request = {
            let mut state = self.core.lock();
            let next = change(&state.query);
            if next == state.query {
                return;
            }
            state.query = next;
            state.query.fetch_request()
        };
        self.scheduler.query_changed(request);
    }
}

impl<R: Resource> RefreshHandle for GridController<R> {
    fn request_refresh(&self) {
        self.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::record::Persons;
    use crate::test_support::{shared, FakeApi};

    fn core(api: Arc<dyn DirectoryApi>) -> GridCore<Persons> {
        GridCore {
            api,
            state: Mutex::new(GridState {
                query: QueryState::default(),
                view: GridView {
                    rows: Vec::new(),
                    total_count: None,
                    applied_seq: 0,
                    last_error: None,
                },
            }),
            _resource: PhantomData,
        }
    }

    #[tokio::test]
    async fn older_response_never_overwrites_newer_one() {
        let (_fake, api) = shared(FakeApi::with_total(30));
        let core = core(api);

        let page_two = QueryState::default().set_page(2).fetch_request();
        let page_one = QueryState::default().fetch_request();

        assert_eq!(core.fetch(2, page_two).await, None);
        assert_eq!(core.fetch(1, page_one).await, None);

        let state = core.lock();
        assert_eq!(state.view.applied_seq, 2);
        assert_eq!(state.view.rows.first().map(|p| p.id), Some(RecordId(11)));
    }

    #[tokio::test]
    async fn out_of_range_page_is_clamped_with_a_follow_up() {
        let (_fake, api) = shared(FakeApi::with_total(12));
        let core = core(api);
        core.lock().query = QueryState::default().set_page(5);

        let request = core.lock().query.fetch_request();
        let follow_up = core.fetch(1, request).await.expect("should ask for the last page");

        assert_eq!(follow_up.get("page"), Some("2"));
        assert_eq!(core.lock().query.page(), 2);
    }

    #[tokio::test]
    async fn response_for_an_older_query_does_not_clamp_a_newer_one() {
        let (fake, api) = shared(FakeApi::with_total(12));
        let core = core(api);
        let pending = QueryState::default().set_sort("name").set_page(5);
        core.lock().query = pending.clone();

        let older = QueryState::default().set_page(5).fetch_request();
        assert_eq!(core.fetch(1, older).await, None);

        assert_eq!(core.lock().query, pending);
        assert_eq!(fake.list_requests().len(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_rows() {
        let (fake, api) = shared(FakeApi::with_total(5));
        let core = core(api);
        let request = QueryState::default().fetch_request();

        core.fetch(1, request.clone()).await;
        fake.fail_lists(true);
        core.fetch(2, request).await;

        let state = core.lock();
        assert_eq!(state.view.rows.len(), 5);
        assert!(matches!(state.view.last_error, Some(GridError::Api(ApiError::Network(_)))));
    }
}
