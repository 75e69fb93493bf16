use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;

pub const PAGE_SIZE_OPTIONS: [u32; 4] = [10, 25, 50, 100];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("page size {0} is not one of 10, 25, 50, 100")]
    UnsupportedPageSize(u32),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("column {0} cannot be sorted")]
    NotSortable(String),
    #[error("invalid filter for {field}: {reason}")]
    InvalidFilter { field: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageSize(u32);

impl PageSize {
    pub const DEFAULT: PageSize = PageSize(10);

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for PageSize {
    type Error = QueryError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if PAGE_SIZE_OPTIONS.contains(&value) {
            Ok(PageSize(value))
        } else {
            Err(QueryError::UnsupportedPageSize(value))
        }
    }
}

impl From<PageSize> for u32 {
    fn from(value: PageSize) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// A constraint on one column.
///
/// The same value drives both the request parameter sent to the server and
/// [`FilterValue::matches`], so what the operator sees described as the
/// active filter is exactly what the server is asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterValue {
    /// Case-insensitive substring match.
    Text(String),
    /// Exact match against any member; an empty set matches every row.
    OneOf(BTreeSet<String>),
    /// Same calendar day.
    Date(NaiveDate),
}

impl FilterValue {
    pub fn text(value: impl Into<String>) -> Self {
        FilterValue::Text(value.into())
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FilterValue::Text(text) => text.trim().is_empty(),
            FilterValue::OneOf(values) => values.is_empty(),
            FilterValue::Date(_) => false,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            FilterValue::Text(text) => text.trim().to_string(),
            FilterValue::OneOf(values) => values.iter().cloned().collect::<Vec<_>>().join(","),
            FilterValue::Date(date) => date.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn matches(&self, cell: &str) -> bool {
        match self {
            FilterValue::Text(text) => cell
                .to_lowercase()
                .contains(&text.trim().to_lowercase()),
            FilterValue::OneOf(values) => values.is_empty() || values.contains(cell),
            FilterValue::Date(date) => leading_date(cell) == Some(*date),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Text(text) => write!(f, "contains \"{}\"", text.trim()),
            FilterValue::OneOf(values) => {
                let joined = values.iter().cloned().collect::<Vec<_>>().join(", ");
                write!(f, "one of {joined}")
            }
            FilterValue::Date(date) => write!(f, "on {}", date.format("%Y-%m-%d")),
        }
    }
}

/// Parses the `YYYY-MM-DD` prefix of a date or timestamp cell.
pub fn leading_date(cell: &str) -> Option<NaiveDate> {
    let head = cell.trim().split('T').next()?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// What subset of records the grid should display.
///
/// Every transition returns a new state; `set_page` is the only one that
/// keeps the page numbering of the previous result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryState {
    page: u32,
    page_size: PageSize,
    sort: Option<SortSpec>,
    filters: BTreeMap<String, FilterValue>,
}

impl Default for QueryState {
    fn default() -> Self {
        Self::new(PageSize::DEFAULT)
    }
}

impl QueryState {
    pub fn new(page_size: PageSize) -> Self {
        Self {
            page: 1,
            page_size,
            sort: None,
            filters: BTreeMap::new(),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn filters(&self) -> &BTreeMap<String, FilterValue> {
        &self.filters
    }

    pub fn filter(&self, field: &str) -> Option<&FilterValue> {
        self.filters.get(field)
    }

    #[must_use]
    pub fn set_page(&self, page: u32) -> Self {
        Self {
            page: page.max(1),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn clamp_page(&self, total_pages: u32) -> Self {
        self.set_page(self.page.min(total_pages.max(1)))
    }

    #[must_use]
    pub fn set_page_size(&self, page_size: PageSize) -> Self {
        Self {
            page: 1,
            page_size,
            ..self.clone()
        }
    }

    /// Cycles asc -> desc -> none on the same field; a new field starts at asc.
    #[must_use]
    pub fn set_sort(&self, field: &str) -> Self {
        let sort = match &self.sort {
            Some(current) if current.field == field => match current.direction {
                SortDirection::Asc => Some(SortSpec {
                    field: field.to_string(),
                    direction: SortDirection::Desc,
                }),
                SortDirection::Desc => None,
            },
            _ => Some(SortSpec {
                field: field.to_string(),
                direction: SortDirection::Asc,
            }),
        };

        Self {
            page: 1,
            sort,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn set_filter(&self, field: &str, value: Option<FilterValue>) -> Self {
        let mut filters = self.filters.clone();
        match value.filter(|value| !value.is_empty()) {
            Some(value) => {
                filters.insert(field.to_string(), value);
            }
            None => {
                filters.remove(field);
            }
        }

        Self {
            page: 1,
            filters,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn clear_filters(&self) -> Self {
        Self {
            page: 1,
            filters: BTreeMap::new(),
            ..self.clone()
        }
    }

    pub fn fetch_request(&self) -> FetchRequest {
        let mut params = vec![
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.page_size.get().to_string()),
        ];
        if let Some(sort) = &self.sort {
            params.push(("sortBy".to_string(), sort.field.clone()));
            params.push(("sortType".to_string(), sort.direction.as_str().to_string()));
        }
        for (field, value) in &self.filters {
            params.push((field.clone(), value.encode()));
        }
        FetchRequest { params }
    }
}

/// Ordered list request parameters derived from a [`QueryState`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    params: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }
}

pub fn total_pages(total_count: u64, page_size: PageSize) -> u32 {
    let size = u64::from(page_size.get());
    u32::try_from(total_count.div_ceil(size)).unwrap_or(u32::MAX)
}
