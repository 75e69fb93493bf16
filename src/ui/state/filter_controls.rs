use std::collections::BTreeSet;
use std::marker::PhantomData;

use crate::domain::entities::query::{FilterValue, QueryState};
use crate::domain::entities::record::{ColumnKind, Resource, ANY_OPTION};

/// Dropdown filters of one grid; at most one dropdown is open at a time.
pub struct FilterControls<R: Resource> {
    open_dropdown: Option<&'static str>,
    _resource: PhantomData<fn() -> R>,
}

impl<R: Resource> Default for FilterControls<R> {
    fn default() -> Self {
        Self {
            open_dropdown: None,
            _resource: PhantomData,
        }
    }
}

impl<R: Resource> FilterControls<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the dropdown of `field`, closing any other; a second toggle closes it.
    pub fn toggle(&mut self, field: &str) {
        let Some(column) = R::column(field) else {
            return;
        };
        if !matches!(column.kind, ColumnKind::Enumerated(_)) {
            return;
        }
        if self.open_dropdown == Some(column.field) {
            self.open_dropdown = None;
        } else {
            self.open_dropdown = Some(column.field);
        }
    }

    pub fn is_open(&self, field: &str) -> bool {
        self.open_dropdown == Some(field)
    }

    pub fn open(&self) -> Option<&'static str> {
        self.open_dropdown
    }

    /// Outside click.
    pub fn dismiss(&mut self) {
        self.open_dropdown = None;
    }

    pub fn options(&self, field: &str) -> Vec<&'static str> {
        let Some(column) = R::column(field) else {
            return Vec::new();
        };
        std::iter::once(ANY_OPTION)
            .chain(column.options().iter().copied())
            .collect()
    }

    /// New filter value for `field` after picking `option`, and closes the dropdown.
    ///
    /// "Any" clears the filter; any other option toggles its membership.
    pub fn choose(&mut self, field: &str, option: &str, query: &QueryState) -> Option<FilterValue> {
        self.open_dropdown = None;
        if option == ANY_OPTION {
            return None;
        }

        let mut selected: BTreeSet<String> = match query.filter(field) {
            Some(FilterValue::OneOf(values)) => values.clone(),
            _ => BTreeSet::new(),
        };
        if !selected.remove(option) {
            selected.insert(option.to_string());
        }
        Some(FilterValue::OneOf(selected)).filter(|value| !value.is_empty())
    }

    pub fn label(&self, field: &str, query: &QueryState) -> String {
        match query.filter(field) {
            Some(FilterValue::OneOf(values)) if !values.is_empty() => {
                values.iter().cloned().collect::<Vec<_>>().join(", ")
            }
            _ => ANY_OPTION.to_string(),
        }
    }
}
