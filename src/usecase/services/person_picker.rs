use std::sync::Arc;

use tracing::debug;

use crate::domain::entities::query::{FilterValue, QueryState};
use crate::domain::entities::record::{Participant, Person, RecordId, ResourceKind};
use crate::usecase::ports::api::{ApiError, DirectoryApi};

/// Chooses the persons an interaction is recorded for.
pub struct PersonPicker {
    api: Arc<dyn DirectoryApi>,
    selected: Vec<Participant>,
}

impl PersonPicker {
    pub fn new(api: Arc<dyn DirectoryApi>) -> Self {
        Self {
            api,
            selected: Vec::new(),
        }
    }

    pub fn with_selected(mut self, selected: Vec<Participant>) -> Self {
        self.selected = selected;
        self
    }

    /// Persons whose name contains `term`, minus those already chosen.
    pub async fn suggest(&self, term: &str) -> Result<Vec<Person>, ApiError> {
        if term.trim().is_empty() {
            return Ok(Vec::new());
        }

        let request = QueryState::default()
            .set_filter("name", Some(FilterValue::text(term)))
            .fetch_request();
        let page = self.api.list(ResourceKind::Person, &request).await?;

        let mut suggestions = Vec::with_capacity(page.rows.len());
        for row in page.rows {
            let person: Person =
                serde_json::from_value(row).map_err(|err| ApiError::Decode(err.to_string()))?;
            if !self.is_selected(person.id) {
                suggestions.push(person);
            }
        }
        debug!(term, found = suggestions.len(), "person suggestions");
        Ok(suggestions)
    }

    pub fn choose(&mut self, person: &Person) {
        if !self.is_selected(person.id) {
            self.selected.push(Participant::from(person));
        }
    }

    pub fn remove(&mut self, id: RecordId) {
        self.selected.retain(|participant| participant.id != id);
    }

    pub fn participants(&self) -> &[Participant] {
        &self.selected
    }

    fn is_selected(&self, id: RecordId) -> bool {
        self.selected.iter().any(|participant| participant.id == id)
    }
}
