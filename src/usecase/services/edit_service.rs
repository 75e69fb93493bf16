use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{info, warn};

use crate::domain::entities::record::{
    InteractionFields, Participant, PersonFields, RecordId, ResourceKind, INTERACTION_DURATIONS,
    INTERACTION_METHODS, INTERACTION_TYPES,
};
use crate::usecase::ports::api::{ApiError, DirectoryApi};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("{0}")]
    Validation(String),
    #[error("could not encode record: {0}")]
    Encode(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<serde_json::Error> for EditError {
    fn from(err: serde_json::Error) -> Self {
        EditError::Encode(err.to_string())
    }
}

/// Per-participant result of saving one interaction for several persons.
#[derive(Debug, Clone)]
pub struct FanOutReport {
    pub results: Vec<(Participant, Result<(), ApiError>)>,
}

impl FanOutReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, result)| result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Participant, &ApiError)> {
        self.results
            .iter()
            .filter_map(|(participant, result)| result.as_ref().err().map(|err| (participant, err)))
    }
}

pub struct EditService {
    api: Arc<dyn DirectoryApi>,
}

impl EditService {
    pub fn new(api: Arc<dyn DirectoryApi>) -> Self {
        Self { api }
    }

    pub async fn create_person(&self, fields: &PersonFields) -> Result<(), EditError> {
        check_person(fields)?;
        let body = serde_json::to_value(fields)?;
        self.api.create(ResourceKind::Person, &body).await?;
        info!(name = %fields.name, "person created");
        Ok(())
    }

    pub async fn update_person(
        &self,
        id: RecordId,
        fields: &PersonFields,
    ) -> Result<(), EditError> {
        check_person(fields)?;
        let body = serde_json::to_value(fields)?;
        self.api.update(ResourceKind::Person, id, &body).await?;
        info!(%id, "person updated");
        Ok(())
    }

    /// Saves `fields` once per participant.
    ///
    /// When `editing` is set the first participant keeps the existing
    /// interaction and every other participant gets a new one.
    pub async fn save_interaction(
        &self,
        fields: &InteractionFields,
        participants: &[Participant],
        editing: Option<RecordId>,
    ) -> Result<FanOutReport, EditError> {
        check_interaction(fields, participants)?;

        let mut calls = Vec::with_capacity(participants.len());
        for (index, participant) in participants.iter().enumerate() {
            let existing = editing.filter(|_| index == 0);
            let draft = InteractionFields {
                name: participant.name.clone(),
                account: participant.account.clone(),
                date: fields.date.trim().to_string(),
                ..fields.clone()
            };
            let mut body = serde_json::to_value(&draft)?;
            if existing.is_none() {
                if let Some(object) = body.as_object_mut() {
                    object.insert("personId".to_string(), serde_json::json!(participant.id));
                }
            }

            let api = Arc::clone(&self.api);
            calls.push(async move {
                match existing {
                    Some(id) => api.update(ResourceKind::Interaction, id, &body).await,
                    None => api.create(ResourceKind::Interaction, &body).await,
                }
            });
        }

        let results = join_all(calls).await;
        let report = FanOutReport {
            results: participants.iter().cloned().zip(results).collect(),
        };
        for (participant, err) in report.failures() {
            warn!(person = %participant.name, error = %err, "interaction not saved");
        }
        info!(
            saved = report.succeeded(),
            participants = participants.len(),
            "interaction saved"
        );
        Ok(report)
    }
}

fn check_person(fields: &PersonFields) -> Result<(), EditError> {
    if fields.name.trim().is_empty() {
        return Err(EditError::Validation("name is required".to_string()));
    }
    Ok(())
}

fn check_interaction(
    fields: &InteractionFields,
    participants: &[Participant],
) -> Result<(), EditError> {
    if participants.is_empty() {
        return Err(EditError::Validation(
            "at least one person must be selected".to_string(),
        ));
    }
    let choices = [
        ("method", fields.method.as_str(), INTERACTION_METHODS),
        ("type", fields.kind.as_str(), INTERACTION_TYPES),
        ("duration", fields.duration.as_str(), INTERACTION_DURATIONS),
    ];
    for (field, value, options) in choices {
        if !options.contains(&value) {
            return Err(EditError::Validation(format!(
                "{field} must be one of {}",
                options.join(", ")
            )));
        }
    }
    NaiveDate::parse_from_str(fields.date.trim(), "%Y-%m-%d")
        .map_err(|_| EditError::Validation("date must be YYYY-MM-DD".to_string()))?;
    if fields.notes.trim().is_empty() {
        return Err(EditError::Validation("notes are required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> InteractionFields {
        InteractionFields {
            kind: "Meeting".to_string(),
            method: "Phone".to_string(),
            date: "2024-05-01".to_string(),
            duration: "30 Minutes".to_string(),
            notes: "Quarterly check-in".to_string(),
            ..InteractionFields::default()
        }
    }

    fn ann() -> Participant {
        Participant {
            id: RecordId(1),
            name: "Ann".to_string(),
            account: "1001".to_string(),
        }
    }

    #[test]
    fn interaction_needs_a_participant() {
        let err = check_interaction(&draft(), &[]).expect_err("should require a person");
        assert!(matches!(err, EditError::Validation(_)));
    }

    #[test]
    fn interaction_options_and_date_are_checked() {
        let mut bad_method = draft();
        bad_method.method = "Fax".to_string();
        assert!(check_interaction(&bad_method, &[ann()]).is_err());

        let mut bad_date = draft();
        bad_date.date = "05/01/2024".to_string();
        assert!(check_interaction(&bad_date, &[ann()]).is_err());

        let mut no_notes = draft();
        no_notes.notes = "  ".to_string();
        assert!(check_interaction(&no_notes, &[ann()]).is_err());

        assert!(check_interaction(&draft(), &[ann()]).is_ok());
    }

    #[test]
    fn person_name_is_required() {
        assert!(check_person(&PersonFields::default()).is_err());
        let fields = PersonFields {
            name: "Ann".to_string(),
            ..PersonFields::default()
        };
        assert!(check_person(&fields).is_ok());
    }
}
