use std::fmt;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::entities::query::{leading_date, FilterValue, QueryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId(value)
    }
}

impl From<RecordId> for i64 {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Person,
    Interaction,
}

impl ResourceKind {
    pub fn path(self) -> &'static str {
        match self {
            ResourceKind::Person => "person",
            ResourceKind::Interaction => "interaction",
        }
    }

    pub fn export_file_name(self) -> &'static str {
        match self {
            ResourceKind::Person => "all_persons.csv",
            ResourceKind::Interaction => "all_interactions.csv",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Enumerated(&'static [&'static str]),
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub field: &'static str,
    pub label: &'static str,
    pub kind: ColumnKind,
    pub sortable: bool,
}

impl ColumnSpec {
    const fn text(field: &'static str, label: &'static str, sortable: bool) -> Self {
        Self {
            field,
            label,
            kind: ColumnKind::Text,
            sortable,
        }
    }

    pub fn options(&self) -> &'static [&'static str] {
        match self.kind {
            ColumnKind::Enumerated(options) => options,
            _ => &[],
        }
    }

    /// Checks that `value` is a filter this column can express.
    pub fn check_filter(&self, value: &FilterValue) -> Result<(), QueryError> {
        let invalid = |reason: String| QueryError::InvalidFilter {
            field: self.field.to_string(),
            reason,
        };
        match (self.kind, value) {
            (ColumnKind::Text, FilterValue::Text(_)) | (ColumnKind::Date, FilterValue::Date(_)) => {
                Ok(())
            }
            (ColumnKind::Enumerated(options), FilterValue::OneOf(values)) => {
                match values.iter().find(|v| !options.contains(&v.as_str())) {
                    Some(unknown) => Err(invalid(format!("{unknown} is not a known option"))),
                    None => Ok(()),
                }
            }
            (ColumnKind::Text, _) => Err(invalid("expected a text filter".to_string())),
            (ColumnKind::Date, _) => Err(invalid("expected a date filter".to_string())),
            (ColumnKind::Enumerated(_), _) => {
                Err(invalid("expected a set of options".to_string()))
            }
        }
    }

    /// Builds a filter from operator input; blank input clears the filter.
    pub fn parse_filter(&self, raw: &str) -> Result<Option<FilterValue>, QueryError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        let value = match self.kind {
            ColumnKind::Text => FilterValue::text(raw),
            ColumnKind::Date => {
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|err| {
                    QueryError::InvalidFilter {
                        field: self.field.to_string(),
                        reason: err.to_string(),
                    }
                })?;
                FilterValue::Date(date)
            }
            ColumnKind::Enumerated(_) => FilterValue::one_of(
                raw.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty() && *part != ANY_OPTION),
            ),
        };
        self.check_filter(&value)?;
        Ok(Some(value).filter(|value| !value.is_empty()))
    }
}

pub const ANY_OPTION: &str = "Any";

pub const INTERACTION_TYPES: &[&str] = &[
    "Follow-up",
    "Initial Contact",
    "Meeting",
    "Support",
    "Other",
];
pub const INTERACTION_METHODS: &[&str] = &["Email", "Phone", "In-person", "Video", "Other"];
pub const INTERACTION_DURATIONS: &[&str] =
    &["30 Minutes", "60 Minutes", "90 Minutes", "120 Minutes"];

pub trait Resource: Send + Sync + 'static {
    type Record: DeserializeOwned + Serialize + Clone + fmt::Debug + Send + Sync + 'static;

    const KIND: ResourceKind;

    fn columns() -> &'static [ColumnSpec];
    fn id(record: &Self::Record) -> RecordId;
    fn cell(record: &Self::Record, field: &str) -> Option<String>;

    fn column(field: &str) -> Option<&'static ColumnSpec> {
        Self::columns().iter().find(|column| column.field == field)
    }
}

/// Decodes `null`, strings, numbers and booleans into a string.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(text)) => text,
        Some(other) => other.to_string(),
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(flag)) => flag,
        Some(serde_json::Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        Some(serde_json::Value::String(text)) => matches!(text.as_str(), "1" | "true"),
        _ => false,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonFields {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub street: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub city: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub zip: String,
    #[serde(default, alias = "relationship_type", deserialize_with = "lenient_string")]
    pub relationship_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "lenient_string")]
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: PersonFields,
    #[serde(default, alias = "is_deleted", deserialize_with = "lenient_bool")]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionFields {
    #[serde(default, deserialize_with = "lenient_string")]
    pub account: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub method: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub duration: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: RecordId,
    #[serde(default, alias = "person_id", skip_serializing_if = "Option::is_none")]
    pub person_id: Option<RecordId>,
    #[serde(flatten)]
    pub fields: InteractionFields,
    #[serde(default, alias = "is_deleted", deserialize_with = "lenient_bool")]
    pub is_deleted: bool,
}

/// A person an interaction is recorded for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: RecordId,
    pub name: String,
    pub account: String,
}

impl From<&Person> for Participant {
    fn from(person: &Person) -> Self {
        Self {
            id: person.id,
            name: person.fields.name.clone(),
            account: person.fields.account.clone(),
        }
    }
}

pub struct Persons;

pub struct Interactions;

const PERSON_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::text("name", "Name", true),
    ColumnSpec::text("phone", "Phone", true),
    ColumnSpec::text("email", "Email", true),
    ColumnSpec::text("street", "Street", true),
    ColumnSpec::text("city", "City", true),
    ColumnSpec::text("state", "State", true),
    ColumnSpec::text("zip", "ZIP", true),
    ColumnSpec::text("relationshipType", "Relationship", true),
];

const INTERACTION_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::text("id", "ID", true),
    ColumnSpec::text("account", "Account", true),
    ColumnSpec::text("name", "Name", true),
    ColumnSpec {
        field: "type",
        label: "Type",
        kind: ColumnKind::Enumerated(INTERACTION_TYPES),
        sortable: true,
    },
    ColumnSpec {
        field: "method",
        label: "Method",
        kind: ColumnKind::Enumerated(INTERACTION_METHODS),
        sortable: true,
    },
    ColumnSpec {
        field: "date",
        label: "Date",
        kind: ColumnKind::Date,
        sortable: true,
    },
    ColumnSpec {
        field: "duration",
        label: "Duration",
        kind: ColumnKind::Enumerated(INTERACTION_DURATIONS),
        sortable: true,
    },
    ColumnSpec::text("notes", "Notes", true),
];

impl Resource for Persons {
    type Record = Person;

    const KIND: ResourceKind = ResourceKind::Person;

    fn columns() -> &'static [ColumnSpec] {
        PERSON_COLUMNS
    }

    fn id(record: &Person) -> RecordId {
        record.id
    }

    fn cell(record: &Person, field: &str) -> Option<String> {
        let fields = &record.fields;
        let value = match field {
            "id" => return Some(record.id.to_string()),
            "name" => &fields.name,
            "phone" => &fields.phone,
            "email" => &fields.email,
            "street" => &fields.street,
            "city" => &fields.city,
            "state" => &fields.state,
            "zip" => &fields.zip,
            "relationshipType" => &fields.relationship_type,
            _ => return None,
        };
        Some(value.clone())
    }
}

impl Resource for Interactions {
    type Record = Interaction;

    const KIND: ResourceKind = ResourceKind::Interaction;

    fn columns() -> &'static [ColumnSpec] {
        INTERACTION_COLUMNS
    }

    fn id(record: &Interaction) -> RecordId {
        record.id
    }

    fn cell(record: &Interaction, field: &str) -> Option<String> {
        let fields = &record.fields;
        let value = match field {
            "id" => return Some(record.id.to_string()),
            "account" => &fields.account,
            "name" => &fields.name,
            "type" => &fields.kind,
            "method" => &fields.method,
            "date" => {
                return Some(
                    leading_date(&fields.date)
                        .map(|date| date.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| fields.date.clone()),
                )
            }
            "duration" => &fields.duration,
            "notes" => &fields.notes,
            _ => return None,
        };
        Some(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_decodes_nulls_numbers_and_aliases() {
        let json = serde_json::json!({
            "id": 7,
            "name": "Ann Smith",
            "phone": 5551234,
            "email": null,
            "relationship_type": "Friend",
            "isDeleted": 1
        });

        let person: Person = serde_json::from_value(json).expect("person should decode");

        assert_eq!(person.id, RecordId(7));
        assert_eq!(person.fields.phone, "5551234");
        assert_eq!(person.fields.email, "");
        assert_eq!(person.fields.zip, "");
        assert_eq!(person.fields.relationship_type, "Friend");
        assert!(person.is_deleted);
    }

    #[test]
    fn interaction_cell_shows_calendar_day() {
        let json = serde_json::json!({
            "id": 3,
            "personId": 9,
            "account": 1001,
            "name": "Ann",
            "type": "Meeting",
            "date": "2024-05-01T00:00:00.000Z"
        });

        let interaction: Interaction =
            serde_json::from_value(json).expect("interaction should decode");

        assert_eq!(interaction.person_id, Some(RecordId(9)));
        assert_eq!(Interactions::cell(&interaction, "account").as_deref(), Some("1001"));
        assert_eq!(Interactions::cell(&interaction, "type").as_deref(), Some("Meeting"));
        assert_eq!(
            Interactions::cell(&interaction, "date").as_deref(),
            Some("2024-05-01")
        );
        assert_eq!(Interactions::cell(&interaction, "missing"), None);
    }

    #[test]
    fn parse_filter_follows_column_kind() {
        let type_column = Interactions::column("type").expect("type column");
        assert_eq!(
            type_column.parse_filter("Support, Meeting").expect("valid options"),
            Some(FilterValue::one_of(["Meeting", "Support"]))
        );
        assert_eq!(type_column.parse_filter("Any").expect("any clears"), None);
        assert!(type_column.parse_filter("Lunch").is_err());

        let date_column = Interactions::column("date").expect("date column");
        assert!(matches!(
            date_column.parse_filter("2024-05-01"),
            Ok(Some(FilterValue::Date(_)))
        ));
        assert!(date_column.parse_filter("05/01/2024").is_err());

        let name_column = Persons::column("name").expect("name column");
        assert_eq!(name_column.parse_filter("  ").expect("blank clears"), None);
    }
}
