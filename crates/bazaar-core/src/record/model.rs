use crate::error::{BazaarError, Result};
use crate::schema::ID_FIELD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field map of a record, excluding its `id`.
pub type Fields = Map<String, Value>;

/// Partial field map applied with merge semantics.
pub type Patch = Fields;

/// One entity instance. `id` is immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Creates a record, dropping any stray `id` entry from `fields`.
    pub fn new(id: impl Into<String>, mut fields: Fields) -> Self {
        fields.remove(ID_FIELD);
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Parses a flat JSON object of the form `{ "id": .., ...fields }`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(BazaarError::validation("record must be a JSON object"));
        };
        let id = match object.remove(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => return Err(BazaarError::validation("record is missing a string id")),
        };
        Ok(Self { id, fields: object })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Value used by filters and sorting; `id` resolves to the record id.
    pub fn value_of(&self, field: &str) -> Value {
        if field == ID_FIELD {
            return Value::String(self.id.clone());
        }
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Merges `patch` into this record. Fields absent from the patch are
    /// untouched; an `id` entry is ignored.
    pub fn apply_patch(&mut self, patch: &Patch) {
        for (name, value) in patch {
            if name == ID_FIELD {
                continue;
            }
            self.fields.insert(name.clone(), value.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// A live change delivered to subscribers. For `Deleted` the record holds
/// its last known state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub record: Record,
}

impl RecordEvent {
    pub fn inserted(record: Record) -> Self {
        Self {
            kind: ChangeKind::Inserted,
            record,
        }
    }

    pub fn updated(record: Record) -> Self {
        Self {
            kind: ChangeKind::Updated,
            record,
        }
    }

    pub fn deleted(record: Record) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            record,
        }
    }
}
