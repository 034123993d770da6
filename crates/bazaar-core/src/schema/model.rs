use crate::error::{BazaarError, Result};
use crate::record::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Name of the immutable identity field every record carries.
pub const ID_FIELD: &str = "id";

/// The closed set of field kinds. Each kind has exactly one diff comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Text,
    Markdown,
    TagSet,
    Date,
    ReferenceId,
    Multichoice,
    Checkbox,
    /// Compared by a caller-registered comparator keyed on the field name.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            options: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    /// Checks the JSON shape of a single value against this field's kind.
    fn check_value(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if self.required {
                return Err(BazaarError::validation(format!(
                    "field '{}' is required",
                    self.name
                )));
            }
            return Ok(());
        }

        let shape_ok = match self.kind {
            FieldKind::Text | FieldKind::Markdown | FieldKind::Date => {
                value.is_string() || (self.kind == FieldKind::Date && value.is_number())
            }
            FieldKind::TagSet => value
                .as_array()
                .is_some_and(|tags| tags.iter().all(Value::is_string)),
            FieldKind::Checkbox => value.is_boolean(),
            FieldKind::ReferenceId => value.is_string() || value.is_number(),
            FieldKind::Multichoice => value.is_string() || value.is_array(),
            FieldKind::Custom => true,
        };
        if !shape_ok {
            return Err(BazaarError::validation(format!(
                "field '{}' has a value that does not match kind {:?}",
                self.name, self.kind
            )));
        }

        if let (Some(options), FieldKind::Multichoice) = (&self.options, self.kind) {
            let chosen: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for choice in chosen {
                let allowed = choice
                    .as_str()
                    .is_some_and(|choice| options.iter().any(|option| option == choice));
                if !allowed {
                    return Err(BazaarError::validation(format!(
                        "field '{}' does not allow choice {}",
                        self.name, choice
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Immutable, ordered field list for one collection or view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    collection: String,
    fields: Vec<FieldDescriptor>,
}

impl CollectionSchema {
    /// Builds a schema, rejecting an `id` field, empty names and duplicates.
    pub fn new(collection: impl Into<String>, fields: Vec<FieldDescriptor>) -> Result<Self> {
        let collection = collection.into();
        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.is_empty() {
                return Err(BazaarError::validation(format!(
                    "schema '{}' has a field with an empty name",
                    collection
                )));
            }
            if field.name == ID_FIELD {
                return Err(BazaarError::validation(format!(
                    "schema '{}' must not declare the '{}' field",
                    collection, ID_FIELD
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(BazaarError::validation(format!(
                    "schema '{}' declares '{}' twice",
                    collection, field.name
                )));
            }
        }
        Ok(Self { collection, fields })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Validates a merge patch: known fields only, no `id`, required fields
    /// not nulled, values shaped for their kind.
    pub fn validate_patch(&self, patch: &Fields) -> Result<()> {
        for (name, value) in patch {
            if name == ID_FIELD {
                return Err(BazaarError::validation("record id is immutable"));
            }
            let field = self.field(name).ok_or_else(|| {
                BazaarError::validation(format!(
                    "unknown field '{}' for collection '{}'",
                    name, self.collection
                ))
            })?;
            field.check_value(value)?;
        }
        Ok(())
    }

    /// Validates the fields of a record about to be created.
    pub fn validate_new(&self, fields: &Fields) -> Result<()> {
        self.validate_patch(fields)?;
        for field in self.fields.iter().filter(|field| field.required) {
            if fields.get(&field.name).is_none_or(Value::is_null) {
                return Err(BazaarError::validation(format!(
                    "field '{}' is required",
                    field.name
                )));
            }
        }
        Ok(())
    }
}
