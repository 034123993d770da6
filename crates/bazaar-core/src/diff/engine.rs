use super::comparator::{FieldComparator, builtin_equivalent};
use crate::error::{BazaarError, Result};
use crate::record::{Fields, Patch};
use crate::schema::{CollectionSchema, FieldDescriptor, FieldKind, ID_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Comparison result for one schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub field_name: String,
    pub changed: bool,
    pub old_value: Value,
    pub new_value: Value,
}

/// Computes field-level diffs between two versions of a record.
///
/// Fields are visited in schema declaration order, never in map key order.
/// Custom fields need a comparator registered under their field name; a
/// custom field without one is logged and left out of the result.
#[derive(Clone, Default)]
pub struct DiffEngine {
    custom: HashMap<String, Arc<dyn FieldComparator>>,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the comparator used for the custom field `field_name`.
    pub fn with_comparator<C>(mut self, field_name: impl Into<String>, comparator: C) -> Self
    where
        C: FieldComparator + 'static,
    {
        self.custom.insert(field_name.into(), Arc::new(comparator));
        self
    }

    pub fn has_comparator(&self, field_name: &str) -> bool {
        self.custom.contains_key(field_name)
    }

    /// Fails if any custom field of `schema` has no registered comparator.
    pub fn check_schema(&self, schema: &CollectionSchema) -> Result<()> {
        let missing: Vec<&str> = schema
            .fields()
            .iter()
            .filter(|field| field.kind == FieldKind::Custom && !self.has_comparator(&field.name))
            .map(|field| field.name.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BazaarError::validation(format!(
                "schema '{}' has custom fields without a comparator: {}",
                schema.collection(),
                missing.join(", ")
            )))
        }
    }

    /// Diffs `old` against `new` over `fields`.
    ///
    /// Returns one entry per diffable field, in declaration order. Passing a
    /// descriptor named `id` is a caller error.
    pub fn diff(
        &self,
        fields: &[FieldDescriptor],
        old: &Fields,
        new: &Fields,
    ) -> Result<Vec<DiffEntry>> {
        if fields.iter().any(|field| field.name == ID_FIELD) {
            return Err(BazaarError::validation("the 'id' field cannot be diffed"));
        }

        let mut entries = Vec::with_capacity(fields.len());
        for field in fields {
            let old_value = old.get(&field.name).cloned().unwrap_or(Value::Null);
            let new_value = new.get(&field.name).cloned().unwrap_or(Value::Null);

            let equivalent = match builtin_equivalent(field.kind, &old_value, &new_value) {
                Some(equivalent) => equivalent,
                None => match self.custom.get(&field.name) {
                    Some(comparator) => comparator.equivalent(&old_value, &new_value),
                    None => {
                        tracing::warn!(
                            "[DiffEngine] No comparator for custom field '{}', skipping it",
                            field.name
                        );
                        continue;
                    }
                },
            };

            entries.push(DiffEntry {
                field_name: field.name.clone(),
                changed: !equivalent,
                old_value,
                new_value,
            });
        }

        tracing::debug!(
            "[DiffEngine] Diffed {} fields, {} changed",
            entries.len(),
            entries.iter().filter(|entry| entry.changed).count()
        );
        Ok(entries)
    }

    /// Convenience wrapper over [`DiffEngine::diff`] for a whole schema.
    pub fn diff_schema(
        &self,
        schema: &CollectionSchema,
        old: &Fields,
        new: &Fields,
    ) -> Result<Vec<DiffEntry>> {
        self.diff(schema.fields(), old, new)
    }

    /// Builds the applyable patch: new values of changed fields only.
    pub fn to_patch(entries: &[DiffEntry]) -> Patch {
        entries
            .iter()
            .filter(|entry| entry.changed)
            .map(|entry| (entry.field_name.clone(), entry.new_value.clone()))
            .collect()
    }
}

impl std::fmt::Debug for DiffEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.custom.keys().collect();
        names.sort();
        f.debug_struct("DiffEngine")
            .field("custom_comparators", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> CollectionSchema {
        CollectionSchema::new(
            "assets",
            vec![
                FieldDescriptor::new("title", FieldKind::Text),
                FieldDescriptor::new("tags", FieldKind::TagSet),
                FieldDescriptor::new("released", FieldKind::Date),
                FieldDescriptor::new("author", FieldKind::ReferenceId),
                FieldDescriptor::new("preview", FieldKind::Custom),
            ],
        )
        .unwrap()
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_tag_order_is_not_a_change() {
        let engine = DiffEngine::new().with_comparator("preview", |a: &Value, b: &Value| a == b);
        let entries = engine
            .diff_schema(
                &schema(),
                &fields(json!({"tags": ["a", "b"]})),
                &fields(json!({"tags": ["b", "a"]})),
            )
            .unwrap();

        let tags = entries.iter().find(|e| e.field_name == "tags").unwrap();
        assert!(!tags.changed);
        assert!(entries.iter().all(|e| !e.changed));
    }

    #[test]
    fn test_output_follows_declaration_order_and_omits_id() {
        let engine = DiffEngine::new().with_comparator("preview", |a: &Value, b: &Value| a == b);
        // Key order of the maps is deliberately different from the schema.
        let old = fields(json!({"preview": 1, "author": "u1", "id": "a1", "title": "x"}));
        let new = fields(json!({"title": "y", "id": "a2", "preview": 2}));

        let entries = engine.diff_schema(&schema(), &old, &new).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.field_name.as_str()).collect();

        assert_eq!(names, vec!["title", "tags", "released", "author", "preview"]);
        assert!(entries.iter().all(|e| e.field_name != "id"));
    }

    #[test]
    fn test_custom_without_comparator_is_excluded() {
        let engine = DiffEngine::new();
        let entries = engine
            .diff_schema(
                &schema(),
                &fields(json!({"preview": "a"})),
                &fields(json!({"preview": "b"})),
            )
            .unwrap();

        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| e.field_name != "preview"));
        assert!(engine.check_schema(&schema()).is_err());
    }

    #[test]
    fn test_id_descriptor_is_rejected() {
        let engine = DiffEngine::new();
        let descriptors = vec![FieldDescriptor::new("id", FieldKind::Text)];
        let result = engine.diff(&descriptors, &Fields::new(), &Fields::new());
        assert!(matches!(result, Err(BazaarError::ValidationFailed(_))));
    }

    #[test]
    fn test_to_patch_keeps_changed_fields() {
        let engine = DiffEngine::new().with_comparator("preview", |a: &Value, b: &Value| a == b);
        let entries = engine
            .diff_schema(
                &schema(),
                &fields(json!({"title": "Old", "author": "u1"})),
                &fields(json!({"title": "New", "author": {"id": "u1"}})),
            )
            .unwrap();

        let patch = DiffEngine::to_patch(&entries);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("title"), Some(&json!("New")));
    }
}
