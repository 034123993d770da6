use crate::error::{BazaarError, Result};
use crate::record::{Fields, Patch, Record};
use crate::schema::ID_FIELD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collection that stores amendment records.
pub const AMENDMENTS_COLLECTION: &str = "amendments";

/// Review state. `Waiting` moves exactly once to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmendmentStatus {
    Waiting,
    Approved,
    Declined,
}

impl AmendmentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AmendmentStatus::Waiting)
    }

    /// The merge patch that records this status on a stored amendment.
    pub fn to_patch(self) -> Patch {
        let mut patch = Patch::new();
        patch.insert(
            "approvalstatus".to_string(),
            Value::String(self.as_str().to_string()),
        );
        patch
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AmendmentStatus::Waiting => "Waiting",
            AmendmentStatus::Approved => "Approved",
            AmendmentStatus::Declined => "Declined",
        }
    }
}

/// A reviewer's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approved,
    Declined,
}

impl Decision {
    pub fn status(&self) -> AmendmentStatus {
        match self {
            Decision::Approved => AmendmentStatus::Approved,
            Decision::Declined => AmendmentStatus::Declined,
        }
    }
}

/// Persisted amendment. Serde names follow the stored record shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amendment {
    pub id: String,
    #[serde(rename = "parenttable")]
    pub parent_table: String,
    #[serde(rename = "parentid")]
    pub parent_id: String,
    #[serde(rename = "fields")]
    pub fields_patch: Patch,
    #[serde(default)]
    pub comments: String,
    #[serde(rename = "createdby")]
    pub created_by: String,
    #[serde(rename = "createdat")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "approvalstatus")]
    pub status: AmendmentStatus,
}

impl Amendment {
    /// Decodes an amendment from its stored record.
    pub fn from_record(record: &Record) -> Result<Self> {
        let value = serde_json::to_value(record)?;
        serde_json::from_value(value).map_err(|e| {
            BazaarError::validation(format!("record '{}' is not an amendment: {}", record.id, e))
        })
    }

    pub fn is_waiting(&self) -> bool {
        self.status == AmendmentStatus::Waiting
    }
}

/// The fields of an amendment before it has been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct AmendmentDraft {
    pub parent_table: String,
    pub parent_id: String,
    pub fields_patch: Patch,
    pub comments: String,
    pub created_by: String,
}

impl AmendmentDraft {
    /// Encodes the draft as a `Waiting` amendment record body.
    pub fn into_fields(self, created_at: DateTime<Utc>) -> Result<Fields> {
        let amendment = Amendment {
            id: String::new(),
            parent_table: self.parent_table,
            parent_id: self.parent_id,
            fields_patch: self.fields_patch,
            comments: self.comments,
            created_by: self.created_by,
            created_at,
            status: AmendmentStatus::Waiting,
        };
        match serde_json::to_value(amendment)? {
            Value::Object(mut fields) => {
                fields.remove(ID_FIELD);
                // Fixed width keeps the stored timestamps sortable as strings.
                fields.insert(
                    "createdat".to_string(),
                    Value::String(created_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
                );
                Ok(fields)
            }
            _ => Err(BazaarError::unknown("amendment did not encode as an object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> AmendmentDraft {
        AmendmentDraft {
            parent_table: "assets".to_string(),
            parent_id: "a1".to_string(),
            fields_patch: json!({"title": "Better"}).as_object().cloned().unwrap(),
            comments: "typo".to_string(),
            created_by: "u1".to_string(),
        }
    }

    #[test]
    fn test_draft_uses_persisted_field_names() {
        let fields = draft().into_fields(Utc::now()).unwrap();
        for key in [
            "parenttable",
            "parentid",
            "fields",
            "comments",
            "createdby",
            "createdat",
            "approvalstatus",
        ] {
            assert!(fields.contains_key(key), "missing {key}");
        }
        assert!(!fields.contains_key("id"));
        assert_eq!(fields["approvalstatus"], json!("Waiting"));
    }

    #[test]
    fn test_from_record_round_trips_through_store_shape() {
        let record = Record::new("am-1", draft().into_fields(Utc::now()).unwrap());
        let amendment = Amendment::from_record(&record).unwrap();

        assert_eq!(amendment.id, "am-1");
        assert_eq!(amendment.parent_id, "a1");
        assert!(amendment.is_waiting());
    }

    #[test]
    fn test_from_record_rejects_foreign_record() {
        let record = Record::new("x", json!({"title": "asset"}).as_object().cloned().unwrap());
        assert!(Amendment::from_record(&record).is_err());
    }

    #[test]
    fn test_status_patch() {
        let patch = AmendmentStatus::Approved.to_patch();
        assert_eq!(patch["approvalstatus"], json!("Approved"));
        assert!(AmendmentStatus::Declined.is_terminal());
        assert_eq!(Decision::Declined.status(), AmendmentStatus::Declined);
    }
}
