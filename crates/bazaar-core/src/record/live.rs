//! Caller-side reconciliation of subscription events.
//!
//! The record store only delivers events; a screen holding a list keeps it
//! current by feeding each event into a `LiveCollection`.

use super::model::{ChangeKind, Record, RecordEvent};
use crate::query::Query;

#[derive(Debug, Clone, Default)]
pub struct LiveCollection {
    records: Vec<Record>,
    query: Option<Query>,
}

impl LiveCollection {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            query: None,
        }
    }

    /// A collection that keeps only records matching `query`, in its order.
    ///
    /// The page of the query is not re-applied, so the list can grow past the
    /// page it was seeded from.
    pub fn with_query(query: Query, records: Vec<Record>) -> Self {
        let mut live = Self {
            records,
            query: Some(query.without_page()),
        };
        live.resort();
        live
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Applies one event. Returns true if the list changed.
    ///
    /// Replaying an event is harmless: an insert of a known id replaces it,
    /// an update of an unknown id inserts it, a delete of an unknown id is a
    /// no-op.
    pub fn apply(&mut self, event: &RecordEvent) -> bool {
        let position = self
            .records
            .iter()
            .position(|record| record.id == event.record.id);
        let wanted = self
            .query
            .as_ref()
            .is_none_or(|query| query.matches(&event.record));

        let changed = match (event.kind, position) {
            (ChangeKind::Deleted, Some(index)) => {
                self.records.remove(index);
                true
            }
            (ChangeKind::Deleted, None) => false,
            (_, Some(index)) if !wanted => {
                self.records.remove(index);
                true
            }
            (_, Some(index)) => {
                let changed = self.records[index] != event.record;
                self.records[index] = event.record.clone();
                changed
            }
            (_, None) if wanted => {
                self.records.push(event.record.clone());
                true
            }
            (_, None) => false,
        };

        if changed {
            self.resort();
        }
        changed
    }

    fn resort(&mut self) {
        if let Some(query) = &self.query {
            self.records.retain(|record| query.matches(record));
            self.records.sort_by(|a, b| query.compare(a, b));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryComposer, SortDirection};
    use serde_json::json;

    fn record(id: &str, status: &str, rank: i64) -> Record {
        Record::from_value(json!({"id": id, "status": status, "rank": rank})).unwrap()
    }

    #[test]
    fn test_insert_update_delete() {
        let mut live = LiveCollection::new(vec![record("a", "pending", 1)]);

        assert!(live.apply(&RecordEvent::inserted(record("b", "pending", 2))));
        assert_eq!(live.len(), 2);

        assert!(live.apply(&RecordEvent::updated(record("a", "approved", 1))));
        assert_eq!(live.get("a").unwrap().get("status"), Some(&json!("approved")));

        assert!(live.apply(&RecordEvent::deleted(record("b", "pending", 2))));
        assert_eq!(live.len(), 1);

        assert!(!live.apply(&RecordEvent::deleted(record("zzz", "pending", 0))));
    }

    #[test]
    fn test_replayed_insert_is_idempotent() {
        let mut live = LiveCollection::new(Vec::new());
        let event = RecordEvent::inserted(record("a", "pending", 1));
        assert!(live.apply(&event));
        assert!(!live.apply(&event));
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_query_bound_collection_filters_and_orders() {
        let query = QueryComposer::new("amendments")
            .where_eq("status", json!("pending"))
            .sort_by("rank", SortDirection::Desc)
            .build()
            .unwrap();
        let mut live = LiveCollection::with_query(
            query,
            vec![record("a", "pending", 1), record("x", "approved", 9)],
        );
        assert_eq!(live.len(), 1);

        live.apply(&RecordEvent::inserted(record("b", "pending", 5)));
        let ids: Vec<&str> = live.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        // Leaving the filter removes it from the list.
        assert!(live.apply(&RecordEvent::updated(record("b", "approved", 5))));
        assert!(live.get("b").is_none());

        // Events for non-matching records are ignored.
        assert!(!live.apply(&RecordEvent::inserted(record("c", "approved", 3))));
    }
}
