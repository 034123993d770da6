use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One `field == value` term of an OR-group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualityClause {
    pub field: String,
    pub value: Value,
}

impl EqualityClause {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A filter term. Terms of a query are joined conjunctively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Filter {
    Equals { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    /// Matches when any clause matches.
    Or { clauses: Vec<EqualityClause> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub size: usize,
    pub index: usize,
}

impl Page {
    /// Saturates, so a page past the addressable range is simply empty.
    pub fn offset(&self) -> usize {
        self.index.saturating_mul(self.size)
    }
}

/// An immutable, normalized query plan. Build it with
/// [`QueryComposer`](super::QueryComposer); derive variations with the
/// `with_*` methods, which return new values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub(super) collection: String,
    pub(super) filters: Vec<Filter>,
    pub(super) order: Vec<SortKey>,
    pub(super) page: Option<Page>,
}

impl Query {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Full ordering, ending with the `id` tie-break.
    pub fn order(&self) -> &[SortKey] {
        &self.order
    }

    pub fn page(&self) -> Option<Page> {
        self.page
    }

    /// Canonical serialized plan; byte-identical for identical state.
    pub fn plan_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    /// The same query pointed at another page index.
    pub fn with_page_index(&self, index: usize) -> Self {
        let mut next = self.clone();
        if let Some(page) = next.page.as_mut() {
            page.index = index;
        }
        next
    }

    /// The same query without pagination (used for subscriptions and counts).
    pub fn without_page(&self) -> Self {
        Self {
            page: None,
            ..self.clone()
        }
    }
}
