use super::eval::compare_values;
use super::model::{EqualityClause, Filter, Page, Query, SortDirection, SortKey};
use crate::error::{BazaarError, Result};
use crate::schema::ID_FIELD;
use serde_json::Value;
use std::cmp::Ordering;

/// Builder for [`Query`].
///
/// Pipeline order of the resulting plan: collection, equality/membership
/// filters, OR-groups, sort (with an `id` ascending tie-break appended),
/// pagination. Filters are normalized on `build` so the order in which they
/// were added never changes the plan.
///
/// # Example
///
/// ```
/// use bazaar_core::query::{QueryComposer, SortDirection};
/// use serde_json::json;
///
/// let query = QueryComposer::new("assets")
///     .where_eq("category", json!("textures"))
///     .any_of([("status", json!("pending")), ("status", json!("approved"))])
///     .sort_by("createdat", SortDirection::Desc)
///     .paginate(20, 0)
///     .build()
///     .unwrap();
///
/// assert_eq!(query.order().last().unwrap().field, "id");
/// ```
#[derive(Debug, Clone)]
pub struct QueryComposer {
    collection: String,
    filters: Vec<Filter>,
    or_groups: Vec<Vec<EqualityClause>>,
    sort: Vec<SortKey>,
    page: Option<(usize, usize)>,
}

impl QueryComposer {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            or_groups: Vec::new(),
            sort: Vec::new(),
            page: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Equals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filters.push(Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Adds an OR-group of equality clauses (e.g. sub-view status tabs).
    pub fn any_of<I, F, V>(mut self, clauses: I) -> Self
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<Value>,
    {
        self.or_groups.push(
            clauses
                .into_iter()
                .map(|(field, value)| EqualityClause::new(field, value))
                .collect(),
        );
        self
    }

    /// Sets the primary sort key, replacing any earlier sort.
    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = vec![SortKey {
            field: field.into(),
            direction,
        }];
        self
    }

    /// Adds a secondary sort key after the current ones.
    pub fn then_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn paginate(mut self, size: usize, index: usize) -> Self {
        self.page = Some((size, index));
        self
    }

    pub fn build(self) -> Result<Query> {
        validate_collection(&self.collection)?;

        let mut filters: Vec<Filter> = Vec::with_capacity(self.filters.len());
        for filter in self.filters {
            filters.push(normalize_filter(filter));
        }
        sort_and_dedup(&mut filters);

        let mut or_filters = Vec::with_capacity(self.or_groups.len());
        for mut clauses in self.or_groups {
            if clauses.is_empty() {
                return Err(BazaarError::validation("OR-group must contain a clause"));
            }
            clauses.sort_by(compare_clauses);
            clauses.dedup();
            or_filters.push(Filter::Or { clauses });
        }
        sort_and_dedup(&mut or_filters);
        filters.extend(or_filters);

        let mut order = Vec::with_capacity(self.sort.len() + 1);
        for key in self.sort {
            if key.field.is_empty() {
                return Err(BazaarError::validation("sort field must not be empty"));
            }
            let terminal = key.field == ID_FIELD;
            order.push(key);
            if terminal {
                break;
            }
        }
        if order.last().is_none_or(|key| key.field != ID_FIELD) {
            order.push(SortKey {
                field: ID_FIELD.to_string(),
                direction: SortDirection::Asc,
            });
        }

        let page = match self.page {
            Some((0, _)) => return Err(BazaarError::validation("page size must be positive")),
            Some((size, index)) if size.checked_mul(index).is_none() => {
                return Err(BazaarError::validation(format!(
                    "page {} of size {} is out of range",
                    index, size
                )));
            }
            Some((size, index)) => Some(Page { size, index }),
            None => None,
        };

        Ok(Query {
            collection: self.collection,
            filters,
            order,
            page,
        })
    }
}

fn validate_collection(collection: &str) -> Result<()> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(BazaarError::validation(format!(
            "collection identifier '{}' must be lowercase",
            collection
        )))
    }
}

fn normalize_filter(filter: Filter) -> Filter {
    match filter {
        Filter::In { field, mut values } => {
            values.sort_by(compare_values);
            values.dedup_by(|a, b| compare_values(a, b) == Ordering::Equal);
            Filter::In { field, values }
        }
        other => other,
    }
}

fn compare_clauses(a: &EqualityClause, b: &EqualityClause) -> Ordering {
    a.field
        .cmp(&b.field)
        .then_with(|| compare_values(&a.value, &b.value))
}

fn sort_and_dedup(filters: &mut Vec<Filter>) {
    let mut keyed: Vec<(String, Filter)> = filters
        .drain(..)
        .map(|filter| (serde_json::to_string(&filter).unwrap_or_default(), filter))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);
    filters.extend(keyed.into_iter().map(|(_, filter)| filter));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Fields, Record};
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_identical_state_yields_identical_plan() {
        let a = QueryComposer::new("assets")
            .where_eq("category", json!("audio"))
            .where_in("license", [json!("cc0"), json!("cc-by")])
            .any_of([("status", json!("pending")), ("status", json!("approved"))])
            .sort_by("title", SortDirection::Asc)
            .paginate(20, 1)
            .build()
            .unwrap();
        let b = QueryComposer::new("assets")
            .any_of([("status", json!("approved")), ("status", json!("pending"))])
            .where_in("license", [json!("cc-by"), json!("cc0"), json!("cc0")])
            .where_eq("category", json!("audio"))
            .sort_by("title", SortDirection::Asc)
            .paginate(20, 1)
            .build()
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.plan_key(), b.plan_key());
    }

    #[test]
    fn test_or_groups_follow_plain_filters() {
        let query = QueryComposer::new("assets")
            .any_of([("status", json!("pending"))])
            .where_eq("category", json!("audio"))
            .build()
            .unwrap();

        assert!(matches!(query.filters()[0], Filter::Equals { .. }));
        assert!(matches!(query.filters()[1], Filter::Or { .. }));
    }

    #[test]
    fn test_tie_break_appended_once() {
        let query = QueryComposer::new("assets")
            .sort_by("downloads", SortDirection::Desc)
            .build()
            .unwrap();
        let fields: Vec<&str> = query.order().iter().map(|k| k.field.as_str()).collect();
        assert_eq!(fields, vec!["downloads", "id"]);

        let by_id = QueryComposer::new("assets")
            .sort_by("id", SortDirection::Desc)
            .build()
            .unwrap();
        assert_eq!(by_id.order().len(), 1);
        assert_eq!(by_id.order()[0].direction, SortDirection::Desc);
    }

    #[test]
    fn test_invalid_input_rejected() {
        assert!(QueryComposer::new("Assets").build().is_err());
        assert!(QueryComposer::new("").build().is_err());
        assert!(QueryComposer::new("assets").paginate(0, 0).build().is_err());
        let empty_group: Vec<(&str, Value)> = Vec::new();
        assert!(QueryComposer::new("assets").any_of(empty_group).build().is_err());
    }

    #[test]
    fn test_pagination_partitions_tied_dataset() {
        // 45 rows, primary sort key has only three distinct values.
        let rows: Vec<Record> = (0..45)
            .map(|i| {
                Record::from_value(json!({
                    "id": format!("row-{:02}", (i * 7) % 45),
                    "rank": i % 3,
                }))
                .unwrap()
            })
            .collect();

        let base = QueryComposer::new("getfullassets")
            .sort_by("rank", SortDirection::Asc)
            .paginate(20, 0)
            .build()
            .unwrap();

        let mut seen = HashSet::new();
        let mut sizes = Vec::new();
        for index in 0..3 {
            let page = base.with_page_index(index).apply(rows.clone());
            sizes.push(page.len());
            for record in page {
                assert!(seen.insert(record.id), "row repeated across pages");
            }
        }

        assert_eq!(sizes, vec![20, 20, 5]);
        assert_eq!(seen.len(), 45);
    }

    #[test]
    fn test_offset_is_index_times_size() {
        let query = QueryComposer::new("assets")
            .paginate(25, 3)
            .build()
            .unwrap();
        assert_eq!(query.page().unwrap().offset(), 75);
        assert!(query.without_page().page().is_none());
    }

    #[test]
    fn test_out_of_range_page_is_rejected() {
        let result = QueryComposer::new("assets")
            .paginate(usize::MAX / 2 + 1, 2)
            .build();
        assert!(matches!(result, Err(BazaarError::ValidationFailed(_))));

        let page = Page {
            size: usize::MAX / 2 + 1,
            index: 2,
        };
        assert_eq!(page.offset(), usize::MAX);
        let mut paged = QueryComposer::new("assets").build().unwrap();
        paged.page = Some(page);
        let rows = vec![Record::new("a1", Fields::new())];
        assert!(paged.apply(rows).is_empty());
    }
}
