//! In-memory evaluation of a query against records.

use super::model::{Filter, Query, SortDirection};
use crate::record::Record;
use serde_json::Value;
use std::cmp::Ordering;

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(0.0)
                .total_cmp(&y.as_f64().unwrap_or(0.0)),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Equals { field, value } => values_equal(&record.value_of(field), value),
            Filter::In { field, values } => {
                let actual = record.value_of(field);
                values.iter().any(|candidate| values_equal(&actual, candidate))
            }
            Filter::Or { clauses } => clauses
                .iter()
                .any(|clause| values_equal(&record.value_of(&clause.field), &clause.value)),
        }
    }
}

impl Query {
    /// True when the record passes every filter. Ordering and page are ignored.
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|filter| filter.matches(record))
    }

    /// Orders two records by the full sort key list, tie-break included.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.order {
            let ordering = compare_values(&a.value_of(&key.field), &b.value_of(&key.field));
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Filters, orders and pages `records`.
    pub fn apply<I>(&self, records: I) -> Vec<Record>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut matched: Vec<Record> = records
            .into_iter()
            .filter(|record| self.matches(record))
            .collect();
        matched.sort_by(|a, b| self.compare(a, b));

        match self.page {
            Some(page) => matched
                .into_iter()
                .skip(page.offset())
                .take(page.size)
                .collect(),
            None => matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compare_values_orders_across_types() {
        assert_eq!(compare_values(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(1), &json!(1.0)), Ordering::Equal);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(5), &json!("5")), Ordering::Less);
    }

    fn equals(field: &str, value: Value) -> Filter {
        Filter::Equals {
            field: field.to_string(),
            value,
        }
    }

    fn one_of(field: &str, values: Vec<Value>) -> Filter {
        Filter::In {
            field: field.to_string(),
            values,
        }
    }

    #[test]
    fn test_filter_matches() {
        let record = Record::from_value(json!({"id": "r1", "status": "pending", "n": 3})).unwrap();

        assert!(equals("status", json!("pending")).matches(&record));
        assert!(one_of("n", vec![json!(1), json!(3)]).matches(&record));
        assert!(!one_of("n", vec![]).matches(&record));
        assert!(equals("id", json!("r1")).matches(&record));
        assert!(equals("missing", json!(null)).matches(&record));
    }
}
