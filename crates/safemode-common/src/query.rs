//! Narrow query DSL shared by the primary and failover paths
//!
//! Failover mode supports equality matching only. A filter value matches a
//! document field when the two are equal, when the field is an array that
//! contains the value, or when both name the same object id. Nested fields
//! are addressed with dotted paths.

use crate::types::{Document, scalar_string};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Equality filter: every field must match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, Value>);

impl Filter {
    /// Create an empty filter (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Merge another filter into this one; later conditions win
    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Check whether a document satisfies every condition
    pub fn matches(&self, doc: &Document) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| field_matches(get_path(doc, field), expected))
    }
}

impl From<Document> for Filter {
    fn from(doc: Document) -> Self {
        Self(doc.into_iter().collect())
    }
}

/// Look up a dotted path inside a document
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn field_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        // A missing field only matches an explicit null
        None => expected.is_null(),
        Some(actual) => {
            values_equal(actual, expected)
                || matches!(actual, Value::Array(items) if items.iter().any(|v| values_equal(v, expected)))
        }
    }
}

/// Equality that treats `{"$oid": x}` and `x` as the same identifier
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    let is_oid = |v: &Value| matches!(v, Value::Object(m) if m.contains_key("$oid"));
    if is_oid(a) || is_oid(b) {
        return match (scalar_string(a), scalar_string(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };
    }
    false
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Single-field sort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }

    /// Compare two documents under this sort
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ord = compare_values(get_path(a, &self.field), get_path(b, &self.field));
        match self.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }
}

/// Sort, skip and limit applied after filtering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub sort: Option<SortSpec>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Apply sort, skip and limit to an already filtered list
    pub fn apply(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if let Some(sort) = &self.sort {
            // stable, so ties keep insertion order
            docs.sort_by(|a, b| sort.compare(a, b));
        }
        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        docs.into_iter().skip(skip).take(limit).collect()
    }
}

/// Rank of a JSON type in the cross-type ordering (missing and null first)
const fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total ordering over optional JSON values
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_)))
        | (Some(x @ Value::Array(_)), Some(y @ Value::Array(_))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_equality_filter() {
        let order = doc(json!({"userId": "u1", "status": "paid", "total": 10}));
        assert!(Filter::new().matches(&order));
        assert!(Filter::new().eq("status", "paid").matches(&order));
        assert!(!Filter::new().eq("status", "shipped").matches(&order));
        assert!(Filter::new().eq("total", 10).eq("userId", "u1").matches(&order));
        assert!(!Filter::new().eq("missing", "x").matches(&order));
        assert!(Filter::new().eq("missing", Value::Null).matches(&order));
    }

    #[test]
    fn test_array_and_nested_match() {
        let product = doc(json!({"tags": ["eco", "local"], "seller": {"id": "s1"}}));
        assert!(Filter::new().eq("tags", "eco").matches(&product));
        assert!(Filter::new().eq("seller.id", "s1").matches(&product));
        assert!(!Filter::new().eq("seller.id", "s2").matches(&product));
    }

    #[test]
    fn test_object_id_equality() {
        let order = doc(json!({"userId": {"$oid": "65f0"}}));
        assert!(Filter::new().eq("userId", "65f0").matches(&order));
    }

    #[test]
    fn test_options_sort_skip_limit() {
        let docs: Vec<Document> = (1..=5).map(|i| doc(json!({"n": i}))).collect();
        let out = QueryOptions::new()
            .sort(SortSpec::desc("n"))
            .skip(1)
            .limit(2)
            .apply(docs);
        let ns: Vec<i64> = out.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![4, 3]);
    }

    #[test]
    fn test_missing_sorts_first() {
        let a = doc(json!({"createdAt": "2024-01-01"}));
        let b = doc(json!({}));
        assert_eq!(SortSpec::asc("createdAt").compare(&b, &a), Ordering::Less);
        assert_eq!(SortSpec::desc("createdAt").compare(&b, &a), Ordering::Greater);
    }
}
