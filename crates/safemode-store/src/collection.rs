//! Indexed in-memory document collection
//!
//! A unique index on the stable identifier plus multikey secondary indices
//! on a few frequently queried fields. Index keys are the normalized scalar
//! form of a value, so candidates are always re-checked against the filter.

use safemode_common::query::get_path;
use safemode_common::{Document, Filter, QueryOptions, document_id, scalar_string};
use serde_json::Value;
use std::collections::HashMap;

/// Rejected insert
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("duplicate key in {collection}: {id}")]
    DuplicateKey { collection: String, id: String },
}

/// Normalized index keys of a value; arrays index every element
fn index_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_key).collect(),
        other => scalar_key(other).into_iter().collect(),
    }
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        other => scalar_string(other),
    }
}

/// In-memory collection with a unique identifier index
#[derive(Debug)]
pub struct Collection {
    name: String,
    docs: Vec<Document>,
    /// Unique index: identifier -> position
    by_id: HashMap<String, usize>,
    /// Secondary indices: field -> key -> positions
    indexes: HashMap<String, HashMap<String, Vec<usize>>>,
}

impl Collection {
    /// Create an empty collection indexing `indexed_fields`
    pub fn new(name: impl Into<String>, indexed_fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            docs: Vec::new(),
            by_id: HashMap::new(),
            indexes: indexed_fields
                .iter()
                .map(|f| ((*f).to_string(), HashMap::new()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Insert a document
    ///
    /// Documents without `_id` or `id` get a generated `_id`.
    pub fn insert(&mut self, mut doc: Document) -> Result<String, CollectionError> {
        let id = if let Some(id) = document_id(&doc) {
            id
        } else {
            let id = uuid::Uuid::new_v4().to_string();
            doc.insert("_id".to_string(), Value::String(id.clone()));
            id
        };
        if self.by_id.contains_key(&id) {
            return Err(CollectionError::DuplicateKey {
                collection: self.name.clone(),
                id,
            });
        }

        let pos = self.docs.len();
        for (field, index) in &mut self.indexes {
            if let Some(value) = get_path(&doc, field) {
                for key in index_keys(value) {
                    let positions = index.entry(key).or_default();
                    // arrays may repeat an element
                    if positions.last() != Some(&pos) {
                        positions.push(pos);
                    }
                }
            }
        }
        self.by_id.insert(id.clone(), pos);
        self.docs.push(doc);
        Ok(id)
    }

    /// Look up a document by its identifier
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.by_id.get(id).map(|&pos| &self.docs[pos])
    }

    /// Positions that may match the filter, narrowed by the most selective index
    fn candidates(&self, filter: &Filter) -> Option<Vec<usize>> {
        let mut best: Option<Vec<usize>> = None;
        for (field, value) in filter.iter() {
            // Non-scalar values (null, arrays, plain objects) are matched by scan
            let Some(key) = scalar_key(value) else {
                continue;
            };
            // by_id is keyed by `_id` first, so only `_id` filters can use it
            let narrowed = if field == "_id" {
                Some(self.by_id.get(&key).copied().into_iter().collect::<Vec<_>>())
            } else {
                self.indexes
                    .get(field)
                    .map(|index| index.get(&key).cloned().unwrap_or_default())
            };
            if let Some(positions) = narrowed {
                if best.as_ref().is_none_or(|b| positions.len() < b.len()) {
                    best = Some(positions);
                }
            }
        }
        best
    }

    fn matching(&self, filter: &Filter) -> impl Iterator<Item = &Document> {
        let positions: Box<dyn Iterator<Item = usize>> = match self.candidates(filter) {
            Some(positions) => Box::new(positions.into_iter()),
            None => Box::new(0..self.docs.len()),
        };
        positions
            .map(|pos| &self.docs[pos])
            .filter(move |doc| filter.matches(doc))
    }

    /// Equality match with optional sort, skip and limit
    pub fn find(&self, filter: &Filter, options: &QueryOptions) -> Vec<Document> {
        let mut positions: Vec<usize> = match self.candidates(filter) {
            Some(p) => p,
            None => (0..self.docs.len()).collect(),
        };
        // keep insertion order for unsorted queries
        positions.sort_unstable();
        let docs = positions
            .into_iter()
            .map(|pos| &self.docs[pos])
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect();
        options.apply(docs)
    }

    /// First document matching the filter, in insertion order
    pub fn find_one(&self, filter: &Filter) -> Option<Document> {
        self.find(filter, &QueryOptions::new().limit(1)).pop()
    }

    pub fn count(&self, filter: &Filter) -> usize {
        self.matching(filter).count()
    }

    /// Remove every document and index entry
    pub fn clear(&mut self) {
        self.docs.clear();
        self.by_id.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safemode_common::SortSpec;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn orders() -> Collection {
        let mut c = Collection::new("orders", &["userId", "status", "createdAt"]);
        c.insert(doc(json!({"_id": "o1", "userId": "u1", "status": "paid", "createdAt": "2024-01-03"})))
            .unwrap();
        c.insert(doc(json!({"_id": "o2", "userId": "u1", "status": "shipped", "createdAt": "2024-01-01"})))
            .unwrap();
        c.insert(doc(json!({"_id": "o3", "userId": "u1", "status": "paid", "createdAt": "2024-01-02"})))
            .unwrap();
        c
    }

    #[test]
    fn test_unique_identifier() {
        let mut c = orders();
        let result = c.insert(doc(json!({"_id": "o1"})));
        assert!(matches!(result, Err(CollectionError::DuplicateKey { .. })));
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_generated_id() {
        let mut c = Collection::new("carts", &["userId"]);
        let id = c.insert(doc(json!({"userId": "u1"}))).unwrap();
        assert_eq!(c.get(&id).unwrap()["_id"], json!(id));
    }

    #[test]
    fn test_indexed_find_matches_scan() {
        let c = orders();
        let filter = Filter::new().eq("status", "paid");
        let found = c.find(&filter, &QueryOptions::new());
        let ids: Vec<&str> = found.iter().map(|d| d["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["o1", "o3"]);
        assert_eq!(c.count(&filter), 2);

        // non-indexed field falls back to a scan
        assert_eq!(c.count(&Filter::new().eq("_id", "o2")), 1);
        assert_eq!(c.count(&Filter::new().eq("total", 5)), 0);
    }

    #[test]
    fn test_sort_skip_limit() {
        let c = orders();
        let found = c.find(
            &Filter::new().eq("userId", "u1"),
            &QueryOptions::new().sort(SortSpec::desc("createdAt")).skip(1).limit(1),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], "o3");
    }

    #[test]
    fn test_multikey_index() {
        let mut c = Collection::new("products", &["tags"]);
        c.insert(doc(json!({"_id": "p1", "tags": ["eco", "eco", "local"]})))
            .unwrap();
        c.insert(doc(json!({"_id": "p2", "tags": ["local"]}))).unwrap();
        assert_eq!(c.count(&Filter::new().eq("tags", "eco")), 1);
        assert_eq!(c.count(&Filter::new().eq("tags", "local")), 2);
    }

    #[test]
    fn test_find_one_and_clear() {
        let mut c = orders();
        assert_eq!(
            c.find_one(&Filter::new().eq("status", "paid")).unwrap()["_id"],
            "o1"
        );
        c.clear();
        assert!(c.is_empty());
        assert!(c.get("o1").is_none());
        assert_eq!(c.count(&Filter::new().eq("status", "paid")), 0);
    }
}
