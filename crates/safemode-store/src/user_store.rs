//! Per-user ephemeral store
//!
//! Built once from an extracted bundle and never written afterwards, so
//! every reader sees the same snapshot for the store's whole lifetime.

use crate::collection::Collection;
use safemode_common::{Category, Document, ExtractedUserBundle, Filter, QueryOptions};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::warn;

/// Indexed collections holding one user's backup slice
#[derive(Debug)]
pub struct UserStore {
    user_id: String,
    backup_id: String,
    truncated: bool,
    collections: HashMap<Category, Collection>,
}

impl UserStore {
    /// Load a bundle into one indexed collection per category
    pub fn from_bundle(bundle: ExtractedUserBundle) -> Self {
        let mut collections: HashMap<Category, Collection> = Category::ALL
            .into_iter()
            .map(|category| {
                let spec = category.spec();
                (category, Collection::new(spec.collection, spec.indexed_fields))
            })
            .collect();

        let ExtractedUserBundle {
            user_id,
            backup_id,
            profile,
            slices,
            truncated,
            ..
        } = bundle;

        let loads = profile
            .map(|p| (Category::Users, p.into_document()))
            .into_iter()
            .chain(slices.into_iter().flat_map(|slice| {
                let category = slice.category;
                slice.items.into_iter().map(move |doc| (category, doc))
            }));
        for (category, doc) in loads {
            if let Some(collection) = collections.get_mut(&category) {
                if let Err(e) = collection.insert(doc) {
                    warn!(user_id = %user_id, error = %e, "skipping duplicate record while loading store");
                }
            }
        }

        Self {
            user_id,
            backup_id,
            truncated,
            collections,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Backup the store was built from
    pub fn backup_id(&self) -> &str {
        &self.backup_id
    }

    /// Whether the source extraction stopped on its scan budget
    pub const fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn collection(&self, category: Category) -> Option<&Collection> {
        self.collections.get(&category)
    }

    pub fn find(&self, category: Category, filter: &Filter, options: &QueryOptions) -> Vec<Document> {
        self.collection(category)
            .map(|c| c.find(filter, options))
            .unwrap_or_default()
    }

    pub fn find_one(&self, category: Category, filter: &Filter) -> Option<Document> {
        self.collection(category).and_then(|c| c.find_one(filter))
    }

    pub fn count(&self, category: Category, filter: &Filter) -> usize {
        self.collection(category).map_or(0, |c| c.count(filter))
    }

    pub fn get_by_id(&self, category: Category, id: &str) -> Option<&Document> {
        self.collection(category).and_then(|c| c.get(id))
    }

    /// Total documents across every collection
    pub fn document_count(&self) -> usize {
        self.collections.values().map(Collection::len).sum()
    }

    /// Replace reference ids in `field` with partial documents from `ref_category`
    ///
    /// Arrays of ids are resolved element-wise. The partial document always
    /// carries `_id` plus the selected fields (all fields when `select` is
    /// empty). Unresolvable references keep their scalar value.
    pub fn populate_reference(
        &self,
        docs: Vec<Document>,
        field: &str,
        ref_category: Category,
        select: &[&str],
    ) -> Vec<Document> {
        let Some(refs) = self.collection(ref_category) else {
            return docs;
        };
        let resolve = |value: &Value| -> Value {
            let Some(target) = safemode_common::scalar_string(value).and_then(|id| refs.get(&id)) else {
                return value.clone();
            };
            if select.is_empty() {
                return Value::Object(target.clone());
            }
            let mut partial = Map::new();
            if let Some(id) = target.get("_id").or_else(|| target.get("id")) {
                partial.insert("_id".to_string(), id.clone());
            }
            for name in select {
                if let Some(v) = target.get(*name) {
                    partial.insert((*name).to_string(), v.clone());
                }
            }
            Value::Object(partial)
        };

        docs.into_iter()
            .map(|mut doc| {
                if let Some(value) = doc.get(field) {
                    let resolved = match value {
                        Value::Array(items) => Value::Array(items.iter().map(&resolve).collect()),
                        other => resolve(other),
                    };
                    doc.insert(field.to_string(), resolved);
                }
                doc
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safemode_common::{BackupFormat, Profile, SortSpec};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn bundle() -> ExtractedUserBundle {
        let mut bundle = ExtractedUserBundle::empty("u1", "b1", 10, BackupFormat::NewlineDelimited);
        bundle.profile = Some(Profile::new(doc(json!({"_id": "u1", "walletAddress": "0xabc"}))));
        bundle.push(Category::Orders, doc(json!({"_id": "o1", "userId": "u1", "productId": "p1", "status": "paid"})));
        bundle.push(Category::Orders, doc(json!({"_id": "o2", "userId": "u1", "productId": ["p1", "p9"], "status": "new"})));
        bundle.push(Category::Orders, doc(json!({"_id": "o1", "userId": "u1", "status": "dup"})));
        bundle.push(Category::Products, doc(json!({"_id": "p1", "sellerId": "u1", "name": "Lamp", "price": 12})));
        bundle
    }

    #[test]
    fn test_load_bundle() {
        let store = UserStore::from_bundle(bundle());
        assert_eq!(store.user_id(), "u1");
        assert_eq!(store.backup_id(), "b1");
        // the duplicate order is skipped
        assert_eq!(store.count(Category::Orders, &Filter::new()), 2);
        assert_eq!(store.count(Category::Users, &Filter::new()), 1);
        assert_eq!(store.document_count(), 4);
        assert!(store.get_by_id(Category::Products, "p1").is_some());
    }

    #[test]
    fn test_find_with_options() {
        let store = UserStore::from_bundle(bundle());
        let found = store.find(
            Category::Orders,
            &Filter::new().eq("userId", "u1"),
            &QueryOptions::new().sort(SortSpec::asc("status")),
        );
        let statuses: Vec<&str> = found.iter().map(|d| d["status"].as_str().unwrap()).collect();
        assert_eq!(statuses, vec!["new", "paid"]);
        assert!(store
            .find_one(Category::Users, &Filter::new().eq("walletAddress", "0xabc"))
            .is_some());
    }

    #[test]
    fn test_populate_reference() {
        let store = UserStore::from_bundle(bundle());
        let orders = store.find(Category::Orders, &Filter::new(), &QueryOptions::new());
        let populated = store.populate_reference(orders, "productId", Category::Products, &["name"]);

        assert_eq!(populated[0]["productId"], json!({"_id": "p1", "name": "Lamp"}));
        // arrays resolve element-wise; unknown ids stay scalar
        assert_eq!(
            populated[1]["productId"],
            json!([{"_id": "p1", "name": "Lamp"}, "p9"])
        );
    }
}
