//! Core types for the failover layer
//!
//! Backup pointers, record categories, user profiles and extracted bundles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A JSON document as stored in the primary store or a backup
pub type Document = serde_json::Map<String, Value>;

// ============================================================================
// Backup pointers
// ============================================================================

/// Kind of backup named by a pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupType {
    Full,
    Incremental,
}

/// Ledger status of a backup pointer (soft-delete only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupStatus {
    #[default]
    Active,
    Deleted,
}

/// Immutable record naming the location and type of a point-in-time backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPointer {
    pub backup_id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    pub content_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_backup_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: BackupStatus,
}

impl BackupPointer {
    /// Create an active full-backup pointer
    pub fn full(
        backup_id: impl Into<String>,
        content_address: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            backup_id: backup_id.into(),
            backup_type: BackupType::Full,
            content_address: content_address.into(),
            parent_backup_id: None,
            created_at,
            status: BackupStatus::Active,
        }
    }

    /// Check if the pointer can be used for recovery
    pub fn is_active_full(&self) -> bool {
        self.backup_type == BackupType::Full && self.status == BackupStatus::Active
    }
}

// ============================================================================
// Categories
// ============================================================================

/// Record category carried by a backup
///
/// `Users` holds the singular profile; every other category is a bounded list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Users,
    Orders,
    Products,
    Inventory,
    VendorInventory,
    VendorRequests,
    Returns,
    Wallets,
    Carts,
    Wishlists,
    Reviews,
    Ratings,
    Invoices,
}

/// Static description of one category
#[derive(Debug)]
pub struct CategorySpec {
    pub category: Category,
    /// `type` discriminator in newline-delimited backups
    pub record_type: &'static str,
    /// Array key in legacy single-object backups
    pub legacy_key: &'static str,
    /// Fields that identify the owning user; any one matching is enough
    pub owner_fields: &'static [&'static str],
    /// Collection name in the primary store
    pub collection: &'static str,
    /// Secondary indices built in the ephemeral store
    pub indexed_fields: &'static [&'static str],
}

/// Mapping table consulted by the extractor, the ephemeral store and the router
pub const CATEGORY_TABLE: &[CategorySpec] = &[
    CategorySpec {
        category: Category::Users,
        record_type: "user",
        legacy_key: "users",
        owner_fields: &["id", "_id", "userId"],
        collection: "users",
        indexed_fields: &["walletAddress", "email", "role"],
    },
    CategorySpec {
        category: Category::Orders,
        record_type: "order",
        legacy_key: "orders",
        owner_fields: &["userId"],
        collection: "orders",
        indexed_fields: &["userId", "status", "createdAt"],
    },
    CategorySpec {
        category: Category::Products,
        record_type: "product",
        legacy_key: "products",
        owner_fields: &["sellerId"],
        collection: "products",
        indexed_fields: &["sellerId", "category", "createdAt"],
    },
    CategorySpec {
        category: Category::Inventory,
        record_type: "inventory",
        legacy_key: "inventory",
        owner_fields: &["supplierId"],
        collection: "inventories",
        indexed_fields: &["supplierId", "productId", "updatedAt"],
    },
    CategorySpec {
        category: Category::VendorInventory,
        record_type: "vendorInventory",
        legacy_key: "vendorInventory",
        owner_fields: &["vendorId"],
        collection: "vendorinventories",
        indexed_fields: &["vendorId", "productId", "updatedAt"],
    },
    CategorySpec {
        category: Category::VendorRequests,
        record_type: "vendorRequest",
        legacy_key: "vendorRequests",
        owner_fields: &["vendorId", "supplierId"],
        collection: "vendorrequests",
        indexed_fields: &["vendorId", "supplierId", "status"],
    },
    CategorySpec {
        category: Category::Returns,
        record_type: "return",
        legacy_key: "returns",
        owner_fields: &["userId"],
        collection: "returns",
        indexed_fields: &["userId", "orderId", "status"],
    },
    CategorySpec {
        category: Category::Wallets,
        record_type: "wallet",
        legacy_key: "wallets",
        owner_fields: &["userId"],
        collection: "wallets",
        indexed_fields: &["userId", "address"],
    },
    CategorySpec {
        category: Category::Carts,
        record_type: "cart",
        legacy_key: "carts",
        owner_fields: &["userId"],
        collection: "carts",
        indexed_fields: &["userId", "updatedAt"],
    },
    CategorySpec {
        category: Category::Wishlists,
        record_type: "wishlist",
        legacy_key: "wishlists",
        owner_fields: &["userId"],
        collection: "wishlists",
        indexed_fields: &["userId"],
    },
    CategorySpec {
        category: Category::Reviews,
        record_type: "review",
        legacy_key: "reviews",
        owner_fields: &["userId"],
        collection: "reviews",
        indexed_fields: &["userId", "productId", "createdAt"],
    },
    CategorySpec {
        category: Category::Ratings,
        record_type: "rating",
        legacy_key: "ratings",
        owner_fields: &["userId"],
        collection: "ratings",
        indexed_fields: &["userId", "productId"],
    },
    CategorySpec {
        category: Category::Invoices,
        record_type: "invoice",
        legacy_key: "invoices",
        owner_fields: &["userId"],
        collection: "invoices",
        indexed_fields: &["userId", "orderId", "createdAt"],
    },
];

impl Category {
    /// All categories, profile first
    pub const ALL: [Self; 13] = [
        Self::Users,
        Self::Orders,
        Self::Products,
        Self::Inventory,
        Self::VendorInventory,
        Self::VendorRequests,
        Self::Returns,
        Self::Wallets,
        Self::Carts,
        Self::Wishlists,
        Self::Reviews,
        Self::Ratings,
        Self::Invoices,
    ];

    /// Categories that are extracted as bounded lists
    pub fn lists() -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(|c| !c.is_profile())
    }

    /// Static description from the mapping table
    pub fn spec(self) -> &'static CategorySpec {
        // CATEGORY_TABLE is declared in the same order as the enum
        &CATEGORY_TABLE[self as usize]
    }

    pub const fn is_profile(self) -> bool {
        matches!(self, Self::Users)
    }

    /// Resolve a newline-delimited record `type` discriminator
    pub fn from_record_type(record_type: &str) -> Option<Self> {
        CATEGORY_TABLE
            .iter()
            .find(|spec| spec.record_type == record_type)
            .map(|spec| spec.category)
    }

    /// Resolve a caller's model or collection identity
    ///
    /// Accepts model names (`VendorRequest`), record types, legacy keys and
    /// collection names, ignoring case, `-` and `_`.
    pub fn from_model(name: &str) -> Option<Self> {
        let wanted = normalize_model_name(name);
        CATEGORY_TABLE
            .iter()
            .find(|spec| {
                [spec.record_type, spec.legacy_key, spec.collection]
                    .iter()
                    .any(|candidate| normalize_model_name(candidate) == wanted)
            })
            .map(|spec| spec.category)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().collection)
    }
}

fn normalize_model_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

// ============================================================================
// Identifiers
// ============================================================================

/// Normalize a scalar identifier value to a string
///
/// Understands extended-JSON object ids (`{"$oid": "..."}`).
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("$oid").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Stable identifier of a document: `_id`, falling back to `id`
pub fn document_id(doc: &Document) -> Option<String> {
    doc.get("_id")
        .and_then(scalar_string)
        .or_else(|| doc.get("id").and_then(scalar_string))
}

// ============================================================================
// Profiles
// ============================================================================

/// Fields never returned to callers
const SECRET_FIELDS: &[&str] = &[
    "password",
    "passwordHash",
    "refreshToken",
    "resetPasswordToken",
    "resetPasswordExpires",
    "twoFactorSecret",
];

/// A user profile recovered from a backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(pub Document);

impl Profile {
    pub fn new(doc: Document) -> Self {
        Self(doc)
    }

    pub fn id(&self) -> Option<String> {
        document_id(&self.0)
    }

    pub fn wallet_address(&self) -> Option<&str> {
        self.0.get("walletAddress").and_then(Value::as_str)
    }

    pub fn email(&self) -> Option<&str> {
        self.0.get("email").and_then(Value::as_str)
    }

    pub fn role(&self) -> &str {
        self.0.get("role").and_then(Value::as_str).unwrap_or("user")
    }

    /// Stored password hash, if any
    pub fn password_hash(&self) -> Option<&str> {
        self.0
            .get("password")
            .or_else(|| self.0.get("passwordHash"))
            .and_then(Value::as_str)
    }

    /// Check the account status field (missing means active)
    pub fn is_active(&self) -> bool {
        !matches!(
            self.0.get("status").and_then(Value::as_str),
            Some("suspended" | "deleted" | "banned")
        )
    }

    /// Copy of the profile with secrets stripped
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut doc = self.0.clone();
        for field in SECRET_FIELDS {
            doc.remove(*field);
        }
        Self(doc)
    }

    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn into_document(self) -> Document {
        self.0
    }
}

// ============================================================================
// Extracted bundles
// ============================================================================

/// Serialization format detected for a backup blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackupFormat {
    /// One tagged JSON record per line
    NewlineDelimited,
    /// One JSON object holding an array per category
    Legacy,
}

/// Counters describing one extraction pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStats {
    pub format: BackupFormat,
    pub lines_scanned: usize,
    pub records_matched: usize,
    pub malformed_lines: usize,
}

/// Bounded list of one category's records plus its count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySlice {
    pub category: Category,
    pub items: Vec<Document>,
    pub count: usize,
}

impl CategorySlice {
    pub const fn empty(category: Category) -> Self {
        Self {
            category,
            items: Vec::new(),
            count: 0,
        }
    }
}

/// One user's slice of a backup
///
/// Every list holds at most the limit the bundle was extracted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedUserBundle {
    pub user_id: String,
    pub backup_id: String,
    pub limit: usize,
    pub profile: Option<Profile>,
    /// One slice per list category, in `Category::lists()` order
    pub slices: Vec<CategorySlice>,
    /// Set when the scan budget ran out before the backup was fully read
    pub truncated: bool,
    pub stats: ExtractionStats,
}

impl ExtractedUserBundle {
    /// Create an empty bundle with one slice per list category
    pub fn empty(
        user_id: impl Into<String>,
        backup_id: impl Into<String>,
        limit: usize,
        format: BackupFormat,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            backup_id: backup_id.into(),
            limit,
            profile: None,
            slices: Category::lists().map(CategorySlice::empty).collect(),
            truncated: false,
            stats: ExtractionStats {
                format,
                lines_scanned: 0,
                records_matched: 0,
                malformed_lines: 0,
            },
        }
    }

    /// Records of one category (empty for the profile category)
    pub fn items(&self, category: Category) -> &[Document] {
        self.slice(category)
            .map(|s| s.items.as_slice())
            .unwrap_or_default()
    }

    pub fn count(&self, category: Category) -> usize {
        self.slice(category).map_or(0, |s| s.count)
    }

    pub fn slice(&self, category: Category) -> Option<&CategorySlice> {
        self.slices.iter().find(|s| s.category == category)
    }

    pub fn slice_mut(&mut self, category: Category) -> Option<&mut CategorySlice> {
        self.slices.iter_mut().find(|s| s.category == category)
    }

    /// Append a record if its list is below the limit; returns whether it was kept
    pub fn push(&mut self, category: Category, doc: Document) -> bool {
        let limit = self.limit;
        match self.slice_mut(category) {
            Some(slice) if slice.items.len() < limit => {
                slice.items.push(doc);
                slice.count = slice.items.len();
                true
            }
            _ => false,
        }
    }

    /// Check if every list category has reached the limit
    pub fn lists_full(&self) -> bool {
        self.slices.iter().all(|s| s.items.len() >= self.limit)
    }

    /// Total records across all list categories
    pub fn total_items(&self) -> usize {
        self.slices.iter().map(|s| s.items.len()).sum()
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
    fn test_table_matches_enum_order() {
        for category in Category::ALL {
            assert_eq!(category.spec().category, category);
        }
        assert_eq!(CATEGORY_TABLE.len(), Category::ALL.len());
    }

    #[test]
    fn test_from_model() {
        assert_eq!(Category::from_model("Order"), Some(Category::Orders));
        assert_eq!(Category::from_model("orders"), Some(Category::Orders));
        assert_eq!(
            Category::from_model("VendorRequest"),
            Some(Category::VendorRequests)
        );
        assert_eq!(
            Category::from_model("vendor_inventory"),
            Some(Category::VendorInventory)
        );
        assert_eq!(Category::from_model("User"), Some(Category::Users));
        assert_eq!(Category::from_model("Shipment"), None);
    }

    #[test]
    fn test_document_id_variants() {
        assert_eq!(document_id(&doc(json!({"_id": "a1"}))).as_deref(), Some("a1"));
        assert_eq!(document_id(&doc(json!({"id": 7}))).as_deref(), Some("7"));
        assert_eq!(
            document_id(&doc(json!({"_id": {"$oid": "65f0"}}))).as_deref(),
            Some("65f0")
        );
        assert_eq!(document_id(&doc(json!({"name": "x"}))), None);
    }

    #[test]
    fn test_profile_sanitized() {
        let profile = Profile::new(doc(json!({
            "_id": "u1",
            "walletAddress": "0xABC",
            "password": "$2b$10$hash",
            "role": "vendor"
        })));
        assert_eq!(profile.password_hash(), Some("$2b$10$hash"));
        let clean = profile.sanitized();
        assert!(clean.password_hash().is_none());
        assert_eq!(clean.role(), "vendor");
        assert_eq!(clean.wallet_address(), Some("0xABC"));
    }

    #[test]
    fn test_bundle_push_respects_limit() {
        let mut bundle = ExtractedUserBundle::empty("u1", "b1", 2, BackupFormat::Legacy);
        assert!(bundle.push(Category::Orders, doc(json!({"id": "o1"}))));
        assert!(bundle.push(Category::Orders, doc(json!({"id": "o2"}))));
        assert!(!bundle.push(Category::Orders, doc(json!({"id": "o3"}))));
        assert_eq!(bundle.count(Category::Orders), 2);
        assert!(!bundle.push(Category::Users, doc(json!({"id": "u1"}))));
        assert!(bundle.items(Category::Users).is_empty());
    }

    #[test]
    fn test_pointer_serde_shape() {
        let pointer = BackupPointer::full("b1", "bafy1", Utc::now());
        let value = serde_json::to_value(&pointer).unwrap();
        assert_eq!(value["type"], "FULL");
        assert_eq!(value["status"], "ACTIVE");
        assert_eq!(value["contentAddress"], "bafy1");
        assert!(pointer.is_active_full());
    }
}
