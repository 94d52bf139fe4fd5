//! Backup extractor
//!
//! Downloads the latest full backup and pulls out one user's records.
//!
//! Two serialization formats are understood:
//!
//! - newline-delimited: one JSON record per line, each shaped
//!   `{"type": "...", "data": {...}}` plus owner fields such as `userId`
//! - legacy: a single JSON object holding one array per category
//!
//! The format is decided from the first non-empty line. Gzip payloads are
//! detected by their magic bytes and decoded as a stream, so the
//! newline-delimited path never holds more than one decompressed line at a
//! time. Parsing runs on the blocking pool.

use crate::locator::BackupLocator;
use crate::object_store::ObjectStore;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use safemode_common::{
    BackupFormat, BackupPointer, CATEGORY_TABLE, Category, Document, Error, ExtractedUserBundle,
    Profile, Result, scalar_string,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::sync::Arc;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Source of per-user backup data
#[async_trait]
pub trait BackupSource: Send + Sync {
    /// Extract one user's records, each list capped at `limit`
    async fn extract_user(&self, user_id: &str, limit: usize) -> Result<ExtractedUserBundle>;

    /// Find a profile by wallet address (case-insensitive)
    async fn find_user_by_wallet(&self, address: &str) -> Result<Option<Profile>>;

    /// Find a profile by email (exact match)
    async fn find_user_by_email(&self, email: &str) -> Result<Option<Profile>>;
}

/// Extracts user slices from the latest full backup
pub struct BackupExtractor {
    locator: Arc<BackupLocator>,
    objects: Arc<dyn ObjectStore>,
    max_scan_lines: Option<usize>,
}

impl BackupExtractor {
    pub fn new(locator: Arc<BackupLocator>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            locator,
            objects,
            max_scan_lines: None,
        }
    }

    /// Stop scanning after `lines` lines and mark the bundle truncated
    #[must_use]
    pub const fn with_scan_budget(mut self, lines: Option<usize>) -> Self {
        self.max_scan_lines = lines;
        self
    }

    /// Resolve the latest full backup and download it
    async fn fetch(&self) -> Result<(BackupPointer, Bytes)> {
        let pointer = self
            .locator
            .latest_full_backup()
            .await
            .ok_or(Error::NoBackupAvailable)?;
        let data = self
            .objects
            .download(&pointer.content_address)
            .await
            .map_err(|e| Error::download(&pointer.content_address, e.to_string()))?;
        debug!(
            backup_id = %pointer.backup_id,
            bytes = data.len(),
            "downloaded backup blob"
        );
        Ok((pointer, data))
    }

    /// Summarize the latest full backup without extracting anyone
    ///
    /// Reads the whole blob; meant for operators, not the request path.
    pub async fn probe(&self) -> Result<BackupSummary> {
        let (pointer, data) = self.fetch().await?;
        let bytes = data.len();
        let compressed = data.starts_with(&GZIP_MAGIC);
        let (format, lines, unrecognized_lines, records) =
            tokio::task::spawn_blocking(move || summarize(data))
                .await
                .map_err(|e| Error::internal(format!("probe task failed: {e}")))??;
        Ok(BackupSummary {
            pointer,
            bytes,
            compressed,
            format,
            lines,
            unrecognized_lines,
            records,
        })
    }

    async fn find_profile(&self, key: ProfileKey) -> Result<Option<Profile>> {
        let (_, data) = self.fetch().await?;
        tokio::task::spawn_blocking(move || scan_profile(data, &key))
            .await
            .map_err(|e| Error::internal(format!("profile scan task failed: {e}")))?
    }
}

#[async_trait]
impl BackupSource for BackupExtractor {
    async fn extract_user(&self, user_id: &str, limit: usize) -> Result<ExtractedUserBundle> {
        let (pointer, data) = self.fetch().await?;
        let user_id = user_id.to_string();
        let backup_id = pointer.backup_id.clone();
        let budget = self.max_scan_lines;
        let bundle = tokio::task::spawn_blocking(move || {
            scan_user(data, &user_id, &backup_id, limit, budget)
        })
        .await
        .map_err(|e| Error::internal(format!("extraction task failed: {e}")))??;

        info!(
            user_id = %bundle.user_id,
            backup_id = %bundle.backup_id,
            format = ?bundle.stats.format,
            profile = bundle.profile.is_some(),
            records = bundle.total_items(),
            lines = bundle.stats.lines_scanned,
            truncated = bundle.truncated,
            "extracted user bundle from backup"
        );
        Ok(bundle)
    }

    async fn find_user_by_wallet(&self, address: &str) -> Result<Option<Profile>> {
        self.find_profile(ProfileKey::Wallet(address.to_string()))
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<Profile>> {
        self.find_profile(ProfileKey::Email(email.to_string())).await
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Line reader over a possibly gzip-compressed blob
struct LineReader {
    inner: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
    line_no: usize,
}

impl LineReader {
    fn new(data: Bytes) -> Self {
        let inner: Box<dyn BufRead + Send> = if data.starts_with(&GZIP_MAGIC) {
            Box::new(BufReader::new(GzDecoder::new(Cursor::new(data))))
        } else {
            Box::new(Cursor::new(data))
        };
        Self {
            inner,
            buf: Vec::new(),
            line_no: 0,
        }
    }

    /// Next non-empty line as `(line number, text)`
    ///
    /// Invalid UTF-8 yields `Some(Err)` so the caller can skip the line;
    /// stream errors (corrupt gzip) are fatal.
    fn next_line(&mut self) -> Result<Option<(usize, std::result::Result<String, String>)>> {
        loop {
            self.buf.clear();
            let read = self
                .inner
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| Error::decode(format!("backup stream: {e}")))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            match std::str::from_utf8(&self.buf) {
                Ok(text) if text.trim().is_empty() => {}
                Ok(text) => return Ok(Some((self.line_no, Ok(text.trim().to_string())))),
                Err(e) => return Ok(Some((self.line_no, Err(e.to_string())))),
            }
        }
    }

    /// Parse the remainder of the stream, prefixed by `head`, as one JSON value
    fn parse_rest(self, mut head: String) -> Result<Value> {
        head.push('\n');
        let reader = Cursor::new(head.into_bytes()).chain(self.inner);
        serde_json::from_reader(reader).map_err(|e| Error::decode(format!("legacy backup: {e}")))
    }
}

/// First record of a backup, after format detection
enum Detected {
    /// Newline-delimited; carries the already parsed first record
    Lines { line_no: usize, first: Value },
    /// Legacy single object
    Legacy(Value),
    /// No content at all
    Empty,
}

fn detect(reader: &mut LineReader) -> Result<Detected> {
    let Some((line_no, line)) = reader.next_line()? else {
        return Ok(Detected::Empty);
    };
    let text = line.map_err(|e| Error::decode(format!("first line is not UTF-8: {e}")))?;
    match serde_json::from_str::<Value>(&text) {
        Ok(first) if is_tagged_record(&first) => Ok(Detected::Lines { line_no, first }),
        // Not a tagged record: the whole blob is one legacy object,
        // possibly spread over several lines
        Ok(_) | Err(_) => {
            let reader = std::mem::replace(reader, LineReader::new(Bytes::new()));
            reader.parse_rest(text).map(Detected::Legacy)
        }
    }
}

fn is_tagged_record(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.contains_key("type") && o.contains_key("data"))
}

// ============================================================================
// Ownership
// ============================================================================

fn field_is(doc: &Document, field: &str, user_id: &str) -> bool {
    doc.get(field)
        .and_then(scalar_string)
        .is_some_and(|v| v == user_id)
}

/// Check a newline-delimited record's envelope, then its payload
fn record_owned_by(record: &Document, data: &Document, category: Category, user_id: &str) -> bool {
    category
        .spec()
        .owner_fields
        .iter()
        .any(|field| field_is(record, field, user_id) || field_is(data, field, user_id))
}

fn doc_owned_by(doc: &Document, category: Category, user_id: &str) -> bool {
    category
        .spec()
        .owner_fields
        .iter()
        .any(|field| field_is(doc, field, user_id))
}

// ============================================================================
// User extraction
// ============================================================================

fn scan_user(
    data: Bytes,
    user_id: &str,
    backup_id: &str,
    limit: usize,
    budget: Option<usize>,
) -> Result<ExtractedUserBundle> {
    let mut reader = LineReader::new(data);
    match detect(&mut reader)? {
        Detected::Empty => Ok(ExtractedUserBundle::empty(
            user_id,
            backup_id,
            limit,
            BackupFormat::NewlineDelimited,
        )),
        Detected::Legacy(root) => Ok(extract_legacy(&root, user_id, backup_id, limit)),
        Detected::Lines { line_no, first } => {
            let mut bundle =
                ExtractedUserBundle::empty(user_id, backup_id, limit, BackupFormat::NewlineDelimited);
            let mut next = Some((line_no, Ok(first)));
            while let Some((line_no, parsed)) = next {
                if budget.is_some_and(|max| bundle.stats.lines_scanned >= max) {
                    warn!(
                        user_id,
                        lines = bundle.stats.lines_scanned,
                        "scan budget exhausted, returning partial bundle"
                    );
                    bundle.truncated = true;
                    break;
                }
                bundle.stats.lines_scanned += 1;
                match parsed {
                    Ok(record) => absorb_record(&mut bundle, line_no, record),
                    Err(err) => skip_malformed(&mut bundle, &err),
                }
                if bundle.profile.is_some() && bundle.lists_full() {
                    debug!(user_id, line = line_no, "every category satisfied, stopping early");
                    break;
                }
                next = reader.next_line()?.map(|(n, line)| (n, parse_line(n, line)));
            }
            Ok(bundle)
        }
    }
}

fn parse_line(line_no: usize, line: std::result::Result<String, String>) -> std::result::Result<Value, Error> {
    let text = line.map_err(|reason| Error::RecordParseError {
        line: line_no,
        reason,
    })?;
    serde_json::from_str(&text).map_err(|e| Error::RecordParseError {
        line: line_no,
        reason: e.to_string(),
    })
}

fn skip_malformed(bundle: &mut ExtractedUserBundle, err: &Error) {
    bundle.stats.malformed_lines += 1;
    warn!(error = %err, "skipping malformed backup record");
}

fn absorb_record(bundle: &mut ExtractedUserBundle, line_no: usize, record: Value) {
    let Value::Object(mut record) = record else {
        skip_malformed(
            bundle,
            &Error::RecordParseError {
                line: line_no,
                reason: "record is not an object".to_string(),
            },
        );
        return;
    };
    let Some(category) = record
        .get("type")
        .and_then(Value::as_str)
        .and_then(Category::from_record_type)
    else {
        return;
    };
    let Some(Value::Object(data)) = record.remove("data") else {
        skip_malformed(
            bundle,
            &Error::RecordParseError {
                line: line_no,
                reason: "record data is not an object".to_string(),
            },
        );
        return;
    };
    if !record_owned_by(&record, &data, category, &bundle.user_id) {
        return;
    }
    if category.is_profile() {
        if bundle.profile.is_none() {
            bundle.profile = Some(Profile::new(data));
            bundle.stats.records_matched += 1;
        }
    } else if bundle.push(category, data) {
        bundle.stats.records_matched += 1;
    }
}

fn extract_legacy(root: &Value, user_id: &str, backup_id: &str, limit: usize) -> ExtractedUserBundle {
    let mut bundle = ExtractedUserBundle::empty(user_id, backup_id, limit, BackupFormat::Legacy);
    bundle.stats.lines_scanned = 1;
    for spec in CATEGORY_TABLE {
        let Some(items) = root.get(spec.legacy_key).and_then(Value::as_array) else {
            continue;
        };
        let owned = items
            .iter()
            .filter_map(Value::as_object)
            .filter(|doc| doc_owned_by(doc, spec.category, user_id));
        if spec.category.is_profile() {
            bundle.profile = owned.cloned().next().map(Profile::new);
            bundle.stats.records_matched += usize::from(bundle.profile.is_some());
        } else {
            for doc in owned.take(limit) {
                bundle.push(spec.category, doc.clone());
                bundle.stats.records_matched += 1;
            }
        }
    }
    bundle
}

// ============================================================================
// Profile lookup
// ============================================================================

/// Identifier a profile is looked up by
#[derive(Debug, Clone)]
enum ProfileKey {
    Wallet(String),
    Email(String),
}

impl ProfileKey {
    fn matches(&self, profile: &Document) -> bool {
        match self {
            Self::Wallet(address) => profile
                .get("walletAddress")
                .and_then(Value::as_str)
                .is_some_and(|w| w.eq_ignore_ascii_case(address)),
            Self::Email(email) => profile
                .get("email")
                .and_then(Value::as_str)
                .is_some_and(|e| e == email),
        }
    }
}

fn scan_profile(data: Bytes, key: &ProfileKey) -> Result<Option<Profile>> {
    let mut reader = LineReader::new(data);
    match detect(&mut reader)? {
        Detected::Empty => Ok(None),
        Detected::Legacy(root) => Ok(root
            .get(Category::Users.spec().legacy_key)
            .and_then(Value::as_array)
            .and_then(|users| {
                users
                    .iter()
                    .filter_map(Value::as_object)
                    .find(|u| key.matches(u))
                    .cloned()
                    .map(Profile::new)
            })),
        Detected::Lines { first, .. } => {
            if let Some(profile) = profile_from_record(first, key) {
                return Ok(Some(profile));
            }
            while let Some((line_no, line)) = reader.next_line()? {
                match parse_line(line_no, line) {
                    Ok(record) => {
                        if let Some(profile) = profile_from_record(record, key) {
                            return Ok(Some(profile));
                        }
                    }
                    Err(err) => warn!(error = %err, "skipping malformed backup record"),
                }
            }
            Ok(None)
        }
    }
}

fn profile_from_record(record: Value, key: &ProfileKey) -> Option<Profile> {
    let Value::Object(mut record) = record else {
        return None;
    };
    let record_type = record.get("type").and_then(Value::as_str)?;
    if Category::from_record_type(record_type) != Some(Category::Users) {
        return None;
    }
    match record.remove("data") {
        Some(Value::Object(data)) if key.matches(&data) => Some(Profile::new(data)),
        _ => None,
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Shape of a backup blob, as reported by `BackupExtractor::probe`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub pointer: BackupPointer,
    pub bytes: usize,
    pub compressed: bool,
    pub format: BackupFormat,
    /// Non-empty lines read (1 for legacy backups)
    pub lines: usize,
    /// Lines that are malformed or carry an unknown record type
    pub unrecognized_lines: usize,
    /// Records per known category
    pub records: BTreeMap<Category, usize>,
}

type Summary = (BackupFormat, usize, usize, BTreeMap<Category, usize>);

fn summarize(data: Bytes) -> Result<Summary> {
    let mut reader = LineReader::new(data);
    let mut records = BTreeMap::new();
    match detect(&mut reader)? {
        Detected::Empty => Ok((BackupFormat::NewlineDelimited, 0, 0, records)),
        Detected::Legacy(root) => {
            for spec in CATEGORY_TABLE {
                if let Some(items) = root.get(spec.legacy_key).and_then(Value::as_array) {
                    records.insert(spec.category, items.len());
                }
            }
            Ok((BackupFormat::Legacy, 1, 0, records))
        }
        Detected::Lines { line_no, first } => {
            let (mut lines, mut unrecognized) = (0, 0);
            let mut next = Some((line_no, Ok(first)));
            while let Some((_, parsed)) = next {
                lines += 1;
                let category = parsed.ok().and_then(|record| {
                    record
                        .get("type")
                        .and_then(Value::as_str)
                        .and_then(Category::from_record_type)
                });
                match category {
                    Some(category) => *records.entry(category).or_insert(0) += 1,
                    None => unrecognized += 1,
                }
                next = reader.next_line()?.map(|(n, line)| (n, parse_line(n, line)));
            }
            Ok((BackupFormat::NewlineDelimited, lines, unrecognized, records))
        }
    }
}
