//! # Store Module
//!
//! The document-store seam the pipeline runs against, plus an in-memory
//! implementation. Every write that replaces or upserts a batch is applied as a
//! single swap so readers never observe a half-written collection.

use crate::error::{ReadmartError, Result};
use crate::model::{doc_id, Document, ID_FIELD};
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Result of an [`DocumentStore::upsert_many`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub replaced: usize,
    pub inserted: usize,
}

/// Operations the pipeline needs from a document store.
///
/// Documents come back ordered by their internal `_id`, which the store assigns in
/// ingestion order when a written document does not already carry one.
pub trait DocumentStore: Send + Sync {
    /// Append documents, returning the ids they were stored under.
    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<u64>>;

    fn find_all(&self, collection: &str) -> Result<Vec<Document>>;

    /// Equality lookup; served from an index when one exists on `field`.
    fn find_eq(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Document>>;

    /// Create a secondary index if absent. Returns `true` when it was created.
    fn ensure_index(&self, collection: &str, field: &str) -> Result<bool>;

    fn has_index(&self, collection: &str, field: &str) -> Result<bool>;

    /// Atomically replace the full contents of `collection` with `docs`.
    fn replace_collection(&self, collection: &str, docs: Vec<Document>) -> Result<usize>;

    /// Replace the document matching each incoming document on `key_fields`, or
    /// insert it when nothing matches. The batch is applied atomically.
    fn upsert_many(
        &self,
        collection: &str,
        key_fields: &[&str],
        docs: Vec<Document>,
    ) -> Result<UpsertOutcome>;

    fn count(&self, collection: &str) -> Result<usize>;

    fn collection_names(&self) -> Result<Vec<String>>;
}

/// Canonical encoding of a field value for index and key comparisons.
pub(crate) fn index_key(value: Option<&Value>) -> String {
    value.unwrap_or(&Value::Null).to_string()
}

/// Canonical encoding of a compound upsert key.
pub(crate) fn compound_key(doc: &Document, key_fields: &[&str]) -> String {
    key_fields
        .iter()
        .map(|field| index_key(doc.get(*field)))
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Give every document an `_id`, keeping the ones already present.
///
/// Fresh ids start after the larger of `floor` and the highest explicit id, so a
/// rebuild of the same input always produces the same ids.
pub(crate) fn assign_ids(
    collection: &str,
    docs: Vec<Document>,
    floor: u64,
) -> Result<BTreeMap<u64, Document>> {
    let mut next = docs
        .iter()
        .filter_map(doc_id)
        .max()
        .map_or(floor, |max| (max + 1).max(floor));
    let mut assigned = BTreeMap::new();
    for mut doc in docs {
        let id = match doc_id(&doc) {
            Some(id) => id,
            None => {
                let id = next;
                next += 1;
                doc.insert(ID_FIELD.to_string(), Value::from(id));
                id
            }
        };
        if assigned.insert(id, doc).is_some() {
            return Err(ReadmartError::MalformedDocument {
                collection: collection.to_string(),
                reason: format!("duplicate _id {id} in one write"),
            });
        }
    }
    Ok(assigned)
}

#[derive(Debug, Clone, Default)]
struct Collection {
    docs: BTreeMap<u64, Document>,
    /// field -> encoded value -> ids
    indexes: HashMap<String, HashMap<String, BTreeSet<u64>>>,
}

impl Collection {
    fn next_id(&self) -> u64 {
        self.docs.keys().next_back().map_or(1, |last| last + 1)
    }

    fn rebuild_indexes(&mut self) {
        let fields: Vec<String> = self.indexes.keys().cloned().collect();
        for field in fields {
            self.rebuild_index(&field);
        }
    }

    fn rebuild_index(&mut self, field: &str) {
        let mut entries: HashMap<String, BTreeSet<u64>> = HashMap::new();
        for (id, doc) in &self.docs {
            entries
                .entry(index_key(doc.get(field)))
                .or_default()
                .insert(*id);
        }
        self.indexes.insert(field.to_string(), entries);
    }
}

/// In-process document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents across all collections.
    pub fn len(&self) -> usize {
        self.collections.read().values().map(|c| c.docs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryStore {
    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<u64>> {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let assigned = assign_ids(collection, docs, target.next_id())?;
        if let Some(id) = assigned.keys().find(|id| target.docs.contains_key(*id)) {
            return Err(ReadmartError::MalformedDocument {
                collection: collection.to_string(),
                reason: format!("_id {id} already exists"),
            });
        }
        let ids: Vec<u64> = assigned.keys().copied().collect();
        target.docs.extend(assigned);
        target.rebuild_indexes();
        Ok(ids)
    }

    fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.docs.values().cloned().collect())
            .unwrap_or_default())
    }

    fn find_eq(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Document>> {
        let collections = self.collections.read();
        let Some(source) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        if let Some(index) = source.indexes.get(field) {
            let ids = index.get(&index_key(Some(value)));
            return Ok(ids
                .into_iter()
                .flatten()
                .filter_map(|id| source.docs.get(id).cloned())
                .collect());
        }
        Ok(source
            .docs
            .values()
            .filter(|doc| doc.get(field) == Some(value))
            .cloned()
            .collect())
    }

    fn ensure_index(&self, collection: &str, field: &str) -> Result<bool> {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        if target.indexes.contains_key(field) {
            return Ok(false);
        }
        target.rebuild_index(field);
        Ok(true)
    }

    fn has_index(&self, collection: &str, field: &str) -> Result<bool> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .is_some_and(|c| c.indexes.contains_key(field)))
    }

    fn replace_collection(&self, collection: &str, docs: Vec<Document>) -> Result<usize> {
        let assigned = assign_ids(collection, docs, 1)?;
        let count = assigned.len();
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        target.docs = assigned;
        target.rebuild_indexes();
        Ok(count)
    }

    fn upsert_many(
        &self,
        collection: &str,
        key_fields: &[&str],
        docs: Vec<Document>,
    ) -> Result<UpsertOutcome> {
        let mut collections = self.collections.write();
        let mut staged = collections.get(collection).cloned().unwrap_or_default();
        let outcome = apply_upserts(&mut staged.docs, key_fields, docs);
        staged.rebuild_indexes();
        collections.insert(collection.to_string(), staged);
        Ok(outcome)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map_or(0, |c| c.docs.len()))
    }

    fn collection_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Upsert `docs` into an ordered document map, keyed on `key_fields`.
///
/// A match keeps the lowest existing `_id` and drops any other document sharing the
/// key, so at most one document per key survives.
pub(crate) fn apply_upserts(
    existing: &mut BTreeMap<u64, Document>,
    key_fields: &[&str],
    docs: Vec<Document>,
) -> UpsertOutcome {
    let mut by_key: HashMap<String, Vec<u64>> = HashMap::new();
    for (id, doc) in existing.iter() {
        by_key.entry(compound_key(doc, key_fields)).or_default().push(*id);
    }

    let mut next = existing.keys().next_back().map_or(1, |last| last + 1);
    let mut outcome = UpsertOutcome::default();
    for mut doc in docs {
        let key = compound_key(&doc, key_fields);
        match by_key.get_mut(&key) {
            Some(ids) if !ids.is_empty() => {
                let keep = ids[0];
                for duplicate in ids.drain(1..) {
                    existing.remove(&duplicate);
                }
                doc.insert(ID_FIELD.to_string(), Value::from(keep));
                existing.insert(keep, doc);
                outcome.replaced += 1;
            }
            _ => {
                let id = next;
                next += 1;
                doc.insert(ID_FIELD.to_string(), Value::from(id));
                existing.insert(id, doc);
                by_key.insert(key, vec![id]);
                outcome.inserted += 1;
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_store_creation() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.count("users").unwrap(), 0);
        assert!(store.find_all("users").unwrap().is_empty());
    }

    #[test]
    fn insert_assigns_ids_in_ingestion_order() {
        let store = MemoryStore::new();
        let first = store
            .insert_many("users", vec![doc(json!({"uid": "u1"})), doc(json!({"uid": "u2"}))])
            .unwrap();
        let second = store.insert_many("users", vec![doc(json!({"uid": "u3"}))]).unwrap();
        assert_eq!(first, vec![1, 2]);
        assert_eq!(second, vec![3]);
        let uids: Vec<_> = store
            .find_all("users")
            .unwrap()
            .iter()
            .map(|d| d["uid"].clone())
            .collect();
        assert_eq!(uids, vec![json!("u1"), json!("u2"), json!("u3")]);
    }

    #[test]
    fn insert_rejects_existing_id() {
        let store = MemoryStore::new();
        store.insert_many("users", vec![doc(json!({"_id": 5}))]).unwrap();
        let err = store.insert_many("users", vec![doc(json!({"_id": 5}))]).unwrap_err();
        assert!(matches!(err, ReadmartError::MalformedDocument { .. }));
    }

    #[test]
    fn find_eq_with_and_without_index() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "articles",
                vec![
                    doc(json!({"aid": "a1", "category": "science"})),
                    doc(json!({"aid": "a2", "category": "technology"})),
                    doc(json!({"aid": "a3", "category": "science"})),
                ],
            )
            .unwrap();
        let scanned = store.find_eq("articles", "category", &json!("science")).unwrap();
        assert!(store.ensure_index("articles", "category").unwrap());
        assert!(!store.ensure_index("articles", "category").unwrap());
        let indexed = store.find_eq("articles", "category", &json!("science")).unwrap();
        assert_eq!(scanned, indexed);
        assert_eq!(indexed.len(), 2);

        store
            .insert_many("articles", vec![doc(json!({"aid": "a4", "category": "science"}))])
            .unwrap();
        assert_eq!(
            store.find_eq("articles", "category", &json!("science")).unwrap().len(),
            3
        );
    }

    #[test]
    fn replace_collection_swaps_contents() {
        let store = MemoryStore::new();
        store
            .insert_many("beReads", vec![doc(json!({"aid": "old"}))])
            .unwrap();
        store
            .replace_collection(
                "beReads",
                vec![doc(json!({"aid": "a1"})), doc(json!({"aid": "a2"}))],
            )
            .unwrap();
        let docs = store.find_all("beReads").unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d["aid"] != json!("old")));
        assert_eq!(doc_id(&docs[0]), Some(1));
    }

    #[test]
    fn replace_rejects_duplicate_ids_and_keeps_previous_contents() {
        let store = MemoryStore::new();
        store.insert_many("reads", vec![doc(json!({"aid": "a1"}))]).unwrap();
        let err = store
            .replace_collection(
                "reads",
                vec![doc(json!({"_id": 2, "aid": "x"})), doc(json!({"_id": 2, "aid": "y"}))],
            )
            .unwrap_err();
        assert!(matches!(err, ReadmartError::MalformedDocument { .. }));
        assert_eq!(store.find_all("reads").unwrap()[0]["aid"], json!("a1"));
    }

    #[test]
    fn upsert_replaces_whole_document_by_key() {
        let store = MemoryStore::new();
        let key = ["timestamp", "temporalGranularity"];
        let first = store
            .upsert_many(
                "popular_rank",
                &key,
                vec![doc(json!({
                    "timestamp": 0,
                    "temporalGranularity": "daily",
                    "articleAidList": ["a", "b"],
                }))],
            )
            .unwrap();
        assert_eq!(first, UpsertOutcome { replaced: 0, inserted: 1 });

        let second = store
            .upsert_many(
                "popular_rank",
                &key,
                vec![
                    doc(json!({
                        "timestamp": 0,
                        "temporalGranularity": "daily",
                        "articleAidList": ["c"],
                    })),
                    doc(json!({
                        "timestamp": 0,
                        "temporalGranularity": "weekly",
                        "articleAidList": ["a"],
                    })),
                ],
            )
            .unwrap();
        assert_eq!(second, UpsertOutcome { replaced: 1, inserted: 1 });

        let daily = store
            .find_eq("popular_rank", "temporalGranularity", &json!("daily"))
            .unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0]["articleAidList"], json!(["c"]));
        assert_eq!(doc_id(&daily[0]), Some(1));
    }

    #[test]
    fn upsert_collapses_existing_duplicates() {
        let mut docs = BTreeMap::new();
        docs.insert(1, doc(json!({"_id": 1, "k": 1, "v": "a"})));
        docs.insert(2, doc(json!({"_id": 2, "k": 1, "v": "b"})));
        let outcome = apply_upserts(&mut docs, &["k"], vec![doc(json!({"k": 1, "v": "c"}))]);
        assert_eq!(outcome.replaced, 1);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[&1]["v"], json!("c"));
    }

    #[test]
    fn assign_ids_is_deterministic() {
        let input = vec![doc(json!({"a": 1})), doc(json!({"_id": 10})), doc(json!({"a": 2}))];
        let first = assign_ids("x", input.clone(), 1).unwrap();
        let second = assign_ids("x", input, 1).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.keys().copied().collect::<Vec<_>>(), vec![10, 11, 12]);
    }
}
