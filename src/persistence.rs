//! RocksDB-backed [`DocumentStore`].
//!
//! Documents live in one column family keyed by `collection \0 _id` (big endian), so
//! a collection is one contiguous key range and a replace is a range delete plus
//! puts inside a single `WriteBatch`.

use crate::error::{ReadmartError, Result};
use crate::model::Document;
use crate::store::{apply_upserts, assign_ids, index_key, DocumentStore, UpsertOutcome};
use parking_lot::Mutex;
use rocksdb::{
    checkpoint::Checkpoint, ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const CF_DOCUMENTS: &str = "documents";
const CF_INDEX_ENTRIES: &str = "index_entries";
const CF_METADATA: &str = "metadata";

const KEY_MANIFEST: &[u8] = b"manifest";
const INDEX_REGISTRY_PREFIX: &[u8] = b"index\0";

const STORAGE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StorageManifest {
    format_version: u32,
    app_version: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PersistentOpenOptions {
    pub repair: bool,
}

pub struct PersistentStore {
    db: DB,
    /// Serialises read-modify-write cycles (id allocation, upserts).
    write_lock: Mutex<()>,
}

impl PersistentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, PersistentOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: PersistentOpenOptions,
    ) -> Result<Self> {
        if options.repair {
            repair_db(path.as_ref())?;
        }
        let db = open_db(path.as_ref())?;
        validate_or_init_manifest(&db)?;
        info!(path = %path.as_ref().display(), "opened persistent document store");
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        let checkpoint = Checkpoint::new(&self.db)?;
        checkpoint.create_checkpoint(path)?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ReadmartError::store(format!("missing column family {name}")))
    }

    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;
        let mut entries = Vec::new();
        for entry in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = entry?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn load_collection(&self, collection: &str) -> Result<BTreeMap<u64, Document>> {
        let prefix = collection_prefix(collection);
        let mut docs = BTreeMap::new();
        for (key, value) in self.scan_prefix(CF_DOCUMENTS, &prefix)? {
            let id = decode_id(&key, prefix.len())
                .ok_or_else(|| ReadmartError::store("corrupt document key"))?;
            docs.insert(id, serde_json::from_slice(&value)?);
        }
        Ok(docs)
    }

    fn get_document(&self, collection: &str, id: u64) -> Result<Option<Document>> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, document_key(collection, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn next_id(&self, collection: &str) -> Result<u64> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let prefix = collection_prefix(collection);
        let end = prefix_end(&prefix);
        for entry in self
            .db
            .iterator_cf(cf, IteratorMode::From(&end, Direction::Reverse))
        {
            let (key, _) = entry?;
            if key.as_ref() >= end.as_slice() {
                continue;
            }
            if key.starts_with(&prefix) {
                return Ok(decode_id(&key, prefix.len()).map_or(1, |id| id + 1));
            }
            break;
        }
        Ok(1)
    }

    fn indexed_fields(&self, collection: &str) -> Result<Vec<String>> {
        let mut prefix = INDEX_REGISTRY_PREFIX.to_vec();
        prefix.extend_from_slice(&collection_prefix(collection));
        self.scan_prefix(CF_METADATA, &prefix)?
            .into_iter()
            .map(|(key, _)| {
                String::from_utf8(key[prefix.len()..].to_vec())
                    .map_err(|_| ReadmartError::store("corrupt index registry key"))
            })
            .collect()
    }

    fn put_documents(
        &self,
        batch: &mut WriteBatch,
        collection: &str,
        docs: &BTreeMap<u64, Document>,
        indexed: &[String],
    ) -> Result<()> {
        let documents_cf = self.cf(CF_DOCUMENTS)?;
        let index_cf = self.cf(CF_INDEX_ENTRIES)?;
        for (id, doc) in docs {
            batch.put_cf(documents_cf, document_key(collection, *id), serde_json::to_vec(doc)?);
            for field in indexed {
                batch.put_cf(
                    index_cf,
                    index_entry_key(collection, field, doc.get(field.as_str()), *id),
                    [],
                );
            }
        }
        Ok(())
    }

    /// Range-delete a collection and its index entries, then write `docs`, atomically.
    fn rewrite_collection(&self, collection: &str, docs: &BTreeMap<u64, Document>) -> Result<()> {
        let indexed = self.indexed_fields(collection)?;
        let prefix = collection_prefix(collection);
        let end = prefix_end(&prefix);

        let mut batch = WriteBatch::default();
        batch.delete_range_cf(self.cf(CF_DOCUMENTS)?, prefix.clone(), end.clone());
        batch.delete_range_cf(self.cf(CF_INDEX_ENTRIES)?, prefix, end);
        self.put_documents(&mut batch, collection, docs, &indexed)?;
        self.db.write(batch)?;
        debug!(collection, documents = docs.len(), "rewrote collection");
        Ok(())
    }
}

impl DocumentStore for PersistentStore {
    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<u64>> {
        let _guard = self.write_lock.lock();
        let assigned = assign_ids(collection, docs, self.next_id(collection)?)?;
        for id in assigned.keys() {
            if self.get_document(collection, *id)?.is_some() {
                return Err(ReadmartError::MalformedDocument {
                    collection: collection.to_string(),
                    reason: format!("_id {id} already exists"),
                });
            }
        }
        let indexed = self.indexed_fields(collection)?;
        let mut batch = WriteBatch::default();
        self.put_documents(&mut batch, collection, &assigned, &indexed)?;
        self.db.write(batch)?;
        Ok(assigned.keys().copied().collect())
    }

    fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        Ok(self.load_collection(collection)?.into_values().collect())
    }

    fn find_eq(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Document>> {
        if !self.has_index(collection, field)? {
            return Ok(self
                .load_collection(collection)?
                .into_values()
                .filter(|doc| doc.get(field) == Some(value))
                .collect());
        }

        let prefix = index_value_prefix(collection, field, Some(value));
        let mut docs = Vec::new();
        for (key, _) in self.scan_prefix(CF_INDEX_ENTRIES, &prefix)? {
            let id = decode_id(&key, prefix.len())
                .ok_or_else(|| ReadmartError::store("corrupt index entry key"))?;
            if let Some(doc) = self.get_document(collection, id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    fn ensure_index(&self, collection: &str, field: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        if self.has_index(collection, field)? {
            return Ok(false);
        }
        let index_cf = self.cf(CF_INDEX_ENTRIES)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_METADATA)?, registry_key(collection, field), b"");
        for (id, doc) in self.load_collection(collection)? {
            batch.put_cf(index_cf, index_entry_key(collection, field, doc.get(field), id), b"");
        }
        self.db.write(batch)?;
        info!(collection, field, "created index");
        Ok(true)
    }

    fn has_index(&self, collection: &str, field: &str) -> Result<bool> {
        let cf = self.cf(CF_METADATA)?;
        Ok(self.db.get_cf(cf, registry_key(collection, field))?.is_some())
    }

    fn replace_collection(&self, collection: &str, docs: Vec<Document>) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let assigned = assign_ids(collection, docs, 1)?;
        self.rewrite_collection(collection, &assigned)?;
        Ok(assigned.len())
    }

    fn upsert_many(
        &self,
        collection: &str,
        key_fields: &[&str],
        docs: Vec<Document>,
    ) -> Result<UpsertOutcome> {
        let _guard = self.write_lock.lock();
        let mut staged = self.load_collection(collection)?;
        let outcome = apply_upserts(&mut staged, key_fields, docs);
        self.rewrite_collection(collection, &staged)?;
        Ok(outcome)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        Ok(self
            .scan_prefix(CF_DOCUMENTS, &collection_prefix(collection))?
            .len())
    }

    fn collection_names(&self) -> Result<Vec<String>> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut names: Vec<String> = Vec::new();
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = entry?;
            let Some(split) = key.iter().position(|b| *b == 0) else {
                continue;
            };
            let name = String::from_utf8_lossy(&key[..split]).into_owned();
            if names.last() != Some(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn open_db(path: &Path) -> Result<DB> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_paranoid_checks(true);
    let cfs = vec![
        ColumnFamilyDescriptor::new(CF_DOCUMENTS, Options::default()),
        ColumnFamilyDescriptor::new(CF_INDEX_ENTRIES, Options::default()),
        ColumnFamilyDescriptor::new(CF_METADATA, Options::default()),
    ];
    Ok(DB::open_cf_descriptors(&options, path, cfs)?)
}

fn repair_db(path: &Path) -> Result<()> {
    let mut options = Options::default();
    options.create_if_missing(true);
    DB::repair(&options, path)?;
    Ok(())
}

fn validate_or_init_manifest(db: &DB) -> Result<()> {
    let metadata_cf = db
        .cf_handle(CF_METADATA)
        .ok_or_else(|| ReadmartError::store("missing metadata column family"))?;
    if let Some(bytes) = db.get_cf(metadata_cf, KEY_MANIFEST)? {
        let manifest: StorageManifest = bincode::deserialize(&bytes)?;
        if manifest.format_version != STORAGE_FORMAT_VERSION {
            return Err(ReadmartError::store(format!(
                "storage format version mismatch: expected {}, found {} (written by {})",
                STORAGE_FORMAT_VERSION, manifest.format_version, manifest.app_version
            )));
        }
        return Ok(());
    }

    let manifest = StorageManifest {
        format_version: STORAGE_FORMAT_VERSION,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    db.put_cf(metadata_cf, KEY_MANIFEST, bincode::serialize(&manifest)?)?;
    Ok(())
}

fn collection_prefix(collection: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(collection.len() + 1);
    key.extend_from_slice(collection.as_bytes());
    key.push(0);
    key
}

/// First key after every key that starts with `prefix`.
fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    if let Some(last) = end.last_mut() {
        *last += 1;
    }
    end
}

fn document_key(collection: &str, id: u64) -> Vec<u8> {
    let mut key = collection_prefix(collection);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn decode_id(key: &[u8], prefix_len: usize) -> Option<u64> {
    if key.len() != prefix_len + 8 {
        return None;
    }
    Some(u64::from_be_bytes(key[prefix_len..].try_into().ok()?))
}

fn index_value_prefix(collection: &str, field: &str, value: Option<&Value>) -> Vec<u8> {
    let mut key = collection_prefix(collection);
    key.extend_from_slice(field.as_bytes());
    key.push(0);
    key.extend_from_slice(index_key(value).as_bytes());
    key.push(0);
    key
}

fn index_entry_key(collection: &str, field: &str, value: Option<&Value>, id: u64) -> Vec<u8> {
    let mut key = index_value_prefix(collection, field, value);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn registry_key(collection: &str, field: &str) -> Vec<u8> {
    let mut key = INDEX_REGISTRY_PREFIX.to_vec();
    key.extend_from_slice(&collection_prefix(collection));
    key.extend_from_slice(field.as_bytes());
    key
}
