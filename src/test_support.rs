#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use readmart::model::Document;
use readmart::store::UpsertOutcome;
use readmart::{DocumentStore, ReadmartError, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};

pub const REGIONS: [&str; 2] = ["Beijing", "Hong Kong"];
pub const CATEGORIES: [&str; 2] = ["science", "technology"];

/// 2017-09-25T00:00:00Z
pub const START_MILLIS: i64 = 1_506_297_600_000;

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedDataset {
    pub users: Vec<Document>,
    pub articles: Vec<Document>,
    pub reads: Vec<Document>,
}

/// Users, articles and reads spread over three weeks, with flags encoded the way
/// the exported collections encode them.
pub fn generate_dataset(
    user_count: u32,
    article_count: u32,
    read_count: u32,
    seed: u64,
) -> GeneratedDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let flag = |rng: &mut StdRng, p: f64| if rng.random_bool(p) { "1" } else { "0" };

    let users: Vec<Document> = (0..user_count)
        .map(|i| {
            doc(json!({
                "uid": i.to_string(),
                "name": format!("user{i}"),
                "region": REGIONS[rng.random_range(0..REGIONS.len())],
            }))
        })
        .collect();

    let articles: Vec<Document> = (0..article_count)
        .map(|i| {
            doc(json!({
                "aid": i.to_string(),
                "title": format!("title{i}"),
                "category": CATEGORIES[rng.random_range(0..CATEGORIES.len())],
            }))
        })
        .collect();

    let mut timestamp = START_MILLIS;
    let reads = (0..read_count)
        .map(|i| {
            timestamp += rng.random_range(0..(21 * 86_400_000 / read_count.max(1) as i64 + 1));
            let mut read = doc(json!({
                "id": format!("r{i}"),
                "timestamp": timestamp.to_string(),
                "uid": rng.random_range(0..users.len().max(1)).to_string(),
                "aid": rng.random_range(0..articles.len().max(1)).to_string(),
                "readTimeLength": rng.random_range(1..120).to_string(),
                "agreeOrNot": flag(&mut rng, 0.3),
                "commentOrNot": flag(&mut rng, 0.1),
                "shareOrNot": flag(&mut rng, 0.05),
            }));
            if rng.random_bool(0.8) {
                read.insert("readOrNot".into(), json!(flag(&mut rng, 0.9)));
            }
            if read["commentOrNot"] == "1" {
                read.insert("commentDetail".into(), json!(format!("comment {i}")));
            }
            read
        })
        .collect();

    GeneratedDataset {
        users,
        articles,
        reads,
    }
}

pub fn load_dataset(store: &dyn DocumentStore, dataset: &GeneratedDataset) -> Result<()> {
    store.insert_many("users", dataset.users.clone())?;
    store.insert_many("articles", dataset.articles.clone())?;
    store.insert_many("reads", dataset.reads.clone())?;
    Ok(())
}

/// Wraps a store and fails every write while `fail_writes` is set.
pub struct FailingStore<S> {
    pub inner: S,
    fail_writes: AtomicBool,
}

impl<S: DocumentStore> FailingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(ReadmartError::StoreUnavailable("injected write failure".into()))
        } else {
            Ok(())
        }
    }
}

impl<S: DocumentStore> DocumentStore for FailingStore<S> {
    fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<u64>> {
        self.check()?;
        self.inner.insert_many(collection, docs)
    }

    fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        self.inner.find_all(collection)
    }

    fn find_eq(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Document>> {
        self.inner.find_eq(collection, field, value)
    }

    fn ensure_index(&self, collection: &str, field: &str) -> Result<bool> {
        self.inner.ensure_index(collection, field)
    }

    fn has_index(&self, collection: &str, field: &str) -> Result<bool> {
        self.inner.has_index(collection, field)
    }

    fn replace_collection(&self, collection: &str, docs: Vec<Document>) -> Result<usize> {
        self.check()?;
        self.inner.replace_collection(collection, docs)
    }

    fn upsert_many(
        &self,
        collection: &str,
        key_fields: &[&str],
        docs: Vec<Document>,
    ) -> Result<UpsertOutcome> {
        self.check()?;
        self.inner.upsert_many(collection, key_fields, docs)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        self.inner.count(collection)
    }

    fn collection_names(&self) -> Result<Vec<String>> {
        self.inner.collection_names()
    }
}
