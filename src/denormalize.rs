//! # Denormalizer
//!
//! Copies `region` from the matching actor and `category` from the matching
//! content item onto every interaction fact, then writes the fact table back in
//! one swap.

use crate::config::{CollectionNames, JoinPolicy};
use crate::error::{ReadmartError, Result};
use crate::model::{fields, id_string, Actor, ContentItem, Document};
use crate::store::DocumentStore;
use hashbrown::HashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    pub facts: usize,
    pub with_region: usize,
    pub with_category: usize,
    pub unmatched_actors: usize,
    pub unmatched_content: usize,
    /// Reference keys that matched more than one row.
    pub ambiguous_keys: usize,
    /// Facts or reference rows that could not be decoded; facts are kept unchanged.
    pub malformed: usize,
    pub written: usize,
}

/// Hash index over one reference collection, built once per run.
#[derive(Debug)]
pub struct ReferenceIndex<T> {
    rows: HashMap<String, T>,
    ambiguous_keys: usize,
    malformed: usize,
}

impl<T> ReferenceIndex<T> {
    /// Index `docs` (ordered by `_id`) on the key `key_of` extracts.
    ///
    /// With [`JoinPolicy::FirstByInternalId`] the row with the lowest `_id` wins a
    /// contested key; with [`JoinPolicy::Reject`] any contested key is an error.
    pub fn build(
        collection: &str,
        field: &str,
        docs: &[Document],
        policy: JoinPolicy,
        decode: impl Fn(&Document) -> Result<T>,
        key_of: impl Fn(&T) -> &str,
    ) -> Result<Self> {
        let mut rows: HashMap<String, (T, usize)> = HashMap::with_capacity(docs.len());
        let mut malformed = 0;
        for doc in docs {
            let row = match decode(doc) {
                Ok(row) => row,
                Err(err) => {
                    warn!(collection, error = %err, "skipping reference row");
                    malformed += 1;
                    continue;
                }
            };
            let key = key_of(&row).to_string();
            rows.entry(key)
                .and_modify(|(_, matches)| *matches += 1)
                .or_insert((row, 1));
        }

        let mut ambiguous_keys = 0;
        for (key, (_, matches)) in rows.iter().filter(|(_, (_, matches))| *matches > 1) {
            if policy == JoinPolicy::Reject {
                return Err(ReadmartError::JoinAmbiguity {
                    collection: collection.to_string(),
                    field: field.to_string(),
                    key: key.clone(),
                    matches: *matches,
                });
            }
            warn!(collection, field, key = %key, matches, "ambiguous join key, using lowest _id");
            ambiguous_keys += 1;
        }

        Ok(Self {
            rows: rows.into_iter().map(|(key, (row, _))| (key, row)).collect(),
            ambiguous_keys,
            malformed,
        })
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.rows.get(key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ambiguous_keys(&self) -> usize {
        self.ambiguous_keys
    }
}

pub fn actor_index(
    docs: &[Document],
    collection: &str,
    policy: JoinPolicy,
) -> Result<ReferenceIndex<Actor>> {
    ReferenceIndex::build(collection, fields::UID, docs, policy, Actor::from_document, |a| {
        a.uid.as_str()
    })
}

pub fn content_index(
    docs: &[Document],
    collection: &str,
    policy: JoinPolicy,
) -> Result<ReferenceIndex<ContentItem>> {
    ReferenceIndex::build(
        collection,
        fields::AID,
        docs,
        policy,
        ContentItem::from_document,
        |c| c.aid.as_str(),
    )
}

fn set_or_remove(doc: &mut Document, field: &str, value: Option<&String>) -> bool {
    match value {
        Some(value) => {
            doc.insert(field.to_string(), Value::String(value.clone()));
            true
        }
        None => {
            doc.remove(field);
            false
        }
    }
}

/// Enrich fact documents in place. Every other field, `_id` included, is kept.
pub fn enrich_facts(
    facts: &mut [Document],
    actors: &ReferenceIndex<Actor>,
    content: &ReferenceIndex<ContentItem>,
) -> EnrichReport {
    let mut report = EnrichReport {
        facts: facts.len(),
        ambiguous_keys: actors.ambiguous_keys + content.ambiguous_keys,
        malformed: actors.malformed + content.malformed,
        ..EnrichReport::default()
    };
    for doc in facts.iter_mut() {
        // Only the ids are needed here; timestamps are checked by aggregation.
        let (Some(uid), Some(aid)) = (
            id_string(doc.get(fields::UID)),
            id_string(doc.get(fields::AID)),
        ) else {
            warn!("leaving fact without uid or aid unchanged");
            report.malformed += 1;
            continue;
        };

        let actor = actors.get(&uid);
        if actor.is_none() {
            report.unmatched_actors += 1;
        }
        if set_or_remove(doc, fields::REGION, actor.and_then(|a| a.region.as_ref())) {
            report.with_region += 1;
        }

        let item = content.get(&aid);
        if item.is_none() {
            report.unmatched_content += 1;
        }
        if set_or_remove(doc, fields::CATEGORY, item.and_then(|c| c.category.as_ref())) {
            report.with_category += 1;
        }
    }
    report
}

/// Run the enrichment stage against `store`.
#[instrument(skip(store, collections), fields(reads = %collections.reads))]
pub fn enrich(
    store: &dyn DocumentStore,
    collections: &CollectionNames,
    policy: JoinPolicy,
) -> Result<EnrichReport> {
    for (collection, field) in [
        (collections.users.as_str(), fields::UID),
        (collections.articles.as_str(), fields::AID),
    ] {
        if store.ensure_index(collection, field)? {
            debug!(collection, field, "created join index");
        }
    }

    let actors = actor_index(&store.find_all(&collections.users)?, &collections.users, policy)?;
    let content = content_index(
        &store.find_all(&collections.articles)?,
        &collections.articles,
        policy,
    )?;
    debug!(actors = actors.len(), content = content.len(), "reference indexes built");

    let mut facts = store.find_all(&collections.reads)?;
    let mut report = enrich_facts(&mut facts, &actors, &content);
    report.written = store.replace_collection(&collections.reads, facts)?;

    info!(
        facts = report.facts,
        unmatched_actors = report.unmatched_actors,
        unmatched_content = report.unmatched_content,
        ambiguous = report.ambiguous_keys,
        malformed = report.malformed,
        "reads enriched"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn seed(store: &MemoryStore) {
        store
            .insert_many(
                "users",
                vec![
                    doc(json!({"uid": "u1", "region": "Beijing"})),
                    doc(json!({"uid": "u2", "region": "Hong Kong"})),
                ],
            )
            .unwrap();
        store
            .insert_many("articles", vec![doc(json!({"aid": "a1", "category": "science"}))])
            .unwrap();
        store
            .insert_many(
                "reads",
                vec![
                    doc(json!({"uid": "u1", "aid": "a1", "timestamp": "1000", "agreeOrNot": "1"})),
                    doc(json!({"uid": "u9", "aid": "a9", "timestamp": "2000", "region": "stale"})),
                ],
            )
            .unwrap();
    }

    #[test]
    fn enriches_matches_and_clears_misses() {
        let store = MemoryStore::new();
        seed(&store);
        let report = enrich(&store, &CollectionNames::default(), JoinPolicy::default()).unwrap();

        assert_eq!(report.facts, 2);
        assert_eq!(report.with_region, 1);
        assert_eq!(report.unmatched_actors, 1);
        assert_eq!(report.unmatched_content, 1);

        let reads = store.find_all("reads").unwrap();
        assert_eq!(reads[0].get("region"), Some(&json!("Beijing")));
        assert_eq!(reads[0].get("category"), Some(&json!("science")));
        assert_eq!(reads[0].get("agreeOrNot"), Some(&json!("1")));
        assert!(!reads[1].contains_key("region"));
        assert!(!reads[1].contains_key("category"));
        assert!(store.has_index("users", "uid").unwrap());
        assert!(store.has_index("articles", "aid").unwrap());
    }

    #[test]
    fn second_run_is_byte_identical() {
        let store = MemoryStore::new();
        seed(&store);
        enrich(&store, &CollectionNames::default(), JoinPolicy::default()).unwrap();
        let first = serde_json::to_string(&store.find_all("reads").unwrap()).unwrap();
        enrich(&store, &CollectionNames::default(), JoinPolicy::default()).unwrap();
        let second = serde_json::to_string(&store.find_all("reads").unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ambiguous_reference_uses_lowest_id() {
        let store = MemoryStore::new();
        seed(&store);
        store
            .insert_many("users", vec![doc(json!({"uid": "u1", "region": "Shanghai"}))])
            .unwrap();
        let report = enrich(&store, &CollectionNames::default(), JoinPolicy::default()).unwrap();
        assert_eq!(report.ambiguous_keys, 1);
        let reads = store.find_all("reads").unwrap();
        assert_eq!(reads[0].get("region"), Some(&json!("Beijing")));
    }

    #[test]
    fn reject_policy_fails_without_writing() {
        let store = MemoryStore::new();
        seed(&store);
        store
            .insert_many("articles", vec![doc(json!({"aid": "a1", "category": "technology"}))])
            .unwrap();
        let before = store.find_all("reads").unwrap();
        let err = enrich(&store, &CollectionNames::default(), JoinPolicy::Reject).unwrap_err();
        match err {
            ReadmartError::JoinAmbiguity { key, matches, .. } => {
                assert_eq!(key, "a1");
                assert_eq!(matches, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.find_all("reads").unwrap(), before);
    }

    #[test]
    fn malformed_fact_is_kept_as_is() {
        let store = MemoryStore::new();
        seed(&store);
        store
            .insert_many("reads", vec![doc(json!({"aid": "a1", "timestamp": "3000"}))])
            .unwrap();
        let report = enrich(&store, &CollectionNames::default(), JoinPolicy::default()).unwrap();
        assert_eq!(report.malformed, 1);
        assert_eq!(report.written, 3);
        let reads = store.find_all("reads").unwrap();
        assert!(!reads[2].contains_key("category"));
    }

    #[test]
    fn undecodable_timestamp_still_joins() {
        let store = MemoryStore::new();
        seed(&store);
        store
            .insert_many(
                "reads",
                vec![doc(json!({"uid": "u2", "aid": "a1", "timestamp": "2017-09-25"}))],
            )
            .unwrap();
        let report = enrich(&store, &CollectionNames::default(), JoinPolicy::default()).unwrap();
        assert_eq!(report.malformed, 0);
        let reads = store.find_all("reads").unwrap();
        assert_eq!(reads[2].get("region"), Some(&json!("Hong Kong")));
        assert_eq!(reads[2].get("category"), Some(&json!("science")));
        assert_eq!(reads[2].get("timestamp"), Some(&json!("2017-09-25")));
    }
}
