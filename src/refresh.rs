//! Filtered snapshot tables such as `articles_science`.

use crate::config::ProjectionConfig;
use crate::error::Result;
use crate::store::DocumentStore;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub source: String,
    pub destination: String,
    pub written: usize,
}

/// Replace `destination` with exactly the rows of `source` whose `field` equals
/// `value`. Rows keep their `_id`.
#[instrument(skip(store))]
pub fn refresh(
    store: &dyn DocumentStore,
    source: &str,
    field: &str,
    value: &str,
    destination: &str,
) -> Result<RefreshReport> {
    let rows = store.find_eq(source, field, &Value::String(value.to_string()))?;
    let written = store.replace_collection(destination, rows)?;
    info!(written, "projection refreshed");
    Ok(RefreshReport {
        source: source.to_string(),
        destination: destination.to_string(),
        written,
    })
}

pub fn refresh_projection(
    store: &dyn DocumentStore,
    projection: &ProjectionConfig,
) -> Result<RefreshReport> {
    refresh(
        store,
        &projection.source,
        &projection.field,
        &projection.value,
        &projection.destination,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Document;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn articles(store: &MemoryStore) {
        store
            .insert_many(
                "articles",
                vec![
                    doc(json!({"aid": "a1", "category": "science"})),
                    doc(json!({"aid": "a2", "category": "technology"})),
                    doc(json!({"aid": "a3", "category": "science"})),
                    doc(json!({"aid": "a4"})),
                ],
            )
            .unwrap();
    }

    #[test]
    fn selects_exactly_matching_rows() {
        let store = MemoryStore::new();
        articles(&store);
        let report =
            refresh(&store, "articles", "category", "science", "articles_science").unwrap();
        assert_eq!(report.written, 2);

        let rows = store.find_all("articles_science").unwrap();
        let aids: Vec<_> = rows.iter().map(|d| d["aid"].as_str().unwrap()).collect();
        assert_eq!(aids, vec!["a1", "a3"]);
        assert_eq!(rows[1]["_id"], json!(3));
    }

    #[test]
    fn refresh_is_idempotent_and_drops_stale_rows() {
        let store = MemoryStore::new();
        articles(&store);
        store
            .insert_many(
                "articles_science",
                vec![doc(json!({"aid": "old", "category": "science"}))],
            )
            .unwrap();

        refresh(&store, "articles", "category", "science", "articles_science").unwrap();
        let first = store.find_all("articles_science").unwrap();
        refresh(&store, "articles", "category", "science", "articles_science").unwrap();
        assert_eq!(store.find_all("articles_science").unwrap(), first);
        assert!(first.iter().all(|d| d["aid"] != json!("old")));
    }

    #[test]
    fn empty_match_empties_destination() {
        let store = MemoryStore::new();
        articles(&store);
        refresh(&store, "articles", "category", "science", "articles_science").unwrap();
        let report =
            refresh(&store, "articles", "category", "history", "articles_science").unwrap();
        assert_eq!(report.written, 0);
        assert_eq!(store.count("articles_science").unwrap(), 0);
    }
}
