#[path = "../src/test_support.rs"]
mod test_support;

use readmart::{DocumentStore, MemoryStore, Readmart, ReadmartConfig, ReadmartError};
use std::sync::Arc;
use test_support::{generate_dataset, load_dataset, FailingStore};

#[test]
fn failed_stage_leaves_destination_untouched() -> anyhow::Result<()> {
    let store = Arc::new(FailingStore::new(MemoryStore::new()));
    load_dataset(store.as_ref(), &generate_dataset(20, 10, 150, 17))?;
    let readmart = Readmart::with_shared_store(store.clone(), ReadmartConfig::default());
    readmart.run_pipeline()?;

    let reads_before = store.find_all("reads")?;
    let summaries_before = store.find_all("beReads")?;

    store.fail_writes(true);
    let err = readmart.enrich_reads().unwrap_err();
    assert!(matches!(err, ReadmartError::StoreUnavailable(_)));
    assert!(err.is_fatal());
    let err = readmart.rebuild_summaries().unwrap_err();
    assert!(err.is_fatal());

    assert_eq!(store.find_all("reads")?, reads_before);
    assert_eq!(store.find_all("beReads")?, summaries_before);

    // The failed stages released their table locks.
    store.fail_writes(false);
    readmart.run_pipeline()?;
    assert_eq!(store.find_all("beReads")?, summaries_before);
    Ok(())
}

#[test]
fn pipeline_stops_at_first_fatal_stage() -> anyhow::Result<()> {
    let store = Arc::new(FailingStore::new(MemoryStore::new()));
    load_dataset(store.as_ref(), &generate_dataset(5, 5, 30, 2))?;
    store.fail_writes(true);

    let readmart = Readmart::with_shared_store(store.clone(), ReadmartConfig::default());
    assert!(readmart.run_pipeline().is_err());
    assert_eq!(store.count("beReads")?, 0);
    assert_eq!(store.count("popular_rank")?, 0);
    Ok(())
}

#[test]
fn concurrent_refresh_of_one_table_fails_fast() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    load_dataset(&store, &generate_dataset(5, 8, 10, 9))?;
    let readmart = Readmart::new(store, ReadmartConfig::default());
    let projection = readmart.config().projections[0].clone();

    let held = readmart.locks().try_acquire(&projection.destination)?;
    match readmart.refresh_projection(&projection) {
        Err(ReadmartError::RefreshInProgress(table)) => assert_eq!(table, "articles_science"),
        other => panic!("unexpected {other:?}"),
    }
    drop(held);

    let report = readmart.refresh_projection(&projection)?;
    assert_eq!(report.destination, "articles_science");
    Ok(())
}
