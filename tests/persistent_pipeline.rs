#[path = "../src/test_support.rs"]
mod test_support;

use readmart::{DocumentStore, MemoryStore, PersistentStore, Readmart, ReadmartConfig};
use tempfile::tempdir;
use test_support::{generate_dataset, load_dataset};

const VIEWS: [&str; 5] = [
    "reads",
    "beReads",
    "popular_rank",
    "articles_science",
    "be_reads_science",
];

#[test]
fn persistent_store_matches_memory_store() -> anyhow::Result<()> {
    let dataset = generate_dataset(30, 12, 300, 41);

    let memory = MemoryStore::new();
    load_dataset(&memory, &dataset)?;
    let in_memory = Readmart::new(memory, ReadmartConfig::default());
    in_memory.run_pipeline()?;

    let dir = tempdir()?;
    let persistent = PersistentStore::open(dir.path())?;
    load_dataset(&persistent, &dataset)?;
    let on_disk = Readmart::new(persistent, ReadmartConfig::default());
    on_disk.run_pipeline()?;

    for view in VIEWS {
        assert_eq!(
            in_memory.store().find_all(view)?,
            on_disk.store().find_all(view)?,
            "{view} differs"
        );
    }
    Ok(())
}

#[test]
fn views_survive_reopen() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let dataset = generate_dataset(10, 6, 80, 8);

    let expected = {
        let store = PersistentStore::open(dir.path())?;
        load_dataset(&store, &dataset)?;
        let readmart = Readmart::new(store, ReadmartConfig::default());
        readmart.run_pipeline()?;
        VIEWS
            .iter()
            .map(|view| readmart.store().find_all(view))
            .collect::<readmart::Result<Vec<_>>>()?
    };

    let reopened = PersistentStore::open(dir.path())?;
    for (view, docs) in VIEWS.iter().zip(expected) {
        assert_eq!(reopened.find_all(view)?, docs, "{view} differs after reopen");
    }
    assert!(reopened.has_index("users", "uid")?);

    // A run over the reopened store is a no-op.
    let readmart = Readmart::new(reopened, ReadmartConfig::default());
    let report = readmart.run_pipeline()?;
    assert_eq!(report.ranking.inserted, 0);
    Ok(())
}
