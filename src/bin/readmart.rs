use anyhow::{Context, Result};
use readmart::config::{ConfigOverrides, LogOverrides, ReadmartConfig, StorageOverrides};
use readmart::{DocumentStore, MemoryAdmin, MemoryStore, PersistentStore, Readmart};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: readmart <import|pipeline|refresh|collections|shard-plan> \
[--config <path>] [--data-dir <path>] [--log <filter>] [--collection <name> --file <path>]";

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn command() -> Option<String> {
    std::env::args().nth(1).filter(|arg| !arg.starts_with("--"))
}

fn load_config() -> Result<ReadmartConfig> {
    let overrides = ConfigOverrides {
        storage: Some(StorageOverrides {
            data_dir: parse_arg("--data-dir").map(PathBuf::from),
            repair: has_flag("--repair").then_some(true),
        }),
        log: parse_arg("--log").map(|filter| LogOverrides {
            filter: Some(filter),
        }),
    };
    let config_path = parse_arg("--config");
    ReadmartConfig::load(config_path.as_deref(), overrides).context("loading configuration")
}

fn open_store(config: &ReadmartConfig) -> Result<Arc<dyn DocumentStore>> {
    match &config.storage.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating data dir {}", dir.display()))?;
            let options = readmart::persistence::PersistentOpenOptions {
                repair: config.storage.repair,
            };
            let store = PersistentStore::open_with_options(dir, options)
                .with_context(|| format!("opening store at {}", dir.display()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

fn main() -> Result<()> {
    let command = command().ok_or_else(|| anyhow::anyhow!(USAGE))?;
    let config = load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .init();

    if command == "shard-plan" {
        let readmart = Readmart::new(MemoryStore::new(), config);
        let admin = Arc::new(MemoryAdmin::new());
        let summary = readmart.apply_shard_plans(admin.clone())?;
        for outcome in &summary.outcomes {
            match &outcome.result {
                Ok(report) => println!(
                    "{}: {} new, {} already present",
                    report.namespace,
                    report.submitted.len(),
                    report.already_present
                ),
                Err(err) => println!("{}: failed: {err}", outcome.table),
            }
        }
        for range in admin.all_ranges() {
            println!("  {range}");
        }
        if !summary.is_complete() {
            anyhow::bail!("{} table plan(s) failed", summary.failures().count());
        }
        return Ok(());
    }

    let store = open_store(&config)?;
    let readmart = Readmart::with_shared_store(store, config);
    match command.as_str() {
        "import" => {
            let collection = parse_arg("--collection")
                .ok_or_else(|| anyhow::anyhow!("--collection is required"))?;
            let file = parse_arg("--file").ok_or_else(|| anyhow::anyhow!("--file is required"))?;
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
            let imported = readmart.import_json(&collection, &text)?;
            println!("imported {imported} documents into {collection}");
        }
        "pipeline" => {
            let report = readmart.run_pipeline()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "refresh" => {
            for report in readmart.refresh_projections()? {
                println!(
                    "{} -> {}: {} rows",
                    report.source, report.destination, report.written
                );
            }
        }
        "collections" => {
            for (name, count) in readmart.collection_counts()? {
                println!("{name}: {count}");
            }
        }
        other => anyhow::bail!("unknown command {other:?}\n{USAGE}"),
    }
    Ok(())
}
