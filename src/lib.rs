//! # Readmart
//!
//! Batch materialization of read-analytics views over a document store, plus
//! range-partitioning plans for the collections involved.
//!
//! A run enriches the `reads` fact table with actor region and content category,
//! rebuilds per-content summaries (`beReads`), upserts calendar popularity
//! rankings (`popular_rank`) and refreshes filtered category snapshots. Every
//! derived table is a pure function of its sources, written back in one swap.

pub mod admin;
pub mod aggregate;
pub mod config;
pub mod denormalize;
pub mod error;
pub mod import;
pub mod locks;
pub mod model;
pub mod persistence;
pub mod range;
pub mod rank;
pub mod refresh;
pub mod sharding;
pub mod store;
pub mod temporal;

// Re-export main types for convenience
pub use admin::{ClusterAdmin, MemoryAdmin, ShardRange};
pub use aggregate::SummaryReport;
pub use config::ReadmartConfig;
pub use denormalize::EnrichReport;
pub use error::{ReadmartError, Result};
pub use model::{ContentSummary, Document, Granularity, InteractionFact, PopularityEntry};
pub use persistence::PersistentStore;
pub use range::next_boundary;
pub use rank::RankReport;
pub use refresh::RefreshReport;
pub use sharding::{PlanReport, PlanSummary, ShardPlanner};
pub use store::{DocumentStore, MemoryStore};

use crate::config::ProjectionConfig;
use crate::locks::TableLocks;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Everything one pipeline run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub enrich: EnrichReport,
    pub summaries: SummaryReport,
    pub ranking: RankReport,
    pub projections: Vec<RefreshReport>,
}

/// Main API: the configured stages bound to one store.
pub struct Readmart {
    store: Arc<dyn DocumentStore>,
    config: ReadmartConfig,
    locks: TableLocks,
}

impl Readmart {
    pub fn new<S>(store: S, config: ReadmartConfig) -> Self
    where
        S: DocumentStore + 'static,
    {
        Self::with_shared_store(Arc::new(store), config)
    }

    pub fn with_shared_store(store: Arc<dyn DocumentStore>, config: ReadmartConfig) -> Self {
        Self {
            store,
            config,
            locks: TableLocks::new(),
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &ReadmartConfig {
        &self.config
    }

    pub fn locks(&self) -> &TableLocks {
        &self.locks
    }

    /// Parse exported JSON (array or JSON lines) and append it to `collection`.
    pub fn import_json(&self, collection: &str, text: &str) -> Result<usize> {
        let docs = import::parse_documents(collection, text)?;
        let ids = self.store.insert_many(collection, docs)?;
        info!(collection, imported = ids.len(), "documents imported");
        Ok(ids.len())
    }

    /// Every collection the store holds, with its document count, sorted by name.
    pub fn collection_counts(&self) -> Result<Vec<(String, usize)>> {
        self.store
            .collection_names()?
            .into_iter()
            .map(|name| {
                let count = self.store.count(&name)?;
                Ok((name, count))
            })
            .collect()
    }

    pub fn enrich_reads(&self) -> Result<EnrichReport> {
        let collections = &self.config.collections;
        let _guard = self.locks.try_acquire(&collections.reads)?;
        denormalize::enrich(self.store(), collections, self.config.join.policy)
    }

    pub fn rebuild_summaries(&self) -> Result<SummaryReport> {
        let collections = &self.config.collections;
        let _guard = self.locks.try_acquire(&collections.be_reads)?;
        aggregate::summarize(
            self.store(),
            collections,
            self.config.ranking.representative,
        )
    }

    pub fn rebuild_ranking(&self) -> Result<RankReport> {
        let collections = &self.config.collections;
        let _guard = self.locks.try_acquire(&collections.popular_rank)?;
        rank::rank(self.store(), collections, &self.config.ranking)
    }

    pub fn refresh_projection(&self, projection: &ProjectionConfig) -> Result<RefreshReport> {
        let _guard = self.locks.try_acquire(&projection.destination)?;
        refresh::refresh_projection(self.store(), projection)
    }

    /// Refresh every configured projection, stopping at the first failure.
    pub fn refresh_projections(&self) -> Result<Vec<RefreshReport>> {
        self.config
            .projections
            .iter()
            .map(|projection| self.refresh_projection(projection))
            .collect()
    }

    /// Run every stage in dependency order.
    #[instrument(skip(self))]
    pub fn run_pipeline(&self) -> Result<PipelineReport> {
        let enrich = self.enrich_reads()?;
        let summaries = self.rebuild_summaries()?;
        let ranking = self.rebuild_ranking()?;
        let projections = self.refresh_projections()?;
        info!(
            facts = enrich.facts,
            summaries = summaries.summaries,
            ranking_entries = ranking.entries,
            projections = projections.len(),
            "pipeline complete"
        );
        Ok(PipelineReport {
            enrich,
            summaries,
            ranking,
            projections,
        })
    }

    pub fn shard_planner(&self, admin: Arc<dyn ClusterAdmin>) -> ShardPlanner {
        ShardPlanner::new(admin, self.config.sharding.database.clone())
    }

    /// Register the configured shard tags, then apply every configured table plan.
    pub fn apply_shard_plans(&self, admin: Arc<dyn ClusterAdmin>) -> Result<PlanSummary> {
        let planner = self.shard_planner(admin);
        planner.register_shard_tags(&self.config.sharding.shard_tags)?;
        Ok(planner.plan_all(&self.config.sharding.tables))
    }
}
