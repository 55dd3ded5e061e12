//! # Shard Planning
//!
//! Turns per-table `(tag, value)` assignments into tagged key ranges and submits
//! them to a [`ClusterAdmin`]. Every value `v` owns exactly `[v, next_boundary(v))`,
//! so ranges produced for different values never overlap.

use crate::admin::{ClusterAdmin, DistributionStatus, RangeAck, ShardRange};
use crate::error::{ReadmartError, Result};
use crate::range::next_boundary;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Binds a storage shard to a placement tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardTag {
    pub shard: String,
    pub tag: String,
}

impl ShardTag {
    pub fn new(shard: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            shard: shard.into(),
            tag: tag.into(),
        }
    }
}

/// One value of the shard-key field pinned to a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeAssignment {
    pub tag: String,
    pub value: String,
}

impl RangeAssignment {
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePlan {
    pub table: String,
    pub key: String,
    pub assignments: Vec<RangeAssignment>,
}

impl TablePlan {
    pub fn new(
        table: impl Into<String>,
        key: impl Into<String>,
        assignments: Vec<RangeAssignment>,
    ) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            assignments,
        }
    }
}

/// Outcome of planning one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub namespace: String,
    pub field: String,
    /// Ranges newly accepted by the control plane.
    pub submitted: Vec<ShardRange>,
    /// Ranges that were already registered with the same bounds and tag.
    pub already_present: usize,
    /// The database had partitioning enabled before this call.
    pub database_already_enabled: bool,
    /// The collection was already sharded on its key before this call.
    pub collection_already_sharded: bool,
    pub distribution: DistributionStatus,
}

#[derive(Debug)]
pub struct TableOutcome {
    pub table: String,
    pub result: Result<PlanReport>,
}

/// Per-table results of [`ShardPlanner::plan_all`]. A failing table does not stop
/// the remaining ones.
#[derive(Debug, Default)]
pub struct PlanSummary {
    pub outcomes: Vec<TableOutcome>,
}

impl PlanSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ReadmartError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|err| (o.table.as_str(), err)))
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

pub struct ShardPlanner {
    admin: Arc<dyn ClusterAdmin>,
    database: String,
}

impl ShardPlanner {
    pub fn new(admin: Arc<dyn ClusterAdmin>, database: impl Into<String>) -> Self {
        Self {
            admin,
            database: database.into(),
        }
    }

    pub fn namespace(&self, table: &str) -> String {
        format!("{}.{}", self.database, table)
    }

    pub fn register_shard_tags(&self, tags: &[ShardTag]) -> Result<()> {
        for binding in tags {
            self.admin.add_shard_tag(&binding.shard, &binding.tag)?;
            info!(shard = %binding.shard, tag = %binding.tag, "shard tag registered");
        }
        Ok(())
    }

    /// Compute the ranges for one table without contacting the control plane.
    pub fn ranges_for(
        &self,
        table: &str,
        key: &str,
        assignments: &[RangeAssignment],
    ) -> Result<Vec<ShardRange>> {
        let namespace = self.namespace(table);
        assignments
            .iter()
            .map(|assignment| {
                Ok(ShardRange {
                    namespace: namespace.clone(),
                    field: key.to_string(),
                    lower: assignment.value.clone(),
                    upper: next_boundary(&assignment.value)?,
                    tag: assignment.tag.clone(),
                })
            })
            .collect()
    }

    /// Plan and apply range partitioning for one table.
    ///
    /// Every range is validated against the ranges already registered for the
    /// namespace (and against the other ranges of this plan) before anything is
    /// submitted. Ranges accepted before a control-plane failure stay in place.
    #[instrument(skip(self, assignments), fields(database = %self.database))]
    pub fn plan_and_apply(
        &self,
        table: &str,
        key: &str,
        assignments: &[RangeAssignment],
    ) -> Result<PlanReport> {
        let namespace = self.namespace(table);
        let ranges = self.ranges_for(table, key, assignments)?;

        let mut known = self.admin.tag_ranges(&namespace)?;
        let mut pending = Vec::with_capacity(ranges.len());
        let mut already_present = 0;
        for range in ranges {
            if known.contains(&range) {
                already_present += 1;
                continue;
            }
            if let Some(existing) = known.iter().find(|existing| existing.overlaps(&range)) {
                return Err(range.overlap_error(existing));
            }
            known.push(range.clone());
            pending.push(range);
        }

        let database_enabled =
            allow_already_enabled(self.admin.enable_partitioning(&self.database))?;
        self.admin.create_shard_key_index(&namespace, key)?;

        let mut submitted = Vec::with_capacity(pending.len());
        for range in pending {
            match self.admin.add_tag_range(&range)? {
                RangeAck::Accepted => {
                    info!(range = %range, "tag range added");
                    submitted.push(range);
                }
                RangeAck::AlreadyPresent => already_present += 1,
            }
        }

        let collection_enabled =
            allow_already_enabled(self.admin.shard_collection(&namespace, key))?;
        if !collection_enabled {
            warn!(namespace = %namespace, "collection already sharded");
        }
        let distribution = self.admin.request_distribution(&namespace)?;

        info!(
            namespace = %namespace,
            submitted = submitted.len(),
            already_present,
            "table partitioned"
        );
        Ok(PlanReport {
            namespace,
            field: key.to_string(),
            submitted,
            already_present,
            database_already_enabled: !database_enabled,
            collection_already_sharded: !collection_enabled,
            distribution,
        })
    }

    /// Plan every table, continuing past per-table failures.
    pub fn plan_all(&self, plans: &[TablePlan]) -> PlanSummary {
        let outcomes = plans
            .iter()
            .map(|plan| {
                let result = self.plan_and_apply(&plan.table, &plan.key, &plan.assignments);
                if let Err(err) = &result {
                    warn!(table = %plan.table, error = %err, "table plan failed");
                }
                TableOutcome {
                    table: plan.table.clone(),
                    result,
                }
            })
            .collect();
        PlanSummary { outcomes }
    }
}

/// `Ok(true)` when newly enabled, `Ok(false)` when it already was.
fn allow_already_enabled(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(ReadmartError::PartitionAlreadyEnabled { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}
