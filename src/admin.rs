//! Cluster control-plane seam used by the shard planner, plus an in-memory control
//! plane that applies the same acceptance rules a real balancer would.

use crate::error::{ReadmartError, Result};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A tagged key range `[lower, upper)` on one field of one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardRange {
    /// `<database>.<table>`
    pub namespace: String,
    pub field: String,
    pub lower: String,
    pub upper: String,
    pub tag: String,
}

impl ShardRange {
    /// Half-open ranges on the same namespace and field overlap unless one ends at or
    /// before the other's start.
    pub fn overlaps(&self, other: &ShardRange) -> bool {
        self.namespace == other.namespace
            && self.field == other.field
            && self.lower < other.upper
            && other.lower < self.upper
    }

    pub fn contains(&self, value: &str) -> bool {
        self.lower.as_str() <= value && value < self.upper.as_str()
    }

    pub(crate) fn overlap_error(&self, existing: &ShardRange) -> ReadmartError {
        ReadmartError::OverlappingRange {
            namespace: self.namespace.clone(),
            field: self.field.clone(),
            lower: self.lower.clone(),
            upper: self.upper.clone(),
            existing_lower: existing.lower.clone(),
            existing_upper: existing.upper.clone(),
            existing_tag: existing.tag.clone(),
        }
    }
}

impl fmt::Display for ShardRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} [{:?}, {:?}) -> {}",
            self.namespace, self.field, self.lower, self.upper, self.tag
        )
    }
}

/// Acknowledgement for a submitted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeAck {
    Accepted,
    /// The identical range was already registered; nothing changed.
    AlreadyPresent,
}

/// Best-effort snapshot returned when distribution is requested. Chunk migration
/// itself happens in the balancer and is not awaited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionStatus {
    pub namespace: String,
    pub tag_ranges: usize,
    /// Tags with at least one range on this namespace, mapped to their shards.
    pub placements: BTreeMap<String, Vec<String>>,
}

/// Administrative operations for range-based partitioning.
///
/// Calls block until the control plane accepts or rejects the request.
pub trait ClusterAdmin: Send + Sync {
    fn add_shard_tag(&self, shard: &str, tag: &str) -> Result<()>;

    /// Enable partitioning for a database. Fails with `PartitionAlreadyEnabled`
    /// when it already is.
    fn enable_partitioning(&self, database: &str) -> Result<()>;

    fn create_shard_key_index(&self, namespace: &str, field: &str) -> Result<()>;

    fn add_tag_range(&self, range: &ShardRange) -> Result<RangeAck>;

    fn tag_ranges(&self, namespace: &str) -> Result<Vec<ShardRange>>;

    /// Partition a collection by `field`. Fails with `PartitionAlreadyEnabled` when
    /// the collection is already partitioned.
    fn shard_collection(&self, namespace: &str, field: &str) -> Result<()>;

    fn request_distribution(&self, namespace: &str) -> Result<DistributionStatus>;
}

#[derive(Debug, Default)]
struct AdminState {
    shard_tags: BTreeMap<String, BTreeSet<String>>,
    partitioned_databases: HashSet<String>,
    key_indexes: HashSet<(String, String)>,
    ranges: Vec<ShardRange>,
    sharded: HashMap<String, String>,
    distribution_requests: Vec<String>,
    available: bool,
    /// Remaining ranges accepted before the control plane goes away.
    range_quota: Option<usize>,
}

/// In-memory control plane.
#[derive(Debug)]
pub struct MemoryAdmin {
    state: Mutex<AdminState>,
}

impl Default for MemoryAdmin {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdmin {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AdminState {
                available: true,
                ..AdminState::default()
            }),
        }
    }

    /// Simulate the control plane going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Accept `quota` more ranges, then become unavailable.
    pub fn set_range_quota(&self, quota: Option<usize>) {
        self.state.lock().range_quota = quota;
    }

    pub fn all_ranges(&self) -> Vec<ShardRange> {
        self.state.lock().ranges.clone()
    }

    pub fn sharded_collections(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .sharded
            .iter()
            .map(|(ns, field)| (ns.clone(), field.clone()))
            .collect()
    }

    pub fn shards_for_tag(&self, tag: &str) -> Vec<String> {
        self.state
            .lock()
            .shard_tags
            .iter()
            .filter(|(_, tags)| tags.contains(tag))
            .map(|(shard, _)| shard.clone())
            .collect()
    }

    pub fn has_shard_key_index(&self, namespace: &str, field: &str) -> bool {
        self.state
            .lock()
            .key_indexes
            .contains(&(namespace.to_string(), field.to_string()))
    }

    pub fn distribution_requests(&self) -> Vec<String> {
        self.state.lock().distribution_requests.clone()
    }
}

fn unavailable(state: &AdminState) -> Result<()> {
    if state.available {
        Ok(())
    } else {
        Err(ReadmartError::AdminApiUnavailable(
            "control plane is not reachable".to_string(),
        ))
    }
}

impl ClusterAdmin for MemoryAdmin {
    fn add_shard_tag(&self, shard: &str, tag: &str) -> Result<()> {
        let mut state = self.state.lock();
        unavailable(&state)?;
        state
            .shard_tags
            .entry(shard.to_string())
            .or_default()
            .insert(tag.to_string());
        Ok(())
    }

    fn enable_partitioning(&self, database: &str) -> Result<()> {
        let mut state = self.state.lock();
        unavailable(&state)?;
        if !state.partitioned_databases.insert(database.to_string()) {
            return Err(ReadmartError::PartitionAlreadyEnabled {
                namespace: database.to_string(),
            });
        }
        Ok(())
    }

    fn create_shard_key_index(&self, namespace: &str, field: &str) -> Result<()> {
        let mut state = self.state.lock();
        unavailable(&state)?;
        state
            .key_indexes
            .insert((namespace.to_string(), field.to_string()));
        Ok(())
    }

    fn add_tag_range(&self, range: &ShardRange) -> Result<RangeAck> {
        let mut state = self.state.lock();
        unavailable(&state)?;
        if state.ranges.iter().any(|existing| existing == range) {
            return Ok(RangeAck::AlreadyPresent);
        }
        if let Some(existing) = state.ranges.iter().find(|existing| existing.overlaps(range)) {
            return Err(range.overlap_error(existing));
        }
        match state.range_quota {
            Some(0) => {
                state.available = false;
                return Err(ReadmartError::AdminApiUnavailable(
                    "control plane stopped responding".to_string(),
                ));
            }
            Some(remaining) => state.range_quota = Some(remaining - 1),
            None => {}
        }
        state.ranges.push(range.clone());
        Ok(RangeAck::Accepted)
    }

    fn tag_ranges(&self, namespace: &str) -> Result<Vec<ShardRange>> {
        let state = self.state.lock();
        unavailable(&state)?;
        Ok(state
            .ranges
            .iter()
            .filter(|range| range.namespace == namespace)
            .cloned()
            .collect())
    }

    fn shard_collection(&self, namespace: &str, field: &str) -> Result<()> {
        let mut state = self.state.lock();
        unavailable(&state)?;
        if state.sharded.contains_key(namespace) {
            return Err(ReadmartError::PartitionAlreadyEnabled {
                namespace: namespace.to_string(),
            });
        }
        state
            .sharded
            .insert(namespace.to_string(), field.to_string());
        Ok(())
    }

    fn request_distribution(&self, namespace: &str) -> Result<DistributionStatus> {
        let mut state = self.state.lock();
        unavailable(&state)?;
        state.distribution_requests.push(namespace.to_string());

        let ranges: Vec<&ShardRange> = state
            .ranges
            .iter()
            .filter(|range| range.namespace == namespace)
            .collect();
        let mut placements: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for range in &ranges {
            let shards = state
                .shard_tags
                .iter()
                .filter(|(_, tags)| tags.contains(&range.tag))
                .map(|(shard, _)| shard.clone())
                .collect();
            placements.insert(range.tag.clone(), shards);
        }
        Ok(DistributionStatus {
            namespace: namespace.to_string(),
            tag_ranges: ranges.len(),
            placements,
        })
    }
}
