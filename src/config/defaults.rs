//! Default constants for readmart configuration.
//!
//! Collection names and shard layout match the deployment the views were first
//! built for; all of them can be overridden.

// =============================================================================
// Collections
// =============================================================================

pub const DEFAULT_USERS: &str = "users";
pub const DEFAULT_ARTICLES: &str = "articles";
pub const DEFAULT_READS: &str = "reads";
pub const DEFAULT_BE_READS: &str = "beReads";
pub const DEFAULT_POPULAR_RANK: &str = "popular_rank";
pub const DEFAULT_ARTICLES_SCIENCE: &str = "articles_science";
pub const DEFAULT_BE_READS_SCIENCE: &str = "be_reads_science";

/// Category the default projections are restricted to.
pub const DEFAULT_PROJECTION_CATEGORY: &str = "science";

// =============================================================================
// Ranking
// =============================================================================

/// Unweighted score: every interaction counts once.
pub const DEFAULT_READ_WEIGHT: i64 = 1;
pub const DEFAULT_COMMENT_WEIGHT: i64 = 1;
pub const DEFAULT_AGREE_WEIGHT: i64 = 1;
pub const DEFAULT_SHARE_WEIGHT: i64 = 1;

// =============================================================================
// Sharding
// =============================================================================

/// Database the collections live in; range namespaces are `<database>.<table>`.
pub const DEFAULT_DATABASE: &str = "database";

pub const SHARD1_TAG: &str = "DBMS1";
pub const SHARD2_TAG: &str = "DBMS2";
pub const SHARD1_NAME: &str = "mongodb-mongodb-sharded-shard-0";
pub const SHARD2_NAME: &str = "mongodb-mongodb-sharded-shard-1";

pub const REGION_KEY: &str = "region";
pub const CATEGORY_KEY: &str = "category";
pub const GRANULARITY_KEY: &str = "temporalGranularity";

// =============================================================================
// Environment & logging
// =============================================================================

/// Environment variable prefix; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "READMART_";

pub const DEFAULT_LOG_FILTER: &str = "info";
