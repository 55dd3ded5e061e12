//! Unified configuration for the view pipeline, projections and shard plans.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (readmart.toml)
//! ```toml
//! [ranking]
//! granularities = ["daily", "weekly", "monthly"]
//! tie_break = "ascending-content-id"
//!
//! [ranking.weights]
//! read = 1
//! comment = 2
//! agree = 3
//! share = 4
//!
//! [storage]
//! data_dir = "/var/lib/readmart"
//! ```
//!
//! Environment variables use the `READMART_` prefix with `__` between nested keys,
//! e.g. `READMART_STORAGE__DATA_DIR=/tmp/readmart`.

mod defaults;

pub use defaults::*;

use crate::model::Granularity;
use crate::sharding::{RangeAssignment, ShardTag, TablePlan};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadmartConfig {
    pub collections: CollectionNames,
    pub ranking: RankingConfig,
    pub join: JoinConfig,
    /// Category-filtered snapshots refreshed by `refresh_projections`
    pub projections: Vec<ProjectionConfig>,
    pub sharding: ShardingConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl Default for ReadmartConfig {
    fn default() -> Self {
        Self {
            collections: CollectionNames::default(),
            ranking: RankingConfig::default(),
            join: JoinConfig::default(),
            projections: default_projections(),
            sharding: ShardingConfig::default(),
            storage: StorageConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ReadmartConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(ReadmartConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        figment = figment.merge(Serialized::defaults(overrides));

        let config: Self = figment.extract().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ranking.granularities.is_empty() {
            return Err(ConfigError::new("ranking.granularities must not be empty"));
        }
        let weights = &self.ranking.weights;
        if [weights.read, weights.comment, weights.agree, weights.share]
            .iter()
            .any(|w| *w < 0)
        {
            return Err(ConfigError::new("ranking weights must be non-negative"));
        }
        for projection in &self.projections {
            if projection.destination == projection.source {
                return Err(ConfigError::new(format!(
                    "projection {} cannot overwrite its own source",
                    projection.destination
                )));
            }
        }
        for plan in &self.sharding.tables {
            if plan.table.is_empty() || plan.key.is_empty() {
                return Err(ConfigError::new("shard plans need a table and a key"));
            }
        }
        Ok(())
    }
}

/// Names of the persisted collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionNames {
    pub users: String,
    pub articles: String,
    pub reads: String,
    pub be_reads: String,
    pub popular_rank: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            users: DEFAULT_USERS.to_string(),
            articles: DEFAULT_ARTICLES.to_string(),
            reads: DEFAULT_READS.to_string(),
            be_reads: DEFAULT_BE_READS.to_string(),
            popular_rank: DEFAULT_POPULAR_RANK.to_string(),
        }
    }
}

/// Per-counter weights of the popularity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankWeights {
    pub read: i64,
    pub comment: i64,
    pub agree: i64,
    pub share: i64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self::unweighted()
    }
}

impl RankWeights {
    /// `read + comment + agree + share`
    pub fn unweighted() -> Self {
        Self {
            read: DEFAULT_READ_WEIGHT,
            comment: DEFAULT_COMMENT_WEIGHT,
            agree: DEFAULT_AGREE_WEIGHT,
            share: DEFAULT_SHARE_WEIGHT,
        }
    }

    /// `read + 2*comment + 3*agree + 4*share`
    pub fn weighted() -> Self {
        Self {
            read: 1,
            comment: 2,
            agree: 3,
            share: 4,
        }
    }
}

/// Order of equally scored content ids within a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    #[default]
    AscendingContentId,
    DescendingContentId,
}

/// Which fact of a content group supplies the summary's timestamp and category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RepresentativeRule {
    /// Lowest `_id`, i.e. the first fact ingested
    #[default]
    EarliestIngested,
    /// Lowest timestamp, ties broken by `_id`
    EarliestTimestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub weights: RankWeights,
    pub granularities: Vec<Granularity>,
    pub tie_break: TieBreak,
    pub representative: RepresentativeRule,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: RankWeights::default(),
            granularities: Granularity::ALL.to_vec(),
            tie_break: TieBreak::default(),
            representative: RepresentativeRule::default(),
        }
    }
}

/// How a fact that matches several reference rows is enriched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum JoinPolicy {
    /// Use the reference row with the lowest `_id` and report the ambiguity
    #[default]
    FirstByInternalId,
    /// Fail the enrichment stage
    Reject,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub policy: JoinPolicy,
}

/// One filtered snapshot: `destination := source where field == value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    pub source: String,
    pub field: String,
    pub value: String,
    pub destination: String,
}

impl ProjectionConfig {
    pub fn new(
        source: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            field: field.into(),
            value: value.into(),
            destination: destination.into(),
        }
    }
}

pub fn default_projections() -> Vec<ProjectionConfig> {
    vec![
        ProjectionConfig::new(
            DEFAULT_ARTICLES,
            CATEGORY_KEY,
            DEFAULT_PROJECTION_CATEGORY,
            DEFAULT_ARTICLES_SCIENCE,
        ),
        ProjectionConfig::new(
            DEFAULT_BE_READS,
            CATEGORY_KEY,
            DEFAULT_PROJECTION_CATEGORY,
            DEFAULT_BE_READS_SCIENCE,
        ),
    ]
}

/// Shard tags and range plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    pub database: String,
    pub shard_tags: Vec<ShardTag>,
    pub tables: Vec<TablePlan>,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            shard_tags: vec![
                ShardTag::new(SHARD1_NAME, SHARD1_TAG),
                ShardTag::new(SHARD2_NAME, SHARD2_TAG),
            ],
            tables: default_table_plans(),
        }
    }
}

/// Range plans of the original two-shard deployment.
pub fn default_table_plans() -> Vec<TablePlan> {
    let by = |table: &str, key: &str, assignments: &[(&str, &str)]| {
        TablePlan::new(
            table,
            key,
            assignments
                .iter()
                .map(|(tag, value)| RangeAssignment::new(*tag, *value))
                .collect(),
        )
    };
    let regions = [(SHARD1_TAG, "Beijing"), (SHARD2_TAG, "Hong Kong")];
    let categories = [(SHARD1_TAG, "science"), (SHARD2_TAG, "technology")];
    vec![
        by(DEFAULT_USERS, REGION_KEY, &regions),
        by(DEFAULT_READS, REGION_KEY, &regions),
        by(DEFAULT_ARTICLES, CATEGORY_KEY, &categories),
        by(DEFAULT_ARTICLES_SCIENCE, CATEGORY_KEY, &[(SHARD1_TAG, "science")]),
        by(DEFAULT_BE_READS, CATEGORY_KEY, &categories),
        by(DEFAULT_BE_READS_SCIENCE, CATEGORY_KEY, &[(SHARD2_TAG, "technology")]),
        by(
            DEFAULT_POPULAR_RANK,
            GRANULARITY_KEY,
            &[
                (SHARD1_TAG, Granularity::Daily.label()),
                (SHARD2_TAG, Granularity::Weekly.label()),
                (SHARD2_TAG, Granularity::Monthly.label()),
            ],
        ),
    ]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// RocksDB directory; the in-memory store is used when unset
    pub data_dir: Option<PathBuf>,
    /// Run repair before opening
    pub repair: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ReadmartConfig::default();
        assert_eq!(config.collections.be_reads, "beReads");
        assert_eq!(config.ranking.weights, RankWeights::unweighted());
        assert_eq!(config.ranking.granularities.len(), 3);
        assert_eq!(config.sharding.tables.len(), 7);
        assert_eq!(config.projections.len(), 2);
        assert_eq!(config.projections[1].destination, "be_reads_science");
        config.validate().unwrap();
    }

    #[test]
    fn test_tie_break_serde() {
        let json = serde_json::to_string(&TieBreak::DescendingContentId).unwrap();
        assert_eq!(json, "\"descending-content-id\"");

        let rule: RepresentativeRule = serde_json::from_str("\"earliest-timestamp\"").unwrap();
        assert_eq!(rule, RepresentativeRule::EarliestTimestamp);
    }

    #[test]
    fn file_layer_and_overrides_apply_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[ranking.weights]
comment = 2
agree = 3
share = 4

[[projections]]
source = "articles"
field = "category"
value = "technology"
destination = "articles_technology"

[storage]
data_dir = "/from/file"
"#
        )
        .unwrap();

        let overrides = ConfigOverrides {
            storage: Some(StorageOverrides {
                data_dir: Some(PathBuf::from("/from/cli")),
                repair: None,
            }),
            log: None,
        };
        let config =
            ReadmartConfig::load(Some(file.path().to_str().unwrap()), overrides).unwrap();
        assert_eq!(config.ranking.weights, RankWeights::weighted());
        assert_eq!(config.projections[0].destination, "articles_technology");
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/from/cli")));
    }

    #[test]
    fn validation_rejects_self_overwriting_projection() {
        let mut config = ReadmartConfig::default();
        config
            .projections
            .push(ProjectionConfig::new("articles", "category", "science", "articles"));
        assert!(config.validate().is_err());
    }
}
