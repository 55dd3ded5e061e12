//! Error taxonomy shared by the pipeline stages, the stores and the shard planner.

use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T, E = ReadmartError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReadmartError {
    /// A shard range seed that cannot produce an exclusive upper bound.
    #[error("invalid range value {value:?}: {reason}")]
    InvalidRangeValue { value: String, reason: &'static str },

    #[error(
        "range [{lower:?}, {upper:?}) for {namespace}.{field} overlaps accepted range \
         [{existing_lower:?}, {existing_upper:?}) tagged {existing_tag}"
    )]
    OverlappingRange {
        namespace: String,
        field: String,
        lower: String,
        upper: String,
        existing_lower: String,
        existing_upper: String,
        existing_tag: String,
    },

    /// Non-fatal: the control plane already partitions this namespace.
    #[error("partitioning already enabled for {namespace}")]
    PartitionAlreadyEnabled { namespace: String },

    #[error("cluster admin api unavailable: {0}")]
    AdminApiUnavailable(String),

    #[error("{collection}.{field} = {key:?} matched {matches} reference rows")]
    JoinAmbiguity {
        collection: String,
        field: String,
        key: String,
        matches: usize,
    },

    #[error("fact {fact_id} has non-numeric {field} value {value:?}")]
    NonNumericCounterValue {
        fact_id: u64,
        field: &'static str,
        value: String,
    },

    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("malformed document in {collection}: {reason}")]
    MalformedDocument { collection: String, reason: String },

    #[error("refresh of {0} is already in progress")]
    RefreshInProgress(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ReadmartError {
    /// Errors that stop the current table or stage outright.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReadmartError::AdminApiUnavailable(_)
                | ReadmartError::StoreUnavailable(_)
                | ReadmartError::RefreshInProgress(_)
        )
    }

    pub(crate) fn store(err: impl std::fmt::Display) -> Self {
        ReadmartError::StoreUnavailable(err.to_string())
    }
}

impl From<rocksdb::Error> for ReadmartError {
    fn from(err: rocksdb::Error) -> Self {
        ReadmartError::store(err)
    }
}

impl From<serde_json::Error> for ReadmartError {
    fn from(err: serde_json::Error) -> Self {
        ReadmartError::store(format!("document encoding: {err}"))
    }
}

impl From<bincode::Error> for ReadmartError {
    fn from(err: bincode::Error) -> Self {
        ReadmartError::store(format!("metadata encoding: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ReadmartError::StoreUnavailable("down".into()).is_fatal());
        assert!(ReadmartError::AdminApiUnavailable("down".into()).is_fatal());
        assert!(!ReadmartError::PartitionAlreadyEnabled {
            namespace: "database.users".into()
        }
        .is_fatal());
        assert!(!ReadmartError::NonNumericCounterValue {
            fact_id: 1,
            field: "readTimeLength",
            value: "abc".into(),
        }
        .is_fatal());
    }

    #[test]
    fn overlap_message_names_both_ranges() {
        let err = ReadmartError::OverlappingRange {
            namespace: "database.users".into(),
            field: "region".into(),
            lower: "Beijing".into(),
            upper: "Beijinh".into(),
            existing_lower: "Beijing".into(),
            existing_upper: "Beijinh".into(),
            existing_tag: "DBMS1".into(),
        };
        let message = err.to_string();
        assert!(message.contains("database.users.region"));
        assert!(message.contains("DBMS1"));
    }
}
