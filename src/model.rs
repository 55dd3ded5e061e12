//! # Data Model
//!
//! Typed views over the documents held in the store. Raw documents are loosely
//! shaped JSON objects; everything the pipeline computes on is decoded here first,
//! including the `"1"`/other flag convention of the interaction log.

use crate::error::{ReadmartError, Result};
use crate::temporal::Instant;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A stored document. Always carries [`ID_FIELD`] once it has been written.
pub type Document = Map<String, Value>;

/// Internal, store-assigned document id. Increases with ingestion order.
pub const ID_FIELD: &str = "_id";

/// Persisted field names.
pub mod fields {
    pub const UID: &str = "uid";
    pub const AID: &str = "aid";
    pub const REGION: &str = "region";
    pub const CATEGORY: &str = "category";
    pub const TIMESTAMP: &str = "timestamp";
    pub const READ_TIME_LENGTH: &str = "readTimeLength";
    pub const READ_OR_NOT: &str = "readOrNot";
    pub const AGREE_OR_NOT: &str = "agreeOrNot";
    pub const COMMENT_OR_NOT: &str = "commentOrNot";
    pub const SHARE_OR_NOT: &str = "shareOrNot";
    pub const COMMENT_DETAIL: &str = "commentDetail";
    pub const TEMPORAL_GRANULARITY: &str = "temporalGranularity";
    pub const ARTICLE_AID_LIST: &str = "articleAidList";
}

/// Read the internal id of a stored document.
pub fn doc_id(doc: &Document) -> Option<u64> {
    doc.get(ID_FIELD).and_then(Value::as_u64)
}

/// Ids are strings in some exports and integers in others; both normalise to strings.
pub fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Epoch milliseconds, as an integer or a numeric string.
pub fn decode_timestamp(value: Option<&Value>) -> Option<Instant> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Only the literal string `"1"` is true.
pub fn decode_flag(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::String(s)) if s == "1")
}

fn optional_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn malformed(collection: &str, reason: impl Into<String>) -> ReadmartError {
    ReadmartError::MalformedDocument {
        collection: collection.to_string(),
        reason: reason.into(),
    }
}

/// Reference row from `users`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub doc_id: u64,
    pub uid: String,
    pub region: Option<String>,
}

impl Actor {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc_id = doc_id(doc).ok_or_else(|| malformed("users", "missing _id"))?;
        let uid = id_string(doc.get(fields::UID))
            .ok_or_else(|| malformed("users", format!("document {doc_id} has no uid")))?;
        Ok(Self {
            doc_id,
            uid,
            region: optional_string(doc.get(fields::REGION)),
        })
    }
}

/// Reference row from `articles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub doc_id: u64,
    pub aid: String,
    pub category: Option<String>,
}

impl ContentItem {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc_id = doc_id(doc).ok_or_else(|| malformed("articles", "missing _id"))?;
        let aid = id_string(doc.get(fields::AID))
            .ok_or_else(|| malformed("articles", format!("document {doc_id} has no aid")))?;
        Ok(Self {
            doc_id,
            aid,
            category: optional_string(doc.get(fields::CATEGORY)),
        })
    }
}

/// One row of the `reads` interaction log, flags already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionFact {
    pub doc_id: u64,
    pub uid: String,
    pub aid: String,
    pub timestamp: Instant,
    /// Kept raw; it is converted (and may fail) per row during aggregation.
    pub read_time_length: Option<Value>,
    pub read: bool,
    pub agreed: bool,
    pub commented: bool,
    pub shared: bool,
    pub comment_detail: Option<String>,
    pub region: Option<String>,
    pub category: Option<String>,
}

impl InteractionFact {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc_id = doc_id(doc).ok_or_else(|| malformed("reads", "missing _id"))?;
        let uid = id_string(doc.get(fields::UID))
            .ok_or_else(|| malformed("reads", format!("fact {doc_id} has no uid")))?;
        let aid = id_string(doc.get(fields::AID))
            .ok_or_else(|| malformed("reads", format!("fact {doc_id} has no aid")))?;
        let timestamp = decode_timestamp(doc.get(fields::TIMESTAMP))
            .ok_or_else(|| malformed("reads", format!("fact {doc_id} has no usable timestamp")))?;

        // Every row of the log is a read event unless it explicitly says otherwise.
        let read = match doc.get(fields::READ_OR_NOT) {
            None => true,
            flag => decode_flag(flag),
        };

        Ok(Self {
            doc_id,
            uid,
            aid,
            timestamp,
            read_time_length: doc.get(fields::READ_TIME_LENGTH).cloned(),
            read,
            agreed: decode_flag(doc.get(fields::AGREE_OR_NOT)),
            commented: decode_flag(doc.get(fields::COMMENT_OR_NOT)),
            shared: decode_flag(doc.get(fields::SHARE_OR_NOT)),
            comment_detail: optional_string(doc.get(fields::COMMENT_DETAIL)),
            region: optional_string(doc.get(fields::REGION)),
            category: optional_string(doc.get(fields::CATEGORY)),
        })
    }

    /// Read duration as an integer count. Absent durations contribute nothing.
    pub fn read_duration(&self) -> Result<i64> {
        let non_numeric = |value: String| ReadmartError::NonNumericCounterValue {
            fact_id: self.doc_id,
            field: fields::READ_TIME_LENGTH,
            value,
        };
        match &self.read_time_length {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
                .ok_or_else(|| non_numeric(n.to_string())),
            Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| non_numeric(s.clone())),
            Some(other) => Err(non_numeric(other.to_string())),
        }
    }
}

/// Per-content rollup persisted in `beReads`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSummary {
    pub aid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub timestamp: Instant,
    pub read_num: i64,
    pub read_uid_list: Vec<String>,
    pub comment_num: u64,
    pub comment_uid_list: Vec<String>,
    pub agree_num: u64,
    pub agree_uid_list: Vec<String>,
    pub share_num: u64,
    pub share_uid_list: Vec<String>,
}

impl ContentSummary {
    pub fn empty(aid: impl Into<String>, timestamp: Instant) -> Self {
        Self {
            aid: aid.into(),
            category: None,
            timestamp,
            read_num: 0,
            read_uid_list: Vec::new(),
            comment_num: 0,
            comment_uid_list: Vec::new(),
            agree_num: 0,
            agree_uid_list: Vec::new(),
            share_num: 0,
            share_uid_list: Vec::new(),
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        serde_json::from_value(Value::Object(doc.clone()))
            .map_err(|err| malformed("beReads", err.to_string()))
    }

    pub fn to_document(&self) -> Result<Document> {
        into_document(serde_json::to_value(self)?)
    }
}

/// Calendar bucket used by the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [
        Granularity::Daily,
        Granularity::Weekly,
        Granularity::Monthly,
    ];

    /// Persisted `temporalGranularity` value.
    pub fn label(self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ranked content ids for one (period start, granularity) key in `popular_rank`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularityEntry {
    #[serde(rename = "timestamp")]
    pub period_start: Instant,
    #[serde(rename = "temporalGranularity")]
    pub granularity: Granularity,
    #[serde(rename = "articleAidList")]
    pub aids: Vec<String>,
}

impl PopularityEntry {
    pub const KEY_FIELDS: [&'static str; 2] = [fields::TIMESTAMP, fields::TEMPORAL_GRANULARITY];

    pub fn to_document(&self) -> Result<Document> {
        into_document(serde_json::to_value(self)?)
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        serde_json::from_value(Value::Object(doc.clone()))
            .map_err(|err| malformed("popular_rank", err.to_string()))
    }
}

fn into_document(value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(malformed("derived", format!("expected an object, got {other}"))),
    }
}
