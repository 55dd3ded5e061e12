//! Loading exported collections. Accepts a JSON array of objects or one object
//! per line.

use crate::error::{ReadmartError, Result};
use crate::model::Document;
use serde_json::Value;

fn object(collection: &str, value: Value, position: usize) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ReadmartError::MalformedDocument {
            collection: collection.to_string(),
            reason: format!("entry {position} is not an object: {other}"),
        }),
    }
}

pub fn parse_documents(collection: &str, text: &str) -> Result<Vec<Document>> {
    let malformed = |reason: String| ReadmartError::MalformedDocument {
        collection: collection.to_string(),
        reason,
    };

    if text.trim_start().starts_with('[') {
        let values: Vec<Value> =
            serde_json::from_str(text).map_err(|err| malformed(err.to_string()))?;
        return values
            .into_iter()
            .enumerate()
            .map(|(i, value)| object(collection, value, i + 1))
            .collect();
    }

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let value = serde_json::from_str(line)
                .map_err(|err| malformed(format!("line {}: {err}", i + 1)))?;
            object(collection, value, i + 1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array() {
        let docs = parse_documents("users", r#"[{"uid": "u1"}, {"uid": "u2"}]"#).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["uid"], "u2");
    }

    #[test]
    fn parses_json_lines_skipping_blanks() {
        let text = "{\"aid\": \"a1\"}\n\n{\"aid\": \"a2\"}\n";
        let docs = parse_documents("articles", text).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn reports_bad_line() {
        let err = parse_documents("reads", "{\"uid\": 1}\nnot json\n").unwrap_err();
        match err {
            ReadmartError::MalformedDocument { collection, reason } => {
                assert_eq!(collection, "reads");
                assert!(reason.starts_with("line 2"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_non_objects() {
        assert!(parse_documents("users", "[1, 2]").is_err());
    }
}
