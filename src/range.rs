//! Exclusive upper bounds for shard key ranges.
//!
//! `next_boundary` is a cheap terminator for curated category and region literals,
//! not a general successor function: it looks at the final character only and
//! supports ASCII lowercase letters only.

use crate::error::{ReadmartError, Result};

/// Replace the final character of `value` with the next code point.
///
/// `"science"` becomes `"sciencf"`. A final `'z'` becomes `'{'`, which still sorts
/// after it. Fails for the empty string and for any other final character.
pub fn next_boundary(value: &str) -> Result<String> {
    let last = value.chars().last().ok_or(ReadmartError::InvalidRangeValue {
        value: String::new(),
        reason: "empty value",
    })?;

    if !last.is_ascii_lowercase() {
        return Err(ReadmartError::InvalidRangeValue {
            value: value.to_string(),
            reason: "last character is not a lowercase letter",
        });
    }

    let mut bound = String::with_capacity(value.len());
    bound.push_str(&value[..value.len() - 1]);
    bound.push((last as u8 + 1) as char);
    Ok(bound)
}
