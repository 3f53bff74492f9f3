//! Error types for query parsing and evaluation.

use std::ops::Range;
use thiserror::Error;

/// Description of why a query string failed to parse.
///
/// `range` is a byte range into the query string covering the offending token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryErrorDesc {
    pub msg: String,
    pub range: Range<usize>,
}

impl QueryErrorDesc {
    pub fn new(msg: impl Into<String>, range: Range<usize>) -> Self {
        Self {
            msg: msg.into(),
            range,
        }
    }
}

/// Raised when an invalid query is evaluated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
    pub range: Range<usize>,
}

impl QueryError {
    /// Formats a parse failure against the query text it came from.
    pub fn from_desc(query: &str, desc: &QueryErrorDesc) -> Self {
        let offending = query.get(desc.range.clone()).unwrap_or("");
        let message = format!(
            "invalid query '{}': {} (at {}..{}: '{}')",
            query, desc.msg, desc.range.start, desc.range.end, offending
        );
        Self {
            message,
            range: desc.range.clone(),
        }
    }
}
