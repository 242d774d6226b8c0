//! Error types for container rewriting.

use thiserror::Error;

/// Errors that can occur while editing a container.
///
/// "Nothing to do" outcomes (no KF8 part, no page map) are not errors; see
/// [`Outcome`](crate::mobi::Outcome) and the `Option` returns of the page-map
/// lookups.
#[derive(Error, Debug)]
pub enum Error {
    /// A record index, metadata tag lookup, or byte range falls outside the container.
    #[error("out of bounds: {0}")]
    Bounds(String),

    /// A structural expectation of the container or one of its sub-formats is violated.
    #[error("malformed container: {0}")]
    Format(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn bounds(msg: impl Into<String>) -> Self {
        Error::Bounds(msg.into())
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
