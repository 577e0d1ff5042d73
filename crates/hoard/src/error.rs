// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::sync::Arc;

/// The error type user-supplied getters and peer transports produce.
pub type GetterError = Box<dyn std::error::Error + Send + Sync>;

/// An error from a cache operation.
///
/// Errors are `Clone` (sources are reference-counted) so a failed load can
/// be multiplexed to every caller waiting on the same in-flight fill.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A peer endpoint received a request for a group this process does not
    /// know about.
    #[error("no such group: {0}")]
    NoSuchGroup(String),

    /// A remote fetch from the owning peer failed. Never fatal on its own:
    /// the load falls back to a local fill.
    #[error("peer load failed: {0}")]
    PeerTransport(Arc<dyn std::error::Error + Send + Sync>),

    /// The user-supplied getter failed to produce a value.
    #[error("cache fill for key {key:?} failed: {cause}")]
    Fill {
        /// The key being filled.
        key: String,
        /// The getter's error.
        cause: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// A cached value was expected to carry an 8-byte timestamp suffix and
    /// did not.
    #[error("cached value is missing its timestamp suffix")]
    MissingTimestamp,

    /// The destination sink does not support the requested operation.
    #[error("{0} does not support this operation")]
    UnsupportedSink(&'static str),
}

impl Error {
    /// Wraps a transport failure from a peer getter.
    pub fn peer_transport(cause: impl Into<GetterError>) -> Self {
        Self::PeerTransport(Arc::from(cause.into()))
    }

    /// Wraps a failure from the user-supplied getter.
    pub fn fill(key: impl Into<String>, cause: impl Into<GetterError>) -> Self {
        Self::Fill {
            key: key.into(),
            cause: Arc::from(cause.into()),
        }
    }
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_contains_cause_message() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let error = Error::peer_transport(io_err);
        assert!(error.to_string().contains("connection refused"));
    }

    #[test]
    fn fill_names_the_key() {
        let error = Error::fill("user:17", "backend unavailable".to_string());
        let message = error.to_string();
        assert!(message.contains("user:17"));
        assert!(message.contains("backend unavailable"));
    }

    #[test]
    fn errors_are_clone() {
        let error = Error::fill("k", "boom".to_string());
        let cloned = error.clone();
        assert_eq!(error.to_string(), cloned.to_string());
    }
}
