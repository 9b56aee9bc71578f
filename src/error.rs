//! Errors that cross the capability seam.

use thiserror::Error;

/// Failure to establish a session with an external endpoint.
///
/// Connection errors are fatal during startup: the process logs the error
/// and exits non-zero rather than entering a degraded state.
#[derive(Debug, Error)]
#[error("Connection to {endpoint} failed: {reason}")]
pub struct ConnectionError {
    /// Endpoint address the connection was attempted against.
    pub endpoint: String,
    /// Underlying failure description.
    pub reason: String,
}

impl ConnectionError {
    pub fn new(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure to deliver a single payload to the message sink.
///
/// Publish errors are recoverable: the cycle executor records the failure
/// for the affected mapping and continues with the remaining mappings.
#[derive(Debug, Error)]
#[error("Publish to '{topic}' failed: {reason}")]
pub struct PublishError {
    /// Full topic the delivery was addressed to.
    pub topic: String,
    /// Underlying failure description.
    pub reason: String,
}

impl PublishError {
    pub fn new(topic: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }
}
