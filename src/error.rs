//! Error types for limitgate.

use std::time::Duration;
use thiserror::Error;

/// Main error type for limitgate operations.
///
/// An over-limit decision is not an error; see
/// [`OverLimitError`](crate::ratelimit::OverLimitError) for the structured
/// rejection handed to callers that want one.
#[derive(Error, Debug)]
pub enum LimitgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An evaluator was bound to an empty entity key
    #[error("failed to create evaluator: empty key")]
    EmptyKey,

    /// A request carried no usable entity key in the named header
    #[error("request has no rate limit key in header {0}")]
    MissingKey(String),

    /// The quota service endpoint could not be built
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The quota service answered with a gRPC error
    #[error("could not get rate limit from quota service: {0}")]
    Rpc(#[from] tonic::Status),

    /// The quota service did not answer within the call deadline
    #[error("quota service call timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed, empty or in-band error response from the quota service
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for limitgate operations.
pub type Result<T> = std::result::Result<T, LimitgateError>;
