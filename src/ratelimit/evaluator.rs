//! The evaluator capability and its result types.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::error::Result;

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the hits fit in the quota
    pub allowed: bool,
    /// How long to wait before retrying; zero when allowed
    pub wait_time: Duration,
}

impl Decision {
    /// An admitting decision.
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            wait_time: Duration::ZERO,
        }
    }

    /// A denying decision with a retry hint.
    pub fn denied(wait_time: Duration) -> Self {
        Self {
            allowed: false,
            wait_time,
        }
    }

    /// Turn a denial into an [`OverLimitError`].
    pub fn into_result(self) -> std::result::Result<(), OverLimitError> {
        if self.allowed {
            Ok(())
        } else {
            Err(OverLimitError {
                wait_time: self.wait_time,
            })
        }
    }
}

/// Structured rejection for callers that need the reason rather than a flag.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("request overlimit. try again after {wait_time:?}")]
pub struct OverLimitError {
    pub wait_time: Duration,
}

/// Decides whether a number of hits may proceed.
///
/// An `Err` means no decision could be made and is distinct from a denial.
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Charge `hits` against the quota.
    async fn evaluate_with_wait_time(&self, hits: i64) -> Result<Decision>;
}

#[async_trait]
impl<E: Evaluator + ?Sized> Evaluator for std::sync::Arc<E> {
    async fn evaluate_with_wait_time(&self, hits: i64) -> Result<Decision> {
        (**self).evaluate_with_wait_time(hits).await
    }
}
