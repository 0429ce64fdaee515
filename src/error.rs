//! Error taxonomy for the fetch engine.
//!
//! Every network-facing operation returns `Result<T, FetchError>`. The retry
//! driver only ever retries [`FetchError::Transient`]; everything else is
//! returned to the caller as-is.

use crate::fetch::challenge::ChallengeVerdict;
use thiserror::Error;

/// Outcome classification for a fetch attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Recoverable failure: timeout, connection reset, non-2xx without a
    /// challenge signal. Retried with bounded exponential backoff.
    #[error("transient failure: {reason}")]
    Transient { reason: String },

    /// An anti-bot challenge was detected. Never retried; stored credentials
    /// for the domain have already been invalidated and a human hand-off
    /// triggered by the time this surfaces.
    #[error("challenge detected at {url} ({} indicator(s))", verdict.indicators.len())]
    Challenge {
        verdict: ChallengeVerdict,
        /// The (possibly redirected) URL serving the challenge.
        url: String,
    },

    /// Structural failure: malformed target, missing descriptor, extraction
    /// that produced nothing. No retry, no credential side effects.
    #[error("terminal failure: {reason}")]
    Terminal { reason: String },

    /// The run's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// A transient failure persisted through every allowed attempt.
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::Terminal {
            reason: reason.into(),
        }
    }

    /// True for failures the retry driver is allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_challenge(&self) -> bool {
        matches!(self, Self::Challenge { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
