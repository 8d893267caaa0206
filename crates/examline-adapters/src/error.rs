//! Adapter error types.
//!
//! Failures when talking to the question banks or the explanation service.
//! The core does not branch on these — any adapter failure degrades to the
//! documented user-facing reply — but keeping them typed makes logs and
//! tests precise about what actually went wrong.

use thiserror::Error;

/// Errors from the remote question bank and explanation adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The request exceeded the adapter's bounded timeout.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The remote returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The remote returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The response body could not be parsed.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl AdapterError {
    /// Whether retrying the same call can ever help.
    pub fn is_permanent(&self) -> bool {
        matches!(self, AdapterError::AuthenticationFailed(_))
    }
}
