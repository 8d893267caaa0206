//! Core error taxonomy.
//!
//! Every variant here corresponds to a recoverable, user-visible outcome:
//! the dispatcher turns each one into a corrective reply and never lets it
//! propagate further. `Storage` is the only class treated as fatal to the
//! operation in progress; it is logged and surfaced as a retry message with
//! no partial state committed.

use std::fmt;

use thiserror::Error;

/// Why a quiz session could not be started for an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenial {
    /// The identity has never submitted registration data.
    NeverRegistered,
    /// Registration submitted, still awaiting administrator review.
    Pending,
    /// Whitelisted, but today falls outside the validity window.
    Expired,
}

impl fmt::Display for AccessDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDenial::NeverRegistered => write!(f, "never registered"),
            AccessDenial::Pending => write!(f, "pending review"),
            AccessDenial::Expired => write!(f, "validity window expired"),
        }
    }
}

/// Errors produced by the access-control workflow and quiz state machine.
#[derive(Debug, Error)]
pub enum BotError {
    /// Malformed command or registration input. State unchanged.
    #[error("format error: {0}")]
    Format(String),

    /// An approve/delet target that matched nothing. State unchanged.
    #[error("not found: {0}")]
    NotFound(String),

    /// The question bank or explanation service failed or timed out.
    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The per-session explanation cap was reached; no adapter call made.
    #[error("explanation quota exceeded (limit {limit})")]
    QuotaExceeded { limit: u32 },

    /// The identity may not start a quiz session.
    #[error("access denied: {0}")]
    AccessDenied(AccessDenial),

    /// Persistence failed mid-operation.
    #[error("storage error: {0}")]
    Storage(String),
}
