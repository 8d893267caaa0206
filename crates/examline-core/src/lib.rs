//! examline-core — access control, question selection, and quiz sessions.
//!
//! This crate owns the two state machines at the heart of examline: the
//! applicant/whitelist workflow that gates access, and the per-user quiz
//! session that tracks progress through a sampled question set. External
//! collaborators (question banks, the explanation service, the message
//! transport) are reached only through the traits in [`traits`].

pub mod access;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod select;
pub mod session;
pub mod store;
pub mod subject;
pub mod traits;

pub use dispatch::{Dispatcher, Outbound};
pub use error::{AccessDenial, BotError};
