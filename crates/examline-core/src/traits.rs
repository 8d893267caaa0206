//! Trait seams for the external collaborators.
//!
//! The core never talks to the network directly; question banks, the
//! explanation service, and the outbound message transport are all reached
//! through these async traits, implemented in `examline-adapters` and the
//! server crate.

use async_trait::async_trait;

use crate::model::Question;

/// Remote question bank: given a source locator (the bank repository name),
/// return the full candidate question pool.
///
/// Implementations must complete or time out within a bounded window; the
/// core treats an `Err` and an empty pool the same way: bank unavailable,
/// no session is started.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn fetch(&self, locator: &str) -> anyhow::Result<Vec<Question>>;
}

/// Remote explanation generator: given a question and the user's recorded
/// answer, produce explanatory text.
///
/// Any failure (network, quota, malformed response) surfaces as `Err`; the
/// session quota is only consumed on success.
#[async_trait]
pub trait ExplanationService: Send + Sync {
    async fn explain(&self, question: &Question, submitted: &str) -> anyhow::Result<String>;
}

/// Outbound message primitive of the transport, at-least-once delivery.
#[async_trait]
pub trait MessagePort: Send + Sync {
    async fn send(&self, to: &str, text: &str) -> anyhow::Result<()>;
}
