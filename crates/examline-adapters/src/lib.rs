//! examline-adapters — external collaborator integrations.
//!
//! Implements the core's `QuestionSource` and `ExplanationService` traits:
//! question banks hosted as JSON files in GitHub repositories, and an
//! OpenAI-compatible chat-completion endpoint for answer explanations.
//! Also home to the TOML configuration loader and the mock adapters used
//! by the server tests.

pub mod config;
pub mod error;
pub mod github;
pub mod mock;
pub mod openai;

pub use config::{load_config, load_config_from, ExamlineConfig};
pub use error::AdapterError;
pub use github::GithubQuestionBank;
pub use openai::OpenAiExplainer;
