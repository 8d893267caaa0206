//! GitHub-hosted question bank source.
//!
//! Each subject's bank lives in its own repository as a
//! `question_bank_*.json` file. Fetching is a two-step remote call: list
//! the repository contents, then follow the `download_url` of the first
//! matching bank file. Relative `圖片連結` paths are resolved to absolute
//! raw URLs here, so the core only ever sees displayable links.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use examline_core::model::Question;
use examline_core::traits::QuestionSource;

use crate::error::AdapterError;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_RAW_BASE: &str = "https://raw.githubusercontent.com";
const FETCH_TIMEOUT_SECS: u64 = 5;

/// Question source backed by per-subject GitHub repositories.
pub struct GithubQuestionBank {
    owner: String,
    api_base: String,
    raw_base: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ContentEntry {
    name: String,
    #[serde(default)]
    download_url: Option<String>,
}

impl GithubQuestionBank {
    pub fn new(owner: &str, api_base: Option<String>, raw_base: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");

        Self {
            owner: owner.to_string(),
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            raw_base: raw_base.unwrap_or_else(|| DEFAULT_RAW_BASE.to_string()),
            client,
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, AdapterError> {
        let response = self
            .client
            .get(url)
            // GitHub's API rejects requests without a user agent.
            .header("User-Agent", "examline")
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(FETCH_TIMEOUT_SECS)
                } else {
                    AdapterError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(AdapterError::ApiError { status, message });
        }
        Ok(response)
    }

    /// Resolve a bank-relative image path against the repository raw root.
    fn resolve_image(&self, locator: &str, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}/{}/main/{}", self.raw_base, self.owner, locator, path)
    }
}

#[async_trait]
impl QuestionSource for GithubQuestionBank {
    #[instrument(skip(self), fields(owner = %self.owner))]
    async fn fetch(&self, locator: &str) -> anyhow::Result<Vec<Question>> {
        let listing_url = format!("{}/repos/{}/{}/contents", self.api_base, self.owner, locator);
        let entries: Vec<ContentEntry> = self
            .get(&listing_url)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))?;

        let bank = entries.into_iter().find(|entry| {
            entry.name.starts_with("question_bank_") && entry.name.ends_with(".json")
        });
        let Some(bank) = bank else {
            tracing::warn!(locator, "repository has no question_bank_*.json file");
            return Ok(Vec::new());
        };
        let Some(download_url) = bank.download_url else {
            tracing::warn!(locator, file = %bank.name, "bank file has no download url");
            return Ok(Vec::new());
        };

        let mut questions: Vec<Question> = self
            .get(&download_url)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))?;

        for q in &mut questions {
            if let Some(path) = q.image.take() {
                q.image = Some(self.resolve_image(locator, &path));
            }
        }

        tracing::debug!(locator, count = questions.len(), "question bank loaded");
        Ok(questions)
    }
}
