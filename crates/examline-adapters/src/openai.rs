//! OpenAI-compatible explanation service.
//!
//! Builds the exam-tutor prompt for one question plus the student's
//! recorded answer and sends it to a chat-completion endpoint. Any
//! failure maps to `AdapterError`; the core treats every failure
//! uniformly and keeps the explanation quota untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use examline_core::model::Question;
use examline_core::traits::ExplanationService;

use crate::error::AdapterError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const EXPLAIN_TIMEOUT_SECS: u64 = 10;
const SYSTEM_PROMPT: &str = "你是一位專業的國考解析導師。";

/// Explanation generator backed by an OpenAI-compatible API.
pub struct OpenAiExplainer {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiExplainer {
    pub fn new(api_key: &str, base_url: Option<String>, model: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(EXPLAIN_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");

        Self {
            api_key: api_key.to_string(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            client,
        }
    }
}

/// The tutor prompt: question, options, the student's answer, the key.
fn build_prompt(question: &Question, submitted: &str) -> String {
    format!(
        "你是一位國考輔導老師，請針對下列題目進行解析：\n\
         題目：{}\n\
         選項：{}\n\
         學生作答：{}\n\
         正確答案：{}\n\
         請指出學生是否正確，並簡要解釋為什麼正解正確，以及錯解的迷思點。",
        question.text,
        question.options.join("、"),
        submitted,
        question.answer,
    )
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl ExplanationService for OpenAiExplainer {
    #[instrument(skip(self, question, submitted), fields(model = %self.model))]
    async fn explain(&self, question: &Question, submitted: &str) -> anyhow::Result<String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_prompt(question, submitted),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(EXPLAIN_TIMEOUT_SECS)
                } else {
                    AdapterError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5)
                * 1000;
            return Err(AdapterError::RateLimited {
                retry_after_ms: retry_after,
            }
            .into());
        }
        if status == 401 {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::AuthenticationFailed(body).into());
        }
        if status >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(AdapterError::ApiError { status, message }.into());
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))?;

        let content = api_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(AdapterError::MalformedResponse("empty completion".to_string()).into());
        }
        Ok(content)
    }
}
