//! LINE push-message transport.

use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

use examline_core::traits::MessagePort;

const DEFAULT_API_BASE: &str = "https://api.line.me";
const PUSH_TIMEOUT_SECS: u64 = 5;

/// Sends replies through the LINE push-message API.
pub struct LinePush {
    channel_access_token: String,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: Vec<PushMessage<'a>>,
}

#[derive(Serialize)]
struct PushMessage<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

impl LinePush {
    pub fn new(channel_access_token: &str, api_base: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(PUSH_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");

        Self {
            channel_access_token: channel_access_token.to_string(),
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            client,
        }
    }
}

#[async_trait]
impl MessagePort for LinePush {
    #[instrument(skip(self, text))]
    async fn send(&self, to: &str, text: &str) -> anyhow::Result<()> {
        let body = PushRequest {
            to,
            messages: vec![PushMessage { kind: "text", text }],
        };

        let response = self
            .client
            .post(format!("{}/v2/bot/message/push", self.api_base))
            .header(
                "Authorization",
                format!("Bearer {}", self.channel_access_token),
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            anyhow::bail!("push failed (HTTP {status}): {message}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn pushes_text_message() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/bot/message/push"))
            .and(header("Authorization", "Bearer channel-token"))
            .and(body_string_contains("\"to\":\"U123\""))
            .and(body_string_contains("你好"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let port = LinePush::new("channel-token", Some(server.uri()));
        port.send("U123", "你好").await.unwrap();
    }

    #[tokio::test]
    async fn error_status_is_err() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/bot/message/push"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let port = LinePush::new("bad-token", Some(server.uri()));
        let err = port.send("U123", "hi").await.unwrap_err();
        assert!(err.to_string().contains("401"), "{err}");
    }
}
