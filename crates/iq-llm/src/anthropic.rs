use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{completion_text, send_checked, user_turn, ChatModel, Result};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
    pub temperature: f32,
}

/// Messages API client.
#[derive(Clone)]
pub struct AnthropicClient {
    http: Client,
    cfg: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(cfg: AnthropicConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: [Turn; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Turn {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl MessagesResponse {
    fn joined_text(self) -> String {
        self.content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect()
    }
}

#[async_trait]
impl ChatModel for AnthropicClient {
    #[instrument(skip(self, system, context, user), fields(model = %self.cfg.model))]
    async fn chat(&self, system: &str, context: &str, user: &str) -> Result<String> {
        let body = MessagesRequest {
            model: &self.cfg.model,
            system,
            messages: [Turn {
                role: "user",
                content: user_turn(context, user),
            }],
            max_tokens: MAX_TOKENS,
            temperature: self.cfg.temperature,
        };
        let req = self
            .http
            .post(format!("{}/v1/messages", self.cfg.api_url.trim_end_matches('/')))
            .header("x-api-key", &self.cfg.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);

        let resp: MessagesResponse = send_checked("anthropic", req).await?.json().await?;
        completion_text("anthropic", resp.joined_text())
    }
}
