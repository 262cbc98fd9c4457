use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{completion_text, send_checked, user_turn, ChatModel, Result};

// ========== Google Gemini (generateContent) ==========

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
    pub temperature: f32,
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    cfg: GeminiConfig,
}

impl GeminiClient {
    pub fn new(cfg: GeminiConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct GemPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
struct GemContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GemPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GemGenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GemReq {
    system_instruction: GemContent,
    contents: Vec<GemContent>,
    generation_config: GemGenerationConfig,
}

#[derive(Deserialize)]
struct GemRespContent {
    #[serde(default)]
    parts: Vec<GemPart>,
}

#[derive(Deserialize)]
struct GemCandidate {
    content: Option<GemRespContent>,
}

#[derive(Deserialize)]
struct GemResp {
    #[serde(default)]
    candidates: Vec<GemCandidate>,
}

#[async_trait]
impl ChatModel for GeminiClient {
    #[instrument(skip(self, system, context, user), fields(model = %self.cfg.model))]
    async fn chat(&self, system: &str, context: &str, user: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.cfg.api_url.trim_end_matches('/'),
            self.cfg.model
        );
        let body = GemReq {
            system_instruction: GemContent {
                role: None,
                parts: vec![GemPart {
                    text: Some(system.to_string()),
                }],
            },
            contents: vec![GemContent {
                role: Some("user"),
                parts: vec![GemPart {
                    text: Some(user_turn(context, user)),
                }],
            }],
            generation_config: GemGenerationConfig {
                temperature: self.cfg.temperature,
            },
        };

        let req = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&body);

        let data: GemResp = send_checked("gemini", req).await?.json().await?;
        let text: String = data
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        completion_text("gemini", text)
    }
}
