use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{completion_text, send_checked, user_turn, ChatModel, EmbedModel, IqError, Result};

const PROVIDER: &str = "openai_compat";

/// Any server speaking the OpenAI wire format: OpenAI itself, vLLM,
/// text-embeddings-inference, Ollama.
#[derive(Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: Option<String>,
    pub temperature: f32,
}

#[derive(Clone)]
pub struct OpenAiCompatClient {
    http: Client,
    cfg: OpenAiCompatConfig,
}

impl OpenAiCompatClient {
    pub fn new(cfg: OpenAiCompatConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }

    fn endpoint(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .http
            .post(format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path));
        match &self.cfg.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl CompletionResponse {
    fn first_text(self) -> String {
        self.choices
            .into_iter()
            .find_map(|c| c.message.content)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    #[instrument(skip(self, system, context, user), fields(model = %self.cfg.chat_model))]
    async fn chat(&self, system: &str, context: &str, user: &str) -> Result<String> {
        let turn = user_turn(context, user);
        let body = CompletionRequest {
            model: &self.cfg.chat_model,
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: &turn,
                },
            ],
            temperature: self.cfg.temperature,
        };
        let req = self.endpoint("/v1/chat/completions").json(&body);
        let resp: CompletionResponse = send_checked(PROVIDER, req).await?.json().await?;
        completion_text(PROVIDER, resp.first_text())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    /// Rows in input order; servers may return them shuffled when `index` is set.
    fn into_vectors(mut self, expected: usize) -> Result<Vec<Vec<f32>>> {
        if self.data.len() != expected {
            return Err(embed_error(format!(
                "expected {} embeddings, got {}",
                expected,
                self.data.len()
            )));
        }
        self.data.sort_by_key(|row| row.index.unwrap_or(usize::MAX));
        Ok(self.data.into_iter().map(|row| row.embedding).collect())
    }
}

fn embed_error(message: String) -> IqError {
    IqError::EmbeddingService {
        provider: PROVIDER.to_string(),
        message,
    }
}

#[async_trait]
impl EmbedModel for OpenAiCompatClient {
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self
            .cfg
            .embedding_model
            .as_deref()
            .ok_or_else(|| IqError::Configuration {
                key: "embedding.model".to_string(),
                reason: "not configured".to_string(),
            })?;
        let req = self.endpoint("/v1/embeddings").json(&EmbeddingRequest { model, input: texts });

        // The chat path maps status codes to rate-limit errors; an embedding
        // failure is always an embedding error.
        let resp = send_checked(PROVIDER, req).await.map_err(|e| embed_error(e.to_string()))?;
        let resp: EmbeddingResponse = resp.json().await.map_err(|e| embed_error(e.to_string()))?;
        resp.into_vectors(texts.len())
    }
}
