use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

pub use iq_error::{IqError, Result};

mod anthropic;
mod gemini;
mod hash;
mod onnx;
mod openai;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use gemini::{GeminiClient, GeminiConfig};
pub use hash::HashEmbedModel;
pub use onnx::{local_model, FastEmbedModel};
pub use openai::{OpenAiCompatClient, OpenAiCompatConfig};

/// Generation Service: one completion per call.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, system: &str, context: &str, user: &str) -> Result<String>;
}

#[async_trait]
pub trait EmbedModel: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Maps a non-success HTTP status to the matching error; 429 is a rate limit.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: String) -> IqError {
    let message = format!("status={} body={}", status, body);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        IqError::RateLimited {
            provider: provider.to_string(),
            message,
        }
    } else {
        IqError::LlmService {
            provider: provider.to_string(),
            message,
        }
    }
}

/// Sends `req`; a non-success status becomes the matching error.
pub(crate) async fn send_checked(provider: &str, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let resp = req.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(provider, status, body))
}

/// Blank completions (safety blocks, empty candidate lists) are provider errors.
pub(crate) fn completion_text(provider: &str, text: String) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(IqError::LlmService {
            provider: provider.to_string(),
            message: "empty completion".to_string(),
        });
    }
    Ok(text.to_string())
}

/// Single user turn: the question, then the retrieved context when there is one.
pub(crate) fn user_turn(context: &str, user: &str) -> String {
    if context.trim().is_empty() {
        user.to_string()
    } else {
        format!("{user}\n\nContext:\n{context}")
    }
}

pub(crate) fn read_credential(key_env: &str) -> Result<String> {
    match std::env::var(key_env) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(IqError::Configuration {
            key: key_env.to_string(),
            reason: "API credential is not set".to_string(),
        }),
    }
}

// ========== provider settings ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatProviderKind {
    #[default]
    Gemini,
    OpenaiCompat,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub kind: ChatProviderKind,
    pub model: String,
    /// Name of the environment variable holding the credential.
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub temperature: f32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            kind: ChatProviderKind::Gemini,
            model: "gemini-1.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: None,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbedProviderKind {
    /// In-process ONNX sentence model.
    #[default]
    Fastembed,
    /// OpenAI-style `/v1/embeddings` server.
    OpenaiCompat,
    /// Lexical feature hashing; offline and deterministic, for tests and air-gapped runs.
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedSettings {
    pub kind: EmbedProviderKind,
    pub model: String,
    pub base_url: String,
    /// Optional: local embedding servers usually need no credential.
    pub api_key_env: Option<String>,
    /// Used by the `hash` provider; model-backed providers report their own.
    pub dimension: usize,
    /// Where `fastembed` keeps downloaded weights; its own default when unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            kind: EmbedProviderKind::Fastembed,
            model: "all-MiniLM-L6-v2".to_string(),
            base_url: "http://localhost:8080".to_string(),
            api_key_env: None,
            dimension: 384,
            cache_dir: None,
        }
    }
}

pub fn build_chat_model(settings: &ChatSettings) -> Result<Arc<dyn ChatModel>> {
    let api_key = read_credential(&settings.api_key_env)?;
    let model: Arc<dyn ChatModel> = match settings.kind {
        ChatProviderKind::Gemini => Arc::new(GeminiClient::new(GeminiConfig {
            api_key,
            model: settings.model.clone(),
            api_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            temperature: settings.temperature,
        })),
        ChatProviderKind::OpenaiCompat => Arc::new(OpenAiCompatClient::new(OpenAiCompatConfig {
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".into()),
            api_key: Some(api_key),
            chat_model: settings.model.clone(),
            embedding_model: None,
            temperature: settings.temperature,
        })),
        ChatProviderKind::Anthropic => Arc::new(AnthropicClient::new(AnthropicConfig {
            api_key,
            model: settings.model.clone(),
            api_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".into()),
            temperature: settings.temperature,
        })),
    };
    info!(kind = ?settings.kind, model = %settings.model, "chat model ready");
    Ok(model)
}

/// Builds the configured embedder. Loading local weights may download them.
pub async fn build_embed_model(settings: &EmbedSettings) -> Result<Arc<dyn EmbedModel>> {
    let model: Arc<dyn EmbedModel> = match settings.kind {
        EmbedProviderKind::Fastembed => {
            Arc::new(FastEmbedModel::load(&settings.model, settings.cache_dir.clone()).await?)
        }
        EmbedProviderKind::Hash => Arc::new(HashEmbedModel::new(settings.dimension)?),
        EmbedProviderKind::OpenaiCompat => {
            let api_key = match settings.api_key_env.as_deref() {
                Some(env) => Some(read_credential(env)?),
                None => None,
            };
            Arc::new(OpenAiCompatClient::new(OpenAiCompatConfig {
                base_url: settings.base_url.clone(),
                api_key,
                chat_model: String::new(),
                embedding_model: Some(settings.model.clone()),
                temperature: 0.0,
            }))
        }
    };
    Ok(model)
}

/// Chat model whose client is built on the first call.
///
/// Resolving the credential lazily keeps startup independent of it; a missing
/// key surfaces as a configuration error on the first request instead.
pub struct LazyChatModel {
    settings: ChatSettings,
    cell: OnceCell<Arc<dyn ChatModel>>,
}

impl LazyChatModel {
    pub fn new(settings: ChatSettings) -> Self {
        Self {
            settings,
            cell: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Arc<dyn ChatModel>> {
        self.cell
            .get_or_try_init(|| async { build_chat_model(&self.settings) })
            .await
    }
}

#[async_trait]
impl ChatModel for LazyChatModel {
    async fn chat(&self, system: &str, context: &str, user: &str) -> Result<String> {
        self.client().await?.chat(system, context, user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lazy_chat_model_reports_missing_credential_on_first_call() {
        let settings = ChatSettings {
            api_key_env: "IQ_TEST_DEFINITELY_UNSET_KEY".to_string(),
            ..ChatSettings::default()
        };
        let model = LazyChatModel::new(settings);
        let err = model.chat("sys", "", "hello").await.unwrap_err();
        match err {
            IqError::Configuration { key, .. } => assert_eq!(key, "IQ_TEST_DEFINITELY_UNSET_KEY"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn context_is_only_appended_when_present() {
        assert_eq!(user_turn("", "hi"), "hi");
        assert_eq!(user_turn("facts", "why?"), "why?\n\nContext:\nfacts");
    }

    #[test]
    fn blank_completion_is_an_error() {
        assert!(completion_text("gemini", "  \n".into()).is_err());
        assert_eq!(completion_text("gemini", " ok \n".into()).unwrap(), "ok");
    }

    #[test]
    fn too_many_requests_is_rate_limited() {
        let err = status_error("gemini", reqwest::StatusCode::TOO_MANY_REQUESTS, "quota".into());
        assert!(err.is_rate_limited());
        let err = status_error("gemini", reqwest::StatusCode::BAD_GATEWAY, "oops".into());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let s: EmbedSettings = serde_json::from_str(r#"{"kind":"openai_compat"}"#).unwrap();
        assert_eq!(s.kind, EmbedProviderKind::OpenaiCompat);
        assert_eq!(s.model, "all-MiniLM-L6-v2");
        let s: EmbedSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.kind, EmbedProviderKind::Fastembed);
        assert!(s.cache_dir.is_none());
        let c: ChatSettings = serde_json::from_str(r#"{"model":"gemini-2.0-flash"}"#).unwrap();
        assert_eq!(c.kind, ChatProviderKind::Gemini);
        assert_eq!(c.api_key_env, "GEMINI_API_KEY");
    }

    #[tokio::test]
    async fn hash_provider_builds_offline() {
        let settings = EmbedSettings {
            kind: EmbedProviderKind::Hash,
            dimension: 16,
            ..EmbedSettings::default()
        };
        let model = build_embed_model(&settings).await.unwrap();
        let vectors = model.embed(&["quarterly revenue".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 16);
    }

    #[tokio::test]
    async fn unsupported_local_model_fails_as_configuration() {
        let settings = EmbedSettings {
            model: "not-a-real-encoder".to_string(),
            ..EmbedSettings::default()
        };
        let err = build_embed_model(&settings).await.err().unwrap();
        assert!(matches!(err, IqError::Configuration { .. }));
    }
}
