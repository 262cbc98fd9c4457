use iq_llm::{ChatSettings, EmbedProviderKind, EmbedSettings};
use iq_rag::{ExtractServiceConfig, RetrievalConfig};
use iq_router::RouterConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "configs/default.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerCfg,
    pub chat: ChatSettings,
    pub embedding: EmbedSettings,
    pub store: StoreCfg,
    pub extractor: ExtractServiceConfig,
    pub retrieval: RetrievalConfig,
    pub router: RouterConfig,
    pub database: DatabaseCfg,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerCfg {
    pub host: String,
    pub port: u16,
    pub max_upload_mb: usize,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_mb: 25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreCfg {
    pub dir: PathBuf,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("vector_store"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseCfg {
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseCfg {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
        }
    }
}

/// Reads the YAML file (`IQ_CONFIG` or `configs/default.yaml`) and applies
/// environment overrides. A missing file means all defaults.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::var("IQ_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = read_file(Path::new(&path))?;
    let cfg = apply_env(cfg, |key| std::env::var(key).ok())?;
    info!(
        path = %path,
        chat = ?cfg.chat.kind,
        model = %cfg.chat.model,
        embedding = ?cfg.embedding.kind,
        store = %cfg.store.dir.display(),
        extractor = cfg.extractor.url.is_some(),
        "load_config"
    );
    Ok(cfg)
}

fn read_file(path: &Path) -> anyhow::Result<AppConfig> {
    match std::fs::read_to_string(path) {
        Ok(s) if s.trim().is_empty() => Ok(AppConfig::default()),
        Ok(s) => Ok(serde_yaml::from_str(&s)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(anyhow::anyhow!("reading {}: {}", path.display(), e)),
    }
}

fn apply_env(mut cfg: AppConfig, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<AppConfig> {
    let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(model) = var("MODEL_NAME") {
        cfg.chat.model = model;
    }
    if let Some(model) = var("EMBEDDING_MODEL") {
        cfg.embedding.model = model;
    }
    if let Some(kind) = var("EMBEDDING_PROVIDER") {
        cfg.embedding.kind = match kind.to_ascii_lowercase().as_str() {
            "fastembed" | "local" => EmbedProviderKind::Fastembed,
            "hash" => EmbedProviderKind::Hash,
            "openai_compat" | "openai" => EmbedProviderKind::OpenaiCompat,
            other => anyhow::bail!("EMBEDDING_PROVIDER: unknown provider '{}'", other),
        };
    }
    if let Some(dir) = var("EMBEDDING_CACHE_DIR") {
        cfg.embedding.cache_dir = Some(PathBuf::from(dir));
    }
    if let Some(dir) = var("IQ_STORE_DIR") {
        cfg.store.dir = PathBuf::from(dir);
    }
    if let Some(url) = var("EXTRACT_URL") {
        cfg.extractor.url = Some(url);
    }
    if let Some(token) = var("EXTRACT_TOKEN") {
        cfg.extractor.token = Some(token);
    }
    if let Some(host) = var("IQ_HOST") {
        cfg.server.host = host;
    }
    if let Some(port) = var("IQ_PORT") {
        cfg.server.port = port
            .parse()
            .map_err(|e| anyhow::anyhow!("IQ_PORT '{}': {}", port, e))?;
    }
    Ok(cfg)
}
