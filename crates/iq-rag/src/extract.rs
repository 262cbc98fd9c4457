use async_trait::async_trait;
use iq_error::{IqError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

/// Turns an uploaded file into plain text.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, filename: &str, bytes: &[u8]) -> Result<String>;
}

/// Remote extraction service used for binary formats (pdf, docx, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractServiceConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub retries: usize,
    pub retry_base_ms: u64,
}

impl Default for ExtractServiceConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            concurrency: 4,
            timeout_ms: 15_000,
            retries: 2,
            retry_base_ms: 250,
        }
    }
}

const SERVICE_EXTENSIONS: &[&str] = &["pdf", "docx", "doc", "pptx", "rtf", "odt", "epub"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Plain,
    Markdown,
    Html,
    Service,
    Unsupported,
}

fn file_kind(filename: &str) -> FileKind {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "text" => FileKind::Plain,
        "md" | "markdown" => FileKind::Markdown,
        "html" | "htm" => FileKind::Html,
        e if SERVICE_EXTENSIONS.contains(&e) => FileKind::Service,
        _ => FileKind::Unsupported,
    }
}

struct ServiceClient {
    http: reqwest::Client,
    url: String,
    cfg: ExtractServiceConfig,
    permits: Semaphore,
}

impl ServiceClient {
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn extract(&self, filename: &str, data: &[u8]) -> Result<String> {
        let _permit = self.permits.acquire().await.map_err(|e| IqError::Concurrency {
            operation: "extract_semaphore".to_string(),
            message: e.to_string(),
        })?;

        let mut backoff_ms = self.cfg.retry_base_ms;
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let mut rb = self
                .http
                .post(&self.url)
                .header("Content-Type", "application/octet-stream")
                .header("X-Filename", filename)
                .timeout(Duration::from_millis(self.cfg.timeout_ms))
                .body(data.to_vec());
            if let Some(token) = &self.cfg.token {
                rb = rb.bearer_auth(token);
            }
            if let Some((_, ext)) = filename.rsplit_once('.') {
                rb = rb.header("X-File-Ext", ext);
            }

            let retry_left = attempt <= self.cfg.retries;
            match rb.send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp.text().await.map_err(|e| IqError::Network {
                        operation: "extract_response_read".to_string(),
                        message: e.to_string(),
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && retry_left {
                        debug!(attempt, %status, backoff_ms, "extract service busy, retrying");
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms = backoff_ms.saturating_mul(2);
                        continue;
                    }
                    return Err(IqError::extraction(
                        filename,
                        format!("extraction service returned {status}"),
                    ));
                }
                Err(e) => {
                    if retry_left {
                        debug!(attempt, error = %e, backoff_ms, "extract request failed, retrying");
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms = backoff_ms.saturating_mul(2);
                        continue;
                    }
                    if e.is_timeout() {
                        return Err(IqError::Timeout {
                            operation: "extract_request".to_string(),
                            timeout_ms: self.cfg.timeout_ms,
                        });
                    }
                    return Err(IqError::Network {
                        operation: "extract_request".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Reads text formats in-process and forwards binary formats to the
/// configured extraction service.
pub struct LocalExtractor {
    service: Option<ServiceClient>,
}

impl LocalExtractor {
    pub fn new(cfg: ExtractServiceConfig) -> Self {
        let service = cfg.url.clone().filter(|u| !u.trim().is_empty()).map(|url| ServiceClient {
            http: reqwest::Client::new(),
            url,
            permits: Semaphore::new(cfg.concurrency.max(1)),
            cfg,
        });
        Self { service }
    }

    pub fn text_only() -> Self {
        Self { service: None }
    }

    pub fn shared(cfg: ExtractServiceConfig) -> Arc<dyn DocumentExtractor> {
        Arc::new(Self::new(cfg))
    }
}

#[async_trait]
impl DocumentExtractor for LocalExtractor {
    async fn extract(&self, filename: &str, bytes: &[u8]) -> Result<String> {
        let text = match file_kind(filename) {
            FileKind::Plain => String::from_utf8_lossy(bytes).into_owned(),
            FileKind::Markdown => markdown_to_text(&String::from_utf8_lossy(bytes)),
            FileKind::Html => html2text::from_read(bytes, 80),
            FileKind::Service => match &self.service {
                Some(service) => service.extract(filename, bytes).await?,
                None => {
                    warn!(filename, "no extraction service configured for binary document");
                    return Err(IqError::extraction(
                        filename,
                        "unsupported file type: no extraction service configured",
                    ));
                }
            },
            FileKind::Unsupported => {
                return Err(IqError::extraction(filename, "unsupported file type"));
            }
        };

        if text.trim().is_empty() {
            return Err(IqError::extraction(filename, "no text could be extracted"));
        }
        Ok(text)
    }
}

/// Rough markdown stripping: drops fenced code, heading markers, emphasis
/// characters and image markers; links keep their label.
pub fn markdown_to_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_fence = false;
    for line in input.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let line = line.trim_start().trim_start_matches('#').trim_start();
        let mut chars = line.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '`' | '*' | '_' => {}
                '!' if chars.peek() == Some(&'[') => {}
                '[' => {
                    for c in chars.by_ref() {
                        if c == ']' {
                            break;
                        }
                        if !matches!(c, '`' | '*' | '_') {
                            out.push(c);
                        }
                    }
                    if chars.peek() == Some(&'(') {
                        for c in chars.by_ref() {
                            if c == ')' {
                                break;
                            }
                        }
                    }
                }
                c => out.push(c),
            }
        }
        out.push('\n');
    }
    out
}
