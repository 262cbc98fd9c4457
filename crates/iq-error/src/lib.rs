use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// Unified error type shared by every crate in the workspace.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum IqError {
    // === request errors ===
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("not found: {resource}")]
    NotFound { resource: String },

    #[error("document extraction failed for '{filename}': {reason}")]
    Extraction { filename: String, reason: String },

    #[error("SQL validation failed: {reason}")]
    SqlValidation { reason: String },

    // === collaborator errors ===
    #[error("database error: {message}")]
    Database { message: String },

    #[error("LLM service error ({provider}): {message}")]
    LlmService { provider: String, message: String },

    #[error("LLM service rate limited ({provider}): {message}")]
    RateLimited { provider: String, message: String },

    #[error("embedding service error ({provider}): {message}")]
    EmbeddingService { provider: String, message: String },

    #[error("vector store error: {operation} failed: {message}")]
    Store { operation: String, message: String },

    #[error("network error: {operation}: {message}")]
    Network { operation: String, message: String },

    #[error("timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // === system errors ===
    #[error("configuration error: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("serialization error ({format}): {message}")]
    Serialization { format: String, message: String },

    #[error("concurrency error: {operation}: {message}")]
    Concurrency { operation: String, message: String },

    #[error("internal error: {message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

/// Error severity, drives the log level in [`IqError::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IqError {
    pub fn store(operation: &str, message: impl Into<String>) -> Self {
        IqError::Store {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn extraction(filename: &str, reason: impl Into<String>) -> Self {
        IqError::Extraction {
            filename: filename.to_string(),
            reason: reason.into(),
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            IqError::InvalidRequest { .. }
            | IqError::NotFound { .. }
            | IqError::Extraction { .. }
            | IqError::SqlValidation { .. } => ErrorSeverity::Low,
            IqError::LlmService { .. }
            | IqError::RateLimited { .. }
            | IqError::EmbeddingService { .. }
            | IqError::Network { .. }
            | IqError::Timeout { .. }
            | IqError::Database { .. } => ErrorSeverity::Medium,
            IqError::Store { .. }
            | IqError::Serialization { .. }
            | IqError::Concurrency { .. } => ErrorSeverity::High,
            IqError::Configuration { .. } | IqError::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    /// True for Generation Service failures caused by quota or request-rate limits.
    ///
    /// Providers do not all return a clean 429, so the message is also checked
    /// for the usual signatures.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            IqError::RateLimited { .. } => true,
            IqError::LlmService { message, .. } => {
                let lower = message.to_ascii_lowercase();
                lower.contains("429") || lower.contains("exhausted") || lower.contains("rate limit")
            }
            _ => false,
        }
    }

    /// Logs the error at a level matching its severity.
    pub fn log(&self, component: &str, operation: &str) {
        match self.severity() {
            ErrorSeverity::Low | ErrorSeverity::Medium => {
                warn!(component, operation, error = %self, "request degraded");
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(
                    component,
                    operation,
                    error = %self,
                    severity = ?self.severity(),
                    "request failed"
                );
            }
        }
    }

    pub fn to_http_status(&self) -> u16 {
        match self {
            IqError::InvalidRequest { .. } => 400,
            IqError::Extraction { .. } => 400,
            IqError::SqlValidation { .. } => 400,
            IqError::NotFound { .. } => 404,
            IqError::Timeout { .. } => 408,
            IqError::RateLimited { .. } => 429,
            IqError::Database { .. } => 502,
            IqError::LlmService { .. } | IqError::EmbeddingService { .. } => 502,
            _ => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            IqError::InvalidRequest { .. } => "The request is invalid, please check it and retry.".to_string(),
            IqError::NotFound { .. } => "The requested resource does not exist.".to_string(),
            IqError::Extraction { .. } => "The document could not be read. Upload a non-empty PDF or Word file.".to_string(),
            IqError::SqlValidation { .. } => "Only read-only queries are allowed. Try rephrasing the question.".to_string(),
            IqError::Database { .. } => "The database query failed. Check the connection or rephrase the question.".to_string(),
            IqError::RateLimited { .. } => "API rate limit reached. Please wait a moment and try again.".to_string(),
            IqError::Timeout { .. } => "The request timed out, please retry.".to_string(),
            IqError::Configuration { .. } => "The service is not configured correctly, contact the administrator.".to_string(),
            _ => "Internal error, please contact the administrator.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IqError>;

// === conversions ===

impl From<serde_json::Error> for IqError {
    fn from(err: serde_json::Error) -> Self {
        IqError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for IqError {
    fn from(err: std::io::Error) -> Self {
        IqError::Internal {
            message: "io".to_string(),
            details: Some(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for IqError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IqError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: 30000,
            }
        } else if err.is_connect() {
            IqError::Network {
                operation: "connect".to_string(),
                message: err.to_string(),
            }
        } else {
            IqError::Network {
                operation: "http_request".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<tokio::task::JoinError> for IqError {
    fn from(err: tokio::task::JoinError) -> Self {
        IqError::Concurrency {
            operation: "task_join".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for IqError {
    fn from(err: sqlx::Error) -> Self {
        IqError::Database {
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for IqError {
    fn from(err: anyhow::Error) -> Self {
        IqError::Internal {
            message: err.to_string(),
            details: None,
        }
    }
}

#[cfg(feature = "axum")]
impl IntoResponse for IqError {
    fn into_response(self) -> axum::response::Response {
        let status_code = StatusCode::from_u16(self.to_http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({
            "error": self.to_string(),
            "message": self.user_message()
        });

        (status_code, Json(body)).into_response()
    }
}
