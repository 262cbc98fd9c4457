use serde::{Deserialize, Serialize};

/// A window of document text, the unit stored in the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub filename: String,
    pub chunk_index: usize,
    pub text: String,
    pub word_count: usize,
}

impl Chunk {
    pub fn make_id(filename: &str, chunk_index: usize) -> String {
        format!("{filename}_chunk_{chunk_index}")
    }
}

/// A chunk scored against one query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub filename: String,
    pub text: String,
    pub chunk_index: usize,
    pub score: f32,
}

impl RetrievalResult {
    pub fn from_chunk(chunk: &Chunk, score: f32) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            filename: chunk.filename.clone(),
            text: chunk.text.clone(),
            chunk_index: chunk.chunk_index,
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Mysql,
    Postgresql,
    Sqlite,
}

impl DbType {
    pub fn dialect(&self) -> &'static str {
        match self {
            DbType::Mysql => "MySQL",
            DbType::Postgresql => "PostgreSQL",
            DbType::Sqlite => "SQLite",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Mysql => "mysql",
            DbType::Postgresql => "postgresql",
            DbType::Sqlite => "sqlite",
        }
    }
}

/// Connection settings for the relational database a question targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub db_type: DbType,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub db_config: DbConfig,
    pub question: String,
    #[serde(default)]
    pub sql_override: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Chat,
    Sql,
    Rag,
    Hybrid,
}

/// Flat wire shape of every query answer.
///
/// All fields are always serialized; fields the active mode does not fill are
/// `null`. Clients must dispatch on `mode`, not on field presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub mode: Mode,
    pub answer: String,
    pub sql_query: Option<String>,
    pub columns: Option<Vec<String>>,
    pub data: Option<Vec<serde_json::Map<String, serde_json::Value>>>,
    pub total_rows: Option<usize>,
    pub metrics: Option<serde_json::Value>,
    pub chart_config: Option<serde_json::Value>,
    pub insights: Option<Vec<String>>,
    pub suggestions: Option<Vec<String>>,
}

impl UnifiedResponse {
    /// All-absent template for `mode`.
    pub fn empty(mode: Mode) -> Self {
        Self {
            mode,
            answer: String::new(),
            sql_query: None,
            columns: None,
            data: None,
            total_rows: None,
            metrics: None,
            chart_config: None,
            insights: None,
            suggestions: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub filename: String,
    pub chunks_added: usize,
    pub total_in_store: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub filename: String,
    pub chunks_removed: usize,
    pub total_in_store: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    Ready,
    NotInitialised,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub status: StoreStatus,
    pub total_chunks: usize,
    pub documents: Vec<String>,
}

/// Answer produced from the document corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<String>,
    pub chunks_used: usize,
}
