use async_trait::async_trait;
use iq_core::{DeleteReport, IndexReport, RagAnswer, RetrievalResult, StoreStats};
use iq_error::{IqError, Result};
use iq_llm::ChatModel;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info, instrument, warn};

use crate::chunker::{chunk_text, ChunkerConfig};
use crate::embedder::Embedder;
use crate::extract::DocumentExtractor;
use crate::store::VectorStore;

pub const NO_DOCUMENTS_ANSWER: &str = "I don't have any documents indexed yet. Please upload a PDF or Word document first, then ask your question.";
pub const NOTHING_RELEVANT_ANSWER: &str =
    "I couldn't find relevant information in the indexed documents to answer your question.";
pub const RATE_LIMIT_ANSWER: &str = "API rate limit reached. Please wait a moment and try again.";

const RAG_SYSTEM_PROMPT: &str = "You are a professional business intelligence assistant. \
You have been given relevant excerpts from uploaded documents to answer the user's question.\n\n\
INSTRUCTIONS:\n\
- Answer ONLY based on the provided document context.\n\
- If the context does not contain enough information, say so clearly.\n\
- Cite which source document the information came from when possible.\n\
- Be precise, professional, and concise.\n\
- Do NOT hallucinate or add information not present in the context.";

const HYBRID_SYSTEM_PROMPT: &str = "You are a professional business intelligence assistant. \
You have two sources of information to answer the user's question: excerpts from uploaded \
documents and a summary of a database query result.\n\n\
INSTRUCTIONS:\n\
- Synthesize both sources to provide a comprehensive answer.\n\
- Highlight how the document findings relate to the database data.\n\
- If sources conflict, point it out clearly.\n\
- Cite which source each insight comes from (Document / Database).\n\
- Be professional, analytical, and actionable.";

/// Document indexing and question answering over the chunk store.
///
/// Generation failures are answered in band (rate limits become a fixed
/// message). Embedding and store failures are not: `answer_question` and
/// `answer_hybrid` return them as `Err`, and callers must turn them into a
/// user-facing answer or fall back to the SQL summary.
#[async_trait]
pub trait RagEngine: Send + Sync {
    async fn index_document(&self, filename: &str, bytes: &[u8]) -> Result<IndexReport>;

    async fn answer_question(&self, question: &str) -> Result<RagAnswer>;

    /// Merges retrieved document context with a SQL result summary.
    async fn answer_hybrid(&self, question: &str, sql_summary: &str) -> Result<String>;

    async fn delete_document(&self, filename: &str) -> Result<DeleteReport>;

    async fn stats(&self) -> Result<StoreStats>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub chunker: ChunkerConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_context_chars: 8000,
            chunker: ChunkerConfig::default(),
        }
    }
}

pub struct RetrievalEngine {
    store: Arc<VectorStore>,
    embedder: Arc<Embedder>,
    chat: Arc<dyn ChatModel>,
    extractor: Arc<dyn DocumentExtractor>,
    config: RetrievalConfig,
    store_ready: OnceCell<()>,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<Embedder>,
        chat: Arc<dyn ChatModel>,
        extractor: Arc<dyn DocumentExtractor>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chat,
            extractor,
            config,
            store_ready: OnceCell::new(),
        }
    }

    /// Warms up the embedder and loads the store. Failures are logged and
    /// deferred: the store is then initialised on first use.
    pub async fn startup(&self) {
        match self.ensure_store().await {
            Ok(()) => {
                let stats = self.store.stats();
                info!(
                    total_chunks = stats.total_chunks,
                    documents = stats.documents.len(),
                    "retrieval engine ready"
                );
            }
            Err(e) => error!(error = %e, "retrieval engine startup failed, will retry on first use"),
        }
    }

    async fn ensure_store(&self) -> Result<()> {
        self.store_ready
            .get_or_try_init(|| async {
                let dimension = self.embedder.embedding_dimension().await?;
                let store = self.store.clone();
                tokio::task::spawn_blocking(move || store.load_or_create(dimension)).await?;
                Ok::<(), IqError>(())
            })
            .await
            .map(|_| ())
    }

    async fn retrieve(&self, question: &str) -> Result<Vec<RetrievalResult>> {
        let query = self.embedder.embed_one(question).await?;
        self.store.search(&query, self.config.top_k)
    }

    fn bounded_context(&self, context: String) -> String {
        let max = self.config.max_context_chars;
        match context.char_indices().nth(max) {
            Some((cut, _)) => {
                warn!(
                    chars = context.chars().count(),
                    max, "context exceeds maximum, truncating"
                );
                context[..cut].to_string()
            }
            None => context,
        }
    }

    async fn generate(&self, system: &str, context: &str, question: &str) -> String {
        match self.chat.chat(system, context, question).await {
            Ok(answer) => answer,
            Err(e) if e.is_rate_limited() => {
                warn!(error = %e, "generation rate limited");
                RATE_LIMIT_ANSWER.to_string()
            }
            Err(e) => {
                error!(error = %e, "generation failed");
                format!("An error occurred while generating the answer: {e}")
            }
        }
    }
}

/// One `[Source i: file]` section per result, separated by `---`.
pub fn format_context(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Source {}: {}]\n{}", i + 1, r.filename, r.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn distinct_sources(results: &[RetrievalResult]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for r in results {
        if !sources.contains(&r.filename) {
            sources.push(r.filename.clone());
        }
    }
    sources
}

#[async_trait]
impl RagEngine for RetrievalEngine {
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    async fn index_document(&self, filename: &str, bytes: &[u8]) -> Result<IndexReport> {
        let text = self.extractor.extract(filename, bytes).await?;
        let chunks = chunk_text(&text, filename, self.config.chunker);
        if chunks.is_empty() {
            return Err(IqError::extraction(filename, "no content extracted"));
        }

        self.ensure_store().await?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let chunks_added = chunks.len();
        let store = self.store.clone();
        let total_in_store = tokio::task::spawn_blocking(move || store.add(chunks, vectors)).await??;

        info!(filename, chunks_added, total_in_store, "indexed document");
        Ok(IndexReport {
            filename: filename.to_string(),
            chunks_added,
            total_in_store,
        })
    }

    #[instrument(skip(self))]
    async fn answer_question(&self, question: &str) -> Result<RagAnswer> {
        self.ensure_store().await?;
        if self.store.total_chunks() == 0 {
            return Ok(RagAnswer {
                answer: NO_DOCUMENTS_ANSWER.to_string(),
                sources: Vec::new(),
                chunks_used: 0,
            });
        }

        let results = self.retrieve(question).await?;
        if results.is_empty() {
            return Ok(RagAnswer {
                answer: NOTHING_RELEVANT_ANSWER.to_string(),
                sources: Vec::new(),
                chunks_used: 0,
            });
        }

        let context = self.bounded_context(format_context(&results));
        let answer = self.generate(RAG_SYSTEM_PROMPT, &context, question).await;
        Ok(RagAnswer {
            answer,
            sources: distinct_sources(&results),
            chunks_used: results.len(),
        })
    }

    #[instrument(skip(self, sql_summary))]
    async fn answer_hybrid(&self, question: &str, sql_summary: &str) -> Result<String> {
        self.ensure_store().await?;
        if self.store.total_chunks() == 0 {
            return Ok(sql_summary.to_string());
        }

        let results = self.retrieve(question).await?;
        if results.is_empty() {
            return Ok(sql_summary.to_string());
        }

        let doc_context = self.bounded_context(format_context(&results));
        let context = format!(
            "1. DOCUMENT CONTEXT (from uploaded files):\n{doc_context}\n\n\
             2. DATABASE QUERY RESULT SUMMARY:\n{sql_summary}"
        );
        Ok(self.generate(HYBRID_SYSTEM_PROMPT, &context, question).await)
    }

    #[instrument(skip(self))]
    async fn delete_document(&self, filename: &str) -> Result<DeleteReport> {
        self.ensure_store().await?;
        if !self.store.contains_document(filename) {
            return Err(IqError::NotFound {
                resource: format!("document '{filename}'"),
            });
        }
        let store = self.store.clone();
        let target = filename.to_string();
        let chunks_removed =
            tokio::task::spawn_blocking(move || store.rebuild_excluding(|c| c.filename == target))
                .await??;
        let total_in_store = self.store.total_chunks();
        info!(filename, chunks_removed, total_in_store, "deleted document");
        Ok(DeleteReport {
            filename: filename.to_string(),
            chunks_removed,
            total_in_store,
        })
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iq_llm::{EmbedModel, HashEmbedModel};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingChat {
        calls: AtomicUsize,
        last_context: Mutex<String>,
    }

    #[async_trait]
    impl ChatModel for RecordingChat {
        async fn chat(&self, _system: &str, context: &str, _user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_context.lock() = context.to_string();
            Ok("Revenue grew 20% in Q1 according to q1.pdf.".to_string())
        }
    }

    struct ThrottledChat;

    #[async_trait]
    impl ChatModel for ThrottledChat {
        async fn chat(&self, _system: &str, _context: &str, _user: &str) -> Result<String> {
            Err(IqError::LlmService {
                provider: "gemini".into(),
                message: "429 Resource has been exhausted".into(),
            })
        }
    }

    /// Returns the upload bytes as text regardless of extension.
    struct Passthrough;

    #[async_trait]
    impl DocumentExtractor for Passthrough {
        async fn extract(&self, _filename: &str, bytes: &[u8]) -> Result<String> {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    fn engine(dir: &std::path::Path, chat: Arc<dyn ChatModel>) -> RetrievalEngine {
        let embed = Arc::new(HashEmbedModel::new(128).unwrap());
        RetrievalEngine::new(
            Arc::new(VectorStore::new(dir)),
            Arc::new(Embedder::from_model(embed)),
            chat,
            Arc::new(Passthrough),
            RetrievalConfig::default(),
        )
    }

    #[tokio::test]
    async fn empty_store_never_calls_generation() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(RecordingChat::default());
        let engine = engine(dir.path(), chat.clone());

        let answer = engine.answer_question("What is in the report?").await.unwrap();
        assert_eq!(answer.answer, NO_DOCUMENTS_ANSWER);
        assert!(answer.sources.is_empty());
        assert_eq!(answer.chunks_used, 0);

        let merged = engine.answer_hybrid("compare", "SQL Query: SELECT 1").await.unwrap();
        assert_eq!(merged, "SQL Query: SELECT 1");
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn indexed_document_answers_with_its_source() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(RecordingChat::default());
        let engine = engine(dir.path(), chat.clone());

        let report = engine
            .index_document("q1.pdf", b"Revenue grew 20% in Q1.")
            .await
            .unwrap();
        assert_eq!(report.chunks_added, 1);
        assert_eq!(report.total_in_store, 1);

        let answer = engine
            .answer_question("What happened to revenue in Q1?")
            .await
            .unwrap();
        assert_eq!(answer.sources, vec!["q1.pdf".to_string()]);
        assert_eq!(answer.chunks_used, 1);
        assert!(answer.answer.contains("20%"));

        let context = chat.last_context.lock().clone();
        assert!(context.starts_with("[Source 1: q1.pdf]\n"));
        assert!(context.contains("Revenue grew 20% in Q1."));
    }

    /// Loads fine but cannot embed anything after the dimension check.
    struct QueryFailingEmbed;

    #[async_trait]
    impl EmbedModel for QueryFailingEmbed {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.len() == 1 && texts[0] == "dimension probe" {
                return Ok(vec![vec![1.0; 128]]);
            }
            Err(IqError::EmbeddingService {
                provider: "test".into(),
                message: "runtime unavailable".into(),
            })
        }
    }

    #[tokio::test]
    async fn embedding_failures_are_returned_to_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        engine(dir.path(), Arc::new(RecordingChat::default()))
            .index_document("q1.pdf", b"Revenue grew 20% in Q1.")
            .await
            .unwrap();

        let chat = Arc::new(RecordingChat::default());
        let engine = RetrievalEngine::new(
            Arc::new(VectorStore::new(dir.path())),
            Arc::new(Embedder::from_model(Arc::new(QueryFailingEmbed))),
            chat.clone(),
            Arc::new(Passthrough),
            RetrievalConfig::default(),
        );

        let err = engine.answer_question("revenue?").await.unwrap_err();
        assert!(matches!(err, IqError::EmbeddingService { .. }));
        let err = engine.answer_hybrid("revenue?", "SQL Query: SELECT 1").await.unwrap_err();
        assert!(matches!(err, IqError::EmbeddingService { .. }));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rate_limit_becomes_fixed_answer() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), Arc::new(ThrottledChat));
        engine.index_document("a.txt", b"quarterly revenue figures").await.unwrap();

        let answer = engine.answer_question("revenue").await.unwrap();
        assert_eq!(answer.answer, RATE_LIMIT_ANSWER);
        assert_eq!(answer.sources, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn blank_document_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), Arc::new(RecordingChat::default()));
        engine.index_document("a.txt", b"some words here").await.unwrap();

        let err = engine.index_document("empty.txt", b"  \n ").await.unwrap_err();
        assert!(matches!(err, IqError::Extraction { .. }));
        assert_eq!(engine.stats().await.unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn delete_removes_only_that_document() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), Arc::new(RecordingChat::default()));
        engine.index_document("a.txt", b"alpha beta gamma").await.unwrap();
        engine.index_document("b.txt", b"delta epsilon").await.unwrap();

        let report = engine.delete_document("a.txt").await.unwrap();
        assert_eq!(report.chunks_removed, 1);
        assert_eq!(report.total_in_store, 1);
        assert_eq!(engine.stats().await.unwrap().documents, vec!["b.txt".to_string()]);

        let err = engine.delete_document("a.txt").await.unwrap_err();
        assert!(matches!(err, IqError::NotFound { .. }));
    }

    #[tokio::test]
    async fn startup_reloads_persisted_chunks() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = engine(dir.path(), Arc::new(RecordingChat::default()));
            engine.index_document("q1.pdf", b"Revenue grew 20% in Q1.").await.unwrap();
        }
        let engine = engine(dir.path(), Arc::new(RecordingChat::default()));
        engine.startup().await;
        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.documents, vec!["q1.pdf".to_string()]);
    }

    #[test]
    fn context_is_truncated_on_char_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), Arc::new(RecordingChat::default()));
        engine.config.max_context_chars = 3;
        assert_eq!(engine.bounded_context("ééééé".to_string()), "ééé");
        assert_eq!(engine.bounded_context("ab".to_string()), "ab");
    }
}
