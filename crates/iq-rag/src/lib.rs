//! Document retrieval: chunking, embedding, the persisted vector store and
//! the retrieval-augmented answering engine built on top of them.

pub mod chunker;
pub mod embedder;
pub mod engine;
pub mod extract;
pub mod store;

pub use chunker::{chunk_text, ChunkerConfig};
pub use embedder::{l2_normalize, Embedder};
pub use engine::{
    format_context, RagEngine, RetrievalConfig, RetrievalEngine, NOTHING_RELEVANT_ANSWER,
    NO_DOCUMENTS_ANSWER, RATE_LIMIT_ANSWER,
};
pub use extract::{markdown_to_text, DocumentExtractor, ExtractServiceConfig, LocalExtractor};
pub use store::VectorStore;

pub use iq_error::{IqError, Result};
