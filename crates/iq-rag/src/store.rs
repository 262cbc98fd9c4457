//! Persisted flat inner-product index over chunk embeddings.
//!
//! # Layout on disk
//!
//! Two co-located artifacts, both required for a valid load:
//! - `index.bin`: magic `IQVX`, u32 version, u32 dimension, u64 row count,
//!   then `rows * dimension` little-endian f32 values.
//! - `chunks.json`: array of chunk records, one per index row, same order.
//!
//! Both files are rewritten in full after every mutation. That keeps the
//! format trivial but makes each write O(corpus); fine for a few thousand
//! chunks, not for millions.
//!
//! A write stages `index.tmp` and `chunks.tmp` first and renames nothing until
//! both are synced. Metadata is renamed before the index, so a crash between
//! the two renames leaves `index.tmp` beside the new `chunks.json`; the next
//! load pairs them up and finishes the commit. Consecutive generations always
//! differ in row count, which is what tells a matching pair from a stale one.
//!
//! # Concurrency
//!
//! The live index is an immutable [`Generation`] behind an `Arc`. Readers
//! clone the `Arc` under a short read lock and score outside of it. Every
//! mutation holds the writer mutex, builds the next generation, persists it
//! and only then swaps it in, so a failed write leaves the in-memory state
//! untouched and the last committed generation loadable.

use iq_core::{Chunk, RetrievalResult, StoreStats, StoreStatus};
use iq_error::{IqError, Result};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAGIC_BYTES: &[u8; 4] = b"IQVX";
const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 20;
const BYTES_PER_F32: usize = 4;

pub const INDEX_FILE: &str = "index.bin";
pub const CHUNKS_FILE: &str = "chunks.json";
const STAGED_INDEX_FILE: &str = "index.tmp";
const STAGED_CHUNKS_FILE: &str = "chunks.tmp";

/// One immutable snapshot of the corpus: chunk metadata and vectors, row-aligned.
#[derive(Debug, Clone)]
pub struct Generation {
    id: u64,
    dimension: usize,
    chunks: Vec<Chunk>,
    vectors: Vec<f32>,
}

impl Generation {
    fn empty(dimension: usize) -> Self {
        Self {
            id: 0,
            dimension,
            chunks: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.chunks.len()
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dimension..(i + 1) * self.dimension]
    }

    fn search(&self, query: &[f32], top_k: usize) -> Vec<RetrievalResult> {
        let k = top_k.min(self.rows());
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = (0..self.rows())
            .map(|i| (i, dot(query, self.row(i))))
            .collect();
        // stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| RetrievalResult::from_chunk(&self.chunks[i], score))
            .collect()
    }

    fn documents(&self) -> Vec<String> {
        let mut seen = Vec::<String>::new();
        for c in &self.chunks {
            if !seen.iter().any(|f| f == &c.filename) {
                seen.push(c.filename.clone());
            }
        }
        seen
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// The shared chunk store. Construct once and share through `Arc`.
pub struct VectorStore {
    dir: PathBuf,
    current: RwLock<Option<Arc<Generation>>>,
    writer: Mutex<()>,
}

impl VectorStore {
    /// Creates an uninitialised store rooted at `dir`; call [`Self::load_or_create`] next.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn chunks_path(&self) -> PathBuf {
        self.dir.join(CHUNKS_FILE)
    }

    fn snapshot(&self) -> Option<Arc<Generation>> {
        self.current.read().clone()
    }

    pub fn total_chunks(&self) -> usize {
        self.snapshot().map(|g| g.rows()).unwrap_or(0)
    }

    pub fn documents(&self) -> Vec<String> {
        self.snapshot().map(|g| g.documents()).unwrap_or_default()
    }

    pub fn contains_document(&self, filename: &str) -> bool {
        self.snapshot()
            .map(|g| g.chunks.iter().any(|c| c.filename == filename))
            .unwrap_or(false)
    }

    /// Loads both artifacts from disk, or starts empty.
    ///
    /// Any missing, unreadable or inconsistent artifact is logged and replaced
    /// by an empty store of `dimension`; this never fails. Returns the number
    /// of chunks loaded.
    pub fn load_or_create(&self, dimension: usize) -> usize {
        let _guard = self.writer.lock();
        let generation = match self.recover_from_disk(dimension) {
            Ok(Some(generation)) => {
                info!(
                    dir = %self.dir.display(),
                    chunks = generation.rows(),
                    dimension,
                    "vector store loaded from disk"
                );
                generation
            }
            Ok(None) => {
                info!(dir = %self.dir.display(), dimension, "initialised new empty vector store");
                Generation::empty(dimension)
            }
            Err(e) => {
                warn!(
                    dir = %self.dir.display(),
                    error = %e,
                    "failed to load existing vector store, starting empty"
                );
                Generation::empty(dimension)
            }
        };
        let rows = generation.rows();
        *self.current.write() = Some(Arc::new(generation));
        rows
    }

    /// Reads the committed pair, first completing a commit that was cut off
    /// between its two renames.
    fn recover_from_disk(&self, dimension: usize) -> Result<Option<Generation>> {
        let staged_index = self.dir.join(STAGED_INDEX_FILE);
        if staged_index.is_file() {
            match read_pair(&staged_index, &self.chunks_path(), dimension) {
                Ok(Some(generation)) => {
                    fs::rename(&staged_index, self.index_path())?;
                    warn!(
                        dir = %self.dir.display(),
                        chunks = generation.rows(),
                        "completed an interrupted vector store commit"
                    );
                    return Ok(Some(generation));
                }
                Ok(None) | Err(_) => debug!("staged index does not match committed metadata"),
            }
        }
        let generation = read_pair(&self.index_path(), &self.chunks_path(), dimension)?;
        self.discard_staged();
        Ok(generation)
    }

    fn discard_staged(&self) {
        for name in [STAGED_INDEX_FILE, STAGED_CHUNKS_FILE] {
            let path = self.dir.join(name);
            if path.is_file() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "could not remove staged file");
                }
            }
        }
    }

    /// Stages both artifacts, then renames metadata and index into place.
    /// Nothing committed is touched unless both staged writes succeed.
    fn persist(&self, generation: &Generation) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let staged_index = self.dir.join(STAGED_INDEX_FILE);
        let staged_chunks = self.dir.join(STAGED_CHUNKS_FILE);

        let staged = serde_json::to_vec_pretty(&generation.chunks)
            .map_err(IqError::from)
            .and_then(|json| {
                write_synced(&staged_index, &encode_index(generation))?;
                write_synced(&staged_chunks, &json)
            });
        if let Err(e) = staged {
            self.discard_staged();
            return Err(e);
        }

        fs::rename(&staged_chunks, self.chunks_path())?;
        fs::rename(&staged_index, self.index_path())?;
        Ok(())
    }

    /// Appends chunks and their vectors, persists, and returns the new total.
    pub fn add(&self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<usize> {
        let _guard = self.writer.lock();
        let current = self
            .snapshot()
            .ok_or_else(|| IqError::store("add", "vector store not initialised"))?;

        if chunks.len() != vectors.len() {
            return Err(IqError::store(
                "add",
                format!("{} chunks but {} vectors", chunks.len(), vectors.len()),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != current.dimension) {
            return Err(IqError::store(
                "add",
                format!("vector dimension {} != index dimension {}", bad.len(), current.dimension),
            ));
        }

        if chunks.is_empty() {
            return Ok(current.rows());
        }

        let mut next = (*current).clone();
        next.id = current.id + 1;
        next.vectors.reserve(vectors.len() * current.dimension);
        for v in &vectors {
            next.vectors.extend_from_slice(v);
        }
        let added = chunks.len();
        next.chunks.extend(chunks);

        self.persist(&next)?;
        let total = next.rows();
        *self.current.write() = Some(Arc::new(next));
        info!(added, total, "added chunks to vector store");
        Ok(total)
    }

    /// Top `top_k` chunks by inner product with `query`, best first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        let Some(generation) = self.snapshot() else {
            warn!("search called on uninitialised vector store");
            return Ok(Vec::new());
        };
        if generation.rows() == 0 {
            return Ok(Vec::new());
        }
        if query.len() != generation.dimension {
            return Err(IqError::store(
                "search",
                format!(
                    "query dimension {} != index dimension {}",
                    query.len(),
                    generation.dimension
                ),
            ));
        }
        Ok(generation.search(query, top_k))
    }

    /// Drops every chunk matching `exclude` by building a fresh generation from
    /// the survivors' stored vectors. Returns how many chunks were removed.
    pub fn rebuild_excluding<F>(&self, exclude: F) -> Result<usize>
    where
        F: Fn(&Chunk) -> bool,
    {
        let _guard = self.writer.lock();
        let Some(current) = self.snapshot() else {
            return Ok(0);
        };

        let mut next = Generation::empty(current.dimension);
        next.id = current.id + 1;
        for (i, chunk) in current.chunks.iter().enumerate() {
            if !exclude(chunk) {
                next.chunks.push(chunk.clone());
                next.vectors.extend_from_slice(current.row(i));
            }
        }
        let removed = current.rows() - next.rows();
        if removed == 0 {
            return Ok(0);
        }

        self.persist(&next)?;
        let total = next.rows();
        *self.current.write() = Some(Arc::new(next));
        info!(removed, total, "rebuilt vector store");
        Ok(removed)
    }

    pub fn stats(&self) -> StoreStats {
        match self.snapshot() {
            Some(g) => StoreStats {
                status: StoreStatus::Ready,
                total_chunks: g.rows(),
                documents: g.documents(),
            },
            None => StoreStats {
                status: StoreStatus::NotInitialised,
                total_chunks: 0,
                documents: Vec::new(),
            },
        }
    }
}

fn encode_index(generation: &Generation) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + generation.vectors.len() * BYTES_PER_F32);
    out.extend_from_slice(MAGIC_BYTES);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(generation.dimension as u32).to_le_bytes());
    out.extend_from_slice(&(generation.rows() as u64).to_le_bytes());
    for x in &generation.vectors {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn decode_index(bytes: &[u8]) -> Result<(usize, Vec<f32>)> {
    let invalid = |msg: &str| IqError::store("load", format!("invalid index file: {msg}"));

    if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC_BYTES {
        return Err(invalid("bad magic"));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(invalid(&format!("unsupported version {version}")));
    }
    let dimension = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut rows_raw = [0u8; 8];
    rows_raw.copy_from_slice(&bytes[12..20]);
    let rows = u64::from_le_bytes(rows_raw) as usize;
    if dimension == 0 {
        return Err(invalid("zero dimension"));
    }

    let expected = rows
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(BYTES_PER_F32))
        .ok_or_else(|| invalid("size overflow"))?;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != expected {
        return Err(invalid("truncated body"));
    }

    let vectors = body
        .chunks_exact(BYTES_PER_F32)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((dimension, vectors))
}

/// Decodes an index file and its metadata; `None` when either is absent.
fn read_pair(index_path: &Path, chunks_path: &Path, dimension: usize) -> Result<Option<Generation>> {
    if !index_path.exists() || !chunks_path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(index_path)?;
    let (stored_dim, vectors) = decode_index(&bytes)?;
    if stored_dim != dimension {
        return Err(IqError::store(
            "load",
            format!("index dimension {stored_dim} does not match embedder dimension {dimension}"),
        ));
    }

    let chunks: Vec<Chunk> = serde_json::from_slice(&fs::read(chunks_path)?)?;
    let rows = vectors.len() / dimension;
    if rows != chunks.len() {
        return Err(IqError::store(
            "load",
            format!("index has {rows} rows but metadata has {} chunks", chunks.len()),
        ));
    }

    Ok(Some(Generation {
        id: 0,
        dimension,
        chunks,
        vectors,
    }))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = fs::File::create(path)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    Ok(())
}
