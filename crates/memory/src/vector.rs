//! Vector similarity and the in-process chunk index.
//!
//! Pure-Rust cosine similarity plus an index that keeps chunk embeddings in
//! memory and ranks them by brute-force scan.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use taskrag_core::error::RetrievalError;
use taskrag_core::retrieval::{ChunkIndex, IndexedChunk, RetrievedChunk};
use tokio::sync::RwLock;
use tracing::debug;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

struct StoredChunk {
    ordinal: u64,
    chunk: IndexedChunk,
}

/// Chunk index backed by a `Vec`, ranked by cosine similarity.
///
/// Ordinals are assigned in insertion order, so ingesting documents one after
/// another preserves their original order for tie-breaking.
#[derive(Default)]
pub struct InMemoryIndex {
    chunks: RwLock<Vec<StoredChunk>>,
    offline: AtomicBool,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `IndexUnavailable` until
    /// switched back on.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), RetrievalError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RetrievalError::IndexUnavailable("index is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkIndex for InMemoryIndex {
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        self.ensure_online()?;
        let chunks = self.chunks.read().await;

        let mut scored: Vec<RetrievedChunk> = chunks
            .iter()
            .map(|stored| RetrievedChunk {
                document_id: stored.chunk.document_id.clone(),
                position: stored.chunk.position,
                ordinal: stored.ordinal,
                text: stored.chunk.text.clone(),
                score: cosine_similarity(&stored.chunk.embedding, embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn add(&self, new_chunks: Vec<IndexedChunk>) -> Result<usize, RetrievalError> {
        self.ensure_online()?;
        let mut chunks = self.chunks.write().await;
        let added = new_chunks.len();
        let mut next = chunks.len() as u64;
        for chunk in new_chunks {
            chunks.push(StoredChunk {
                ordinal: next,
                chunk,
            });
            next += 1;
        }
        debug!(added, total = chunks.len(), "Indexed chunks");
        Ok(added)
    }

    async fn len(&self) -> Result<usize, RetrievalError> {
        self.ensure_online()?;
        Ok(self.chunks.read().await.len())
    }
}
