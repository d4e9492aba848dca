//! Retrieval gateway — turns a query into ranked document chunks.
//!
//! Embedding and ranking are delegated to the injected [`Embedder`] and
//! [`ChunkIndex`]; the gateway owns the chunking parameters, the default
//! `k`, and the final ordering (score descending, ties in document order).

use std::sync::Arc;

use taskrag_core::error::RetrievalError;
use taskrag_core::retrieval::{ChunkIndex, Embedder, IndexedChunk, RetrievalResult};
use taskrag_memory::Chunker;
use tracing::{debug, info};

pub struct RetrievalGateway {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn ChunkIndex>,
    chunker: Chunker,
    top_k: usize,
}

impl RetrievalGateway {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn ChunkIndex>,
        chunker: Chunker,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            chunker,
            top_k: top_k.max(1),
        }
    }

    /// The `k` used when a caller does not ask for one.
    pub fn default_k(&self) -> usize {
        self.top_k
    }

    /// Top `k` chunks for `query`, most similar first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult, RetrievalError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidQuery("query must not be empty".into()));
        }
        if k == 0 {
            return Err(RetrievalError::InvalidQuery("k must be at least 1".into()));
        }

        let embedding = self.embedder.embed(query).await?;
        let mut chunks = self.index.search(&embedding, k).await?;

        chunks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        chunks.truncate(k);

        debug!(k, hits = chunks.len(), "Retrieved chunks");
        Ok(RetrievalResult {
            query: query.to_string(),
            chunks,
        })
    }

    /// Chunk, embed, and index a document. Returns the number of chunks stored.
    pub async fn ingest(&self, document_id: &str, text: &str) -> Result<usize, RetrievalError> {
        let pieces = self.chunker.split(text);
        if pieces.is_empty() {
            return Err(RetrievalError::InvalidQuery(format!(
                "document '{document_id}' has no text"
            )));
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        for (position, text) in pieces.into_iter().enumerate() {
            let embedding = self.embedder.embed(&text).await?;
            chunks.push(IndexedChunk {
                document_id: document_id.to_string(),
                position,
                text,
                embedding,
            });
        }

        let stored = self.index.add(chunks).await?;
        info!(document_id, chunks = stored, "Document ingested");
        Ok(stored)
    }
}
