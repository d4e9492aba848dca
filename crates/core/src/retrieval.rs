//! Retrieval collaborators: the embedding capability and the chunk index.
//!
//! Implementations live in `taskrag-memory` (in-process) and
//! `taskrag-providers` (remote embeddings).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// A chunk returned by an index search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub document_id: String,
    /// Position of the chunk within its document.
    pub position: usize,
    /// Global insertion order assigned by the index; used to break score ties.
    pub ordinal: u64,
    pub text: String,
    pub score: f32,
}

/// A chunk ready to be stored.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub document_id: String,
    pub position: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Ranked chunks for one query. Built fresh per call and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub chunks: Vec<RetrievedChunk>,
}

/// Turns text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Stores chunk embeddings and ranks them against a query embedding.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Up to `k` chunks, most similar first.
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, RetrievalError>;

    /// Store chunks; returns how many were added.
    async fn add(&self, chunks: Vec<IndexedChunk>) -> Result<usize, RetrievalError>;

    async fn len(&self) -> Result<usize, RetrievalError>;
}
