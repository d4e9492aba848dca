//! In-process storage collaborators for TaskRAG.
//!
//! - [`InMemoryTaskStore`]: task records behind the `TaskStore` trait
//! - [`InMemoryIndex`]: chunk embeddings ranked by cosine similarity
//! - [`Chunker`]: overlapping character-window splitter
//! - [`HashingEmbedder`]: deterministic offline embeddings

pub mod chunker;
pub mod embedder;
pub mod in_memory;
pub mod vector;

pub use chunker::Chunker;
pub use embedder::HashingEmbedder;
pub use in_memory::InMemoryTaskStore;
pub use vector::{InMemoryIndex, cosine_similarity};
