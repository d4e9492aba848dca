//! Generation and embedding providers for TaskRAG.
//!
//! The generation provider implements `taskrag_core::GenerationProvider`;
//! the embedder implements `taskrag_core::Embedder`.

pub mod embeddings;
pub mod openai_compat;
pub mod sse;

pub use embeddings::OpenAiEmbedder;
pub use openai_compat::OpenAiCompatProvider;
