//! # TaskRAG Core
//!
//! Domain types, traits, and error definitions for the TaskRAG conversational
//! engine. This crate does no I/O: it defines the model that the storage,
//! provider, tool, agent, and transport crates implement against.
//!
//! ## Layout
//!
//! - [`session`] and [`message`]: session identity, turns, tool-call records
//! - [`event`]: the `StreamEvent` wire vocabulary
//! - [`provider`]: the generation capability consumed by the planner
//! - [`tool`]: argument schemas and the name-keyed `ToolRegistry`
//! - [`retrieval`] and [`task`]: narrow interfaces to external collaborators

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod retrieval;
pub mod session;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{
    Error, FieldViolation, GenerationError, Result, RetrievalError, SessionError, TaskStoreError,
    ToolError, TurnError,
};
pub use event::StreamEvent;
pub use message::{OpenTurn, Role, ToolCallRecord, ToolOutcome, Turn};
pub use provider::{
    ChatMessage, ChatRole, Generation, GenerationProvider, GenerationRequest, TokenStream,
    ToolDefinition, ToolIntent,
};
pub use retrieval::{ChunkIndex, Embedder, IndexedChunk, RetrievalResult, RetrievedChunk};
pub use session::{SessionId, SessionStatus, TurnState};
pub use task::{NewTask, Task, TaskPatch, TaskQuery, TaskStats, TaskStatus, TaskStore};
pub use tool::{ArgumentSchema, FieldKind, FieldSpec, HandlerError, ToolHandler, ToolRegistry};
