//! Shared application state: everything the transports need, built once.

use std::sync::Arc;

use taskrag_agent::{EngineSettings, OrchestrationEngine, SessionManager, TurnPlanner};
use taskrag_config::AppConfig;
use taskrag_core::error::ToolError;
use taskrag_core::provider::GenerationProvider;
use taskrag_core::retrieval::Embedder;
use taskrag_core::task::TaskStore;
use taskrag_core::tool::ToolRegistry;
use taskrag_memory::{Chunker, HashingEmbedder, InMemoryIndex, InMemoryTaskStore};
use taskrag_providers::{OpenAiCompatProvider, OpenAiEmbedder};
use taskrag_tools::{RetrievalGateway, ToolTimeouts};
use tracing::{info, warn};

pub struct AppState {
    pub config: AppConfig,
    pub sessions: Arc<SessionManager>,
    pub tasks: Arc<dyn TaskStore>,
    pub retrieval: Arc<RetrievalGateway>,
    pub tools: Arc<ToolRegistry>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the OpenAI-compatible backend from `[provider]`.
    ///
    /// Without an API key the document index falls back to the offline
    /// hashing embedder; generation calls will fail until a key is set.
    pub fn from_config(config: AppConfig) -> Result<Self, ToolError> {
        let timeout = std::time::Duration::from_secs(config.provider.request_timeout_secs);
        let api_key = config.provider.api_key.clone().unwrap_or_default();

        let provider: Arc<dyn GenerationProvider> = Arc::new(OpenAiCompatProvider::new(
            "openai-compatible",
            &config.provider.api_url,
            &api_key,
            timeout,
        ));

        let embedder: Arc<dyn Embedder> = if config.has_api_key() {
            Arc::new(OpenAiEmbedder::new(
                &config.provider.api_url,
                &api_key,
                &config.provider.embedding_model,
                timeout,
            ))
        } else {
            warn!("No API key configured, using the offline hashing embedder for documents");
            Arc::new(HashingEmbedder::default())
        };

        Self::with_backends(config, provider, embedder)
    }

    /// Wire the state around explicit generation and embedding backends.
    pub fn with_backends(
        config: AppConfig,
        provider: Arc<dyn GenerationProvider>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ToolError> {
        let tasks: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let retrieval = Arc::new(RetrievalGateway::new(
            embedder,
            Arc::new(InMemoryIndex::new()),
            Chunker::new(config.retrieval.chunk_size, config.retrieval.chunk_overlap),
            config.retrieval.top_k,
        ));

        let tools = Arc::new(taskrag_tools::default_registry(
            tasks.clone(),
            retrieval.clone(),
            ToolTimeouts {
                tasks: config.engine.tool_timeout(),
                retrieval: config.engine.retrieval_timeout(),
            },
        )?);

        let planner = TurnPlanner::from_config(provider, tools.clone(), &config);
        let engine = OrchestrationEngine::new(planner, tools.clone())
            .with_settings(EngineSettings::from(&config.engine));
        let sessions = Arc::new(SessionManager::new(Arc::new(engine)));

        info!(
            model = %config.provider.model,
            tools = tools.names().len(),
            max_tool_iterations = config.engine.max_tool_iterations,
            "Runtime assembled"
        );

        Ok(Self {
            config,
            sessions,
            tasks,
            retrieval,
            tools,
            started_at: chrono::Utc::now(),
        })
    }
}
