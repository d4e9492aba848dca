//! Lightweight mock backends for gateway tests.

use std::sync::Arc;

use async_trait::async_trait;
use taskrag_config::AppConfig;
use taskrag_core::error::GenerationError;
use taskrag_core::provider::{Generation, GenerationProvider, GenerationRequest};
use taskrag_memory::HashingEmbedder;

use crate::state::{AppState, SharedState};

/// Answers every request with the same text, or never answers.
pub struct ScriptedProvider {
    fragments: Option<Vec<String>>,
}

impl ScriptedProvider {
    pub fn text(fragments: &[&str]) -> Self {
        Self {
            fragments: Some(fragments.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn hanging() -> Self {
        Self { fragments: None }
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "gateway_mock"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<Generation, GenerationError> {
        match &self.fragments {
            Some(fragments) => {
                let items: Vec<Result<String, GenerationError>> =
                    fragments.iter().cloned().map(Ok).collect();
                Ok(Generation::Text(Box::pin(futures::stream::iter(items))))
            }
            None => std::future::pending().await,
        }
    }
}

pub fn test_state(provider: ScriptedProvider) -> SharedState {
    Arc::new(
        AppState::with_backends(
            AppConfig::default(),
            Arc::new(provider),
            Arc::new(HashingEmbedder::default()),
        )
        .unwrap(),
    )
}
