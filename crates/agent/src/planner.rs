//! Turn planner — decides, given the history so far, whether to answer or
//! call tools.
//!
//! The planner is stateless between calls: everything it knows comes from the
//! session history it is handed. Tool observations reach the model as
//! `tool` messages linked to the assistant message that requested them.

use std::sync::Arc;

use taskrag_config::AppConfig;
use taskrag_core::error::GenerationError;
use taskrag_core::message::{Role, Turn};
use taskrag_core::provider::{
    ChatMessage, Generation, GenerationProvider, GenerationRequest, TokenStream, ToolIntent,
};
use taskrag_core::tool::ToolRegistry;
use tracing::debug;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are TaskRAG, an assistant that manages the user's \
task list and answers questions from the user's own documents.\n\
Use the task tools to create, update, delete, and look up tasks. Always act on the task ids \
returned by task_search rather than guessing them.\n\
Use document_search before answering questions about the user's documents, and mention which \
documents the answer came from.\n\
If a tool reports an error, tell the user briefly and answer with what you have.";

/// Next step chosen by the planner.
pub enum Plan {
    /// Stream the final answer.
    Respond(TokenStream),
    /// Run these tools, in order, then plan again.
    UseTools(Vec<ToolIntent>),
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Respond(_) => f.write_str("Plan::Respond(..)"),
            Self::UseTools(intents) => f.debug_tuple("Plan::UseTools").field(intents).finish(),
        }
    }
}

pub struct TurnPlanner {
    provider: Arc<dyn GenerationProvider>,
    tools: Arc<ToolRegistry>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: String,
}

impl TurnPlanner {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Planner configured from the `[provider]` and `[engine]` sections.
    pub fn from_config(
        provider: Arc<dyn GenerationProvider>,
        tools: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Self {
        let mut planner = Self::new(provider, tools, config.provider.model.clone())
            .with_temperature(config.provider.temperature)
            .with_max_tokens(config.provider.max_tokens);
        if let Some(prompt) = &config.engine.system_prompt {
            planner = planner.with_system_prompt(prompt.clone());
        }
        planner
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Render the history as a chat transcript.
    pub fn build_messages(&self, history: &[Turn]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(&self.system_prompt));

        for turn in history {
            match turn.role() {
                Role::User => messages.push(ChatMessage::user(turn.content())),
                Role::Assistant => messages.push(ChatMessage::assistant(turn.content())),
                Role::Tool => {
                    let intents = turn
                        .tool_calls()
                        .iter()
                        .map(|call| ToolIntent {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        })
                        .collect();
                    messages.push(ChatMessage::assistant_tool_calls(intents));
                    for call in turn.tool_calls() {
                        messages.push(ChatMessage::tool_result(
                            &call.id,
                            call.outcome.to_observation(),
                        ));
                    }
                }
            }
        }

        messages
    }

    /// Ask the generation capability for the next step.
    ///
    /// Tool intents must carry object arguments; anything else is a
    /// malformed response. Whether the named tool exists is left to the
    /// registry, so the failure becomes an observation instead of ending
    /// the turn.
    pub async fn plan(&self, history: &[Turn]) -> Result<Plan, GenerationError> {
        let request = GenerationRequest {
            model: self.model.clone(),
            messages: self.build_messages(history),
            tools: self.tools.definitions(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(
            provider = self.provider.name(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Planning next step"
        );

        match self.provider.generate(request).await? {
            Generation::Text(stream) => Ok(Plan::Respond(stream)),
            Generation::ToolCalls(intents) if intents.is_empty() => Err(
                GenerationError::Malformed("tool call response without any calls".into()),
            ),
            Generation::ToolCalls(intents) => {
                if let Some(bad) = intents.iter().find(|i| !i.arguments.is_object()) {
                    return Err(GenerationError::Malformed(format!(
                        "arguments for {} are not a JSON object",
                        bad.name
                    )));
                }
                Ok(Plan::UseTools(intents))
            }
        }
    }
}
