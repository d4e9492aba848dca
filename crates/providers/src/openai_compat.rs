//! OpenAI-compatible generation provider.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, and any endpoint that speaks
//! the `/chat/completions` streaming protocol with function calling.
//!
//! Every request is streamed. The provider reads until the first content
//! fragment or the end of the stream: content means a direct answer whose
//! remaining fragments are pulled lazily; an end with accumulated tool calls
//! means a tool intent.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use taskrag_core::error::GenerationError;
use taskrag_core::provider::*;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::sse::{SseEvent, SseParser};

/// An OpenAI-compatible generation provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key, Duration::from_secs(120))
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            Duration::from_secs(300),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our message types to OpenAI API format.
    fn to_api_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::System => "system",
                    ChatRole::Tool => "tool",
                },
                content: Some(m.content.clone()),
                tool_calls: (!m.tool_calls.is_empty()).then(|| {
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function",
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments.to_string(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function",
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &GenerationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }
}

/// Map a non-success HTTP status onto the generation taxonomy.
pub(crate) fn status_error(status: u16, body: String) -> GenerationError {
    match status {
        429 => GenerationError::RateLimited {
            retry_after_secs: 5,
        },
        401 | 403 => GenerationError::Unavailable(
            "authentication failed: invalid API key or insufficient permissions".into(),
        ),
        _ => GenerationError::Unavailable(format!("provider returned {status}: {body}")),
    }
}

/// Decide between a direct answer and tool calls from a parsed event feed.
///
/// Waits for the first content fragment or the end of the stream. After the
/// first fragment the remaining events are handed to the caller lazily; tool
/// calls that arrive after text end the stream with `Malformed`.
pub(crate) async fn into_generation(
    mut rx: mpsc::Receiver<Result<SseEvent, GenerationError>>,
) -> Result<Generation, GenerationError> {
    let first = loop {
        match rx.recv().await {
            Some(Ok(SseEvent::Content(text))) => break text,
            Some(Ok(SseEvent::Finished(calls))) if !calls.is_empty() => {
                let intents = calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, acc)| acc.into_intent(i))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Generation::ToolCalls(intents));
            }
            Some(Ok(SseEvent::Finished(_))) | None => {
                return Ok(Generation::Text(Box::pin(futures::stream::empty())));
            }
            Some(Err(e)) => return Err(e),
        }
    };

    let rest = futures::stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(Ok(SseEvent::Content(text))) => Some((Ok(text), Some(rx))),
            Some(Ok(SseEvent::Finished(calls))) if !calls.is_empty() => {
                let names: Vec<String> = calls.into_iter().map(|c| c.name).collect();
                warn!(tools = ?names, "Model sent tool calls after answer text");
                Some((
                    Err(GenerationError::Malformed(format!(
                        "tool calls after answer text: {}",
                        names.join(", ")
                    ))),
                    None,
                ))
            }
            Some(Ok(SseEvent::Finished(_))) | None => None,
            Some(Err(e)) => Some((Err(e), None)),
        }
    });

    Ok(Generation::Text(Box::pin(
        futures::stream::once(async move { Ok(first) }).chain(rest),
    )))
}

#[async_trait]
impl GenerationProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(status_error(status, error_body));
        }

        let (tx, rx) = mpsc::channel(64);

        // Read the SSE byte stream until it ends or the consumer goes away.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::new();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(GenerationError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                for event in parser.feed(&bytes) {
                    if tx.send(Ok(event)).await.is_err() {
                        return; // receiver dropped
                    }
                }
            }

            if let Some(event) = parser.finish() {
                let _ = tx.send(Ok(event)).await;
            }
        });

        into_generation(rx).await
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: &'static str,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}
