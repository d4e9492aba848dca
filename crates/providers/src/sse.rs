//! Incremental parser for OpenAI-style `text/event-stream` chat responses.
//!
//! Bytes arrive in arbitrary slices; the parser buffers partial lines as
//! raw bytes (a UTF-8 character may straddle two slices), forwards content deltas immediately, and accumulates tool-call deltas by
//! index until the stream finishes.

use std::collections::BTreeMap;

use serde::Deserialize;
use taskrag_core::error::GenerationError;
use taskrag_core::provider::ToolIntent;
use tracing::trace;

/// What the parser extracted from the stream so far.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// A non-empty text fragment.
    Content(String),
    /// The stream is over; carries every tool call that was assembled.
    Finished(Vec<ToolCallAccumulator>),
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    accumulators: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the events completed by them.
    pub fn feed(&mut self, bytes: impl AsRef<[u8]>) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(bytes.as_ref());

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end_matches('\r');

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                events.push(self.finish_now());
                return events;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(response) => {
                    for choice in response.choices {
                        for delta in choice.delta.tool_calls.unwrap_or_default() {
                            let acc = self.accumulators.entry(delta.index).or_default();
                            if let Some(id) = delta.id {
                                acc.id = id;
                            }
                            if let Some(func) = delta.function {
                                if let Some(name) = func.name {
                                    acc.name = name;
                                }
                                if let Some(args) = func.arguments {
                                    acc.arguments.push_str(&args);
                                }
                            }
                        }
                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            events.push(SseEvent::Content(content));
                        }
                    }
                }
                Err(e) => {
                    trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                }
            }
        }

        events
    }

    /// Close the stream. Returns the final event unless `[DONE]` was seen.
    pub fn finish(&mut self) -> Option<SseEvent> {
        (!self.finished).then(|| self.finish_now())
    }

    fn finish_now(&mut self) -> SseEvent {
        self.finished = true;
        let calls = std::mem::take(&mut self.accumulators).into_values().collect();
        SseEvent::Finished(calls)
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallAccumulator {
    /// Parse the accumulated arguments. Empty arguments mean `{}`.
    pub fn into_intent(self, position: usize) -> Result<ToolIntent, GenerationError> {
        if self.name.is_empty() {
            return Err(GenerationError::Malformed(
                "tool call without a function name".into(),
            ));
        }
        let arguments = if self.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&self.arguments).map_err(|e| {
                GenerationError::Malformed(format!("arguments for '{}' are not JSON: {e}", self.name))
            })?
        };
        let id = if self.id.is_empty() {
            format!("call_{position}")
        } else {
            self.id
        };
        Ok(ToolIntent {
            id,
            name: self.name,
            arguments,
        })
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta. Arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
