//! Shared test helpers: a scripted generation provider and small tool handlers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use taskrag_core::error::GenerationError;
use taskrag_core::provider::{Generation, GenerationProvider, GenerationRequest, ToolIntent};
use taskrag_core::tool::{ArgumentSchema, FieldSpec, HandlerError, ToolHandler, ToolRegistry};
use tokio::sync::Notify;

/// One scripted answer from the provider.
pub enum Script {
    /// Stream these fragments, pausing `delay` before each one.
    Text {
        fragments: Vec<String>,
        delay: Duration,
    },
    Tools(Vec<ToolIntent>),
    Fail(GenerationError),
    /// Never answer.
    Hang,
    /// Wait for the gate, then play the inner script.
    Gated(Arc<Notify>, Box<Script>),
}

impl Script {
    pub fn text(fragments: &[&str]) -> Self {
        Self::Text {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            delay: Duration::ZERO,
        }
    }

    pub fn slow_text(fragments: &[&str], delay: Duration) -> Self {
        Self::Text {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            delay,
        }
    }
}

pub fn intent(name: &str, arguments: Value) -> ToolIntent {
    ToolIntent {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments,
    }
}

/// A provider that plays back scripted generations in order.
///
/// Panics if more calls are made than scripts provided.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn play(script: Script) -> Result<Generation, GenerationError> {
    let mut script = script;
    loop {
        match script {
            Script::Gated(gate, inner) => {
                gate.notified().await;
                script = *inner;
            }
            Script::Text { fragments, delay } => {
                let stream = futures::stream::unfold(fragments.into_iter(), move |mut rest| async move {
                    let next = rest.next()?;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Some((Ok(next), rest))
                });
                return Ok(Generation::Text(Box::pin(stream)));
            }
            Script::Tools(intents) => return Ok(Generation::ToolCalls(intents)),
            Script::Fail(err) => return Err(err),
            Script::Hang => return std::future::pending().await,
        }
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more scripts");
        play(script).await
    }
}

/// Echoes its `text` argument back.
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, HandlerError> {
        Ok(serde_json::json!({ "echo": args.get("text").cloned().unwrap_or(Value::Null) }))
    }
}

/// Fails transiently the first `failures` times, then succeeds.
pub struct FlakyTool {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyTool {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolHandler for FlakyTool {
    async fn call(&self, _args: Map<String, Value>) -> Result<Value, HandlerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(HandlerError::new("index offline")
                .with_kind("RetrievalError")
                .transient())
        } else {
            Ok(serde_json::json!({ "results": [] }))
        }
    }
}

/// Blocks until the gate opens.
pub struct GatedTool(pub Arc<Notify>);

#[async_trait]
impl ToolHandler for GatedTool {
    async fn call(&self, _args: Map<String, Value>) -> Result<Value, HandlerError> {
        self.0.notified().await;
        Ok(serde_json::json!({ "done": true }))
    }
}

/// Panics on every call.
pub struct PanickingTool;

#[async_trait]
impl ToolHandler for PanickingTool {
    async fn call(&self, _args: Map<String, Value>) -> Result<Value, HandlerError> {
        panic!("handler exploded");
    }
}

pub fn echo_schema() -> ArgumentSchema {
    ArgumentSchema::new().field(FieldSpec::string("text").required())
}

/// Registry with just `echo`.
pub fn echo_registry() -> Arc<ToolRegistry> {
    Arc::new(base_registry())
}

/// Registry with `echo` plus one extra handler taking no arguments.
pub fn registry_with(name: &str, handler: Arc<dyn ToolHandler>) -> Arc<ToolRegistry> {
    let mut registry = base_registry();
    registry
        .register(name, "test tool", ArgumentSchema::new(), handler, Duration::from_secs(5))
        .unwrap();
    Arc::new(registry)
}

fn base_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register("echo", "Echo text", echo_schema(), Arc::new(EchoTool), Duration::from_secs(5))
        .unwrap();
    registry
}
