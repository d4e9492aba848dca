//! End-to-end integration tests for the TaskRAG runtime.
//!
//! These tests drive whole turns through the session manager, exercising
//! planning, tool dispatch against the real task and retrieval tools,
//! streaming, cancellation, and pacing, with only the generation capability
//! scripted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use taskrag_agent::{
    EngineSettings, EventReceiver, OrchestrationEngine, Pacing, SessionManager,
    StreamBroadcaster, TurnPlanner,
};
use taskrag_config::AppConfig;
use taskrag_core::error::{GenerationError, RetrievalError, SessionError};
use taskrag_core::event::StreamEvent;
use taskrag_core::message::Role;
use taskrag_core::provider::{Generation, GenerationProvider, GenerationRequest, ToolIntent};
use taskrag_core::retrieval::{ChunkIndex, IndexedChunk, RetrievedChunk};
use taskrag_core::session::{SessionId, TurnState};
use taskrag_core::task::{TaskQuery, TaskStore};
use taskrag_gateway::AppState;
use taskrag_memory::{Chunker, HashingEmbedder, InMemoryTaskStore};
use taskrag_tools::{RetrievalGateway, ToolTimeouts, default_registry};
use tokio::sync::Notify;

// ── Scripted generation ──────────────────────────────────────────────────

enum Script {
    Text(Vec<String>),
    Tools(Vec<ToolIntent>),
    /// Wait for the gate before answering with the inner script.
    Gated(Arc<Notify>, Box<Script>),
    Hang,
}

fn text(fragments: &[&str]) -> Script {
    Script::Text(fragments.iter().map(|s| s.to_string()).collect())
}

fn tool(name: &str, arguments: serde_json::Value) -> Script {
    Script::Tools(vec![ToolIntent {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments,
    }])
}

/// A mock provider that plays back scripted generations in sequence.
struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<usize>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<Generation, GenerationError> {
        *self.calls.lock().unwrap() += 1;
        let mut script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider exhausted");

        loop {
            match script {
                Script::Text(fragments) => {
                    let items: Vec<Result<String, GenerationError>> =
                        fragments.into_iter().map(Ok).collect();
                    return Ok(Generation::Text(Box::pin(futures::stream::iter(items))));
                }
                Script::Tools(intents) => return Ok(Generation::ToolCalls(intents)),
                Script::Gated(gate, inner) => {
                    gate.notified().await;
                    script = *inner;
                }
                Script::Hang => return std::future::pending().await,
            }
        }
    }
}

/// An index whose backend is unreachable.
struct OfflineIndex;

#[async_trait]
impl ChunkIndex for OfflineIndex {
    async fn search(&self, _embedding: &[f32], _k: usize) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        Err(RetrievalError::IndexUnavailable("connection refused".into()))
    }

    async fn add(&self, _chunks: Vec<IndexedChunk>) -> Result<usize, RetrievalError> {
        Err(RetrievalError::IndexUnavailable("connection refused".into()))
    }

    async fn len(&self) -> Result<usize, RetrievalError> {
        Err(RetrievalError::IndexUnavailable("connection refused".into()))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.tool_retry_backoff_ms = 5;
    config
}

fn runtime(provider: Arc<ScriptedProvider>) -> AppState {
    AppState::with_backends(test_config(), provider, Arc::new(HashingEmbedder::default()))
        .expect("runtime assembles")
}

/// Every event of a turn, up to and including its terminal event.
async fn drain(mut events: EventReceiver) -> Vec<StreamEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    seen
}

fn answer_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn assert_single_terminal(events: &[StreamEvent]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {events:?}");
    assert!(events.last().unwrap().is_terminal());
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_create_task_then_confirm() {
    let provider = ScriptedProvider::new(vec![
        tool("task_create", serde_json::json!({"title": "review the report"})),
        text(&["Done! I added ", "\"review the report\" ", "to your tasks."]),
    ]);
    let state = runtime(provider.clone());
    let session = SessionId::from("e2e-create");

    let handle = state
        .sessions
        .start_turn(session.clone(), "create a task to review the report")
        .unwrap();
    let events = drain(handle.events).await;

    assert!(matches!(&events[0], StreamEvent::ToolInvoked { name, .. } if name == "task_create"));
    assert!(matches!(&events[1], StreamEvent::ToolResult { name, ok: true, .. } if name == "task_create"));
    assert_eq!(
        answer_text(&events),
        "Done! I added \"review the report\" to your tasks."
    );
    assert_eq!(events.last(), Some(&StreamEvent::TurnComplete));
    assert_single_terminal(&events);
    assert_eq!(provider.calls(), 2);

    let tasks = state.tasks.search(TaskQuery::default()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "review the report");

    let history = state.sessions.history(&session).unwrap();
    let roles: Vec<Role> = history.iter().map(|t| t.role()).collect();
    assert_eq!(roles, vec![Role::User, Role::Tool, Role::Assistant]);
    assert_eq!(history[1].tool_calls().len(), 1);
    assert!(history[1].tool_calls()[0].outcome.is_ok());

    let status = state.sessions.get_status(&session).unwrap();
    assert_eq!(status.state, TurnState::Done);
    assert!(!status.busy);
}

#[tokio::test]
async fn e2e_unreachable_index_is_an_observation() {
    let provider = ScriptedProvider::new(vec![
        tool("document_search", serde_json::json!({"query": "quarterly goals"})),
        text(&["I couldn't reach your documents right now, sorry."]),
    ]);

    let config = test_config();
    let tasks: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let retrieval = Arc::new(RetrievalGateway::new(
        Arc::new(HashingEmbedder::default()),
        Arc::new(OfflineIndex),
        Chunker::new(config.retrieval.chunk_size, config.retrieval.chunk_overlap),
        config.retrieval.top_k,
    ));
    let tools = Arc::new(default_registry(tasks, retrieval, ToolTimeouts::default()).unwrap());
    let planner = TurnPlanner::from_config(provider.clone(), tools.clone(), &config);
    let engine = OrchestrationEngine::new(planner, tools)
        .with_settings(EngineSettings::from(&config.engine));
    let sessions = SessionManager::new(Arc::new(engine));

    let handle = sessions
        .start_turn(SessionId::from("e2e-offline"), "what are my quarterly goals?")
        .unwrap();
    let events = drain(handle.events).await;

    let failed = events.iter().find_map(|e| match e {
        StreamEvent::ToolResult {
            ok: false,
            error_kind,
            ..
        } => error_kind.clone(),
        _ => None,
    });
    assert_eq!(failed.as_deref(), Some("RetrievalError"));
    assert!(answer_text(&events).contains("couldn't reach"));
    assert_eq!(events.last(), Some(&StreamEvent::TurnComplete));
    assert_single_terminal(&events);
}

#[tokio::test]
async fn e2e_ingested_documents_are_searchable_in_a_turn() {
    let provider = ScriptedProvider::new(vec![
        tool("document_search", serde_json::json!({"query": "launch date", "k": 2})),
        text(&["The launch is planned for March."]),
    ]);
    let state = runtime(provider);
    state
        .retrieval
        .ingest("roadmap", "The product launch date is planned for March next year.")
        .await
        .unwrap();

    let handle = state
        .sessions
        .start_turn(SessionId::from("e2e-docs"), "when is the launch?")
        .unwrap();
    let events = drain(handle.events).await;

    let payload = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ToolResult {
                ok: true, payload, ..
            } => payload.clone(),
            _ => None,
        })
        .expect("successful document_search");
    assert_eq!(payload["count"], 1);
    assert_eq!(payload["results"][0]["document_id"], "roadmap");
    assert_eq!(events.last(), Some(&StreamEvent::TurnComplete));
}

#[tokio::test]
async fn e2e_concurrent_start_on_one_session_is_rejected() {
    let gate = Arc::new(Notify::new());
    let provider = ScriptedProvider::new(vec![Script::Gated(
        gate.clone(),
        Box::new(text(&["first"])),
    )]);
    let state = runtime(provider);
    let session = SessionId::from("e2e-busy");

    let first = state.sessions.start_turn(session.clone(), "one");
    let second = state.sessions.start_turn(session.clone(), "two");

    let handle = first.expect("first turn accepted");
    assert!(matches!(second, Err(SessionError::Busy(_))));

    gate.notify_one();
    let events = drain(handle.events).await;
    assert_eq!(answer_text(&events), "first");

    // The second message was rejected, not queued.
    let history = state.sessions.history(&session).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content(), "one");
}

#[tokio::test]
async fn e2e_tool_loop_is_bounded() {
    let scripts = (0..5)
        .map(|_| tool("task_stats", serde_json::json!({})))
        .collect();
    let provider = ScriptedProvider::new(scripts);
    let state = runtime(provider.clone());
    let session = SessionId::from("e2e-loop");

    let handle = state.sessions.start_turn(session.clone(), "stats?").unwrap();
    let events = drain(handle.events).await;

    let invoked = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::ToolInvoked { .. }))
        .count();
    assert_eq!(invoked, 4);
    assert!(matches!(events.last(), Some(StreamEvent::Error { kind, .. }) if kind == "PlanningLoopExceeded"));
    assert_single_terminal(&events);
    assert_eq!(provider.calls(), 5);
    assert_eq!(
        state.sessions.get_status(&session).unwrap().state,
        TurnState::Error
    );
}

#[tokio::test]
async fn e2e_cancel_before_generation_emits_no_tokens() {
    let provider = ScriptedProvider::new(vec![
        tool("task_stats", serde_json::json!({})),
        Script::Hang,
    ]);
    let state = runtime(provider);
    let session = SessionId::from("e2e-cancel");

    let mut handle = state.sessions.start_turn(session.clone(), "stats?").unwrap();
    let mut events = Vec::new();
    while let Some(event) = handle.events.recv().await {
        let tool_done = matches!(event, StreamEvent::ToolResult { .. });
        events.push(event);
        if tool_done {
            break;
        }
    }

    assert!(state.sessions.cancel(&session));
    events.extend(drain(handle.events).await);

    assert!(events.iter().all(|e| !e.is_token()));
    assert_eq!(events.last(), Some(&StreamEvent::Cancelled));
    assert_single_terminal(&events);

    let status = state.sessions.get_status(&session).unwrap();
    assert_eq!(status.state, TurnState::Cancelled);
    assert!(!status.busy);
    // A cancel after the turn ended is a no-op.
    assert!(!state.sessions.cancel(&session));
}

#[tokio::test]
async fn e2e_every_subscriber_sees_the_full_sequence() {
    let gate = Arc::new(Notify::new());
    let provider = ScriptedProvider::new(vec![
        Script::Gated(
            gate.clone(),
            Box::new(tool("task_create", serde_json::json!({"title": "water plants"}))),
        ),
        text(&["Added."]),
    ]);
    let state = runtime(provider);
    let session = SessionId::from("e2e-fanout");
    let broadcaster = StreamBroadcaster::new(state.sessions.clone());

    let handle = state.sessions.start_turn(session.clone(), "add water plants").unwrap();
    let mut watcher = broadcaster.subscribe(&session, Pacing::Immediate).unwrap();
    gate.notify_one();

    let primary = drain(handle.events).await;
    let mut observed = Vec::new();
    while let Some(event) = watcher.next().await {
        let done = event.is_terminal();
        observed.push(event);
        if done {
            break;
        }
    }

    assert_eq!(primary, observed);
    assert_eq!(primary.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn e2e_coalesced_subscriber_gets_one_flush() {
    let provider = ScriptedProvider::new(vec![text(&["Here ", "is ", "your ", "answer."])]);
    let state = runtime(provider);

    let handle = state
        .sessions
        .start_turn(SessionId::from("e2e-coalesce"), "hi")
        .unwrap();
    let mut paced = StreamBroadcaster::attach(handle.events, Pacing::Coalesced(Duration::from_millis(500)));

    let mut events = Vec::new();
    while let Some(event) = paced.next().await {
        events.push(event);
    }

    assert_eq!(
        events,
        vec![StreamEvent::token("Here is your answer."), StreamEvent::TurnComplete]
    );
}

#[tokio::test]
async fn e2e_follow_up_turn_sees_earlier_history() {
    let provider = ScriptedProvider::new(vec![text(&["Hi Sam."]), text(&["Your name is Sam."])]);
    let state = runtime(provider);
    let session = SessionId::from("e2e-followup");

    let first = state.sessions.start_turn(session.clone(), "I'm Sam").unwrap();
    drain(first.events).await;
    let second = state.sessions.start_turn(session.clone(), "what's my name?").unwrap();
    let events = drain(second.events).await;

    assert_eq!(answer_text(&events), "Your name is Sam.");
    let status = state.sessions.get_status(&session).unwrap();
    assert_eq!(status.turn_count, 2);
    assert_eq!(state.sessions.history(&session).unwrap().len(), 4);
}

#[tokio::test]
async fn e2e_idle_sessions_are_evicted() {
    let provider = ScriptedProvider::new(vec![text(&["ok"])]);
    let state = runtime(provider);
    let session = SessionId::from("e2e-idle");

    let handle = state.sessions.start_turn(session.clone(), "ping").unwrap();
    drain(handle.events).await;

    let ttl = Duration::from_secs(1800);
    let soon = chrono::Utc::now() + chrono::Duration::seconds(60);
    assert_eq!(state.sessions.evict_idle(soon, ttl), 0);

    let later = chrono::Utc::now() + chrono::Duration::seconds(3600);
    assert_eq!(state.sessions.evict_idle(later, ttl), 1);
    assert!(matches!(
        state.sessions.get_status(&session),
        Err(SessionError::NotFound(_))
    ));
}
