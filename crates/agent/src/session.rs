//! Session manager — owns every conversation and enforces one active turn
//! per session.
//!
//! Each session keeps its history behind an async mutex. Starting a turn
//! takes that lock without waiting; if it is already held the session is
//! busy. The lock travels into the spawned turn task and is released just
//! before the terminal event goes out, so a client that reacts to
//! `turn_complete` by sending the next message never sees a stale busy
//! session.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use taskrag_core::error::{SessionError, TurnError};
use taskrag_core::event::StreamEvent;
use taskrag_core::message::Turn;
use taskrag_core::session::{SessionId, SessionStatus, TurnState};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{OrchestrationEngine, TurnObserver, TurnOutcome};
use crate::fanout::{EventFanout, EventReceiver};

struct SessionSlot {
    id: SessionId,
    history: Arc<tokio::sync::Mutex<Vec<Turn>>>,
    busy: AtomicBool,
    state: Mutex<TurnState>,
    active_cancel: Mutex<Option<CancellationToken>>,
    turn_count: AtomicUsize,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    fanout: EventFanout,
}

impl SessionSlot {
    fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            history: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            busy: AtomicBool::new(false),
            state: Mutex::new(TurnState::Idle),
            active_cancel: Mutex::new(None),
            turn_count: AtomicUsize::new(0),
            created_at: now,
            last_activity: Mutex::new(now),
            fanout: EventFanout::new(),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            state: *self.state.lock(),
            turn_count: self.turn_count.load(Ordering::SeqCst),
            busy: self.busy.load(Ordering::SeqCst),
            created_at: self.created_at,
            last_activity: *self.last_activity.lock(),
        }
    }
}

impl TurnObserver for SessionSlot {
    fn emit(&self, event: StreamEvent) {
        self.touch();
        self.fanout.publish(event);
    }

    fn transition(&self, next: TurnState) {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            warn!(
                session_id = %self.id,
                from = state.as_str(),
                to = next.as_str(),
                "Unexpected turn state transition"
            );
        }
        debug!(session_id = %self.id, state = next.as_str(), "Turn state");
        *state = next;
        drop(state);
        self.touch();
    }
}

/// A started turn.
pub struct TurnHandle {
    pub session_id: SessionId,
    /// Every event of this turn, ending with its terminal event.
    pub events: EventReceiver,
    task: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    /// Wait for the turn to finish.
    pub async fn join(self) -> TurnOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Turn task ended abnormally");
                TurnOutcome::Failed(TurnError::Internal(e.to_string()))
            }
        }
    }

    /// Split into the event receiver and a join future for the outcome.
    pub fn into_parts(self) -> (EventReceiver, JoinHandle<TurnOutcome>) {
        (self.events, self.task)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "turn panicked".to_string()
    }
}

pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    engine: Arc<OrchestrationEngine>,
}

impl SessionManager {
    pub fn new(engine: Arc<OrchestrationEngine>) -> Self {
        Self {
            sessions: DashMap::new(),
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<OrchestrationEngine> {
        &self.engine
    }

    /// Append a user message and run a turn for it in the background.
    ///
    /// The session is created on first use. Fails with `Busy` while another
    /// turn of the same session is still running; the message is not queued.
    pub fn start_turn(
        &self,
        session_id: SessionId,
        message: impl Into<String>,
    ) -> Result<TurnHandle, SessionError> {
        // Take the history lock while the map entry is held, so the idle
        // sweeper cannot evict this slot between lookup and lock.
        let (slot, mut history) = {
            let entry = self
                .sessions
                .entry(session_id.clone())
                .or_insert_with(|| {
                    debug!(%session_id, "Creating session");
                    Arc::new(SessionSlot::new(session_id.clone()))
                });
            let slot = Arc::clone(entry.value());
            let history = slot
                .history
                .clone()
                .try_lock_owned()
                .map_err(|_| SessionError::Busy(session_id.to_string()))?;
            slot.busy.store(true, Ordering::SeqCst);
            (slot, history)
        };

        history.push(Turn::user(message));
        let turn_number = slot.turn_count.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        *slot.active_cancel.lock() = Some(cancel.clone());
        slot.touch();

        let events = slot.fanout.subscribe_turn();
        info!(%session_id, turn = turn_number, "Turn started");

        let engine = Arc::clone(&self.engine);
        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(engine.run_turn(&mut history, slot.as_ref(), &cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    error!(session_id = %slot.id, turn = turn_number, %message, "Turn panicked");
                    TurnOutcome::Failed(TurnError::Internal(message))
                });

            *slot.state.lock() = outcome.state();
            *slot.active_cancel.lock() = None;
            slot.touch();
            info!(
                session_id = %slot.id,
                turn = turn_number,
                state = outcome.state().as_str(),
                "Turn finished"
            );

            slot.fanout.publish_after(
                || {
                    slot.busy.store(false, Ordering::SeqCst);
                    drop(history);
                },
                outcome.terminal_event(),
            );
            outcome
        });

        Ok(TurnHandle {
            session_id,
            events,
            task,
        })
    }

    /// Request cancellation of the session's active turn.
    ///
    /// Returns `false` when the session is unknown or idle. Calling it again
    /// while the turn is winding down is harmless.
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        let Some(slot) = self.sessions.get(session_id) else {
            return false;
        };
        let token = slot.active_cancel.lock().clone();
        match token {
            Some(token) => {
                if !token.is_cancelled() {
                    info!(%session_id, "Cancellation requested");
                }
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn get_status(&self, session_id: &SessionId) -> Result<SessionStatus, SessionError> {
        self.sessions
            .get(session_id)
            .map(|slot| slot.status())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Subscribe to every future event of an existing session.
    pub fn subscribe(&self, session_id: &SessionId) -> Result<EventReceiver, SessionError> {
        self.sessions
            .get(session_id)
            .map(|slot| slot.fanout.subscribe_session())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Copy of the session's history. Fails with `Busy` during a turn.
    pub fn history(&self, session_id: &SessionId) -> Result<Vec<Turn>, SessionError> {
        let slot = self
            .sessions
            .get(session_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let history = slot
            .history
            .try_lock()
            .map_err(|_| SessionError::Busy(session_id.to_string()))?;
        Ok(history.clone())
    }

    /// Drop a session that has no active turn.
    pub fn close(&self, session_id: &SessionId) -> Result<(), SessionError> {
        let mut busy = false;
        let removed = self.sessions.remove_if(session_id, |_, slot| {
            busy = slot.history.try_lock().is_err();
            !busy
        });
        match removed {
            Some(_) => {
                info!(%session_id, "Session closed");
                Ok(())
            }
            None if busy => Err(SessionError::Busy(session_id.to_string())),
            None => Err(SessionError::NotFound(session_id.to_string())),
        }
    }

    /// Remove every session idle for longer than `ttl` as of `now`.
    ///
    /// Sessions with an active turn are never evicted. Returns how many
    /// sessions were removed.
    pub fn evict_idle(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let mut evicted = 0usize;

        self.sessions.retain(|id, slot| {
            if slot.busy.load(Ordering::SeqCst) || slot.history.try_lock().is_err() {
                return true;
            }
            let idle_for = now.signed_duration_since(*slot.last_activity.lock());
            if idle_for > ttl {
                debug!(session_id = %id, idle_secs = idle_for.num_seconds(), "Evicting idle session");
                evicted += 1;
                false
            } else {
                true
            }
        });

        if evicted > 0 {
            info!(evicted, remaining = self.sessions.len(), "Idle sessions evicted");
        }
        evicted
    }

    /// Periodically evict idle sessions until the manager is dropped.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, every: Duration, ttl: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    debug!("Session manager dropped, stopping idle sweeper");
                    break;
                };
                manager.evict_idle(Utc::now(), ttl);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::TurnPlanner;
    use crate::test_helpers::{
        PanickingTool, Script, ScriptedProvider, echo_registry, intent, registry_with,
    };
    use taskrag_core::tool::ToolRegistry;
    use tokio::sync::Notify;

    fn manager(scripts: Vec<Script>) -> Arc<SessionManager> {
        let tools = echo_registry();
        let planner = TurnPlanner::new(Arc::new(ScriptedProvider::new(scripts)), tools.clone(), "m");
        Arc::new(SessionManager::new(Arc::new(OrchestrationEngine::new(planner, tools))))
    }

    fn manager_with_tools(scripts: Vec<Script>, tools: Arc<ToolRegistry>) -> Arc<SessionManager> {
        let planner = TurnPlanner::new(Arc::new(ScriptedProvider::new(scripts)), tools.clone(), "m");
        Arc::new(SessionManager::new(Arc::new(OrchestrationEngine::new(planner, tools))))
    }

    async fn drain(events: &mut EventReceiver) -> Vec<StreamEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        seen
    }

    #[tokio::test]
    async fn turn_runs_to_completion() {
        let manager = manager(vec![Script::text(&["Hi ", "there"])]);
        let id = SessionId::from("s-1");

        let mut handle = manager.start_turn(id.clone(), "hello").unwrap();
        let events = drain(&mut handle.events).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::token("Hi "),
                StreamEvent::token("there"),
                StreamEvent::TurnComplete
            ]
        );
        let status = manager.get_status(&id).unwrap();
        assert_eq!(status.state, TurnState::Done);
        assert_eq!(status.turn_count, 1);
        assert!(!status.busy);

        let history = manager.history(&id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content(), "Hi there");
    }

    #[tokio::test]
    async fn second_turn_while_busy_is_rejected() {
        let gate = Arc::new(Notify::new());
        let manager = manager(vec![
            Script::Gated(gate.clone(), Box::new(Script::text(&["first"]))),
            Script::text(&["second"]),
        ]);
        let id = SessionId::from("s-busy");

        let mut first = manager.start_turn(id.clone(), "one").unwrap();
        let err = manager.start_turn(id.clone(), "two").err().unwrap();
        assert_eq!(err.kind(), "SessionBusyError");
        assert!(manager.get_status(&id).unwrap().busy);

        gate.notify_one();
        let events = drain(&mut first.events).await;
        assert_eq!(events.last(), Some(&StreamEvent::TurnComplete));

        // The lock is free as soon as the terminal event is out.
        let mut second = manager.start_turn(id.clone(), "two").unwrap();
        let events = drain(&mut second.events).await;
        assert_eq!(events[0], StreamEvent::token("second"));
        assert_eq!(manager.get_status(&id).unwrap().turn_count, 2);
    }

    #[tokio::test]
    async fn sessions_run_independently() {
        let gate = Arc::new(Notify::new());
        let manager = manager(vec![
            Script::Gated(gate.clone(), Box::new(Script::text(&["slow"]))),
            Script::text(&["fast"]),
        ]);

        let mut slow = manager.start_turn(SessionId::from("a"), "1").unwrap();
        let mut fast = manager.start_turn(SessionId::from("b"), "2").unwrap();

        let fast_events = drain(&mut fast.events).await;
        assert_eq!(fast_events[0], StreamEvent::token("fast"));

        gate.notify_one();
        let slow_events = drain(&mut slow.events).await;
        assert_eq!(slow_events[0], StreamEvent::token("slow"));
    }

    #[tokio::test]
    async fn cancel_unknown_or_idle_session_is_noop() {
        let manager = manager(vec![Script::text(&["ok"])]);
        assert!(!manager.cancel(&SessionId::from("nobody")));

        let id = SessionId::from("idle");
        let handle = manager.start_turn(id.clone(), "hi").unwrap();
        handle.join().await;
        assert!(!manager.cancel(&id));
    }

    #[tokio::test]
    async fn cancel_while_planning_emits_only_cancelled() {
        let manager = manager(vec![Script::Hang]);
        let id = SessionId::from("cancel-me");

        let mut handle = manager.start_turn(id.clone(), "hi").unwrap();
        tokio::task::yield_now().await;
        assert!(manager.cancel(&id));
        assert!(manager.cancel(&id));

        let events = drain(&mut handle.events).await;
        assert_eq!(events, vec![StreamEvent::Cancelled]);
        assert_eq!(manager.get_status(&id).unwrap().state, TurnState::Cancelled);
        assert_eq!(manager.history(&id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_of_unknown_session_is_not_found() {
        let manager = manager(vec![]);
        let err = manager.get_status(&SessionId::from("ghost")).unwrap_err();
        assert_eq!(err.kind(), "SessionNotFoundError");
    }

    #[tokio::test]
    async fn session_subscriber_follows_every_turn() {
        let manager = manager(vec![
            Script::Tools(vec![intent("echo", serde_json::json!({"text": "x"}))]),
            Script::text(&["done"]),
            Script::text(&["again"]),
        ]);
        let id = SessionId::from("watched");
        manager.start_turn(id.clone(), "first").unwrap().join().await;

        let mut watcher = manager.subscribe(&id).unwrap();
        manager.start_turn(id.clone(), "second").unwrap().join().await;

        assert_eq!(watcher.recv().await, Some(StreamEvent::token("again")));
        assert_eq!(watcher.recv().await, Some(StreamEvent::TurnComplete));
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_busy_ones_kept() {
        let gate = Arc::new(Notify::new());
        let manager = manager(vec![
            Script::text(&["quick"]),
            Script::Gated(gate.clone(), Box::new(Script::text(&["late"]))),
        ]);
        manager
            .start_turn(SessionId::from("idle"), "hi")
            .unwrap()
            .join()
            .await;
        let busy = manager.start_turn(SessionId::from("busy"), "hi").unwrap();

        let later = Utc::now() + chrono::Duration::hours(2);
        let evicted = manager.evict_idle(later, Duration::from_secs(1800));

        assert_eq!(evicted, 1);
        assert!(manager.get_status(&SessionId::from("idle")).is_err());
        assert!(manager.get_status(&SessionId::from("busy")).unwrap().busy);

        gate.notify_one();
        busy.join().await;
    }

    #[tokio::test]
    async fn recent_sessions_survive_sweep() {
        let manager = manager(vec![Script::text(&["ok"])]);
        manager
            .start_turn(SessionId::from("fresh"), "hi")
            .unwrap()
            .join()
            .await;
        assert_eq!(manager.evict_idle(Utc::now(), Duration::from_secs(1800)), 0);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn close_removes_idle_session() {
        let manager = manager(vec![Script::text(&["ok"])]);
        let id = SessionId::from("closing");
        manager.start_turn(id.clone(), "hi").unwrap().join().await;
        manager.close(&id).unwrap();
        assert!(manager.is_empty());
        assert_eq!(manager.close(&id).unwrap_err().kind(), "SessionNotFoundError");
    }

    #[tokio::test]
    async fn panicking_tool_still_ends_the_turn() {
        let manager = manager_with_tools(
            vec![
                Script::Tools(vec![intent("explode", serde_json::json!({}))]),
                Script::text(&["after"]),
            ],
            registry_with("explode", Arc::new(PanickingTool)),
        );
        let id = SessionId::from("panicky");

        let mut handle = manager.start_turn(id.clone(), "go").unwrap();
        let events = tokio::time::timeout(Duration::from_secs(5), drain(&mut handle.events))
            .await
            .expect("event stream should close");

        assert_eq!(events.first().map(|e| e.event_type()), Some("tool_invoked"));
        let terminals: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1);
        match terminals[0] {
            StreamEvent::Error { kind, message } => {
                assert_eq!(kind, "InternalError");
                assert!(message.contains("handler exploded"));
            }
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(matches!(
            handle.join().await,
            TurnOutcome::Failed(TurnError::Internal(_))
        ));

        let status = manager.get_status(&id).unwrap();
        assert!(!status.busy);
        assert_eq!(status.state, TurnState::Error);

        let later = Utc::now() + chrono::Duration::hours(5);
        assert_eq!(manager.evict_idle(later, Duration::from_secs(1800)), 1);
    }
}
