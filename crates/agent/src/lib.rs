//! The conversational core of TaskRAG.
//!
//! A user message becomes a **turn** that cycles through
//! **Plan → (Act → Observe)* → Respond**:
//!
//! 1. [`SessionManager::start_turn`] appends the message to the session's
//!    history and spawns the turn, refusing if one is already running
//! 2. [`TurnPlanner`] asks the generation capability for either tool
//!    intents or a streamed answer
//! 3. [`OrchestrationEngine`] runs tool intents through the registry, feeds
//!    the observations back, and loops up to a fixed bound
//! 4. Every step is published as a [`StreamEvent`](taskrag_core::StreamEvent);
//!    [`StreamBroadcaster`] paces delivery for each consumer
//!
//! Each turn ends with exactly one of `turn_complete`, `error`, or
//! `cancelled`.

pub mod broadcast;
pub mod engine;
pub mod fanout;
pub mod planner;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use broadcast::{Pacing, StreamBroadcaster, Subscription};
pub use engine::{EngineSettings, OrchestrationEngine, TurnObserver, TurnOutcome};
pub use fanout::{EventFanout, EventReceiver};
pub use planner::{DEFAULT_SYSTEM_PROMPT, Plan, TurnPlanner};
pub use session::{SessionManager, TurnHandle};
