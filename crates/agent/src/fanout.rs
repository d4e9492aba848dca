//! Per-session event fan-out.
//!
//! Every subscriber gets its own unbounded channel, so a slow consumer never
//! holds up the engine or another consumer. Nothing is replayed: a receiver
//! sees only events published after it subscribed.

use parking_lot::Mutex;
use taskrag_core::event::StreamEvent;
use tokio::sync::mpsc;
use tracing::trace;

pub type EventReceiver = mpsc::UnboundedReceiver<StreamEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Closed after the next terminal event.
    Turn,
    /// Lives until the receiver is dropped.
    Session,
}

struct Subscriber {
    tx: mpsc::UnboundedSender<StreamEvent>,
    scope: Scope,
}

#[derive(Default)]
pub struct EventFanout {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive the events of the next (or current) turn only.
    pub fn subscribe_turn(&self) -> EventReceiver {
        self.subscribe(Scope::Turn)
    }

    /// Receive every event of this session from now on.
    pub fn subscribe_session(&self) -> EventReceiver {
        self.subscribe(Scope::Session)
    }

    fn subscribe(&self, scope: Scope) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber { tx, scope });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn publish(&self, event: StreamEvent) {
        let mut subscribers = self.subscribers.lock();
        Self::deliver(&mut subscribers, event);
    }

    /// Run `release` and publish `event` without letting another publisher
    /// or subscriber in between.
    pub fn publish_after(&self, release: impl FnOnce(), event: StreamEvent) {
        let mut subscribers = self.subscribers.lock();
        release();
        Self::deliver(&mut subscribers, event);
    }

    fn deliver(subscribers: &mut Vec<Subscriber>, event: StreamEvent) {
        let terminal = event.is_terminal();
        subscribers.retain(|sub| {
            if sub.tx.send(event.clone()).is_err() {
                trace!("Dropping closed event subscriber");
                return false;
            }
            !(terminal && sub.scope == Scope::Turn)
        });
    }
}
