//! Stream broadcaster — delivers a session's events to a consumer at the
//! pace that consumer can handle.
//!
//! `Pacing::Immediate` forwards every event as it arrives. Rate-limited
//! transports (a chat app that edits one message in place) use
//! `Pacing::Coalesced`: tokens are buffered and released as one
//! concatenated `token` event when the interval since the first buffered
//! token runs out, or right away when any non-token event arrives. No event
//! is ever dropped.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use taskrag_core::error::SessionError;
use taskrag_core::event::StreamEvent;
use taskrag_core::session::SessionId;
use tokio::time::Instant;

use crate::fanout::EventReceiver;
use crate::session::SessionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    Immediate,
    Coalesced(Duration),
}

pub struct StreamBroadcaster {
    sessions: Arc<SessionManager>,
}

impl StreamBroadcaster {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Follow every future event of an existing session.
    pub fn subscribe(
        &self,
        session_id: &SessionId,
        pacing: Pacing,
    ) -> Result<Subscription, SessionError> {
        let receiver = self.sessions.subscribe(session_id)?;
        Ok(Self::attach(receiver, pacing))
    }

    /// Pace an existing receiver, typically `TurnHandle::events`.
    pub fn attach(receiver: EventReceiver, pacing: Pacing) -> Subscription {
        Subscription {
            receiver,
            pacing,
            buffer: String::new(),
            flush_at: None,
            held: None,
            closed: false,
        }
    }
}

/// One consumer's paced view of a session's events.
pub struct Subscription {
    receiver: EventReceiver,
    pacing: Pacing,
    buffer: String,
    flush_at: Option<Instant>,
    /// A non-token event waiting behind a forced flush.
    held: Option<StreamEvent>,
    closed: bool,
}

impl Subscription {
    /// Next event, or `None` once the source is closed and drained.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        match self.pacing {
            Pacing::Immediate => self.receiver.recv().await,
            Pacing::Coalesced(interval) => self.next_coalesced(interval).await,
        }
    }

    async fn next_coalesced(&mut self, interval: Duration) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.held.take() {
                return Some(event);
            }
            if self.closed {
                return self.flush();
            }

            let received = match self.flush_at {
                Some(deadline) => tokio::select! {
                    biased;
                    event = self.receiver.recv() => Some(event),
                    _ = tokio::time::sleep_until(deadline) => None,
                },
                None => Some(self.receiver.recv().await),
            };

            match received {
                // Interval elapsed with tokens pending.
                None => return self.flush(),
                Some(None) => self.closed = true,
                Some(Some(StreamEvent::Token { text })) => {
                    if self.buffer.is_empty() {
                        self.flush_at = Some(Instant::now() + interval);
                    }
                    self.buffer.push_str(&text);
                }
                Some(Some(event)) => {
                    if self.buffer.is_empty() {
                        return Some(event);
                    }
                    self.held = Some(event);
                    return self.flush();
                }
            }
        }
    }

    fn flush(&mut self) -> Option<StreamEvent> {
        self.flush_at = None;
        if self.buffer.is_empty() {
            return None;
        }
        Some(StreamEvent::token(std::mem::take(&mut self.buffer)))
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn coalesced(ms: u64) -> (mpsc::UnboundedSender<StreamEvent>, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            StreamBroadcaster::attach(rx, Pacing::Coalesced(Duration::from_millis(ms))),
        )
    }

    #[tokio::test]
    async fn immediate_forwards_everything() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = StreamBroadcaster::attach(rx, Pacing::Immediate);
        tx.send(StreamEvent::token("a")).unwrap();
        tx.send(StreamEvent::token("b")).unwrap();
        tx.send(StreamEvent::TurnComplete).unwrap();
        drop(tx);

        assert_eq!(sub.next().await, Some(StreamEvent::token("a")));
        assert_eq!(sub.next().await, Some(StreamEvent::token("b")));
        assert_eq!(sub.next().await, Some(StreamEvent::TurnComplete));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_interval_flushes_once() {
        let (tx, mut sub) = coalesced(500);
        let producer = tokio::spawn(async move {
            for word in ["The ", "quick ", "brown ", "fox"] {
                tx.send(StreamEvent::token(word)).unwrap();
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            tokio::time::sleep(Duration::from_millis(1000)).await;
            tx.send(StreamEvent::TurnComplete).unwrap();
        });

        let start = Instant::now();
        assert_eq!(sub.next().await, Some(StreamEvent::token("The quick brown fox")));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(500) && waited < Duration::from_millis(600));
        assert_eq!(sub.next().await, Some(StreamEvent::TurnComplete));
        assert_eq!(sub.next().await, None);
        producer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn non_token_event_forces_flush_first() {
        let (tx, mut sub) = coalesced(500);
        tx.send(StreamEvent::token("partial ")).unwrap();
        tx.send(StreamEvent::token("answer")).unwrap();
        tx.send(StreamEvent::Cancelled).unwrap();

        let start = Instant::now();
        assert_eq!(sub.next().await, Some(StreamEvent::token("partial answer")));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(sub.next().await, Some(StreamEvent::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_are_spaced_by_interval() {
        let (tx, sub) = coalesced(500);
        tokio::spawn(async move {
            for i in 0..10 {
                tx.send(StreamEvent::token(format!("{i} "))).unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            tokio::time::sleep(Duration::from_millis(2000)).await;
            tx.send(StreamEvent::TurnComplete).unwrap();
        });

        let start = Instant::now();
        let mut stream = Box::pin(sub.into_stream());
        let mut flush_times = Vec::new();
        let mut text = String::new();
        while let Some(event) = futures::StreamExt::next(&mut stream).await {
            match event {
                StreamEvent::Token { text: chunk } => {
                    flush_times.push(start.elapsed());
                    text.push_str(&chunk);
                }
                other => assert_eq!(other, StreamEvent::TurnComplete),
            }
        }

        let expected: String = (0..10).map(|i| format!("{i} ")).collect();
        assert_eq!(text, expected);
        for pair in flush_times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
        assert!(flush_times.len() <= 3);
    }

    #[tokio::test]
    async fn closed_source_flushes_remainder() {
        let (tx, mut sub) = coalesced(10_000);
        tx.send(StreamEvent::token("tail")).unwrap();
        drop(tx);
        assert_eq!(sub.next().await, Some(StreamEvent::token("tail")));
        assert_eq!(sub.next().await, None);
    }
}
