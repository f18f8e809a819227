//! Per-session event bus
//!
//! An append-only ordered log plus fan-out to any number of subscribers.
//! Events emitted before the first subscriber attaches are buffered and
//! replayed in order on attach; the backlog snapshot and the live queue
//! registration happen under one lock, so a subscriber attaching at time T
//! observes every event emitted at or before T exactly once.
//!
//! Subscriber queues are bounded. A consumer that falls behind is dropped
//! rather than blocking the session; its stream ends with a synthetic
//! `subscriber_lagged` envelope.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tabular_core::{AgentEvent, EventEnvelope, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct SessionBus {
    session_id: SessionId,
    capacity: usize,
    inner: Mutex<BusInner>,
}

struct BusInner {
    history: Vec<Arc<EventEnvelope>>,
    subscribers: Vec<BusSubscriber>,
    closed: bool,
}

struct BusSubscriber {
    tx: mpsc::Sender<Arc<EventEnvelope>>,
    lagged: Arc<AtomicBool>,
}

impl SessionBus {
    pub fn new(session_id: SessionId, capacity: usize) -> Self {
        Self {
            session_id,
            capacity: capacity.max(1),
            inner: Mutex::new(BusInner {
                history: Vec::new(),
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Append an event to the log and fan it out.
    ///
    /// Emission never blocks: a subscriber whose queue is full is dropped
    /// with its lag flag set. A terminal event closes the bus.
    pub fn emit(&self, event: AgentEvent) {
        let terminal = event.is_terminal();
        let envelope = Arc::new(EventEnvelope::stamp(&self.session_id, &event));

        let mut inner = self.inner.lock().expect("bus lock poisoned");
        if inner.closed {
            warn!(
                "session {}: dropping {} emitted after stream close",
                self.session_id,
                envelope.event_type
            );
            return;
        }

        inner.history.push(envelope.clone());

        inner.subscribers.retain(|sub| {
            match sub.tx.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.lagged.store(true, Ordering::SeqCst);
                    warn!("session {}: dropping lagged subscriber", self.session_id);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        if terminal {
            debug!(
                "session {}: stream closed by {}",
                self.session_id, envelope.event_type
            );
            inner.closed = true;
            // Dropping the senders ends every live subscription after the
            // terminal envelope is drained.
            inner.subscribers.clear();
        }
    }

    /// Attach a subscriber. The full history replays before live events;
    /// ordering is identical for every subscriber.
    pub fn subscribe(&self) -> Subscription {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        let backlog: VecDeque<Arc<EventEnvelope>> = inner.history.iter().cloned().collect();
        let lagged = Arc::new(AtomicBool::new(false));

        if inner.closed {
            return Subscription {
                session_id: self.session_id.clone(),
                backlog,
                rx: None,
                lagged,
            };
        }

        // Registration happens under the same lock as the snapshot, so no
        // event can fall between the backlog and the live queue.
        let (tx, rx) = mpsc::channel(self.capacity);
        inner.subscribers.push(BusSubscriber {
            tx,
            lagged: lagged.clone(),
        });

        Subscription {
            session_id: self.session_id.clone(),
            backlog,
            rx: Some(rx),
            lagged,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("bus lock poisoned").closed
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().expect("bus lock poisoned").history.len()
    }
}

/// A read-only view over one session's event stream.
#[derive(Debug)]
pub struct Subscription {
    session_id: SessionId,
    backlog: VecDeque<Arc<EventEnvelope>>,
    rx: Option<mpsc::Receiver<Arc<EventEnvelope>>>,
    lagged: Arc<AtomicBool>,
}

impl Subscription {
    /// Next envelope: backlog first, then live events. Returns `None` when
    /// the stream has closed (terminal event delivered or bus dropped).
    pub async fn next(&mut self) -> Option<Arc<EventEnvelope>> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }

        let rx = self.rx.as_mut()?;
        match rx.recv().await {
            Some(envelope) => Some(envelope),
            None => {
                self.rx = None;
                if self.lagged.swap(false, Ordering::SeqCst) {
                    return Some(Arc::new(EventEnvelope::subscriber_lagged(&self.session_id)));
                }
                None
            }
        }
    }
}
