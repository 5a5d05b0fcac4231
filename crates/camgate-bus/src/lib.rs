//! Topic-based message bus transport for the camera gateway.
//!
//! The gateway talks to the rest of the plant over three [`Topic`] lanes:
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Command`] | Inbound camera commands (`connect`, `start_record`, ...) |
//! | [`Topic::Status`]  | Outbound device status snapshots, published every second |
//! | [`Topic::Liveness`] | Bidirectional heartbeat counter exchange |
//!
//! [`BusTransport`] abstracts the broker so the supervisor can be driven
//! against the in-process [`BrokerBus`] in tests and against a real broker
//! adapter in production.  Payloads cross the trait as [`serde_json::Value`];
//! the typed envelopes live in `camgate-types`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use camgate_types::GatewayError;
use tokio::sync::broadcast;
use tracing::warn;

/// Per-topic channel capacity before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;

/// The three routing lanes between the gateway and the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Camera commands addressed to this gateway.
    Command,
    /// Device status snapshots published by this gateway.
    Status,
    /// Heartbeat counter exchange with the supervisor plane.
    Liveness,
}

impl Topic {
    /// Wire-level topic string used by broker adapters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Command => "camgate/cmd",
            Topic::Status => "camgate/status",
            Topic::Liveness => "camgate/liveness",
        }
    }
}

/// Connection-oriented transport to the message broker.
///
/// Implementations must be cheap to share behind an [`Arc`] and must never
/// block: `connect` either completes immediately or returns an error the
/// caller retries later, and `publish` fails fast while disconnected.
pub trait BusTransport: Send + Sync {
    /// Attempt to (re)establish the broker session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Bus`] when the broker is unreachable.  The
    /// transport stays disconnected and the call may be retried.
    fn connect(&self) -> Result<(), GatewayError>;

    /// Whether a broker session is currently live.
    fn is_connected(&self) -> bool;

    /// Publish `payload` to `topic`.
    ///
    /// Delivering to zero subscribers is a normal condition, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Bus`] when the transport is disconnected.
    fn publish(&self, topic: Topic, payload: serde_json::Value) -> Result<(), GatewayError>;

    /// Subscribe to `topic`.  Each receiver sees every message published to
    /// the topic after the subscription was created.
    fn subscribe(&self, topic: Topic) -> BusReceiver;

    /// Drop the broker session.  Existing receivers keep draining buffered
    /// messages but see nothing new.
    fn teardown(&self);
}

// ────────────────────────────────────────────────────────────────────────────
// Receiver
// ────────────────────────────────────────────────────────────────────────────

/// A subscription handle bound to a single [`Topic`].
///
/// Obtained via [`BusTransport::subscribe`].
pub struct BusReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<serde_json::Value>,
}

impl BusReceiver {
    /// Non-blocking poll for the next buffered message.
    ///
    /// Returns `None` when the buffer is empty or the channel has closed.
    /// A lagged receiver logs the number of dropped messages and keeps
    /// going from the oldest message still buffered.
    pub fn try_next(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.receiver.try_recv() {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = self.topic.as_str(), lagged_by = n, "bus receiver lagged");
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next message on this topic.
    ///
    /// Returns `None` when the channel has closed.
    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = self.topic.as_str(), lagged_by = n, "bus receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-process broker
// ────────────────────────────────────────────────────────────────────────────

/// In-process broker backed by [`tokio::sync::broadcast`] channels.
///
/// Clone it cheaply; all clones share the same channels and session state.
/// `with_failing_connects` scripts a number of initial connection failures
/// so reconnect behaviour can be exercised without a real broker.
#[derive(Clone)]
pub struct BrokerBus {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    command: broadcast::Sender<serde_json::Value>,
    status: broadcast::Sender<serde_json::Value>,
    liveness: broadcast::Sender<serde_json::Value>,
    connected: AtomicBool,
    failing_connects: AtomicU32,
}

impl BrokerBus {
    /// Create a disconnected broker with the given per-topic capacity.
    pub fn new(capacity: usize) -> Self {
        let (command, _) = broadcast::channel(capacity);
        let (status, _) = broadcast::channel(capacity);
        let (liveness, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BrokerInner {
                command,
                status,
                liveness,
                connected: AtomicBool::new(false),
                failing_connects: AtomicU32::new(0),
            }),
        }
    }

    /// Make the next `count` calls to [`BusTransport::connect`] fail.
    pub fn with_failing_connects(self, count: u32) -> Self {
        self.inner.failing_connects.store(count, Ordering::SeqCst);
        self
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<serde_json::Value> {
        match topic {
            Topic::Command => &self.inner.command,
            Topic::Status => &self.inner.status,
            Topic::Liveness => &self.inner.liveness,
        }
    }
}

impl Default for BrokerBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BusTransport for BrokerBus {
    fn connect(&self) -> Result<(), GatewayError> {
        let remaining = self.inner.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inner.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::Bus("broker unreachable".to_string()));
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: Topic, payload: serde_json::Value) -> Result<(), GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::Bus(format!(
                "publish to {} while disconnected",
                topic.as_str()
            )));
        }
        // No subscribers on the topic is fine; the message just evaporates.
        let _ = self.topic_sender(topic).send(payload);
        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> BusReceiver {
        BusReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn teardown(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }
}
