//! Intent queue feeding a [`crate::CameraDevice`].
//!
//! Commands arrive on the bus thread and are applied inside the device tick,
//! so they cross threads through an unbounded channel.  Intents are small and
//! rare enough that backpressure is not a concern here.

use camgate_types::CameraIntent;
use tokio::sync::mpsc;
use tracing::warn;

/// Sending half, held by the supervisor's command dispatcher.
#[derive(Clone)]
pub struct IntentSender {
    tx: mpsc::UnboundedSender<CameraIntent>,
}

impl IntentSender {
    /// Queue an intent for the device's next tick.  A send after the device
    /// shut down is logged and dropped.
    pub fn send(&self, intent: CameraIntent) {
        if self.tx.send(intent).is_err() {
            warn!(?intent, "intent dropped: camera device is gone");
        }
    }
}

/// Receiving half, drained inside the device tick.
pub struct IntentQueue {
    rx: mpsc::UnboundedReceiver<CameraIntent>,
}

impl IntentQueue {
    /// Pop the next pending intent without waiting.
    pub(crate) fn try_next(&mut self) -> Option<CameraIntent> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected sender/queue pair.
pub(crate) fn intent_channel() -> (IntentSender, IntentQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IntentSender { tx }, IntentQueue { rx })
}
