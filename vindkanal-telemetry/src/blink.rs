//! ## vindkanal-telemetry::blink
//! **Fire-and-forget per-packet notifications**
//!
//! For every transmitted packet the link worker emits `(direction, length)`.
//! The channel is bounded and lossy: telemetry must never stall or
//! backpressure the packet path, so overflow just drops the blink.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use tracing::trace;

/// One transmitted-packet notification.
///
/// `direction` is the per-link direction index (0 = left-to-right,
/// 1 = right-to-left); the core's `Direction::index()` produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkEvent {
    pub direction: usize,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub struct BlinkSender {
    tx: Sender<BlinkEvent>,
}

pub type BlinkReceiver = Receiver<BlinkEvent>;

impl BlinkSender {
    /// Never blocks; a full channel drops the event.
    pub fn notify(&self, direction: usize, length: usize) {
        match self.tx.try_send(BlinkEvent { direction, length }) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                trace!("blink channel full, notification dropped");
            }
        }
    }
}

/// Creates a bounded blink channel pair.
pub fn blink_channel(capacity: usize) -> (BlinkSender, BlinkReceiver) {
    let (tx, rx) = bounded(capacity);
    (BlinkSender { tx }, rx)
}
