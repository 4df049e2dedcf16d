//! # Vindkanal Telemetry
//!
//! Logging, metrics, and the per-packet "blink" side-channel.

pub mod blink;
pub mod logging;
pub mod metrics;

pub use blink::{blink_channel, BlinkEvent, BlinkReceiver, BlinkSender};
pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
