//! ## vindkanal-telemetry::metrics
//! **Prometheus counters fed from the blink side-channel**

use prometheus::{Counter, Registry};

use crate::blink::BlinkEvent;

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub packets_lr: Counter,
    pub packets_rl: Counter,
    pub bytes_lr: Counter,
    pub bytes_rl: Counter,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let packets_lr = Counter::new(
            "vindkanal_packets_lr_total",
            "Packets transmitted left-to-right",
        )
        .unwrap();
        let packets_rl = Counter::new(
            "vindkanal_packets_rl_total",
            "Packets transmitted right-to-left",
        )
        .unwrap();
        let bytes_lr = Counter::new(
            "vindkanal_bytes_lr_total",
            "Bytes transmitted left-to-right",
        )
        .unwrap();
        let bytes_rl = Counter::new(
            "vindkanal_bytes_rl_total",
            "Bytes transmitted right-to-left",
        )
        .unwrap();

        for counter in [&packets_lr, &packets_rl, &bytes_lr, &bytes_rl] {
            registry.register(Box::new(counter.clone())).unwrap();
        }

        Self {
            registry,
            packets_lr,
            packets_rl,
            bytes_lr,
            bytes_rl,
        }
    }

    /// Records one transmitted packet.
    pub fn record(&self, event: &BlinkEvent) {
        if event.direction == 0 {
            self.packets_lr.inc();
            self.bytes_lr.inc_by(event.length as f64);
        } else {
            self.packets_rl.inc();
            self.bytes_rl.inc_by(event.length as f64);
        }
    }

    pub fn gather(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}
