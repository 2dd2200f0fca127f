//! ## relay-telemetry::metrics
//! **Prometheus counters for routing and supervision**

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RelayMetrics {
    pub registry: Registry,
    /// Messages written to a destination, labelled by destination role.
    pub forwarded_messages: IntCounterVec,
    /// Payload bytes written to a destination, labelled by destination role.
    pub forwarded_bytes: IntCounterVec,
    /// Destination writes that failed, labelled by destination role.
    pub write_failures: IntCounterVec,
    /// Position reports echoed to the diagnostic sink, labelled by source role.
    pub position_reports: IntCounterVec,
    /// Ready inputs that yielded zero bytes or a read error.
    pub empty_reads: IntCounter,
    /// Supervision signals handled, labelled by kind.
    pub signals: IntCounterVec,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let forwarded_messages = IntCounterVec::new(
            Opts::new("relay_forwarded_messages_total", "Messages forwarded to a peer"),
            &["route"],
        )
        .expect("valid metric definition");
        let forwarded_bytes = IntCounterVec::new(
            Opts::new("relay_forwarded_bytes_total", "Bytes forwarded to a peer"),
            &["route"],
        )
        .expect("valid metric definition");
        let write_failures = IntCounterVec::new(
            Opts::new("relay_write_failures_total", "Failed writes to a peer"),
            &["route"],
        )
        .expect("valid metric definition");
        let position_reports = IntCounterVec::new(
            Opts::new(
                "relay_position_reports_total",
                "Position reports written to the diagnostic sink",
            ),
            &["source"],
        )
        .expect("valid metric definition");
        let empty_reads = IntCounter::new(
            "relay_empty_reads_total",
            "Ready inputs that produced no bytes",
        )
        .expect("valid metric definition");
        let signals = IntCounterVec::new(
            Opts::new("relay_signals_total", "Supervision signals handled"),
            &["kind"],
        )
        .expect("valid metric definition");

        for collector in [
            Box::new(forwarded_messages.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(forwarded_bytes.clone()),
            Box::new(write_failures.clone()),
            Box::new(position_reports.clone()),
            Box::new(empty_reads.clone()),
            Box::new(signals.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric registered once per registry");
        }

        Self {
            registry,
            forwarded_messages,
            forwarded_bytes,
            write_failures,
            position_reports,
            empty_reads,
            signals,
        }
    }

    pub fn record_forward(&self, route: &str, bytes: usize) {
        self.forwarded_messages.with_label_values(&[route]).inc();
        self.forwarded_bytes
            .with_label_values(&[route])
            .inc_by(bytes as u64);
    }

    pub fn record_write_failure(&self, route: &str) {
        self.write_failures.with_label_values(&[route]).inc();
    }

    pub fn record_position_report(&self, source: &str) {
        self.position_reports.with_label_values(&[source]).inc();
    }

    pub fn record_empty_read(&self) {
        self.empty_reads.inc();
    }

    pub fn record_signal(&self, kind: &str) {
        self.signals.with_label_values(&[kind]).inc();
    }

    pub fn forwarded(&self, route: &str) -> u64 {
        self.forwarded_messages.with_label_values(&[route]).get()
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Emits the text exposition at `debug`, one event per run.
    pub fn log_summary(&self) {
        match self.gather_metrics() {
            Ok(text) => debug!("Relay metrics:\n{text}"),
            Err(e) => debug!("Failed to gather relay metrics: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn forwards_are_counted_per_route() {
        let metrics = RelayMetrics::new();
        metrics.record_forward("drone_map", 6);
        metrics.record_forward("drone_map", 6);
        metrics.record_forward("drone_key", 1);
        assert_eq!(metrics.forwarded("drone_map"), 2);
        assert_eq!(metrics.forwarded("drone_key"), 1);
        assert_eq!(metrics.forwarded("target_map"), 0);

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("relay_forwarded_bytes_total{route=\"drone_map\"} 12"));
    }

    #[traced_test]
    #[test]
    fn summary_is_logged() {
        let metrics = RelayMetrics::new();
        metrics.record_signal("registration");
        metrics.log_summary();
        // Only the first line of the multi-line event carries the span prefix.
        assert!(logs_contain("Relay metrics:"));
        assert!(metrics
            .gather_metrics()
            .unwrap()
            .contains("relay_signals_total{kind=\"registration\"} 1"));
    }
}
