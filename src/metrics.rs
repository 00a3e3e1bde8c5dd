use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::session::DumpOutcome;

pub struct Metrics {
    registry: Registry,

    // Connection metrics
    pub connections_total: IntCounter,
    pub active_connections: IntGauge,
    pub connection_errors: IntCounter,
    pub connection_duration: Histogram,

    // Traffic metrics
    pub bytes_client_to_remote: IntCounter,
    pub bytes_remote_to_client: IntCounter,

    // Dump metrics
    pub dump_records_total: IntCounter,
    pub persistent_values_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let connections_total = IntCounter::new(
            "tcpdp_connections_total",
            "Total number of accepted client connections",
        )?;
        let active_connections = IntGauge::new(
            "tcpdp_active_connections",
            "Number of connections currently being relayed",
        )?;
        let connection_errors = IntCounter::new(
            "tcpdp_connection_errors_total",
            "Total number of connections that failed to relay",
        )?;
        let connection_duration = Histogram::with_opts(HistogramOpts::new(
            "tcpdp_connection_duration_seconds",
            "Connection lifetime in seconds",
        ))?;

        let bytes_client_to_remote = IntCounter::new(
            "tcpdp_bytes_client_to_remote_total",
            "Bytes forwarded from clients to the remote",
        )?;
        let bytes_remote_to_client = IntCounter::new(
            "tcpdp_bytes_remote_to_client_total",
            "Bytes forwarded from the remote to clients",
        )?;

        let dump_records_total =
            IntCounter::new("tcpdp_dump_records_total", "Total number of dump records written")?;
        let persistent_values_total = IntCounter::new(
            "tcpdp_persistent_values_total",
            "Total number of persistent values captured",
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;
        registry.register(Box::new(connection_errors.clone()))?;
        registry.register(Box::new(connection_duration.clone()))?;
        registry.register(Box::new(bytes_client_to_remote.clone()))?;
        registry.register(Box::new(bytes_remote_to_client.clone()))?;
        registry.register(Box::new(dump_records_total.clone()))?;
        registry.register(Box::new(persistent_values_total.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            active_connections,
            connection_errors,
            connection_duration,
            bytes_client_to_remote,
            bytes_remote_to_client,
            dump_records_total,
            persistent_values_total,
        })
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.inc();
    }

    pub fn record_bytes(&self, client_to_remote: bool, n: usize) {
        let n = n as u64;
        if client_to_remote {
            self.bytes_client_to_remote.inc_by(n);
        } else {
            self.bytes_remote_to_client.inc_by(n);
        }
    }

    pub fn record_dump(&self, outcome: DumpOutcome) {
        match outcome {
            DumpOutcome::Recorded(_) => self.dump_records_total.inc(),
            DumpOutcome::PersistentValues(n) => self.persistent_values_total.inc_by(n as u64),
            DumpOutcome::Skipped | DumpOutcome::Empty => {}
        }
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather_metrics(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Tracks one connection from accept to close.
pub struct ConnectionTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl ConnectionTimer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.connections_total.inc();
        metrics.active_connections.inc();
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self) {
        // accounting happens in Drop
    }

    pub fn fail(self) {
        self.metrics.record_connection_error();
    }
}

impl Drop for ConnectionTimer {
    fn drop(&mut self) {
        self.metrics.active_connections.dec();
        self.metrics
            .connection_duration
            .observe(self.start.elapsed().as_secs_f64());
    }
}
