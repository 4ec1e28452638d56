use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Small Prometheus registry of agent-internal counters. There is no
/// scrape endpoint (Non-goal: no UI/HTTP server) — `gather_text()` is
/// read once at shutdown and written to the log.
pub struct AgentMetrics {
    registry: Registry,

    /// Completed reconcile passes.
    pub reconcile_total: IntCounter,
    /// Reconcile passes that returned an error.
    pub reconcile_errors_total: IntCounter,
    /// Subsystem handler invocations, by handler name and outcome.
    pub handler_invocations_total: IntCounterVec,
    /// Supervisor restarts issued, by unit name.
    pub supervisor_restarts_total: IntCounterVec,
}

impl AgentMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let reconcile_total = IntCounter::with_opts(
            Opts::new("agent_reconcile_total", "Completed reconcile passes").namespace("node_agent"),
        )?;
        let reconcile_errors_total = IntCounter::with_opts(
            Opts::new("agent_reconcile_errors_total", "Reconcile passes that errored")
                .namespace("node_agent"),
        )?;
        let handler_invocations_total = IntCounterVec::new(
            Opts::new("agent_handler_invocations_total", "Subsystem handler invocations")
                .namespace("node_agent"),
            &["handler", "outcome"],
        )?;
        let supervisor_restarts_total = IntCounterVec::new(
            Opts::new("agent_supervisor_restarts_total", "Supervisor restarts issued")
                .namespace("node_agent"),
            &["unit"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;
        registry.register(Box::new(handler_invocations_total.clone()))?;
        registry.register(Box::new(supervisor_restarts_total.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_errors_total,
            handler_invocations_total,
            supervisor_restarts_total,
        })
    }

    pub fn record_handler(&self, handler: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.handler_invocations_total.with_label_values(&[handler, outcome]).inc();
    }

    pub fn record_supervisor_restart(&self, unit: &str) {
        self.supervisor_restarts_total.with_label_values(&[unit]).inc();
    }

    /// Prometheus text exposition of the current counter values.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new().expect("failed to construct agent metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = AgentMetrics::new().unwrap();
        assert_eq!(metrics.reconcile_total.get(), 0);
        assert_eq!(metrics.reconcile_errors_total.get(), 0);
    }

    #[test]
    fn record_handler_increments_labeled_counter() {
        let metrics = AgentMetrics::new().unwrap();
        metrics.record_handler("openvpn", true);
        metrics.record_handler("openvpn", false);
        let text = metrics.gather_text();
        assert!(text.contains("agent_handler_invocations_total"));
        assert!(text.contains("handler=\"openvpn\""));
    }

    #[test]
    fn record_supervisor_restart_increments_labeled_counter() {
        let metrics = AgentMetrics::new().unwrap();
        metrics.record_supervisor_restart("wg0");
        metrics.record_supervisor_restart("wg0");
        assert_eq!(
            metrics
                .supervisor_restarts_total
                .with_label_values(&["wg0"])
                .get(),
            2
        );
    }

    #[test]
    fn gather_text_includes_reconcile_counters() {
        let metrics = AgentMetrics::new().unwrap();
        metrics.reconcile_total.inc();
        metrics.reconcile_errors_total.inc();
        let text = metrics.gather_text();
        assert!(text.contains("agent_reconcile_total 1"));
        assert!(text.contains("agent_reconcile_errors_total 1"));
    }
}
