use thiserror::Error;

/// Unified error type for node-agent.
///
/// Every variant maps to exactly one bucket of the error taxonomy in
/// spec §7; `taxonomy()` recovers that bucket so callers can decide
/// whether to retry, log-and-continue, or abort startup.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("kv store unauthenticated: {0}")]
    Auth(String),

    #[error("renderer rejected slice for {subsystem}: {reason}")]
    Renderer { subsystem: String, reason: String },

    #[error("supervisor unit {0} is fatal")]
    SupervisorFatal(String),

    #[error("firewall integrity lost: {0}")]
    FirewallIntegrity(String),

    #[error("lease lost: {0}")]
    LeaseLost(String),

    #[error("fatal startup error: {0}")]
    Fatal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Which retry policy applies to a given error, per spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Taxonomy {
    Transient,
    Auth,
    Renderer,
    SupervisorFatal,
    FirewallIntegrity,
    LeaseLost,
    Fatal,
}

impl AgentError {
    pub fn taxonomy(&self) -> Taxonomy {
        match self {
            AgentError::Transient(_) => Taxonomy::Transient,
            AgentError::Auth(_) => Taxonomy::Auth,
            AgentError::Renderer { .. } => Taxonomy::Renderer,
            AgentError::SupervisorFatal(_) => Taxonomy::SupervisorFatal,
            AgentError::FirewallIntegrity(_) => Taxonomy::FirewallIntegrity,
            AgentError::LeaseLost(_) => Taxonomy::LeaseLost,
            AgentError::Fatal(_) => Taxonomy::Fatal,
            AgentError::Io(_) | AgentError::Serde(_) => Taxonomy::Transient,
        }
    }

    /// True if this error should abort only the owning handler's pass,
    /// not the whole reconcile pass (spec §4.3, §7).
    pub fn is_handler_scoped(&self) -> bool {
        matches!(self.taxonomy(), Taxonomy::Renderer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_errors_are_handler_scoped() {
        let e = AgentError::Renderer {
            subsystem: "mesh".into(),
            reason: "both flavours enabled".into(),
        };
        assert_eq!(e.taxonomy(), Taxonomy::Renderer);
        assert!(e.is_handler_scoped());
    }

    #[test]
    fn fatal_is_not_handler_scoped() {
        let e = AgentError::Fatal("missing NODE_ID".into());
        assert!(!e.is_handler_scoped());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            AgentError::SupervisorFatal("mesh".into()).to_string(),
            "supervisor unit mesh is fatal"
        );
        assert_eq!(
            AgentError::LeaseLost("expired".into()).to_string(),
            "lease lost: expired"
        );
    }
}
