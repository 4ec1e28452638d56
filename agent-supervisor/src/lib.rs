pub mod supervisorctl;

use agent_core::types::UnitState;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Uniform start/stop/restart/status over a local process manager, plus
/// dynamic service creation/removal (spec §4.4). Abstracts over any
/// local supervisor technology; `supervisorctl.rs` is the one concrete
/// implementation this crate ships.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn start(&self, name: &str) -> anyhow::Result<()>;
    async fn stop(&self, name: &str) -> anyhow::Result<()>;
    async fn restart(&self, name: &str) -> anyhow::Result<()>;

    /// Send a signal to a running unit without restarting it — the
    /// hot-reload half of the reload-vs-restart contract (spec §9 Design
    /// Notes). Callers fall back to `restart` on error.
    async fn signal(&self, name: &str, signal: &str) -> anyhow::Result<()>;

    /// Cheap enough to poll in tight loops (spec §4.4).
    async fn status(&self, name: &str) -> anyhow::Result<UnitState>;
    async fn status_all(&self) -> anyhow::Result<BTreeMap<String, UnitState>>;

    /// Declare (or redeclare, on material change) a dynamically-named
    /// unit backed by the given command line.
    async fn declare_dynamic_unit(&self, name: &str, command: &str) -> anyhow::Result<()>;
    async fn undeclare_dynamic_unit(&self, name: &str) -> anyhow::Result<()>;

    /// Apply a batch of declarations/undeclarations made since the last
    /// rescan. Supervisors whose dynamic unit definitions require a
    /// rescan to take effect should make this the only place that
    /// happens; callers are expected to batch declarations before
    /// calling it once (spec §4.4).
    async fn rescan(&self) -> anyhow::Result<()>;
}
