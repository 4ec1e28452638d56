use agent_core::{EnvConfig, Lease};
use agent_firewall::{FirewallProgrammer, TproxyArgs};
use agent_render::RendererCatalog;
use agent_store::{HashMemo, KvClient, Schema};
use agent_supervisor::Supervisor;
use agent_telemetry::AgentMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Which mesh flavour is currently holding [`crate::handlers::mesh::MESH_UNIT`],
/// so a flip of `/global/mesh_type` can stop the one that's no longer
/// selected before the new one starts (spec §4.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFlavour {
    Overlay,
    Switched,
}

/// Cached state the proxy handler, the firewall integrity loop, and the
/// crash monitor all need to agree on without round-tripping the KV
/// store (spec §4.6, §5 "mitigated by caching inside the proxy
/// handler").
#[derive(Debug, Clone, Default)]
pub struct ProxyState {
    pub enabled: bool,
    pub mode: String,
    pub tproxy_enabled: bool,
    pub last_args: Option<TproxyArgs>,
    pub last_healthy: bool,
    pub api_controller: String,
    pub api_secret: String,
    pub refresh_enable: bool,
    pub refresh_interval_minutes: i64,
}

/// The single long-lived value every handler and background task shares
/// (spec §9 Design Notes: "Represent explicitly as fields of a single
/// long-lived Agent value... guarded by per-field mutexes; no ambient
/// state"). Generalized from `ando-proxy::worker::SharedState`, which
/// holds one `ArcSwap<Router>` plus a handful of `Arc<..>` collections;
/// here every reconciler resource gets its own field instead.
pub struct Agent {
    pub config: EnvConfig,
    pub schema: Schema,
    pub kv: KvClient,
    pub memo: HashMemo,
    pub catalog: RendererCatalog,
    pub supervisor: Arc<dyn Supervisor>,
    pub firewall: FirewallProgrammer,
    pub metrics: AgentMetrics,

    /// Non-reentrant: `reconcile_once()` uses `try_lock`, never `lock`
    /// (spec §3 Invariant 1, spec §8 Testable Property 5).
    pub reconcile_lock: Mutex<()>,

    /// Set by the `SIGUSR1` handler, cleared at the end of the pass that
    /// observed it (spec §4.7, §6 Signals).
    pub force_reconcile: AtomicBool,

    pub lease: Mutex<Option<Lease>>,
    pub proxy_state: Mutex<ProxyState>,
    pub mesh_flavour: Mutex<Option<MeshFlavour>>,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EnvConfig,
        kv: KvClient,
        catalog: RendererCatalog,
        supervisor: Arc<dyn Supervisor>,
        firewall: FirewallProgrammer,
        metrics: AgentMetrics,
    ) -> Self {
        let schema = Schema::new(&config.node_id);
        Self {
            config,
            schema,
            kv,
            memo: HashMemo::new(),
            catalog,
            supervisor,
            firewall,
            metrics,
            reconcile_lock: Mutex::new(()),
            force_reconcile: AtomicBool::new(false),
            lease: Mutex::new(None),
            proxy_state: Mutex::new(ProxyState::default()),
            mesh_flavour: Mutex::new(None),
        }
    }

    pub fn request_force_reconcile(&self) {
        self.force_reconcile.store(true, Ordering::SeqCst);
        tracing::info!("SIGUSR1 received, forcing next reconcile pass");
    }

    /// Consumes the force flag: true if set, and clears it regardless
    /// (spec §4.7: "a `force` flag... is cleared at the end").
    pub fn take_force_flag(&self) -> bool {
        self.force_reconcile.swap(false, Ordering::SeqCst)
    }
}
