use crate::agent::Agent;
use crate::handlers::{mesh, proxy, resolver};
use crate::liveness::LivenessPublisher;
use crate::reconcile::reconcile_once;
use agent_core::types::UnitState;
use agent_store::{CommitWatcher, KvEndpoint};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Spawns every long-running background task in spec §5's table and
/// returns immediately; the caller (main) keeps the process alive until
/// a shutdown signal arrives. Grounded on `ando-proxy::worker`'s
/// thread-per-task fan-out, widened from OS threads to tokio tasks
/// since nothing here is CPU-bound.
pub fn spawn_all(agent: Arc<Agent>, endpoint: KvEndpoint) {
    tokio::spawn(watch_loop(Arc::clone(&agent), endpoint));
    tokio::spawn(periodic_reconcile_loop(Arc::clone(&agent)));
    tokio::spawn(liveness_keepalive_loop(Arc::clone(&agent)));
    tokio::spawn(tunnel_status_loop(Arc::clone(&agent), "openvpn", agent.config.openvpn_status_interval));
    tokio::spawn(tunnel_status_loop(Arc::clone(&agent), "wireguard", agent.config.wireguard_status_interval));
    tokio::spawn(supervisor_retry_loop(Arc::clone(&agent)));
    tokio::spawn(mesh_child_watcher_loop(Arc::clone(&agent)));
    tokio::spawn(proxy_refresh_loop(Arc::clone(&agent)));
    tokio::spawn(proxy_crash_monitor_loop(Arc::clone(&agent)));
    tokio::spawn(firewall_integrity_loop(agent));
}

/// Watch loop (spec §5, event-driven): re-subscribes with a fresh etcd
/// client on every stream error, via the same backoff used elsewhere.
async fn watch_loop(agent: Arc<Agent>, endpoint: KvEndpoint) {
    let watcher = CommitWatcher::new(agent.schema.commit_key());
    let mut backoff = agent_core::Backoff::default();
    loop {
        let (tx, mut rx) = mpsc::channel(1);
        let client_endpoint = endpoint.clone();
        let watch_agent = Arc::clone(&agent);
        let drain = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                if let Err(e) = reconcile_once(&watch_agent).await {
                    error!(error = %e, "reconcile pass aborted");
                }
            }
        });

        let client = match agent_store::KvClient::connect(client_endpoint).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to connect watch-stream etcd client, retrying");
                tokio::time::sleep(backoff.next_sleep()).await;
                continue;
            }
        };
        match watcher.watch(client.raw().await, tx).await {
            Ok(()) => backoff.reset(),
            Err(e) => warn!(error = %e, "commit watch stream ended, resubscribing"),
        }
        drain.abort();
        tokio::time::sleep(backoff.next_sleep()).await;
    }
}

async fn periodic_reconcile_loop(agent: Arc<Agent>) {
    loop {
        tokio::time::sleep(Duration::from_secs(300)).await;
        if let Err(e) = reconcile_once(&agent).await {
            error!(error = %e, "periodic reconcile pass aborted");
        }
    }
}

async fn liveness_keepalive_loop(agent: Arc<Agent>) {
    LivenessPublisher::keepalive_loop(&agent).await;
}

async fn tunnel_status_loop(agent: Arc<Agent>, kind: &'static str, interval_seconds: u64) {
    loop {
        tokio::time::sleep(Duration::from_secs(interval_seconds)).await;
        let node = match agent.kv.get_prefix(&agent.schema.node_prefix()).await {
            Ok(m) => map_to_value(m),
            Err(e) => {
                warn!(kind, error = %e, "failed to read node prefix for tunnel status sampler");
                continue;
            }
        };
        if let Err(e) = tunnels_sample(&agent, kind, &node).await {
            warn!(kind, error = %e, "tunnel status sampling failed");
        }
    }
}

async fn tunnels_sample(agent: &Agent, kind: &str, node: &Value) -> anyhow::Result<()> {
    crate::handlers::tunnels::sample_status(agent, kind, node).await
}

/// Drives any unit found in `Fatal` state back up (spec §7 "Supervisor
/// fatal"). The DNS resolver gets stop-then-start — some resolvers cache
/// state across a bare restart signal — every other unit gets a plain
/// restart. The mesh unit is excluded here; [`mesh_child_watcher_loop`]
/// watches it at a tighter cadence instead.
async fn supervisor_retry_loop(agent: Arc<Agent>) {
    loop {
        tokio::time::sleep(Duration::from_secs(agent.config.supervisor_retry_interval)).await;
        let statuses = match agent.supervisor.status_all().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to poll supervisor status_all");
                continue;
            }
        };
        for (name, state) in statuses {
            if state != UnitState::Fatal || name == mesh::MESH_UNIT {
                continue;
            }
            let result = if name == resolver::RESOLVER_UNIT {
                agent.supervisor.stop(&name).await.and(agent.supervisor.start(&name).await)
            } else {
                agent.supervisor.restart(&name).await
            };
            match result {
                Ok(()) => {
                    agent.metrics.record_supervisor_restart(&name);
                    info!(unit = name, "recovered fatal unit");
                }
                Err(e) => warn!(unit = name, error = %e, "failed to recover fatal unit"),
            }
        }
    }
}

/// Child-watcher (mesh), spec §5: the mesh component gets its own
/// tighter-interval fatal-state watcher rather than waiting on the
/// general 30 s supervisor retry loop (spec §7 "the mesh component
/// treated specially").
async fn mesh_child_watcher_loop(agent: Arc<Agent>) {
    loop {
        tokio::time::sleep(Duration::from_secs(3)).await;
        match agent.supervisor.status(mesh::MESH_UNIT).await {
            Ok(UnitState::Fatal) => match agent.supervisor.restart(mesh::MESH_UNIT).await {
                Ok(()) => {
                    agent.metrics.record_supervisor_restart(mesh::MESH_UNIT);
                    info!("recovered fatal mesh unit");
                }
                Err(e) => warn!(error = %e, "failed to restart fatal mesh unit"),
            },
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to poll mesh unit status"),
        }
    }
}

/// Proxy refresh (spec §5, "5 s tick" with an interval check inside):
/// repopulates the proxy IP-set on the cadence `refresh_interval_minutes`
/// names, only while intercept mode and the refresh flag are both on.
async fn proxy_refresh_loop(agent: Arc<Agent>) {
    let mut last_run: Option<tokio::time::Instant> = None;
    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let state = agent.proxy_state.lock().await.clone();
        if !state.tproxy_enabled || !state.refresh_enable {
            continue;
        }
        let interval = Duration::from_secs((state.refresh_interval_minutes.max(1) as u64) * 60);
        let due = match last_run {
            Some(t) => t.elapsed() >= interval,
            None => true,
        };
        if !due {
            continue;
        }
        if let Err(e) = proxy::refresh_ipset(&agent).await {
            warn!(error = %e, "proxy IP-set refresh failed");
        }
        last_run = Some(tokio::time::Instant::now());
    }
}

/// Proxy crash monitor (spec §5, S5): restarts the proxy unit if it ever
/// lands in `Fatal` while the handler believes it should be enabled. When
/// intercept mode was active, also tears down the intercept rules and
/// the `PROXY_SERVERS` IP-set the moment the fault is observed (within
/// this loop's 5 s tick, well inside the 10 s bound), then rebuilds both
/// from the cached tproxy args once the restarted unit reports healthy.
async fn proxy_crash_monitor_loop(agent: Arc<Agent>) {
    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let (enabled, was_intercept) = {
            let state = agent.proxy_state.lock().await;
            (state.enabled, state.tproxy_enabled)
        };
        if !enabled {
            continue;
        }
        if !matches!(agent.supervisor.status(proxy::PROXY_UNIT).await, Ok(UnitState::Fatal)) {
            continue;
        }

        if was_intercept {
            if let Err(e) = agent.firewall.remove().await {
                warn!(error = %e, "failed to remove intercept rules for fatal proxy unit");
            }
            if let Err(e) = proxy::destroy_ipset().await {
                warn!(error = %e, "failed to destroy proxy IP set for fatal proxy unit");
            }
            agent.proxy_state.lock().await.tproxy_enabled = false;
        }

        match agent.supervisor.restart(proxy::PROXY_UNIT).await {
            Ok(()) => {
                agent.metrics.record_supervisor_restart(proxy::PROXY_UNIT);
                info!("recovered fatal proxy unit");
                if was_intercept {
                    recreate_intercept_rules(&agent).await;
                }
            }
            Err(e) => warn!(error = %e, "failed to restart fatal proxy unit"),
        }
    }
}

/// Rebuilds `PROXY_SERVERS` and reapplies the cached tproxy args once the
/// proxy reports healthy after a crash-monitor restart (spec §5 S5).
async fn recreate_intercept_rules(agent: &Arc<Agent>) {
    let Some(args) = agent.proxy_state.lock().await.last_args.clone() else {
        return;
    };
    if !proxy::wait_healthy(agent, Some(Duration::from_secs(30))).await {
        warn!("proxy did not become healthy after crash-monitor restart, leaving intercept rules down");
        return;
    }
    if let Err(e) = proxy::ensure_ipset().await {
        warn!(error = %e, "failed to recreate proxy IP set after recovery");
        return;
    }
    if let Err(e) = agent.firewall.apply(args).await {
        warn!(error = %e, "failed to reapply intercept rules after recovery");
        return;
    }
    agent.proxy_state.lock().await.tproxy_enabled = true;
    let agent_for_task = Arc::clone(agent);
    tokio::spawn(async move {
        if let Err(e) = proxy::refresh_ipset(&agent_for_task).await {
            warn!(error = %e, "failed to populate proxy IP set after recovery");
        }
    });
}

/// Firewall integrity (spec §5, 60 s): re-arms from the cached args only
/// — never re-derives new ones, so it can safely run concurrently with a
/// reconcile pass.
async fn firewall_integrity_loop(agent: Arc<Agent>) {
    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
        if let Err(e) = agent.firewall.reapply_from_cache().await {
            warn!(error = %e, "firewall integrity re-arm failed");
        }
    }
}

fn map_to_value(map: BTreeMap<String, String>) -> Value {
    Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}
