use crate::agent::Agent;
use crate::artifacts::ArtifactWriter;
use crate::handlers::common::{filter_contains, scoped_error};
use agent_firewall::TproxyArgs;
use agent_render::RenderInput;
use agent_renderers::clash::{self, ClashOutput};
use agent_renderers::{openvpn, wireguard};
use agent_core::types::UnitState;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const PROXY_UNIT: &str = "proxy";
/// The proxy's HTTP listener port (mixed-port in `mixed` mode, plain
/// http-port otherwise) — other handlers that need to route their own
/// outbound traffic through the proxy dial this (spec §4.5.5(b)).
pub const HTTP_PORT: u16 = 7890;
const CONFIG_PATH: &str = "/etc/clash/config.yaml";
const PID_PATH: &str = "/run/clash/mihomo.pid";
const IPSET_NAME: &str = "PROXY_SERVERS";
const INTERCEPT_MODE: &str = "tproxy";

/// Proxy handler (spec §4.5.4), the core of the proxy/firewall dance.
/// Grounded on `original_source/watcher.py`'s clash block in
/// `handle_commit()`, widened with the health gate, IP-set, and
/// peer-tunnel exclusion machinery the original left to a human
/// operator running `tproxy.sh` by hand.
pub async fn handle(agent: &Arc<Agent>, node: &Value, global: &Value, force: bool) -> anyhow::Result<bool> {
    let mut slice = filter_contains(node, "/clash/");
    crate::handlers::common::merge_prefix(&mut slice, global, "/global/clash/");
    if !agent.memo.changed("clash", &slice, force)? {
        return Ok(false);
    }

    let node_id = agent.schema.node_id().to_string();
    let enable = agent_renderers::util::get_bool(node, &format!("/nodes/{node_id}/clash/enable"), false);
    if !enable {
        return disable(agent).await;
    }

    let input = RenderInput { node_id: node_id.clone(), node: node.clone(), global: global.clone(), all_nodes: None };
    let output = clash::generate_clash(&input).await.map_err(|e| scoped_error("clash", e))?;

    let was_intercept = agent.proxy_state.lock().await.tproxy_enabled;
    if was_intercept && output.mode != INTERCEPT_MODE {
        if let Err(e) = agent.firewall.remove().await {
            warn!(error = %e, "failed to remove stale intercept rules while switching proxy mode");
        }
        agent.proxy_state.lock().await.tproxy_enabled = false;
    }

    ArtifactWriter::write_if_changed(Path::new(CONFIG_PATH), output.config_yaml.as_bytes(), None)?;

    let was_running = matches!(agent.supervisor.status(PROXY_UNIT).await?, UnitState::Running);
    if !was_running {
        agent.supervisor.start(PROXY_UNIT).await?;
        wait_healthy(agent, Some(Duration::from_secs(30))).await;
        let _ = agent.supervisor.signal(PROXY_UNIT, "HUP").await;
    } else {
        let _ = agent.supervisor.signal(PROXY_UNIT, "HUP").await;
    }

    if output.mode == INTERCEPT_MODE {
        wait_healthy(agent, None).await;
        ensure_ipset().await?;
        let args = build_tproxy_args(agent, node, &output).await;
        agent.firewall.apply(args.clone()).await?;
        {
            let mut state = agent.proxy_state.lock().await;
            state.tproxy_enabled = true;
            state.last_args = Some(args);
        }
        let agent_for_task = Arc::clone(agent);
        tokio::spawn(async move {
            if let Err(e) = populate_ipset(&agent_for_task).await {
                warn!(error = %e, "failed to populate proxy IP set");
            }
        });
    }

    {
        let mut state = agent.proxy_state.lock().await;
        state.enabled = true;
        state.mode = output.mode.clone();
        state.api_controller = output.api_controller.clone();
        state.api_secret = output.api_secret.clone();
        state.refresh_enable = output.refresh_enable;
        state.refresh_interval_minutes = output.refresh_interval_minutes;
        state.last_healthy = is_healthy(agent).await;
    }

    Ok(true)
}

async fn disable(agent: &Agent) -> anyhow::Result<bool> {
    let was_intercept = agent.proxy_state.lock().await.tproxy_enabled;
    if was_intercept {
        if let Err(e) = agent.firewall.remove().await {
            warn!(error = %e, "failed to remove intercept rules while disabling proxy");
        }
    }
    let was_running = matches!(
        agent.supervisor.status(PROXY_UNIT).await?,
        UnitState::Running | UnitState::Fatal
    );
    if was_running {
        agent.supervisor.stop(PROXY_UNIT).await?;
    }
    let mut state = agent.proxy_state.lock().await;
    let did_apply = was_running || was_intercept || state.enabled;
    *state = crate::agent::ProxyState::default();
    Ok(did_apply)
}

/// Destinations to intercept: everything. Matching
/// `original_source/watcher.py`'s `tproxy_apply`, which redirects by
/// default and carves out exceptions via the exclusion set rather than
/// enumerating targets to intercept.
const INTERCEPT_ALL: &str = "0.0.0.0/0";

async fn build_tproxy_args(agent: &Agent, node: &Value, output: &ClashOutput) -> TproxyArgs {
    let (exclude_ifaces, exclude_ports) = tunnel_excludes(node);
    let mut exclude_src_cidrs = output.tproxy_exclude_cidrs.clone();
    if let Some(gw) = &agent.config.default_gw {
        exclude_src_cidrs.push(format!("{gw}/32"));
    }
    TproxyArgs {
        proxy_cidrs: vec![INTERCEPT_ALL.to_string()],
        exclude_src_cidrs,
        exclude_ifaces,
        exclude_ports,
        proxy_ipset_name: IPSET_NAME.to_string(),
    }
}

/// Tunnel interfaces/ports that must not be intercepted, or the
/// proxy's own transport would loop through itself (spec §4.6).
fn tunnel_excludes(node: &Value) -> (Vec<String>, Vec<u16>) {
    let input = RenderInput {
        node_id: String::new(),
        node: node.clone(),
        global: Value::Null,
        all_nodes: None,
    };
    let mut ifaces = BTreeSet::new();
    let mut ports = BTreeSet::new();
    for (inst, cfg) in openvpn::parse_instances(&input) {
        if !inst.enabled {
            continue;
        }
        ifaces.insert(inst.dev);
        if let Some(p) = cfg.get("port").and_then(|p| p.parse::<u16>().ok()) {
            ports.insert(p);
        }
    }
    for (inst, cfg) in wireguard::parse_instances(&input) {
        if !inst.enabled {
            continue;
        }
        ifaces.insert(inst.dev);
        if let Some(p) = cfg.get("listen_port").and_then(|p| p.parse::<u16>().ok()) {
            ports.insert(p);
        }
    }
    (ifaces.into_iter().collect(), ports.into_iter().collect())
}

pub(crate) async fn ensure_ipset() -> anyhow::Result<()> {
    let check = tokio::process::Command::new("ipset").arg("list").arg(IPSET_NAME).output().await?;
    if check.status.success() {
        return Ok(());
    }
    let create = tokio::process::Command::new("ipset")
        .args(["create", IPSET_NAME, "hash:ip", "family", "inet"])
        .output()
        .await?;
    if !create.status.success() {
        return Err(scoped_error(
            "clash",
            format!("ipset create {IPSET_NAME} failed: {}", String::from_utf8_lossy(&create.stderr)),
        ));
    }
    Ok(())
}

/// Re-extracts and repopulates `PROXY_SERVERS` on demand — the refresh
/// loop's entry point (spec §5 "proxy refresh tick").
pub async fn refresh_ipset(agent: &Agent) -> anyhow::Result<()> {
    populate_ipset(agent).await
}

/// Tears down `PROXY_SERVERS` entirely. Used by the crash monitor (spec
/// §5 S5): a fatal proxy unit must lose both its intercept rules and its
/// IP-set within the same failure window, not just stop being populated.
pub(crate) async fn destroy_ipset() -> anyhow::Result<()> {
    let out = tokio::process::Command::new("ipset").args(["destroy", IPSET_NAME]).output().await?;
    if !out.status.success() && !String::from_utf8_lossy(&out.stderr).contains("does not exist") {
        anyhow::bail!("ipset destroy {IPSET_NAME} failed: {}", String::from_utf8_lossy(&out.stderr));
    }
    Ok(())
}

/// One-shot background task: extract server IPs from the rendered
/// config plus any external provider files, repopulating `PROXY_SERVERS`
/// (spec §4.5.4 step 4d, §5 "Proxy-IP extraction").
async fn populate_ipset(agent: &Agent) -> anyhow::Result<()> {
    let text = fs_err::read_to_string(CONFIG_PATH)?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&text)?;
    let mut ips = BTreeSet::new();
    if let Some(serde_yaml::Value::Sequence(proxies)) = doc.get("proxies") {
        for p in proxies {
            if let Some(server) = p.get("server").and_then(|v| v.as_str()) {
                if server.parse::<std::net::IpAddr>().is_ok() {
                    ips.insert(server.to_string());
                }
            }
        }
    }
    for ip in &ips {
        let _ = tokio::process::Command::new("ipset").args(["add", IPSET_NAME, ip, "-exist"]).output().await;
    }
    info!(count = ips.len(), "populated proxy IP set");
    let _ = agent;
    Ok(())
}

#[derive(Deserialize)]
struct ProxiesResponse {
    #[serde(default)]
    proxies: std::collections::BTreeMap<String, ProxyEntry>,
}

#[derive(Deserialize)]
struct ProxyEntry {
    #[serde(default)]
    now: Option<String>,
}

/// Healthy = PID file present+readable, admin API reachable, and every
/// `url-test`-named selector has a non-empty, non-`REJECT` selection
/// (spec §4.5.4, Glossary "Healthy").
pub async fn is_healthy(agent: &Agent) -> bool {
    if fs_err::read_to_string(PID_PATH).is_err() {
        return false;
    }
    let state = agent.proxy_state.lock().await.clone();
    let Some(port) = state.api_controller.rsplit_once(':').map(|(_, p)| p) else {
        return false;
    };
    let url = format!("http://127.0.0.1:{port}/proxies");
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(5)).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    let mut req = client.get(&url);
    if !state.api_secret.is_empty() {
        req = req.bearer_auth(&state.api_secret);
    }
    let Ok(resp) = req.send().await else { return false };
    let Ok(body) = resp.json::<ProxiesResponse>().await else { return false };
    body.proxies
        .iter()
        .filter(|(name, _)| name.contains("url-test"))
        .all(|(_, entry)| matches!(&entry.now, Some(n) if !n.is_empty() && n != "REJECT"))
}

/// Polls [`is_healthy`] every second until it reports true or `timeout`
/// elapses. `None` waits indefinitely (spec §4.5.4 step 4a, §5
/// "the only unbounded wait").
pub async fn wait_healthy(agent: &Agent, timeout: Option<Duration>) -> bool {
    let deadline = timeout.map(|d| tokio::time::Instant::now() + d);
    loop {
        if is_healthy(agent).await {
            return true;
        }
        if let Some(d) = deadline {
            if tokio::time::Instant::now() >= d {
                return false;
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
