use crate::agent::Agent;
use crate::artifacts::ArtifactWriter;
use crate::handlers::common::{filter_contains, scoped_error};
use agent_render::RenderInput;
use agent_renderers::{openvpn, wireguard};
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

/// One normalized tunnel instance, collapsing `openvpn::TunnelInstance`
/// and `wireguard::TunnelInstance` (identical shape, different crates)
/// into the form the dynamic-unit bookkeeping below needs.
struct Instance {
    name: String,
    dev: String,
    enabled: bool,
}

fn unit_name(kind: &str, name: &str) -> String {
    format!("tunnel:{kind}:{name}")
}

fn command_for(kind: &str, inst: &Instance) -> String {
    match kind {
        "openvpn" => format!("/usr/sbin/openvpn --config /etc/openvpn/generated/{}.conf", inst.name),
        "wireguard" => format!("/usr/bin/wg-quick up {}", inst.dev),
        _ => unreachable!("tunnels handler only knows openvpn and wireguard"),
    }
}

/// Point-to-point tunnel handler, both kinds (spec §4.5.2). Declares
/// one dynamic supervisor unit per enabled instance, undeclares
/// disabled/removed ones, then batches a single `rescan()` + restart of
/// every enabled instance — the original never needed per-instance
/// hot-reload because `gen_openvpn.py`/`gen_wireguard.py` always ship a
/// full instance restart on any change.
pub async fn handle_openvpn(agent: &Agent, node: &Value, global: &Value, force: bool) -> anyhow::Result<bool> {
    let slice = filter_contains(node, "/openvpn/");
    if !agent.memo.changed("openvpn", &slice, force)? {
        return Ok(false);
    }
    let input = RenderInput {
        node_id: agent.schema.node_id().to_string(),
        node: node.clone(),
        global: global.clone(),
        all_nodes: None,
    };
    let instances: Vec<Instance> = openvpn::parse_instances(&input)
        .into_iter()
        .map(|(i, _)| Instance { name: i.name, dev: i.dev, enabled: i.enabled })
        .collect();
    let renderer = agent.catalog.get("openvpn").expect("openvpn renderer registered");
    let bundle = renderer.render(&input).await.map_err(|e| scoped_error("openvpn", e))?;
    let summary = ArtifactWriter::materialise(&bundle, &[PathBuf::from("/etc/openvpn/generated")])?;
    reconcile_instances(agent, "openvpn", &instances, !summary.is_empty()).await?;
    Ok(true)
}

pub async fn handle_wireguard(agent: &Agent, node: &Value, global: &Value, force: bool) -> anyhow::Result<bool> {
    let slice = filter_contains(node, "/wireguard/");
    if !agent.memo.changed("wireguard", &slice, force)? {
        return Ok(false);
    }
    let input = RenderInput {
        node_id: agent.schema.node_id().to_string(),
        node: node.clone(),
        global: global.clone(),
        all_nodes: None,
    };
    let instances: Vec<Instance> = wireguard::parse_instances(&input)
        .into_iter()
        .map(|(i, _)| Instance { name: i.name, dev: i.dev, enabled: i.enabled })
        .collect();
    let renderer = agent.catalog.get("wireguard").expect("wireguard renderer registered");
    let bundle = renderer.render(&input).await.map_err(|e| scoped_error("wireguard", e))?;
    let summary = ArtifactWriter::materialise(&bundle, &[PathBuf::from("/etc/wireguard")])?;
    reconcile_instances(agent, "wireguard", &instances, !summary.is_empty()).await?;
    Ok(true)
}

async fn reconcile_instances(agent: &Agent, kind: &str, instances: &[Instance], artifacts_changed: bool) -> anyhow::Result<()> {
    for inst in instances {
        let unit = unit_name(kind, &inst.name);
        if inst.enabled {
            agent.supervisor.declare_dynamic_unit(&unit, &command_for(kind, inst)).await?;
        } else {
            agent.supervisor.undeclare_dynamic_unit(&unit).await?;
        }
    }
    agent.supervisor.rescan().await?;

    if artifacts_changed {
        for inst in instances.iter().filter(|i| i.enabled) {
            let unit = unit_name(kind, &inst.name);
            if let Err(e) = agent.supervisor.restart(&unit).await {
                warn!(unit, error = %e, "failed to restart tunnel instance");
            }
        }
    }
    Ok(())
}

/// `/sys/class/net/<dev>` is the kernel's own record of interface
/// presence, the cheapest check that doesn't depend on the tunnel
/// binary exposing its own status socket.
async fn iface_present(dev: &str) -> bool {
    tokio::fs::metadata(format!("/sys/class/net/{dev}")).await.is_ok()
}

/// Samples every declared instance of `kind` and writes its
/// `down`/`up`/`connecting` status to the store (spec §4.5.2, §5
/// "Tunnel-status sampler"). `instances` is recomputed from the node
/// slice on every tick rather than cached, since instances can be
/// added/removed between sampler ticks.
pub async fn sample_status(agent: &Agent, kind: &str, node: &Value) -> anyhow::Result<()> {
    let node_id = agent.schema.node_id().to_string();
    let input = RenderInput { node_id: node_id.clone(), node: node.clone(), global: Value::Null, all_nodes: None };
    let instances: Vec<Instance> = match kind {
        "openvpn" => openvpn::parse_instances(&input)
            .into_iter()
            .map(|(i, _)| Instance { name: i.name, dev: i.dev, enabled: i.enabled })
            .collect(),
        "wireguard" => wireguard::parse_instances(&input)
            .into_iter()
            .map(|(i, _)| Instance { name: i.name, dev: i.dev, enabled: i.enabled })
            .collect(),
        _ => return Ok(()),
    };

    for inst in instances.iter().filter(|i| i.enabled) {
        let unit = unit_name(kind, &inst.name);
        let running = matches!(agent.supervisor.status(&unit).await, Ok(agent_core::types::UnitState::Running));
        let state = if !running {
            "down"
        } else if iface_present(&inst.dev).await {
            "up"
        } else {
            "connecting"
        };
        let key = agent.schema.updated_tunnel_status_key(kind, &inst.name);
        let value = format!("{state} {}", Utc::now().to_rfc3339());
        if let Err(e) = agent.kv.put(&key, &value).await {
            warn!(unit, error = %e, "failed to publish tunnel status");
        } else {
            info!(unit, state, "tunnel status sampled");
        }
    }
    Ok(())
}
