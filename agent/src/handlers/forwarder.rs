use crate::agent::Agent;
use crate::artifacts::ArtifactWriter;
use crate::handlers::common::{apply_action, decide_action, filter_contains, scoped_error, stop_if_running};
use agent_render::RenderInput;
use agent_renderers::dnsmasq;
use serde_json::Value;
use std::path::PathBuf;

const FORWARDER_UNIT: &str = "dns_forwarder";
const MANAGED_DIR: &str = "/etc/dnsmasq.d";

/// DNS forwarder handler (spec §4.5.6), backed by `dnsmasq`. Independent
/// enable flag; writes the fallback-only base config and starts the
/// unit first among DNS components, so resolution is available for the
/// rest of the pass. [`update_upstreams`] is the dedicated routine later
/// handlers (resolver) call once they know what local upstreams exist.
pub async fn handle(agent: &Agent, node: &Value, global: &Value, force: bool) -> anyhow::Result<bool> {
    let slice = filter_contains(node, "/dnsmasq/");
    if !agent.memo.changed("dnsmasq", &slice, force)? {
        return Ok(false);
    }

    let node_id = agent.schema.node_id().to_string();
    let enable = agent_renderers::util::get_bool(node, &format!("/nodes/{node_id}/dnsmasq/enable"), false);
    if !enable {
        return stop_if_running(agent, FORWARDER_UNIT).await;
    }

    let renderer = agent.catalog.get("dnsmasq").expect("dnsmasq renderer registered");
    let input = RenderInput { node_id, node: node.clone(), global: global.clone(), all_nodes: None };
    let bundle = renderer.render(&input).await.map_err(|e| scoped_error("dnsmasq", e))?;
    let summary = ArtifactWriter::materialise(&bundle, &[PathBuf::from(MANAGED_DIR)])?;
    let was_running = matches!(
        agent.supervisor.status(FORWARDER_UNIT).await?,
        agent_core::types::UnitState::Running
    );
    apply_action(agent, FORWARDER_UNIT, decide_action(&summary, was_running)).await?;
    Ok(true)
}

/// Rewrites the forwarder config with `extra_upstreams` (e.g. the local
/// resolver and proxy-DNS ports), folding in fallback public DNS only
/// if not every local upstream is available, then restarts (spec
/// §4.5.6). Always applies — callers own whether anything changed.
pub async fn update_upstreams(
    agent: &Agent,
    node: &Value,
    global: &Value,
    extra_upstreams: &[String],
    all_local_upstreams_available: bool,
) -> anyhow::Result<()> {
    let node_id = agent.schema.node_id().to_string();
    if !agent_renderers::util::get_bool(node, &format!("/nodes/{node_id}/dnsmasq/enable"), false) {
        return Ok(());
    }
    let input = RenderInput { node_id, node: node.clone(), global: global.clone(), all_nodes: None };
    let bundle = dnsmasq::render_with_upstreams(&input, extra_upstreams, all_local_upstreams_available);
    let summary = ArtifactWriter::materialise(&bundle, &[PathBuf::from(MANAGED_DIR)])?;
    if !summary.is_empty() {
        agent.supervisor.restart(FORWARDER_UNIT).await?;
    }
    Ok(())
}
