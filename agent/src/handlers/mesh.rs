use crate::agent::{Agent, MeshFlavour};
use crate::artifacts::ArtifactWriter;
use crate::handlers::common::{apply_action, decide_action, filter_contains, scoped_error, stop_if_running};
use agent_core::types::UnitState;
use agent_render::RenderInput;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{error, info, warn};

pub const MESH_UNIT: &str = "mesh";

/// Mutually exclusive overlay-mesh (`easytier`) vs. switched-mesh
/// (`tinc`) handler (spec §4.5.1). Grounded on
/// `original_source/watcher.py`'s easytier block in `handle_commit()`,
/// widened to cover the switched flavour and the exclusivity check the
/// original never had to make (it only shipped one mesh kind).
pub async fn handle(
    agent: &Agent,
    node: &Value,
    global: &Value,
    all_nodes: &Value,
    force: bool,
) -> anyhow::Result<bool> {
    let overlay_enable = agent_renderers::util::get_bool(node, &format!("/nodes/{}/easytier/enable", agent.schema.node_id()), false);
    let switched_enable = agent_renderers::util::get_bool(node, &format!("/nodes/{}/tinc/enable", agent.schema.node_id()), false);

    if overlay_enable && switched_enable {
        error!("both mesh flavours enabled (easytier and tinc); refusing to guess, leaving mesh unit as-is");
        return Err(scoped_error(
            "mesh",
            format!(
                "both /nodes/{}/easytier/enable and /nodes/{}/tinc/enable are true",
                agent.schema.node_id(),
                agent.schema.node_id()
            ),
        ));
    }

    let mesh_type = agent_renderers::util::get_or(global, "/global/mesh_type", "overlay");
    let selected = match mesh_type.as_str() {
        "overlay" => MeshFlavour::Overlay,
        "switched" => MeshFlavour::Switched,
        other => {
            error!(mesh_type = other, "unknown /global/mesh_type, expected overlay or switched");
            return Err(scoped_error("mesh", format!("unknown /global/mesh_type: {other:?}")));
        }
    };

    let previous = agent.mesh_flavour.lock().await.replace(selected);
    if previous.is_some_and(|p| p != selected) {
        info!(?previous, ?selected, "mesh flavour switched, stopping previously active unit first");
        if let Err(e) = stop_if_running(agent, MESH_UNIT).await {
            warn!(error = %e, "failed to stop mesh unit before flavour switch");
        }
    }

    match selected {
        MeshFlavour::Overlay => handle_overlay(agent, node, global, force).await,
        MeshFlavour::Switched => handle_switched(agent, node, global, all_nodes, force).await,
    }
}

async fn handle_overlay(agent: &Agent, node: &Value, global: &Value, force: bool) -> anyhow::Result<bool> {
    let slice = filter_contains(node, "/easytier/");
    if !agent.memo.changed("easytier", &slice, force)? {
        return Ok(false);
    }

    let node_id = agent.schema.node_id().to_string();
    let enable = agent_renderers::util::get_bool(node, &format!("/nodes/{node_id}/easytier/enable"), false);
    if !enable {
        return stop_if_running(agent, MESH_UNIT).await;
    }

    let renderer = agent.catalog.get("easytier").expect("easytier renderer registered");
    let input = RenderInput { node_id, node: node.clone(), global: global.clone(), all_nodes: None };
    let bundle = renderer.render(&input).await.map_err(|e| scoped_error("mesh", e))?;
    let summary = ArtifactWriter::materialise(&bundle, &[PathBuf::from("/etc/easytier")])?;
    let was_running = matches!(agent.supervisor.status(MESH_UNIT).await?, UnitState::Running);
    let action = decide_action(&summary, was_running);
    info!(?action, "applying overlay mesh");
    apply_action(agent, MESH_UNIT, action).await?;
    Ok(true)
}

async fn handle_switched(agent: &Agent, node: &Value, global: &Value, all_nodes: &Value, force: bool) -> anyhow::Result<bool> {
    let mut slice = filter_contains(node, "/tinc/");
    if let Value::Object(map) = &mut slice {
        if let Value::Object(all) = all_nodes {
            for (k, v) in all {
                if k.contains("/tinc/") {
                    map.insert(k.clone(), v.clone());
                }
            }
        }
    }
    if !agent.memo.changed("tinc", &slice, force)? {
        return Ok(false);
    }

    let node_id = agent.schema.node_id().to_string();
    let enable = agent_renderers::util::get_bool(node, &format!("/nodes/{node_id}/tinc/enable"), false);
    if !enable {
        return stop_if_running(agent, MESH_UNIT).await;
    }

    let renderer = agent.catalog.get("tinc").expect("tinc renderer registered");
    let netname = agent_renderers::util::get_or(global, "/global/tinc/netname", "mesh");
    let input = RenderInput {
        node_id,
        node: node.clone(),
        global: global.clone(),
        all_nodes: Some(all_nodes.clone()),
    };
    let bundle = renderer.render(&input).await.map_err(|e| scoped_error("mesh", e))?;
    let hosts_dir = PathBuf::from(format!("/etc/tinc/{netname}/hosts"));
    let summary = ArtifactWriter::materialise(&bundle, &[hosts_dir])?;
    let was_running = matches!(agent.supervisor.status(MESH_UNIT).await?, UnitState::Running);

    // Host-file additions alone permit a hot reload; any content change
    // or deletion forces a restart (spec §4.5.1).
    let action = if !was_running {
        crate::handlers::common::Action::Start
    } else if summary.changed > 0 || summary.removed > 0 {
        crate::handlers::common::Action::Restart
    } else if summary.created > 0 {
        crate::handlers::common::Action::HotReload
    } else {
        crate::handlers::common::Action::NoOp
    };
    if action == crate::handlers::common::Action::NoOp {
        warn!("tinc slice changed but no artifact delta observed");
    }
    apply_action(agent, MESH_UNIT, action).await?;
    Ok(true)
}
