use crate::agent::Agent;
use crate::handlers::common::{filter_contains, filter_prefix, scoped_error};
use agent_core::types::UnitState;
use agent_render::RenderInput;
use serde_json::Value;
use tokio::process::Command;
use tracing::{info, warn};

const ROUTING_UNIT: &str = "routing_daemon";
const CONFIG_PATH: &str = "/etc/frr/frr.conf";

/// Discovered in this order; the first one present on disk wins (spec
/// §4.5.3 "discovered at known paths").
const RELOAD_TOOL_CANDIDATES: &[&str] = &[
    "/usr/lib/frr/frr-reload.py",
    "/usr/lib/frr/frr-reload",
    "/usr/sbin/frr-reload.py",
    "/usr/sbin/frr-reload",
];
const ADMIN_CLI: &str = "/usr/bin/vtysh";

/// Routing-daemon handler (spec §4.5.3), backed by FRR. Reloads only on
/// the union of routing-relevant node keys plus global route-policy
/// keys changing, mirroring `original_source/watcher.py`'s
/// `frr_material`/`global_bgp_filter` pair fed into one `changed()`
/// call.
pub async fn handle(agent: &Agent, node: &Value, global: &Value, all_nodes: &Value, force: bool) -> anyhow::Result<bool> {
    let mut material = filter_contains(node, "/ospf/");
    merge_into(&mut material, &filter_contains(node, "/bgp/"));
    merge_into(&mut material, &filter_contains(node, "/lan/"));
    merge_into(&mut material, &filter_contains(node, "/openvpn/"));
    merge_into(&mut material, &filter_contains(node, "/wireguard/"));
    let global_policy = filter_prefix(global, "/global/bgp/");
    let payload = serde_json::json!({"node": material, "global_bgp": global_policy});

    if !agent.memo.changed("frr", &payload, force)? {
        return Ok(false);
    }

    let renderer = agent.catalog.get("frr").expect("frr renderer registered");
    let input = RenderInput {
        node_id: agent.schema.node_id().to_string(),
        node: node.clone(),
        global: global.clone(),
        all_nodes: Some(all_nodes.clone()),
    };
    let bundle = renderer.render(&input).await.map_err(|e| scoped_error("frr", e))?;
    let content = bundle.files.first().map(|f| f.content.clone()).unwrap_or_default();

    if !matches!(agent.supervisor.status(ROUTING_UNIT).await?, UnitState::Running) {
        agent.supervisor.start(ROUTING_UNIT).await?;
    }
    reload_frr(content).await?;
    Ok(true)
}

fn merge_into(dst: &mut Value, src: &Value) {
    if let (Value::Object(d), Value::Object(s)) = (dst, src) {
        for (k, v) in s {
            d.insert(k.clone(), v.clone());
        }
    }
}

async fn smooth_reload_tool() -> Option<&'static str> {
    for &candidate in RELOAD_TOOL_CANDIDATES {
        if tokio::fs::metadata(candidate).await.is_ok() {
            return Some(candidate);
        }
    }
    None
}

/// Writes the new config to a sibling `.new` file, then either hands it
/// to the smooth-reload tool (renaming into place only once the tool
/// confirms success) or, absent that tool, renames it into place
/// directly and falls back to the admin CLI to load it (spec §4.5.3).
async fn reload_frr(content: Vec<u8>) -> anyhow::Result<()> {
    let tmp_path = format!("{CONFIG_PATH}.new");
    fs_err::write(&tmp_path, &content)?;

    if let Some(tool) = smooth_reload_tool().await {
        let out = if tool.ends_with(".py") {
            Command::new("python3").arg(tool).arg("--reload").arg(&tmp_path).output().await?
        } else {
            Command::new(tool).arg("--reload").arg(&tmp_path).output().await?
        };
        if out.status.success() {
            fs_err::rename(&tmp_path, CONFIG_PATH)?;
            info!(tool, "routing daemon smooth-reloaded");
            return Ok(());
        }
        warn!(tool, stderr = %String::from_utf8_lossy(&out.stderr), "smooth-reload tool failed, falling back to admin CLI");
    }

    fs_err::rename(&tmp_path, CONFIG_PATH)?;
    let out = Command::new(ADMIN_CLI).arg("-f").arg(CONFIG_PATH).output().await?;
    if !out.status.success() {
        return Err(scoped_error(
            "frr",
            format!("{ADMIN_CLI} -f {CONFIG_PATH} failed: {}", String::from_utf8_lossy(&out.stderr)),
        ));
    }
    Ok(())
}
