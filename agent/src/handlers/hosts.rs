use crate::agent::Agent;
use crate::artifacts::ArtifactWriter;
use crate::handlers::common::scoped_error;
use agent_render::RenderInput;
use serde_json::Value;
use std::path::PathBuf;

/// Hosts-file handler (spec §4.5.7). Runs every pass unconditionally —
/// no `HashMemo::changed` gate — since it has no enable flag and no
/// renderer-side validation failure mode; `write_if_changed` is itself
/// the only change-detection this one needs.
pub async fn handle(agent: &Agent, dns_hosts: &Value) -> anyhow::Result<bool> {
    let renderer = agent.catalog.get("hosts").expect("hosts renderer registered");
    let input = RenderInput {
        node_id: agent.schema.node_id().to_string(),
        node: Value::Null,
        global: dns_hosts.clone(),
        all_nodes: None,
    };
    let bundle = renderer.render(&input).await.map_err(|e| scoped_error("hosts", e))?;
    let summary = ArtifactWriter::materialise(&bundle, &[PathBuf::from("/etc/hosts.d")])?;
    Ok(!summary.is_empty())
}
