use crate::agent::Agent;
use crate::handlers::{forwarder, hosts, mesh, proxy, resolver, routing, tunnels};
use crate::liveness::LivenessPublisher;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

fn map_to_value(map: BTreeMap<String, String>) -> Value {
    Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

/// Runs one full reconcile pass (spec §4.7): read every prefix this
/// node's handlers might need, then apply each subsystem handler in the
/// fixed order the spec names, publishing liveness once if anything
/// actually changed.
///
/// Non-reentrant via `try_lock` (spec §3 Invariant 1) — if a pass is
/// already in flight this trigger is simply dropped; the periodic timer
/// or the next watch tick will catch up.
pub async fn reconcile_once(agent: &Arc<Agent>) -> anyhow::Result<()> {
    let Ok(_guard) = agent.reconcile_lock.try_lock() else {
        info!("reconcile already in progress, skipping this trigger");
        return Ok(());
    };

    let force = agent.take_force_flag();
    let node = map_to_value(agent.kv.get_prefix(&agent.schema.node_prefix()).await?);
    let global = map_to_value(agent.kv.get_prefix(&agent.schema.global_prefix()).await?);
    let all_nodes = map_to_value(agent.kv.get_prefix(&agent.schema.all_nodes_prefix()).await?);
    let dns_hosts = map_to_value(agent.kv.get_prefix(&agent.schema.dns_hosts_prefix()).await?);

    let mut changed = false;
    changed |= run_handler("forwarder", forwarder::handle(agent, &node, &global, force)).await?;
    changed |= run_handler("mesh", mesh::handle(agent, &node, &global, &all_nodes, force)).await?;
    changed |= run_handler("tunnel:openvpn", tunnels::handle_openvpn(agent, &node, &global, force)).await?;
    changed |= run_handler("tunnel:wireguard", tunnels::handle_wireguard(agent, &node, &global, force)).await?;
    changed |= run_handler("routing", routing::handle(agent, &node, &global, &all_nodes, force)).await?;
    changed |= run_handler("proxy", proxy::handle(agent, &node, &global, force)).await?;
    changed |= run_handler("resolver", resolver::handle(agent, &node, &global, force)).await?;
    changed |= run_handler("hosts", hosts::handle(agent, &dns_hosts)).await?;

    if changed {
        LivenessPublisher::publish(agent, "config-applied").await;
    }

    Ok(())
}

/// Awaits one handler's future. A [`agent_core::AgentError::Renderer`]
/// error is handler-scoped (spec §7): logged and swallowed so the rest
/// of the pass still runs. Anything else is a reason to abort the whole
/// pass, so it propagates.
async fn run_handler<F>(name: &str, fut: F) -> anyhow::Result<bool>
where
    F: Future<Output = anyhow::Result<bool>>,
{
    match fut.await {
        Ok(did_apply) => Ok(did_apply),
        Err(e) => {
            if e.downcast_ref::<agent_core::AgentError>().map(|e| e.is_handler_scoped()).unwrap_or(false) {
                error!(handler = name, error = %e, "handler-scoped error, continuing with remaining handlers");
                Ok(false)
            } else {
                error!(handler = name, error = %e, "aborting reconcile pass");
                Err(e)
            }
        }
    }
}
