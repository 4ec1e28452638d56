use crate::openvpn;
use crate::util::{node_lans, split_ml};
use crate::wireguard;
use agent_core::types::{ArtifactBundle, ArtifactFile};
use agent_render::{RenderInput, Renderer};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Tag applied to routes redistributed from BGP into OSPF, so they are
/// never redistributed back from OSPF into BGP (spec §4.5.3).
const TAG_NO_REINJECT: u32 = 65000;

/// Internal/external dynamic routing (OSPF + BGP) handler, the one
/// renderer that needs the fleet-wide `all_nodes` slice to discover
/// iBGP neighbors by `router_id` (spec §4.3, §4.5.3).
///
/// Grounded on `original_source/generators/gen_frr.py`.
pub struct RoutingRenderer;

struct NeighborInfo {
    router_id: String,
    is_exit: bool,
    name: String,
}

fn parse_prefix_list_rules(multiline: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut rules = Vec::new();
    if multiline.is_empty() {
        return Ok(rules);
    }
    for line in split_ml(multiline) {
        let mut parts = line.splitn(2, char::is_whitespace);
        let action = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();
        let action = action.to_lowercase();
        if rest.is_empty() || (action != "permit" && action != "deny") {
            anyhow::bail!("invalid prefix-list rule line: {line:?}");
        }
        rules.push((action, rest.to_string()));
    }
    Ok(rules)
}

fn bgp_enabled(cfg: &BTreeMap<String, String>) -> bool {
    cfg.get("bgp/enable").map(String::as_str).unwrap_or("true") == "true"
}

type Transport = (&'static str, String, BTreeMap<String, String>, String);

fn node_is_exit(ovpn: &[Transport], wg: &[Transport]) -> bool {
    for (_, _, cfg, _) in ovpn.iter().chain(wg.iter()) {
        if cfg.get("enable").map(String::as_str) != Some("true") {
            continue;
        }
        if !bgp_enabled(cfg) {
            continue;
        }
        let peer_ip = cfg.get("bgp/peer_ip").map(String::as_str).unwrap_or("");
        let peer_asn = cfg.get("bgp/peer_asn").map(String::as_str).unwrap_or("");
        if !peer_ip.is_empty() && !peer_asn.is_empty() {
            return true;
        }
    }
    false
}

fn transports_for(node_id: &str, node: &Value) -> (Vec<Transport>, Vec<Transport>) {
    let input = RenderInput {
        node_id: node_id.to_string(),
        node: node.clone(),
        global: Value::Null,
        all_nodes: None,
    };
    let ovpn = openvpn::parse_instances(&input)
        .into_iter()
        .map(|(inst, cfg)| ("openvpn", inst.name, cfg, inst.dev))
        .collect();
    let wg = wireguard::parse_instances(&input)
        .into_iter()
        .map(|(inst, cfg)| ("wireguard", inst.name, cfg, inst.dev))
        .collect();
    (ovpn, wg)
}

/// Discover this node's fellow mesh members by scanning `all_nodes`
/// for any node advertising a `router_id`, the signal that it
/// participates in internal (iBGP) routing (spec §4.5.3).
fn internal_bgp_neighbors(node_id: &str, all_nodes: &Value) -> BTreeMap<String, NeighborInfo> {
    let mut out = BTreeMap::new();
    let Value::Object(obj) = all_nodes else {
        return out;
    };
    let mut per_node: BTreeMap<String, Value> = BTreeMap::new();
    for (k, v) in obj {
        let Some(rest) = k.strip_prefix("/nodes/") else {
            continue;
        };
        let Some((nid, _tail)) = rest.split_once('/') else {
            continue;
        };
        let entry = per_node.entry(nid.to_string()).or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = entry {
            map.insert(k.clone(), v.clone());
        }
    }
    for (nid, data) in &per_node {
        if nid == node_id {
            continue;
        }
        let router_id = data
            .get(format!("/nodes/{nid}/router_id"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if router_id.is_empty() {
            continue;
        }
        let (ovpn, wg) = transports_for(nid, data);
        out.insert(
            nid.clone(),
            NeighborInfo {
                router_id: router_id.to_string(),
                is_exit: node_is_exit(&ovpn, &wg),
                name: nid.clone(),
            },
        );
    }
    out
}

#[allow(clippy::too_many_lines)]
fn generate_frr(input: &RenderInput) -> anyhow::Result<String> {
    let node_id = &input.node_id;
    let node = &input.node;
    let global = &input.global;

    let get_node = |k: &str| node.get(k).and_then(Value::as_str).unwrap_or("");
    let get_global = |k: &str, default: &str| global.get(k).and_then(Value::as_str).unwrap_or(default);

    let router_id = get_node(&format!("/nodes/{node_id}/router_id")).to_string();
    let internal_routing = get_global("/global/internal_routing_system", "ospf").to_string();
    let mut ospf_enable = get_node(&format!("/nodes/{node_id}/ospf/enable")) == "true";
    let bgp_enable = get_node(&format!("/nodes/{node_id}/bgp/enable")) == "true";

    let local_as = get_node(&format!("/nodes/{node_id}/bgp/local_asn")).to_string();
    let max_paths = {
        let v = get_node(&format!("/nodes/{node_id}/bgp/max_paths"));
        if v.is_empty() { "1".to_string() } else { v.to_string() }
    };
    let to_ospf_default_only = get_node(&format!("/nodes/{node_id}/bgp/to_ospf/default_only")) == "true";
    let ospf_redistribute_bgp = {
        let v = get_node(&format!("/nodes/{node_id}/ospf/redistribute_bgp"));
        if v.is_empty() { true } else { v == "true" }
    };
    let inject_site_lan = {
        let v = get_node(&format!("/nodes/{node_id}/ospf/inject_site_lan"));
        if v.is_empty() { true } else { v == "true" }
    };
    let inject_private_lan = {
        let v = get_node(&format!("/nodes/{node_id}/ospf/inject_private_lan"));
        if v.is_empty() { true } else { v == "true" }
    };

    let bgp_transit_raw = get_global("/global/bgp/transit", "");
    let mut bgp_transit_as_list: BTreeSet<String> = BTreeSet::new();
    let mut bgp_transit_all = false;
    if !bgp_transit_raw.is_empty() {
        for line in split_ml(bgp_transit_raw) {
            if line == "*" {
                bgp_transit_all = true;
            } else {
                bgp_transit_as_list.insert(line);
            }
        }
    }

    let bgp_edge_broadcast: Vec<String> = {
        let mut v: BTreeSet<String> = split_ml(get_global("/global/bgp/edge_broadcast", "")).into_iter().collect();
        v.drain(..).collect()
    };

    if internal_routing == "bgp" {
        ospf_enable = false;
    }

    let in_rules_ml = get_global("/global/bgp/filter/in", "");
    let out_rules_ml = get_global("/global/bgp/filter/out", "");
    let in_rules = if !in_rules_ml.is_empty() {
        parse_prefix_list_rules(in_rules_ml)?
    } else {
        vec![
            ("deny".to_string(), "0.0.0.0/0".to_string()),
            ("permit".to_string(), "0.0.0.0/0 le 32".to_string()),
        ]
    };
    let out_rules = if !out_rules_ml.is_empty() {
        parse_prefix_list_rules(out_rules_ml)?
    } else {
        vec![("permit".to_string(), "0.0.0.0/0 le 32".to_string())]
    };

    let active_key = format!("/nodes/{node_id}/ospf/active_ifaces");
    let active_ifaces: Vec<String> = if node.get(&active_key).is_some() {
        let mut v: BTreeSet<String> = split_ml(get_node(&active_key)).into_iter().collect();
        v.drain(..).collect()
    } else {
        let prefix = format!("{active_key}/");
        let mut set = BTreeSet::new();
        if let Value::Object(obj) = node {
            for k in obj.keys() {
                if let Some(tail) = k.strip_prefix(&prefix) {
                    if let Some(last) = tail.split('/').last() {
                        set.insert(last.to_string());
                    }
                }
            }
        }
        set.into_iter().collect()
    };

    let lans = if inject_site_lan { node_lans(node, node_id) } else { Vec::new() };
    let private_lans: Vec<String> = if inject_private_lan {
        let mut v: BTreeSet<String> =
            split_ml(get_node(&format!("/nodes/{node_id}/private_lan"))).into_iter().collect();
        v.drain(..).collect()
    } else {
        Vec::new()
    };

    let mut lines: Vec<String> = vec![
        "frr defaults traditional".to_string(),
        "service integrated-vtysh-config".to_string(),
        format!("hostname {node_id}"),
    ];
    if !router_id.is_empty() {
        lines.push(format!("ip router-id {router_id}"));
    }

    lines.push(String::new());
    lines.push("ip prefix-list PL-DEFAULT seq 10 permit 0.0.0.0/0".to_string());
    lines.push(String::new());

    if !lans.is_empty() {
        let mut seq = 10;
        for pfx in &lans {
            lines.push(format!("ip prefix-list PL-OSPF-LAN seq {seq} permit {pfx}"));
            seq += 10;
        }
        lines.push(String::new());
        lines.push("route-map RM-OSPF-CONN permit 10".to_string());
        lines.push(" match ip address prefix-list PL-OSPF-LAN".to_string());
        lines.push("!".to_string());
        lines.push(String::new());
    }

    if !private_lans.is_empty() {
        let mut seq = 10;
        for pfx in &private_lans {
            lines.push(format!("ip prefix-list PL-OSPF-PRIVATE-LAN seq {seq} permit {pfx}"));
            seq += 10;
        }
        lines.push(String::new());
        lines.push("route-map RM-OSPF-CONN-PRIVATE permit 10".to_string());
        lines.push(" match ip address prefix-list PL-OSPF-PRIVATE-LAN".to_string());
        lines.push("!".to_string());
        lines.push(String::new());
    }

    let mut seq = 10;
    for (action, rest) in &in_rules {
        lines.push(format!("ip prefix-list PL-BGP-IN seq {seq} {action} {rest}"));
        seq += 10;
    }
    lines.push(String::new());
    lines.push("route-map RM-BGP-IN permit 10".to_string());
    lines.push(" match ip address prefix-list PL-BGP-IN".to_string());
    lines.push("!".to_string());
    lines.push(String::new());

    let mut seq = 10;
    for (action, rest) in &out_rules {
        lines.push(format!("ip prefix-list PL-BGP-OUT seq {seq} {action} {rest}"));
        seq += 10;
    }
    lines.push("route-map RM-BGP-OUT permit 10".to_string());
    lines.push(" match ip address prefix-list PL-BGP-OUT".to_string());
    lines.push("!".to_string());
    lines.push(String::new());

    let (ovpn, wg) = transports_for(node_id, node);
    let self_is_exit = node_is_exit(&ovpn, &wg);

    let mut local_originated_prefixes: BTreeSet<String> = lans.iter().cloned().collect();
    if internal_routing == "bgp" {
        local_originated_prefixes.extend(private_lans.iter().cloned());
    }
    if !local_originated_prefixes.is_empty() || !bgp_edge_broadcast.is_empty() {
        let mut seq = 10;
        for pfx in &local_originated_prefixes {
            lines.push(format!("ip prefix-list PL-LOCAL-ORIGINATED seq {seq} permit {pfx}"));
            seq += 10;
        }
        if self_is_exit {
            for pfx in &bgp_edge_broadcast {
                lines.push(format!("ip prefix-list PL-LOCAL-ORIGINATED seq {seq} permit {pfx}"));
                seq += 10;
            }
        }
        lines.push(String::new());
    }

    if !private_lans.is_empty() {
        let mut seq = 10;
        for pfx in &private_lans {
            lines.push(format!("ip prefix-list PL-PRIVATE-LAN seq {seq} permit {pfx}"));
            seq += 10;
        }
        lines.push(String::new());
    }

    if !private_lans.is_empty() {
        lines.push("route-map RM-BGP-OUT-EXTERNAL deny 5".to_string());
        lines.push(" match ip address prefix-list PL-PRIVATE-LAN".to_string());
        lines.push("route-map RM-BGP-OUT-EXTERNAL permit 10".to_string());
        lines.push(" match ip address prefix-list PL-BGP-OUT".to_string());
        lines.push("!".to_string());
        lines.push(String::new());
        lines.push("route-map RM-BGP-OUT-INTERNAL permit 5".to_string());
        lines.push(" match ip address prefix-list PL-PRIVATE-LAN".to_string());
        lines.push("route-map RM-BGP-OUT-INTERNAL permit 10".to_string());
        lines.push(" match ip address prefix-list PL-BGP-OUT".to_string());
        lines.push("!".to_string());
        lines.push(String::new());
    }

    if !private_lans.is_empty() {
        lines.push("route-map RM-OSPF-TO-BGP deny 10".to_string());
        lines.push(" match ip address prefix-list PL-PRIVATE-LAN".to_string());
        lines.push("!".to_string());
    }

    lines.push("route-map RM-OSPF-TO-BGP deny 20".to_string());
    lines.push(format!(" match tag {TAG_NO_REINJECT}"));
    lines.push("!".to_string());
    lines.push("route-map RM-OSPF-TO-BGP permit 30".to_string());
    lines.push("!".to_string());
    lines.push(String::new());

    lines.push("route-map RM-BGP-TO-OSPF permit 10".to_string());
    if to_ospf_default_only {
        lines.push(" match ip address prefix-list PL-DEFAULT".to_string());
    }
    lines.push(format!(" set tag {TAG_NO_REINJECT}"));
    lines.push("!".to_string());
    lines.push(String::new());

    if ospf_enable {
        let ospf_area = {
            let v = get_node(&format!("/nodes/{node_id}/ospf/area"));
            if v.is_empty() { "0".to_string() } else { v.to_string() }
        };
        for iface in &active_ifaces {
            lines.push(format!("interface {iface}"));
            lines.push(format!(" ip ospf area {ospf_area}"));
            lines.push(" ip ospf network broadcast".to_string());
            lines.push("!".to_string());
        }
        lines.push("router ospf".to_string());
        if !router_id.is_empty() {
            lines.push(format!(" ospf router-id {router_id}"));
        }
        if !active_ifaces.is_empty() {
            lines.push(" passive-interface default".to_string());
            for iface in &active_ifaces {
                lines.push(format!(" no passive-interface {iface}"));
            }
        }
        if !lans.is_empty() {
            lines.push(" redistribute connected route-map RM-OSPF-CONN".to_string());
        }
        if !private_lans.is_empty() {
            lines.push(" redistribute connected route-map RM-OSPF-CONN-PRIVATE".to_string());
        }
        if ospf_redistribute_bgp && bgp_enable {
            lines.push(" redistribute bgp route-map RM-BGP-TO-OSPF".to_string());
        }
        lines.push("!".to_string());
        lines.push(String::new());
    }

    if bgp_enable && !local_as.is_empty() {
        let mut neighbor_route_maps: BTreeMap<String, (String, String)> = BTreeMap::new();

        let all_transports: Vec<&Transport> = ovpn.iter().chain(wg.iter()).collect();
        for (_kind, _name, cfg, _dev) in &all_transports {
            if cfg.get("enable").map(String::as_str) != Some("true") || !bgp_enabled(cfg) {
                continue;
            }
            let peer_ip = cfg.get("bgp/peer_ip").cloned().unwrap_or_default();
            let peer_asn = cfg.get("bgp/peer_asn").cloned().unwrap_or_default();
            if peer_ip.is_empty() || peer_asn.is_empty() {
                continue;
            }
            let no_transit = cfg.get("bgp/no_transit").map(String::as_str) == Some("true");
            let no_forward = cfg.get("bgp/no_forward").map(String::as_str) == Some("true");

            let rm_in = "RM-BGP-IN".to_string();
            let default_out = if !private_lans.is_empty() { "RM-BGP-OUT-EXTERNAL" } else { "RM-BGP-OUT" };
            let mut rm_out = default_out.to_string();

            // no_forward takes precedence over no_transit: more restrictive wins.
            if no_forward {
                rm_out = format!("RM-BGP-OUT-{}", peer_ip.replace('.', "-"));
                lines.push(format!("route-map {rm_out} permit 10"));
                lines.push(" match ip address prefix-list PL-LOCAL-ORIGINATED".to_string());
                lines.push(format!(" call {default_out}"));
                lines.push("!".to_string());
                lines.push(String::new());
            } else if no_transit {
                rm_out = format!("RM-BGP-OUT-{}", peer_ip.replace('.', "-"));
                let tag = peer_ip.replace('.', "-");
                lines.push(format!("bgp as-path access-list AS-PATH-FROM-{tag} permit _{peer_asn}_"));
                lines.push(format!("bgp as-path access-list AS-PATH-FROM-{tag} permit ^{peer_asn} "));
                lines.push(format!("bgp as-path access-list AS-PATH-FROM-{tag} permit ^{peer_asn}$"));
                lines.push(String::new());
                lines.push(format!("route-map {rm_out} permit 5"));
                lines.push(" match ip address prefix-list PL-LOCAL-ORIGINATED".to_string());
                lines.push(format!(" call {default_out}"));
                lines.push(format!("route-map {rm_out} permit 10"));
                lines.push(format!(" match as-path AS-PATH-FROM-{tag}"));
                lines.push(format!(" call {default_out}"));
                lines.push("!".to_string());
                lines.push(String::new());
            }

            neighbor_route_maps.insert(peer_ip, (rm_in, rm_out));
        }

        lines.push(format!("router bgp {local_as}"));
        if !router_id.is_empty() {
            lines.push(format!(" bgp router-id {router_id}"));
        }

        for (kind, name, cfg, dev) in &all_transports {
            if cfg.get("enable").map(String::as_str) != Some("true") || !bgp_enabled(cfg) {
                continue;
            }
            let peer_ip = cfg.get("bgp/peer_ip").cloned().unwrap_or_default();
            let peer_asn = cfg.get("bgp/peer_asn").cloned().unwrap_or_default();
            let update_source = if *kind == "wireguard" {
                dev.clone()
            } else {
                let explicit = cfg.get("bgp/update_source").cloned().unwrap_or_default();
                if explicit.is_empty() { dev.clone() } else { explicit }
            };
            if !peer_ip.is_empty() && !peer_asn.is_empty() && !update_source.is_empty() {
                let desc = if *kind == "openvpn" { name.clone() } else { format!("wg-{name}") };
                lines.push(format!(" neighbor {peer_ip} remote-as {peer_asn}"));
                lines.push(format!(" neighbor {peer_ip} description {desc}"));
                lines.push(format!(" neighbor {peer_ip} update-source {update_source}"));
            }
        }

        let mut ibgp_neighbors: Vec<NeighborInfo> = Vec::new();
        if internal_routing == "bgp" {
            let neighbors = internal_bgp_neighbors(node_id, input.all_nodes.as_ref().unwrap_or(&Value::Null));
            for (_nid, info) in neighbors {
                lines.push(format!(" neighbor {} remote-as internal", info.router_id));
                lines.push(format!(" neighbor {} description {}", info.router_id, info.name));
                lines.push(format!(" neighbor {} update-source {router_id}", info.router_id));
                ibgp_neighbors.push(info);
            }
        }

        lines.push(" address-family ipv4 unicast".to_string());
        lines.push(format!("  maximum-paths {max_paths}"));
        for pfx in &lans {
            lines.push(format!("  network {pfx}"));
        }
        if internal_routing == "bgp" {
            for pfx in &private_lans {
                lines.push(format!("  network {pfx}"));
            }
        }
        if self_is_exit {
            for pfx in &bgp_edge_broadcast {
                lines.push(format!("  network {pfx}"));
            }
        }
        if ospf_enable {
            lines.push("  redistribute ospf route-map RM-OSPF-TO-BGP".to_string());
        }

        for (_kind, _name, cfg, dev) in &all_transports {
            if cfg.get("enable").map(String::as_str) != Some("true") || !bgp_enabled(cfg) {
                continue;
            }
            let peer_ip = cfg.get("bgp/peer_ip").cloned().unwrap_or_default();
            let peer_asn = cfg.get("bgp/peer_asn").cloned().unwrap_or_default();
            let weight = cfg.get("bgp/weight").cloned().unwrap_or_default();
            let weight = weight.trim();
            let update_source = if *_kind == "wireguard" {
                dev.clone()
            } else {
                let explicit = cfg.get("bgp/update_source").cloned().unwrap_or_default();
                if explicit.is_empty() { dev.clone() } else { explicit }
            };
            if peer_ip.is_empty() || peer_asn.is_empty() || update_source.is_empty() {
                continue;
            }
            lines.push(format!("  neighbor {peer_ip} activate"));
            if !weight.is_empty() {
                lines.push(format!("  neighbor {peer_ip} weight {weight}"));
            }
            let default_out = if !private_lans.is_empty() { "RM-BGP-OUT-EXTERNAL" } else { "RM-BGP-OUT" };
            let (rm_in, rm_out) = neighbor_route_maps
                .get(&peer_ip)
                .cloned()
                .unwrap_or(("RM-BGP-IN".to_string(), default_out.to_string()));
            lines.push(format!("  neighbor {peer_ip} route-map {rm_in} in"));
            lines.push(format!("  neighbor {peer_ip} route-map {rm_out} out"));
            if bgp_transit_all || (!bgp_transit_as_list.is_empty() && bgp_transit_as_list.contains(&peer_asn)) {
                lines.push(format!("  neighbor {peer_ip} next-hop-self"));
            }
        }

        for info in &ibgp_neighbors {
            let peer_ip = &info.router_id;
            lines.push(format!("  neighbor {peer_ip} activate"));
            lines.push(format!("  neighbor {peer_ip} route-map RM-BGP-IN in"));
            if !private_lans.is_empty() {
                lines.push(format!("  neighbor {peer_ip} route-map RM-BGP-OUT-INTERNAL out"));
            } else {
                lines.push(format!("  neighbor {peer_ip} route-map RM-BGP-OUT out"));
            }
            lines.push(format!("  neighbor {peer_ip} next-hop-self"));
        }
        lines.push(" exit-address-family".to_string());
        lines.push("!".to_string());
        lines.push(String::new());
    }

    Ok(format!("{}\n", lines.join("\n").trim()))
}

#[async_trait]
impl Renderer for RoutingRenderer {
    fn name(&self) -> &str {
        "frr"
    }

    fn needs_all_nodes(&self) -> bool {
        true
    }

    async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
        let conf = generate_frr(input)?;
        Ok(ArtifactBundle {
            files: vec![ArtifactFile {
                path: "/etc/frr/frr.conf".to_string(),
                content: conf.into_bytes(),
                mode: None,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(node: Value, global: Value, all_nodes: Option<Value>) -> RenderInput {
        RenderInput { node_id: "n1".to_string(), node, global, all_nodes }
    }

    #[test]
    fn bgp_enabled_defaults_true() {
        let cfg: BTreeMap<String, String> = BTreeMap::new();
        assert!(bgp_enabled(&cfg));
    }

    #[test]
    fn parse_prefix_list_rules_rejects_bad_action() {
        let res = parse_prefix_list_rules("foo 10.0.0.0/8");
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn renders_minimal_ospf_config() {
        let r = RoutingRenderer;
        let node = json!({
            "/nodes/n1/router_id": "1.1.1.1",
            "/nodes/n1/ospf/enable": "true",
            "/nodes/n1/lan": "10.0.0.0/24",
        });
        let bundle = r.render(&input(node, json!({}), Some(json!({})))).await.unwrap();
        let text = String::from_utf8(bundle.files[0].content.clone()).unwrap();
        assert!(text.contains("router ospf"));
        assert!(text.contains("ip router-id 1.1.1.1"));
    }

    #[tokio::test]
    async fn no_forward_beats_no_transit() {
        let r = RoutingRenderer;
        let node = json!({
            "/nodes/n1/bgp/enable": "true",
            "/nodes/n1/bgp/local_asn": "65001",
            "/nodes/n1/openvpn/wan0/enable": "true",
            "/nodes/n1/openvpn/wan0/bgp/peer_ip": "192.0.2.1",
            "/nodes/n1/openvpn/wan0/bgp/peer_asn": "65002",
            "/nodes/n1/openvpn/wan0/bgp/no_transit": "true",
            "/nodes/n1/openvpn/wan0/bgp/no_forward": "true",
        });
        let bundle = r.render(&input(node, json!({}), Some(json!({})))).await.unwrap();
        let text = String::from_utf8(bundle.files[0].content.clone()).unwrap();
        assert!(text.contains("route-map RM-BGP-OUT-192-0-2-1 permit 10"));
        assert!(!text.contains("as-path access-list"));
    }
}
