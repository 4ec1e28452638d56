use crate::util::{group_by_instance, split_ml};
use agent_core::types::{ArtifactBundle, ArtifactFile};
use agent_render::{RenderInput, Renderer};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Modern-wg point-to-point tunnel handler (spec §4.5.2). Each enabled
/// instance produces one `wg-quick` style config file.
///
/// Grounded on `original_source/generators/gen_wireguard.py`.
pub struct WireguardRenderer;

/// One declared tunnel instance, surfaced so the supervisor-facing
/// handler can decide what to declare/undeclare (spec §4.5.2) without
/// re-parsing the slice itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInstance {
    pub name: String,
    pub dev: String,
    pub enabled: bool,
}

pub fn dev_name(name: &str) -> String {
    match name.chars().last() {
        Some(c) if c.is_ascii_digit() => format!("wg{c}"),
        _ => format!("wg-{name}"),
    }
}

fn add_kv(lines: &mut Vec<String>, key: &str, value: &str) {
    if !value.is_empty() {
        lines.push(format!("{key} = {value}"));
    }
}

fn parse_peers(cfg: &BTreeMap<String, String>) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut peers: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for (key, val) in cfg {
        let Some(rest) = key.strip_prefix("peer/") else {
            continue;
        };
        let Some((name, field)) = rest.split_once('/') else {
            continue;
        };
        peers
            .entry(name.to_string())
            .or_default()
            .insert(field.to_string(), val.clone());
    }
    peers
}

fn build_config(cfg: &BTreeMap<String, String>) -> String {
    let mut lines = vec!["[Interface]".to_string()];
    add_kv(&mut lines, "PrivateKey", cfg.get("private_key").map(String::as_str).unwrap_or(""));

    for addr in split_ml(cfg.get("address").map(String::as_str).unwrap_or("")) {
        lines.push(format!("Address = {addr}"));
    }
    for dns in split_ml(cfg.get("dns").map(String::as_str).unwrap_or("")) {
        lines.push(format!("DNS = {dns}"));
    }
    add_kv(&mut lines, "ListenPort", cfg.get("listen_port").map(String::as_str).unwrap_or(""));
    add_kv(&mut lines, "MTU", cfg.get("mtu").map(String::as_str).unwrap_or(""));
    lines.push("Table = off".to_string());
    lines.push("PreUp = /bin/true".to_string());
    lines.push("PostUp = /bin/true".to_string());
    lines.push("PreDown = /bin/true".to_string());
    lines.push("PostDown = /bin/true".to_string());

    let peers = parse_peers(cfg);
    for (_name, peer) in &peers {
        lines.push(String::new());
        lines.push("[Peer]".to_string());
        add_kv(&mut lines, "PublicKey", peer.get("public_key").map(String::as_str).unwrap_or(""));
        add_kv(&mut lines, "PresharedKey", peer.get("preshared_key").map(String::as_str).unwrap_or(""));
        let mut allowed = split_ml(peer.get("allowed_ips").map(String::as_str).unwrap_or(""));
        if allowed.is_empty() {
            allowed.push("0.0.0.0/0".to_string());
        }
        lines.push(format!("AllowedIPs = {}", allowed.join(", ")));
        add_kv(&mut lines, "Endpoint", peer.get("endpoint").map(String::as_str).unwrap_or(""));
        add_kv(
            &mut lines,
            "PersistentKeepalive",
            peer.get("persistent_keepalive").map(String::as_str).unwrap_or(""),
        );
    }

    format!("{}\n", lines.join("\n").trim_end())
}

/// Flatten each instance's `(tail, value)` pairs into a plain map, the
/// shape `build_config` expects.
fn to_cfg_map(pairs: &[(String, String)]) -> BTreeMap<String, String> {
    pairs.iter().cloned().collect()
}

pub fn parse_instances(input: &RenderInput) -> Vec<(TunnelInstance, BTreeMap<String, String>)> {
    let prefix = format!("/nodes/{}/wireguard/", input.node_id);
    let grouped = group_by_instance(&input.node, &prefix);
    grouped
        .into_iter()
        .map(|(name, pairs)| {
            let cfg = to_cfg_map(&pairs);
            let enabled = cfg.get("enable").map(String::as_str) == Some("true");
            let dev = cfg.get("dev").filter(|d| !d.is_empty()).cloned().unwrap_or_else(|| dev_name(&name));
            (TunnelInstance { name, dev, enabled }, cfg)
        })
        .collect()
}

#[async_trait]
impl Renderer for WireguardRenderer {
    fn name(&self) -> &str {
        "wireguard"
    }

    async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
        let mut files = Vec::new();
        for (instance, cfg) in parse_instances(input) {
            if !instance.enabled {
                continue;
            }
            let config_text = build_config(&cfg);
            files.push(ArtifactFile {
                path: format!("/etc/wireguard/{}.conf", instance.dev),
                content: config_text.into_bytes(),
                mode: Some(0o600),
            });
        }
        Ok(ArtifactBundle { files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dev_name_uses_trailing_digit() {
        assert_eq!(dev_name("wg0"), "wg0");
        assert_eq!(dev_name("office"), "wg-office");
    }

    #[tokio::test]
    async fn renders_one_file_per_enabled_instance() {
        let r = WireguardRenderer;
        let input = RenderInput {
            node_id: "n1".to_string(),
            node: json!({
                "/nodes/n1/wireguard/wg0/enable": "true",
                "/nodes/n1/wireguard/wg0/private_key": "PRIV",
                "/nodes/n1/wireguard/wg0/address": "10.0.0.1/32",
                "/nodes/n1/wireguard/wg0/peer/p1/public_key": "PUB",
                "/nodes/n1/wireguard/wg1/enable": "false",
            }),
            global: json!({}),
            all_nodes: None,
        };
        let bundle = r.render(&input).await.unwrap();
        assert_eq!(bundle.files.len(), 1);
        assert_eq!(bundle.files[0].path, "/etc/wireguard/wg0.conf");
        let text = String::from_utf8(bundle.files[0].content.clone()).unwrap();
        assert!(text.contains("PrivateKey = PRIV"));
        assert!(text.contains("AllowedIPs = 0.0.0.0/0"));
    }

    #[test]
    fn parse_instances_reports_disabled_too() {
        let input = RenderInput {
            node_id: "n1".to_string(),
            node: json!({"/nodes/n1/wireguard/wg1/enable": "false"}),
            global: json!({}),
            all_nodes: None,
        };
        let instances = parse_instances(&input);
        assert_eq!(instances.len(), 1);
        assert!(!instances[0].0.enabled);
    }
}
