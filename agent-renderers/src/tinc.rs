use crate::util::{get_or, split_ml};
use agent_core::types::{ArtifactBundle, ArtifactFile};
use agent_render::{RenderInput, Renderer};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Switched-mesh flavour, backed by `tincd`. The other of the two
/// mutually exclusive mesh handlers (spec §4.5.1). Owns per-peer host
/// files generated from every node's `/nodes/*/tinc/*` settings, so it
/// requires the `all_nodes` slice.
///
/// Grounded on `original_source/generators/gen_tinc.py`.
pub struct TincRenderer;

fn ipv4_to_subnet(ipv4: &str) -> Vec<String> {
    split_ml(ipv4)
        .into_iter()
        .filter_map(|line| line.parse::<ipnet::IpNet>().ok().map(|n| n.to_string()))
        .collect()
}

fn sanitize_name(name: &str) -> String {
    name.chars().filter(|c| c.is_alphanumeric()).collect()
}

fn normalize_pubkey(pubkey: &str, ed25519: &str) -> String {
    let mut lines: Vec<String> = pubkey
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let ed = ed25519.trim();
    if !ed.is_empty() {
        if !ed.to_lowercase().starts_with("ed25519publickey") {
            lines.push(format!("Ed25519PublicKey = {ed}"));
        } else {
            lines.push(ed.to_string());
        }
    }
    lines.join("\n")
}

#[allow(clippy::too_many_arguments)]
fn host_content(
    address: &str,
    port: &str,
    subnets: &[String],
    mode: &str,
    cipher: &str,
    digest: &str,
    pubkey: &str,
    ed25519: &str,
) -> String {
    let mut lines = Vec::new();
    if !address.is_empty() {
        lines.push(format!("Address={address}"));
    }
    if !mode.is_empty() {
        lines.push(format!("Mode={mode}"));
    }
    if !port.is_empty() {
        lines.push(format!("Port={port}"));
    }
    if !cipher.is_empty() {
        lines.push(format!("Cipher={cipher}"));
    }
    if !digest.is_empty() {
        lines.push(format!("Digest={digest}"));
    }
    for s in subnets {
        lines.push(format!("Subnet={s}"));
    }
    let key_text = normalize_pubkey(pubkey, ed25519);
    lines.push(String::new());
    lines.push(key_text);
    lines.push(String::new());
    lines.join("\n")
}

/// Map `/nodes/<id>/tinc/<key>` entries in the fleet-wide slice to
/// `node_id -> {key: value}`.
fn parse_tinc_nodes(all_nodes: &Value) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut out: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let Value::Object(obj) = all_nodes else {
        return out;
    };
    for (k, v) in obj {
        let Some(rest) = k.strip_prefix("/nodes/") else {
            continue;
        };
        if !rest.contains("/tinc/") {
            continue;
        }
        let Some((node_id, tail)) = rest.split_once('/') else {
            continue;
        };
        let Some(key) = tail.strip_prefix("tinc/") else {
            continue;
        };
        if let Some(s) = v.as_str() {
            out.entry(node_id.to_string())
                .or_default()
                .insert(key.to_string(), s.to_string());
        }
    }
    out
}

#[async_trait]
impl Renderer for TincRenderer {
    fn name(&self) -> &str {
        "tinc"
    }

    fn needs_all_nodes(&self) -> bool {
        true
    }

    async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
        let node = &input.node;
        let global = &input.global;
        let node_id = &input.node_id;
        let all_nodes = input.all_nodes.as_ref().cloned().unwrap_or(Value::Null);

        let netname = get_or(global, "/global/tinc/netname", "mesh");
        if netname.is_empty() {
            anyhow::bail!("missing /global/tinc/netname");
        }

        let prefix = format!("/nodes/{node_id}/tinc/");
        let name = sanitize_name(&get_or(node, &format!("{prefix}name"), node_id));
        if name.is_empty() {
            anyhow::bail!("invalid /nodes/{node_id}/tinc/name (must be alphanumeric)");
        }

        let dev_name = get_or(node, &format!("{prefix}dev_name"), "tnc0");
        let port = get_or(node, &format!("{prefix}port"), "655");
        let address = get_or(node, &format!("{prefix}address"), "");
        let address_family = get_or(node, &format!("{prefix}address_family"), "ipv4");
        let ipv4 = get_or(node, &format!("{prefix}ipv4"), "");
        let mut subnet = get_or(node, &format!("{prefix}subnet"), "");
        if subnet.is_empty() && !ipv4.is_empty() {
            subnet = ipv4_to_subnet(&ipv4).join("\n");
        }
        let host_mode = get_or(node, &format!("{prefix}host_mode"), "");
        let host_cipher = get_or(node, &format!("{prefix}host_cipher"), "");
        let host_digest = get_or(node, &format!("{prefix}host_digest"), "");
        let conf_mode = get_or(node, &format!("{prefix}mode"), "switch");
        let conf_cipher = get_or(global, "/global/tinc/cipher", "");
        let conf_digest = get_or(global, "/global/tinc/digest", "");
        let pubkey = get_or(node, &format!("{prefix}public_key"), "");
        let ed25519 = get_or(node, &format!("{prefix}ed25519_public_key"), "");
        let privkey = get_or(node, &format!("{prefix}private_key"), "");
        let ed25519_priv = get_or(node, &format!("{prefix}ed25519_private_key"), "");

        if pubkey.is_empty() && ed25519.is_empty() {
            anyhow::bail!(
                "missing /nodes/{node_id}/tinc/public_key or /nodes/{node_id}/tinc/ed25519_public_key"
            );
        }
        if privkey.is_empty() && ed25519_priv.is_empty() {
            anyhow::bail!(
                "missing /nodes/{node_id}/tinc/private_key or /nodes/{node_id}/tinc/ed25519_private_key"
            );
        }

        let mut files = Vec::new();
        let nodes = parse_tinc_nodes(&all_nodes);
        let mut connect_to: Vec<String> = Vec::new();

        for (peer_id, cfg) in &nodes {
            if cfg.get("enable").map(String::as_str) != Some("true") {
                continue;
            }
            let peer_name = sanitize_name(cfg.get("name").map(String::as_str).unwrap_or(peer_id));
            if peer_name == name {
                continue;
            }
            let peer_addr = cfg.get("address").cloned().unwrap_or_default();
            let peer_port = cfg.get("port").cloned().unwrap_or_default();
            let mut peer_subnet = cfg.get("subnet").cloned().unwrap_or_default();
            let peer_ipv4 = cfg.get("ipv4").cloned().unwrap_or_default();
            if peer_subnet.is_empty() && !peer_ipv4.is_empty() {
                peer_subnet = ipv4_to_subnet(&peer_ipv4).join("\n");
            }
            let peer_pub = cfg.get("public_key").cloned().unwrap_or_default();
            let peer_ed25519 = cfg.get("ed25519_public_key").cloned().unwrap_or_default();
            if peer_pub.is_empty() && peer_ed25519.is_empty() {
                continue;
            }
            let host_text = host_content(
                &peer_addr,
                &peer_port,
                &split_ml(&peer_subnet),
                cfg.get("host_mode").map(String::as_str).unwrap_or(""),
                cfg.get("host_cipher").map(String::as_str).unwrap_or(""),
                cfg.get("host_digest").map(String::as_str).unwrap_or(""),
                &peer_pub,
                &peer_ed25519,
            );
            files.push(ArtifactFile {
                path: format!("/etc/tinc/{netname}/hosts/{peer_name}"),
                content: host_text.into_bytes(),
                mode: Some(0o644),
            });
            if !peer_addr.is_empty() {
                connect_to.push(peer_name);
            }
        }

        let self_host = host_content(
            &address,
            &port,
            &split_ml(&subnet),
            &host_mode,
            &host_cipher,
            &host_digest,
            &pubkey,
            &ed25519,
        );
        files.push(ArtifactFile {
            path: format!("/etc/tinc/{netname}/hosts/{name}"),
            content: self_host.into_bytes(),
            mode: Some(0o644),
        });

        if !privkey.trim().is_empty() {
            files.push(ArtifactFile {
                path: format!("/etc/tinc/{netname}/rsa_key.priv"),
                content: format!("{}\n", privkey.trim()).into_bytes(),
                mode: Some(0o600),
            });
        }
        if !ed25519_priv.trim().is_empty() {
            files.push(ArtifactFile {
                path: format!("/etc/tinc/{netname}/ed25519_key.priv"),
                content: format!("{}\n", ed25519_priv.trim()).into_bytes(),
                mode: Some(0o600),
            });
        }

        let mut tinc_conf = vec![
            format!("Name={name}"),
            format!("AddressFamily={address_family}"),
            format!("Mode={conf_mode}"),
            "DeviceType=tap".to_string(),
            format!("Interface={dev_name}"),
            format!("Port={port}"),
            "TCPOnly=yes".to_string(),
        ];
        if !conf_cipher.is_empty() {
            tinc_conf.push(format!("Cipher={conf_cipher}"));
        }
        if !conf_digest.is_empty() {
            tinc_conf.push(format!("Digest={conf_digest}"));
        }
        connect_to.sort();
        connect_to.dedup();
        for peer in &connect_to {
            tinc_conf.push(format!("ConnectTo = {peer}"));
        }
        files.push(ArtifactFile {
            path: format!("/etc/tinc/{netname}/tinc.conf"),
            content: format!("{}\n", tinc_conf.join("\n")).into_bytes(),
            mode: Some(0o644),
        });

        let mut tinc_up = vec![
            "#!/bin/sh".to_string(),
            "set -e".to_string(),
            "ip link set \"$INTERFACE\" up".to_string(),
        ];
        if !ipv4.is_empty() {
            tinc_up.push(format!("ip addr add {ipv4} dev \"$INTERFACE\" || true"));
        }
        files.push(ArtifactFile {
            path: format!("/etc/tinc/{netname}/tinc-up"),
            content: format!("{}\n", tinc_up.join("\n")).into_bytes(),
            mode: Some(0o755),
        });

        let mut tinc_down = vec!["#!/bin/sh".to_string(), "set -e".to_string()];
        if !ipv4.is_empty() {
            tinc_down.push(format!("ip addr del {ipv4} dev \"$INTERFACE\" || true"));
        }
        files.push(ArtifactFile {
            path: format!("/etc/tinc/{netname}/tinc-down"),
            content: format!("{}\n", tinc_down.join("\n")).into_bytes(),
            mode: Some(0o755),
        });

        files.push(ArtifactFile {
            path: "/etc/tinc/.netname".to_string(),
            content: format!("{netname}\n").into_bytes(),
            mode: Some(0o644),
        });

        Ok(ArtifactBundle { files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_name_strips_non_alphanumeric() {
        assert_eq!(sanitize_name("node-1.example"), "node1example");
    }

    #[test]
    fn normalize_pubkey_appends_ed25519_header() {
        let text = normalize_pubkey("", "ABCDEF");
        assert_eq!(text, "Ed25519PublicKey = ABCDEF");
    }

    #[tokio::test]
    async fn rejects_missing_keys() {
        let r = TincRenderer;
        let input = RenderInput {
            node_id: "n1".to_string(),
            node: json!({}),
            global: json!({"/global/tinc/netname": "mesh"}),
            all_nodes: Some(json!({})),
        };
        let res = r.render(&input).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn renders_self_host_and_conf() {
        let r = TincRenderer;
        let input = RenderInput {
            node_id: "n1".to_string(),
            node: json!({
                "/nodes/n1/tinc/public_key": "PUBKEY",
                "/nodes/n1/tinc/private_key": "PRIVKEY",
            }),
            global: json!({"/global/tinc/netname": "mesh"}),
            all_nodes: Some(json!({})),
        };
        let bundle = r.render(&input).await.unwrap();
        let paths: Vec<&str> = bundle.files.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"/etc/tinc/mesh/hosts/n1"));
        assert!(paths.contains(&"/etc/tinc/mesh/tinc.conf"));
        assert!(paths.contains(&"/etc/tinc/mesh/rsa_key.priv"));
    }
}
