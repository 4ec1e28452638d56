use crate::util::{group_by_instance, split_ml};
use agent_core::types::{ArtifactBundle, ArtifactFile};
use agent_render::{RenderInput, Renderer};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Classic point-to-point/site tunnel handler (spec §4.5.2), backed by
/// `openvpn`. Unlike WireGuard, secret material is externalized to
/// individual mode-0600 files rather than inlined into the main config.
///
/// Grounded on `original_source/generators/gen_openvpn.py`.
pub struct OpenvpnRenderer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInstance {
    pub name: String,
    pub dev: String,
    pub enabled: bool,
}

pub fn dev_name(name: &str) -> String {
    match name.chars().last() {
        Some(c) if c.is_ascii_digit() => format!("tun{c}"),
        _ => format!("tun-{name}"),
    }
}

fn is_inline(text: &str) -> bool {
    text.contains('\n') || text.contains("-----BEGIN")
}

/// Externalize one secret field to its own generated file. Rejects
/// values that look like a bare filesystem path rather than inline PEM
/// content, mirroring `gen_openvpn.py`'s `_file_ref` guard.
fn file_ref(name: &str, kind: &str, value: &str) -> anyhow::Result<(String, ArtifactFile)> {
    if value.starts_with('/') && !is_inline(value) {
        anyhow::bail!("{kind} must be inline content, not a file path");
    }
    let ext = kind.replace('_', "");
    let path = format!("/etc/openvpn/generated/{name}.{ext}");
    let mut content = value.trim_end().to_string();
    content.push('\n');
    Ok((
        path.clone(),
        ArtifactFile {
            path,
            content: content.into_bytes(),
            mode: Some(0o600),
        },
    ))
}

fn maybe_line(lines: &mut Vec<String>, key: &str, value: &str) {
    if !value.is_empty() {
        lines.push(format!("{key} {value}"));
    }
}

fn build_config(name: &str, cfg: &BTreeMap<String, String>) -> anyhow::Result<(String, Vec<ArtifactFile>)> {
    let mut files = Vec::new();
    let mut lines = Vec::new();
    let get = |k: &str| cfg.get(k).map(String::as_str).unwrap_or("");

    let dev = {
        let explicit = get("dev");
        if explicit.is_empty() {
            dev_name(name)
        } else {
            explicit.to_string()
        }
    };
    maybe_line(&mut lines, "dev", &dev);
    maybe_line(&mut lines, "dev-type", get("dev_type"));
    maybe_line(&mut lines, "proto", get("proto"));
    maybe_line(&mut lines, "port", get("port"));
    maybe_line(&mut lines, "ifconfig", get("ifconfig"));
    maybe_line(&mut lines, "keepalive", get("keepalive"));
    maybe_line(&mut lines, "verb", get("verb"));
    maybe_line(&mut lines, "auth", get("auth"));
    maybe_line(&mut lines, "cipher", get("cipher"));

    let comp_lzo = get("comp_lzo");
    if !comp_lzo.is_empty() {
        lines.push(format!("comp-lzo {comp_lzo}"));
    }
    let allow_comp = get("allow_compression");
    if !allow_comp.is_empty() {
        lines.push(format!("allow-compression {allow_comp}"));
    }
    if get("persist_tun") == "1" {
        lines.push("persist-tun".to_string());
    }

    if get("client") == "1" {
        lines.push("client".to_string());
    }
    if get("tls_client") == "1" {
        lines.push("tls-client".to_string());
    }
    maybe_line(&mut lines, "remote-cert-tls", get("remote_cert_tls"));
    maybe_line(&mut lines, "key-direction", get("key_direction"));

    let port = get("port");
    for r in split_ml(get("remote")) {
        if r.contains(':') || r.contains(' ') {
            lines.push(format!("remote {r}"));
        } else if !port.is_empty() {
            lines.push(format!("remote {r} {port}"));
        } else {
            lines.push(format!("remote {r}"));
        }
    }

    for (key, opt) in [
        ("secret", "secret"),
        ("ca", "ca"),
        ("cert", "cert"),
        ("key", "key"),
        ("tls_auth", "tls-auth"),
        ("tls_crypt", "tls-crypt"),
    ] {
        let val = get(key);
        if val.is_empty() {
            continue;
        }
        let (path, file_entry) = file_ref(name, key, val)?;
        files.push(file_entry);
        lines.push(format!("{opt} {path}"));
    }

    let body = format!("{}\n", lines.join("\n").trim());
    Ok((body, files))
}

pub fn parse_instances(input: &RenderInput) -> Vec<(TunnelInstance, BTreeMap<String, String>)> {
    let prefix = format!("/nodes/{}/openvpn/", input.node_id);
    let grouped = group_by_instance(&input.node, &prefix);
    grouped
        .into_iter()
        .map(|(name, pairs)| {
            let cfg: BTreeMap<String, String> = pairs.into_iter().collect();
            let enabled = cfg.get("enable").map(String::as_str) == Some("true");
            let dev = cfg.get("dev").filter(|d| !d.is_empty()).cloned().unwrap_or_else(|| dev_name(&name));
            (TunnelInstance { name, dev, enabled }, cfg)
        })
        .collect()
}

#[async_trait]
impl Renderer for OpenvpnRenderer {
    fn name(&self) -> &str {
        "openvpn"
    }

    async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
        let mut files = Vec::new();
        for (instance, cfg) in parse_instances(input) {
            if !instance.enabled {
                continue;
            }
            let (config_text, secret_files) = build_config(&instance.name, &cfg)?;
            files.extend(secret_files);
            files.push(ArtifactFile {
                path: format!("/etc/openvpn/generated/{}.conf", instance.name),
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

    fn input(node: serde_json::Value) -> RenderInput {
        RenderInput {
            node_id: "n1".to_string(),
            node,
            global: json!({}),
            all_nodes: None,
        }
    }

    #[test]
    fn dev_name_uses_trailing_digit() {
        assert_eq!(dev_name("wan0"), "tun0");
        assert_eq!(dev_name("office"), "tun-office");
    }

    #[tokio::test]
    async fn rejects_file_path_secret() {
        let node = json!({
            "/nodes/n1/openvpn/wan0/enable": "true",
            "/nodes/n1/openvpn/wan0/secret": "/etc/secrets/foo",
        });
        let r = OpenvpnRenderer;
        let res = r.render(&input(node)).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn externalizes_inline_secret_and_links_it() {
        let node = json!({
            "/nodes/n1/openvpn/wan0/enable": "true",
            "/nodes/n1/openvpn/wan0/proto": "udp",
            "/nodes/n1/openvpn/wan0/remote": "1.2.3.4",
            "/nodes/n1/openvpn/wan0/port": "1194",
            "/nodes/n1/openvpn/wan0/secret": "-----BEGIN OpenVPN Static key V1-----\nabc\n-----END OpenVPN Static key V1-----",
        });
        let r = OpenvpnRenderer;
        let bundle = r.render(&input(node)).await.unwrap();
        assert_eq!(bundle.files.len(), 2);
        let conf = bundle.files.iter().find(|f| f.path.ends_with(".conf")).unwrap();
        let text = String::from_utf8(conf.content.clone()).unwrap();
        assert!(text.contains("remote 1.2.3.4 1194"));
        assert!(text.contains("secret /etc/openvpn/generated/wan0.secret"));
        let secret_file = bundle.files.iter().find(|f| f.path.ends_with(".secret")).unwrap();
        assert_eq!(secret_file.mode, Some(0o600));
    }

    #[tokio::test]
    async fn skips_disabled_instance() {
        let node = json!({"/nodes/n1/openvpn/wan1/enable": "false"});
        let r = OpenvpnRenderer;
        let bundle = r.render(&input(node)).await.unwrap();
        assert!(bundle.files.is_empty());
    }
}
