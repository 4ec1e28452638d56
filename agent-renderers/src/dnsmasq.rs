use crate::util::{get_or, split_ml};
use agent_core::types::{ArtifactBundle, ArtifactFile};
use agent_render::{RenderInput, Renderer};
use async_trait::async_trait;

/// DNS forwarder handler (spec §4.5.6), backed by `dnsmasq`. No
/// `original_source/generators` analogue exists for this subsystem;
/// the config shape below follows the same flat-key slice convention
/// the other renderers use, grounded on spec prose alone.
///
/// The forwarder is started *before* the resolver and proxy, with a
/// fallback-only upstream set (spec §4.5.6); later handlers call
/// [`render_with_upstreams`] through a dedicated "update upstreams"
/// routine once the resolver/proxy are known to be healthy.
pub struct DnsmasqRenderer;

const CONFIG_PATH: &str = "/etc/dnsmasq.d/generated.conf";

fn default_fallback_servers() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
}

fn fallback_servers(global: &serde_json::Value) -> Vec<String> {
    let raw = get_or(global, "/global/dnsmasq/fallback_servers", "");
    let configured = split_ml(&raw);
    if configured.is_empty() {
        default_fallback_servers()
    } else {
        configured
    }
}

fn build_config(listen_address: &str, port: &str, upstreams: &[String]) -> String {
    let mut lines = vec![
        format!("listen-address={listen_address}"),
        format!("port={port}"),
        "no-resolv".to_string(),
        "no-poll".to_string(),
    ];
    for upstream in upstreams {
        lines.push(format!("server={upstream}"));
    }
    format!("{}\n", lines.join("\n"))
}

fn listen_settings(input: &RenderInput) -> (String, String) {
    let node = &input.node;
    let node_id = &input.node_id;
    let listen_address = get_or(node, &format!("/nodes/{node_id}/dnsmasq/listen_address"), "127.0.0.1");
    let port = get_or(node, &format!("/nodes/{node_id}/dnsmasq/port"), "53");
    (listen_address, port)
}

/// Rebuild the forwarder config with additional upstreams (e.g. the
/// local resolver and proxy-DNS ports), folding in fallback public-DNS
/// entries only if at least one of them is unavailable (spec §4.5.6).
pub fn render_with_upstreams(
    input: &RenderInput,
    extra_upstreams: &[String],
    all_local_upstreams_available: bool,
) -> ArtifactBundle {
    let (listen_address, port) = listen_settings(input);
    let mut upstreams: Vec<String> = extra_upstreams.to_vec();
    if !all_local_upstreams_available {
        upstreams.extend(fallback_servers(&input.global));
    }
    ArtifactBundle {
        files: vec![ArtifactFile {
            path: CONFIG_PATH.to_string(),
            content: build_config(&listen_address, &port, &upstreams).into_bytes(),
            mode: None,
        }],
    }
}

#[async_trait]
impl Renderer for DnsmasqRenderer {
    fn name(&self) -> &str {
        "dnsmasq"
    }

    async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
        let (listen_address, port) = listen_settings(input);
        let upstreams = fallback_servers(&input.global);
        Ok(ArtifactBundle {
            files: vec![ArtifactFile {
                path: CONFIG_PATH.to_string(),
                content: build_config(&listen_address, &port, &upstreams).into_bytes(),
                mode: None,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(node: serde_json::Value, global: serde_json::Value) -> RenderInput {
        RenderInput { node_id: "n1".to_string(), node, global, all_nodes: None }
    }

    #[tokio::test]
    async fn base_render_uses_default_fallback_servers() {
        let r = DnsmasqRenderer;
        let bundle = r.render(&input(json!({}), json!({}))).await.unwrap();
        let text = String::from_utf8(bundle.files[0].content.clone()).unwrap();
        assert!(text.contains("server=1.1.1.1"));
        assert!(text.contains("server=8.8.8.8"));
    }

    #[test]
    fn update_upstreams_drops_fallback_when_locals_available() {
        let bundle = render_with_upstreams(
            &input(json!({}), json!({})),
            &["127.0.0.1#5353".to_string(), "127.0.0.1#7874".to_string()],
            true,
        );
        let text = String::from_utf8(bundle.files[0].content.clone()).unwrap();
        assert!(text.contains("server=127.0.0.1#5353"));
        assert!(!text.contains("server=1.1.1.1"));
    }

    #[test]
    fn update_upstreams_keeps_fallback_when_one_local_missing() {
        let bundle = render_with_upstreams(&input(json!({}), json!({})), &["127.0.0.1#5353".to_string()], false);
        let text = String::from_utf8(bundle.files[0].content.clone()).unwrap();
        assert!(text.contains("server=127.0.0.1#5353"));
        assert!(text.contains("server=1.1.1.1"));
    }
}
