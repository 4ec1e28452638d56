use agent_core::types::{ArtifactBundle, ArtifactFile};
use agent_render::{RenderInput, Renderer};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Hosts-file handler (spec §4.5.7). No `original_source/generators`
/// analogue; grounded on spec prose and scenario S6. Unlike every
/// other renderer, this one is invoked unconditionally every pass —
/// the change-detection gate (`HashMemo`) still applies at the
/// artifact-write layer, just not at the slice-hash layer.
pub struct HostsRenderer;

const HOSTS_PATH: &str = "/etc/hosts.d/generated";

/// `/dns/hosts/<hostname> = "addr1\naddr2\n..."`, grouped by hostname.
fn parse_hosts(global: &Value) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Value::Object(obj) = global else {
        return out;
    };
    for (k, v) in obj {
        let Some(hostname) = k.strip_prefix("/dns/hosts/") else {
            continue;
        };
        let Some(raw) = v.as_str() else { continue };
        let mut addrs: Vec<String> = crate::util::split_ml(raw);
        addrs.sort();
        out.entry(hostname.to_string()).or_default().extend(addrs);
    }
    out
}

fn build_hosts_file(global: &Value) -> String {
    let grouped = parse_hosts(global);
    let mut lines = Vec::new();
    for (hostname, addrs) in &grouped {
        for addr in addrs {
            lines.push(format!("{addr}\t{hostname}"));
        }
    }
    format!("{}\n", lines.join("\n"))
}

#[async_trait]
impl Renderer for HostsRenderer {
    fn name(&self) -> &str {
        "hosts"
    }

    async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
        Ok(ArtifactBundle {
            files: vec![ArtifactFile {
                path: HOSTS_PATH.to_string(),
                content: build_hosts_file(&input.global).into_bytes(),
                mode: None,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn orders_by_hostname_then_address() {
        let r = HostsRenderer;
        let global = json!({
            "/dns/hosts/foo": "1.2.3.4\n5.6.7.8",
        });
        let input = RenderInput { node_id: "n1".to_string(), node: json!({}), global, all_nodes: None };
        let bundle = r.render(&input).await.unwrap();
        let text = String::from_utf8(bundle.files[0].content.clone()).unwrap();
        assert_eq!(text, "1.2.3.4\tfoo\n5.6.7.8\tfoo\n");
    }

    #[test]
    fn sorts_hostnames_and_addresses_independently() {
        let global = json!({
            "/dns/hosts/zeta": "9.9.9.9",
            "/dns/hosts/alpha": "2.2.2.2\n1.1.1.1",
        });
        let grouped = parse_hosts(&global);
        let keys: Vec<&String> = grouped.keys().collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
        assert_eq!(grouped["alpha"], vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()]);
    }
}
