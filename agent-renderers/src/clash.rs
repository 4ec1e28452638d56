use crate::util::split_ml;
use agent_core::types::{ArtifactBundle, ArtifactFile};
use agent_render::{RenderInput, Renderer};
use async_trait::async_trait;
use serde_json::Value;
use serde_yaml::{Mapping, Value as Yaml};
use std::collections::BTreeSet;
use std::time::Duration;

const TPROXY_PORT: u16 = 7893;
const SOCKS_PORT: u16 = 7891;
const HTTP_PORT: u16 = 7890;
const BASE_TEMPLATE_PATH: &str = "/clash/base.yaml";

/// Proxy handler (spec §4.5.4), backed by a Clash-Meta-compatible
/// core. Unlike the tunnel renderers, this one performs a blocking
/// network fetch of the active subscription as part of rendering — an
/// intentional exception to the otherwise-pure slice-to-artifacts
/// model, carried over because the original does the same.
///
/// Grounded on `original_source/generators/gen_clash.py`.
pub struct ClashRenderer;

/// Everything a subsystem handler needs beyond the rendered file:
/// firewall programmer inputs (tproxy exclude CIDRs/protocol/conntrack),
/// and API health-check coordinates.
#[derive(Debug, Clone)]
pub struct ClashOutput {
    pub config_yaml: String,
    pub mode: String,
    pub tproxy_exclude_cidrs: Vec<String>,
    pub tproxy_protocol: String,
    pub use_conntrack: bool,
    pub refresh_enable: bool,
    pub refresh_interval_minutes: i64,
    pub api_controller: String,
    pub api_secret: String,
}

/// Fixed loopback/private/link-local/multicast/reserved ranges that must
/// never be redirected into the intercept chain, unioned with the
/// node's own LAN/private-LAN CIDRs (`original_source/watcher.py`
/// `node_lans_for_exclude`). The firewall intercepts everything *not*
/// in this set — PROXY_CIDRS itself stays a fixed "intercept all"
/// destination, per the original's `tproxy_apply(exclude)` contract.
const RESERVED_EXCLUDE_CIDRS: &[&str] = &[
    "127.0.0.0/8",
    "0.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "10.42.1.0/24",
];

fn node_lans_for_exclude(node: &Value, node_id: &str) -> Vec<String> {
    let get = |k: &str| node.get(k).and_then(Value::as_str).unwrap_or("");
    let lans = split_ml(get(&format!("/nodes/{node_id}/lan")));
    let private_lans = split_ml(get(&format!("/nodes/{node_id}/private_lan")));
    let mut cidrs: BTreeSet<String> = RESERVED_EXCLUDE_CIDRS.iter().map(|s| s.to_string()).collect();
    cidrs.extend(lans);
    cidrs.extend(private_lans);
    cidrs.into_iter().collect()
}

fn subscriptions(global: &Value) -> std::collections::BTreeMap<String, String> {
    let mut subs = std::collections::BTreeMap::new();
    let Value::Object(obj) = global else {
        return subs;
    };
    for (k, v) in obj {
        if let Some(rest) = k.strip_prefix("/global/clash/subscriptions/") {
            if let Some(name) = rest.strip_suffix("/url") {
                if let Some(s) = v.as_str() {
                    subs.insert(name.to_string(), s.to_string());
                }
            }
        }
    }
    subs
}

/// `Mapping` is keyed by `Value`, not `&str`; these look a value up by
/// its string key without depending on exactly which lookup trait
/// bounds a given `serde_yaml` release exposes on `Mapping::get`.
fn mapping_get<'a>(m: &'a Mapping, key: &str) -> Option<&'a Yaml> {
    m.iter().find(|(k, _)| k.as_str() == Some(key)).map(|(_, v)| v)
}

fn mapping_get_mut<'a>(m: &'a mut Mapping, key: &str) -> Option<&'a mut Yaml> {
    m.iter_mut().find(|(k, _)| k.as_str() == Some(key)).map(|(_, v)| v)
}

async fn load_base_template() -> anyhow::Result<Mapping> {
    let text = tokio::fs::read_to_string(BASE_TEMPLATE_PATH).await?;
    match serde_yaml::from_str::<Yaml>(&text)? {
        Yaml::Mapping(m) => Ok(m),
        Yaml::Null => Ok(Mapping::new()),
        _ => anyhow::bail!("{BASE_TEMPLATE_PATH} did not parse to a mapping"),
    }
}

async fn fetch_subscription(url: &str) -> anyhow::Result<Mapping> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(15)).build()?;
    let resp = client.get(url).send().await?.error_for_status()?;
    let text = resp.text().await?;
    match serde_yaml::from_str::<Yaml>(&text)? {
        Yaml::Mapping(m) => Ok(m),
        Yaml::Null => Ok(Mapping::new()),
        _ => anyhow::bail!("subscription body did not parse to a mapping"),
    }
}

pub async fn generate_clash(input: &RenderInput) -> anyhow::Result<ClashOutput> {
    let node_id = &input.node_id;
    let node = &input.node;
    let global = &input.global;
    let get_node = |k: &str| node.get(k).and_then(Value::as_str).unwrap_or("");

    let base = load_base_template().await?;
    let mode = {
        let v = get_node(&format!("/nodes/{node_id}/clash/mode"));
        if v.is_empty() { "mixed".to_string() } else { v.to_string() }
    };

    let subs = subscriptions(global);
    let active = get_node(&format!("/nodes/{node_id}/clash/active_subscription"));
    if active.is_empty() {
        anyhow::bail!("missing /nodes/{node_id}/clash/active_subscription");
    }
    let sub_url = subs
        .get(active)
        .ok_or_else(|| anyhow::anyhow!("active_subscription {active:?} not found under /global/clash/subscriptions/"))?;

    let sub_conf = fetch_subscription(sub_url).await?;

    let mut merged = base;
    for (k, v) in sub_conf {
        merged.insert(k, v);
    }

    if let Some(Yaml::Sequence(groups)) = mapping_get_mut(&mut merged, "proxy-groups") {
        groups.retain(|pg| {
            pg.as_mapping()
                .and_then(|m| mapping_get(m, "name"))
                .and_then(Yaml::as_str)
                != Some("DUMMY-GROUPS")
        });
    }

    let mut dns_cfg = match mapping_get(&merged, "dns") {
        Some(Yaml::Mapping(m)) => m.clone(),
        _ => Mapping::new(),
    };
    dns_cfg.insert(Yaml::from("enhanced-mode"), Yaml::from("redir-host"));
    merged.insert(Yaml::from("dns"), Yaml::Mapping(dns_cfg));

    merged.insert(Yaml::from("external-ui"), Yaml::from("/etc/clash/ui"));
    merged.insert(Yaml::from("find-process-mode"), Yaml::from("off"));
    merged.insert(Yaml::from("unified-delay"), Yaml::from(true));
    merged.insert(Yaml::from("geodata-loader"), Yaml::from("standard"));

    if mapping_get(&merged, "external-controller").is_none() {
        merged.insert(Yaml::from("external-controller"), Yaml::from("0.0.0.0:9090"));
    }
    if mapping_get(&merged, "secret").is_none() {
        merged.insert(Yaml::from("secret"), Yaml::from("BFC8rqg0umu-qay-xtq"));
    }

    merged.insert(Yaml::from("socks-port"), Yaml::from(SOCKS_PORT));
    match mode.as_str() {
        "mixed" => {
            merged.insert(Yaml::from("mixed-port"), Yaml::from(HTTP_PORT));
        }
        "tproxy" => {
            merged.insert(Yaml::from("tproxy-port"), Yaml::from(TPROXY_PORT));
        }
        other => anyhow::bail!("unsupported clash mode: {other}"),
    }

    let refresh_enable = get_node(&format!("/nodes/{node_id}/clash/refresh/enable")) == "true";
    let refresh_interval_minutes: i64 = get_node(&format!("/nodes/{node_id}/clash/refresh/interval_minutes"))
        .parse()
        .unwrap_or(0);

    let tproxy_protocol = {
        let v = get_node(&format!("/nodes/{node_id}/clash/tproxy_protocol"));
        if v.is_empty() { "tcp+udp".to_string() } else { v.to_string() }
    };
    if !matches!(tproxy_protocol.as_str(), "tcp" | "udp" | "tcp+udp") {
        anyhow::bail!("invalid tproxy_protocol: {tproxy_protocol:?}, must be 'tcp', 'udp', or 'tcp+udp'");
    }

    let use_conntrack = {
        let v = get_node(&format!("/nodes/{node_id}/clash/use_conntrack"));
        if v.is_empty() { false } else { v == "true" }
    };

    let api_controller = mapping_get(&merged, "external-controller")
        .and_then(Yaml::as_str)
        .unwrap_or("0.0.0.0:9090")
        .to_string();
    let api_secret = mapping_get(&merged, "secret").and_then(Yaml::as_str).unwrap_or("").to_string();

    let config_yaml = serde_yaml::to_string(&Yaml::Mapping(merged))?;

    Ok(ClashOutput {
        config_yaml,
        mode,
        tproxy_exclude_cidrs: node_lans_for_exclude(node, node_id),
        tproxy_protocol,
        use_conntrack,
        refresh_enable,
        refresh_interval_minutes,
        api_controller,
        api_secret,
    })
}

#[async_trait]
impl Renderer for ClashRenderer {
    fn name(&self) -> &str {
        "clash"
    }

    async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
        let out = generate_clash(input).await?;
        Ok(ArtifactBundle {
            files: vec![ArtifactFile {
                path: "/etc/clash/config.yaml".to_string(),
                content: out.config_yaml.into_bytes(),
                mode: None,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_lans_for_exclude_merges_dedupes_and_includes_reserved() {
        let node = json!({
            "/nodes/n1/lan": "10.0.0.0/24\n10.1.0.0/24",
            "/nodes/n1/private_lan": "10.1.0.0/24",
        });
        let excludes = node_lans_for_exclude(&node, "n1");
        assert!(excludes.contains(&"10.0.0.0/24".to_string()));
        assert!(excludes.contains(&"10.1.0.0/24".to_string()));
        assert!(excludes.contains(&"127.0.0.0/8".to_string()));
        assert!(excludes.contains(&"240.0.0.0/4".to_string()));
        assert_eq!(excludes.len(), RESERVED_EXCLUDE_CIDRS.len() + 2);
    }

    #[test]
    fn subscriptions_extracts_name_from_key() {
        let global = json!({
            "/global/clash/subscriptions/home/url": "https://example.invalid/sub",
        });
        let subs = subscriptions(&global);
        assert_eq!(subs.get("home").map(String::as_str), Some("https://example.invalid/sub"));
    }
}
