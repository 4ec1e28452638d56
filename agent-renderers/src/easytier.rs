use crate::util::{get_bool, get_or, split_ml};
use agent_core::types::{ArtifactBundle, ArtifactFile};
use agent_render::{RenderInput, Renderer};
use async_trait::async_trait;
use serde_yaml::{Mapping, Value as Yaml};

/// Overlay-mesh flavour, backed by `easytier-core`. One of the two
/// mutually exclusive mesh handlers (spec §4.5.1).
///
/// Grounded on `original_source/generators/gen_easytier.py`.
pub struct EasytierRenderer;

#[async_trait]
impl Renderer for EasytierRenderer {
    fn name(&self) -> &str {
        "easytier"
    }

    async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
        let node = &input.node;
        let global = &input.global;

        let network_name = get_or(global, "/global/easytier/network_name", "");
        let network_secret = get_or(global, "/global/easytier/network_secret", "");
        if network_name.is_empty() || network_secret.is_empty() {
            anyhow::bail!(
                "missing /global/easytier/network_name or /global/easytier/network_secret"
            );
        }

        let prefix = format!("/nodes/{}/easytier/", input.node_id);
        let listeners = split_ml(&get_or(node, &format!("{prefix}listeners"), ""));
        let peers = split_ml(&get_or(node, &format!("{prefix}peers"), ""));
        let mapped_listeners = split_ml(&get_or(node, &format!("{prefix}mapped_listeners"), ""));

        let mut config = Mapping::new();
        config.insert(Yaml::from("network_name"), Yaml::from(network_name));
        config.insert(Yaml::from("network_secret"), Yaml::from(network_secret));
        config.insert(
            Yaml::from("dev_name"),
            Yaml::from(get_or(node, &format!("{prefix}dev_name"), "et0")),
        );

        if get_bool(global, "/global/easytier/private_mode", false) {
            config.insert(Yaml::from("private_mode"), Yaml::from(true));
        }
        let ipv4 = get_or(node, &format!("{prefix}ipv4"), "");
        if !ipv4.is_empty() {
            config.insert(Yaml::from("ipv4"), Yaml::from(ipv4));
        }
        if get_bool(global, "/global/easytier/dhcp", false) {
            config.insert(Yaml::from("dhcp"), Yaml::from(true));
        }
        if !listeners.is_empty() {
            config.insert(Yaml::from("listeners"), Yaml::from(listeners));
        }
        if !peers.is_empty() {
            config.insert(Yaml::from("peers"), Yaml::from(peers));
        }
        if !mapped_listeners.is_empty() {
            config.insert(Yaml::from("mapped_listeners"), Yaml::from(mapped_listeners));
        }

        let config_yaml = serde_yaml::to_string(&Yaml::Mapping(config))?;

        Ok(ArtifactBundle {
            files: vec![ArtifactFile {
                path: "/etc/easytier/config.yaml".to_string(),
                content: config_yaml.into_bytes(),
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
        RenderInput {
            node_id: "n1".to_string(),
            node,
            global,
            all_nodes: None,
        }
    }

    #[tokio::test]
    async fn rejects_missing_network_identity() {
        let r = EasytierRenderer;
        let res = r.render(&input(json!({}), json!({}))).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn renders_minimal_config() {
        let r = EasytierRenderer;
        let node = json!({});
        let global = json!({
            "/global/easytier/network_name": "net",
            "/global/easytier/network_secret": "s",
        });
        let bundle = r.render(&input(node, global)).await.unwrap();
        assert_eq!(bundle.files.len(), 1);
        let text = String::from_utf8(bundle.files[0].content.clone()).unwrap();
        assert!(text.contains("network_name: net"));
        assert!(text.contains("dev_name: et0"));
    }
}
