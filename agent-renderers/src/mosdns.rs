use agent_core::types::{ArtifactBundle, ArtifactFile};
use agent_render::{RenderInput, Renderer};
use async_trait::async_trait;
use serde_json::Value;
use serde_yaml::Value as Yaml;
use std::collections::BTreeMap;

const SOCKS_PORT: u16 = 7891;
const BASE_TEMPLATE_PATH: &str = "/mosdns/config.yaml";

/// DNS resolver handler (spec §4.5.5), backed by `mosdns`.
///
/// Grounded on `original_source/generators/gen_mosdns.py`.
pub struct MosdnsRenderer;

/// Rule-file manifest plus the refresh cadence, surfaced alongside the
/// rendered config for the handler that downloads/refreshes rule files
/// on a timer (spec §4.5.5, §5).
#[derive(Debug, Clone)]
pub struct MosdnsOutput {
    pub config_text: String,
    pub rules: BTreeMap<String, String>,
    pub refresh_minutes: i64,
}

fn parse_rule_files(raw: &str) -> anyhow::Result<BTreeMap<String, String>> {
    if raw.is_empty() {
        return Ok(BTreeMap::new());
    }
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let Value::Object(obj) = value else {
        anyhow::bail!("mosdns rule_files must be a JSON object");
    };
    let mut out = BTreeMap::new();
    for (k, v) in obj {
        let s = v.as_str().ok_or_else(|| anyhow::anyhow!("mosdns rule_files keys and values must be strings"))?;
        out.insert(k, s.to_string());
    }
    Ok(out)
}

fn parse_plugins(raw: &str) -> anyhow::Result<Vec<Yaml>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let value: Yaml = serde_yaml::from_str(raw)?;
    let Yaml::Sequence(items) = value else {
        anyhow::bail!("mosdns plugins must be a YAML list");
    };
    for item in &items {
        if !matches!(item, Yaml::Mapping(_)) {
            anyhow::bail!("each mosdns plugin item must be a map");
        }
    }
    Ok(items)
}

async fn build_config_text(global: &Value) -> anyhow::Result<String> {
    let plugins_raw = global.get("/global/mosdns/plugins").and_then(Value::as_str).unwrap_or("");
    let plugins = parse_plugins(plugins_raw)?;
    let text = if plugins.is_empty() {
        tokio::fs::read_to_string(BASE_TEMPLATE_PATH).await?
    } else {
        let mut conf = serde_yaml::Mapping::new();
        let mut log = serde_yaml::Mapping::new();
        log.insert(Yaml::from("level"), Yaml::from("info"));
        conf.insert(Yaml::from("log"), Yaml::Mapping(log));
        let mut api = serde_yaml::Mapping::new();
        api.insert(Yaml::from("http"), Yaml::from(":13688"));
        conf.insert(Yaml::from("api"), Yaml::Mapping(api));
        conf.insert(Yaml::from("plugins"), Yaml::Sequence(plugins));
        serde_yaml::to_string(&Yaml::Mapping(conf))?
    };
    Ok(text.replace("{{SOCKS_PORT}}", &SOCKS_PORT.to_string()))
}

fn refresh_minutes(input: &RenderInput) -> i64 {
    let key = format!("/nodes/{}/mosdns/refresh", input.node_id);
    let raw = input.node.get(&key).and_then(Value::as_str).unwrap_or("");
    let val: i64 = raw.parse().unwrap_or(1440);
    if val <= 0 { 1440 } else { val }
}

pub async fn generate_mosdns(input: &RenderInput) -> anyhow::Result<MosdnsOutput> {
    let rules_raw = input.global.get("/global/mosdns/rule_files").and_then(Value::as_str).unwrap_or("");
    let rules = parse_rule_files(rules_raw)?;
    Ok(MosdnsOutput {
        config_text: build_config_text(&input.global).await?,
        rules,
        refresh_minutes: refresh_minutes(input),
    })
}

#[async_trait]
impl Renderer for MosdnsRenderer {
    fn name(&self) -> &str {
        "mosdns"
    }

    async fn render(&self, input: &RenderInput) -> anyhow::Result<ArtifactBundle> {
        let out = generate_mosdns(input).await?;
        Ok(ArtifactBundle {
            files: vec![ArtifactFile {
                path: "/etc/mosdns/config.yaml".to_string(),
                content: out.config_text.into_bytes(),
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
    fn parse_rule_files_rejects_non_object() {
        assert!(parse_rule_files("[1,2,3]").is_err());
    }

    #[test]
    fn parse_rule_files_reads_string_map() {
        let rules = parse_rule_files(r#"{"geosite":"https://example.invalid/geosite.dat"}"#).unwrap();
        assert_eq!(rules.get("geosite").map(String::as_str), Some("https://example.invalid/geosite.dat"));
    }

    #[test]
    fn refresh_minutes_clamps_non_positive_to_default() {
        let input = RenderInput {
            node_id: "n1".to_string(),
            node: json!({"/nodes/n1/mosdns/refresh": "0"}),
            global: json!({}),
            all_nodes: None,
        };
        assert_eq!(refresh_minutes(&input), 1440);
    }

    #[test]
    fn refresh_minutes_reads_positive_override() {
        let input = RenderInput {
            node_id: "n1".to_string(),
            node: json!({"/nodes/n1/mosdns/refresh": "60"}),
            global: json!({}),
            all_nodes: None,
        };
        assert_eq!(refresh_minutes(&input), 60);
    }

    #[test]
    fn parse_plugins_rejects_non_list() {
        let res = parse_plugins("foo: bar");
        assert!(res.is_err());
    }
}
