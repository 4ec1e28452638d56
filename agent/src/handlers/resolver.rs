use crate::agent::Agent;
use crate::artifacts::ArtifactWriter;
use crate::handlers::common::{filter_contains, merge_prefix, scoped_error, stop_if_running};
use crate::handlers::{forwarder, proxy};
use agent_render::RenderInput;
use agent_renderers::mosdns::{self, MosdnsOutput};
use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const RESOLVER_UNIT: &str = "dns_resolver";
const CONFIG_PATH: &str = "/etc/mosdns/config.yaml";
const LOCAL_DNS_PORT: u16 = 5353;

/// Fixed retry ladder for rule downloads (spec §4.5.5: "a bounded,
/// fixed-step retry, not the exponential backoff used elsewhere").
const RETRY_STEPS: &[Duration] = &[
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
];

/// DNS resolver handler (spec §4.5.5), backed by `mosdns`. Depends on
/// the proxy being healthy whenever it's enabled — `mosdns` routes
/// certain upstreams through it, so reconfiguring while it's down would
/// just produce a resolver that can't resolve anything.
pub async fn handle(agent: &Agent, node: &Value, global: &Value, force: bool) -> anyhow::Result<bool> {
    let mut slice = filter_contains(node, "/mosdns/");
    merge_prefix(&mut slice, global, "/global/mosdns/");
    if !agent.memo.changed("mosdns", &slice, force)? {
        return Ok(false);
    }

    let node_id = agent.schema.node_id().to_string();
    let enable = agent_renderers::util::get_bool(node, &format!("/nodes/{node_id}/mosdns/enable"), false);
    if !enable {
        return stop_if_running(agent, RESOLVER_UNIT).await;
    }

    let proxy_state = agent.proxy_state.lock().await.clone();
    if proxy_state.enabled {
        info!("waiting for proxy to report healthy before reconfiguring resolver");
        proxy::wait_healthy(agent, None).await;
    }

    let input = RenderInput { node_id: node_id.clone(), node: node.clone(), global: global.clone(), all_nodes: None };
    let output: MosdnsOutput = mosdns::generate_mosdns(&input).await.map_err(|e| scoped_error("mosdns", e))?;
    ArtifactWriter::write_if_changed(Path::new(CONFIG_PATH), output.config_text.as_bytes(), None)?;

    let downloaded = download_rules(agent, &output).await;
    if downloaded {
        agent.kv.put(&agent.schema.updated_mosdns_rules_key(), &Utc::now().to_rfc3339()).await.ok();
    }

    let was_running = matches!(
        agent.supervisor.status(RESOLVER_UNIT).await?,
        agent_core::types::UnitState::Running
    );
    if was_running {
        agent.supervisor.restart(RESOLVER_UNIT).await?;
    } else {
        agent.supervisor.start(RESOLVER_UNIT).await?;
    }

    let extra_upstreams = vec![format!("127.0.0.1#{LOCAL_DNS_PORT}")];
    forwarder::update_upstreams(agent, node, global, &extra_upstreams, true).await?;

    Ok(true)
}

/// Downloads every rule file named in `output.rules`, retrying each on
/// the fixed ladder in [`RETRY_STEPS`]. Returns true if at least one
/// file was actually fetched and written.
async fn download_rules(agent: &Agent, output: &MosdnsOutput) -> bool {
    let client = match build_client(agent).await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to build rule-download client");
            return false;
        }
    };

    let mut any = false;
    for (name, url) in &output.rules {
        match fetch_with_retry(&client, url).await {
            Ok(body) => {
                let path = format!("/etc/mosdns/rules/{name}");
                if let Err(e) = fs_err::create_dir_all("/etc/mosdns/rules") {
                    warn!(error = %e, "failed to create mosdns rules directory");
                    continue;
                }
                if let Err(e) = fs_err::write(&path, &body) {
                    warn!(rule = name, error = %e, "failed to write downloaded rule file");
                    continue;
                }
                any = true;
                info!(rule = name, "refreshed mosdns rule file");
            }
            Err(e) => warn!(rule = name, url, error = %e, "rule download exhausted all retries"),
        }
    }
    any
}

/// Rule downloads go through the proxy's HTTP listener when the proxy is
/// live (spec §4.5.5(b)) — a live decision from [`ProxyState`], not a
/// static env-configured proxy URL, since the proxy can come and go
/// across reconcile passes independently of this handler's own slice.
/// `MOSDNS_HTTP_PROXY` (spec §6) still wins when set, for operators who
/// need to route rule downloads through something other than the local
/// proxy.
///
/// [`ProxyState`]: crate::agent::ProxyState
async fn build_client(agent: &Agent) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
    if let Some(proxy_url) = &agent.config.mosdns_http_proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    } else if agent.proxy_state.lock().await.enabled {
        let proxy_url = format!("http://127.0.0.1:{}", proxy::HTTP_PORT);
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }
    Ok(builder.build()?)
}

async fn fetch_with_retry(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<u8>> {
    let mut last_err = None;
    for delay in std::iter::once(Duration::ZERO).chain(RETRY_STEPS.iter().copied()) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(body) => return Ok(body.to_vec()),
                Err(e) => last_err = Some(anyhow::anyhow!(e)),
            },
            Ok(resp) => last_err = Some(anyhow::anyhow!("unexpected status {}", resp.status())),
            Err(e) => last_err = Some(anyhow::anyhow!(e)),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no retry attempts made")))
}
