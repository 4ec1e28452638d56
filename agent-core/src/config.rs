use figment::providers::Env;
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Process-wide configuration for node-agent, sourced entirely from the
/// environment (spec §6). Required variables are validated eagerly at
/// startup; optional variables fall back to the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Stable identifier for this node; namespaces every etcd key this
    /// agent reads or writes.
    pub node_id: String,

    /// Comma-separated list of etcd endpoint URLs.
    pub etcd_endpoints: String,

    /// Path to the etcd CA certificate.
    pub etcd_ca: String,
    /// Path to the etcd client certificate.
    pub etcd_cert: String,
    /// Path to the etcd client key.
    pub etcd_key: String,
    /// etcd auth username.
    pub etcd_user: String,
    /// etcd auth password.
    pub etcd_pass: String,

    /// Seconds before the online-liveness lease expires absent a keepalive.
    #[serde(default = "default_update_ttl_seconds")]
    pub update_ttl_seconds: u64,

    /// Poll interval, in seconds, for the OpenVPN status sampler.
    #[serde(default = "default_openvpn_status_interval")]
    pub openvpn_status_interval: u64,

    /// Poll interval, in seconds, for the WireGuard status sampler.
    #[serde(default = "default_wireguard_status_interval")]
    pub wireguard_status_interval: u64,

    /// Interval, in seconds, between supervisor reconciliation retries
    /// after a unit is found fatal.
    #[serde(default = "default_supervisor_retry_interval")]
    pub supervisor_retry_interval: u64,

    /// Default gateway to exclude from tproxy interception, if any.
    #[serde(default)]
    pub default_gw: Option<String>,

    /// Upstream HTTP proxy used by mosdns for rule-set refreshes, if any.
    #[serde(default)]
    pub mosdns_http_proxy: Option<String>,
}

fn default_update_ttl_seconds() -> u64 {
    60
}

fn default_openvpn_status_interval() -> u64 {
    10
}

fn default_wireguard_status_interval() -> u64 {
    10
}

fn default_supervisor_retry_interval() -> u64 {
    30
}

impl EnvConfig {
    /// Load configuration from the process environment, unprefixed
    /// (`NODE_ID`, `ETCD_ENDPOINTS`, ... as named in spec §6).
    pub fn load() -> anyhow::Result<Self> {
        let config: Self = Figment::new().merge(Env::raw()).extract()?;
        Ok(config)
    }

    /// Only the first URL of `ETCD_ENDPOINTS` is used (spec §6); the
    /// remainder, if any, are accepted for operator convenience (e.g.
    /// documenting failover hosts) but never dialed.
    pub fn etcd_endpoints(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(1)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> Vec<(&'static str, String)> {
        vec![
            ("NODE_ID", "node-a".into()),
            ("ETCD_ENDPOINTS", "https://etcd-1:2379,https://etcd-2:2379".into()),
            ("ETCD_CA", "/etc/agent/ca.pem".into()),
            ("ETCD_CERT", "/etc/agent/cert.pem".into()),
            ("ETCD_KEY", "/etc/agent/key.pem".into()),
            ("ETCD_USER", "agent".into()),
            ("ETCD_PASS", "secret".into()),
        ]
    }

    #[test]
    fn etcd_endpoints_keeps_only_the_first() {
        let cfg = EnvConfig {
            node_id: "n".into(),
            etcd_endpoints: " https://a:2379 , https://b:2379 ".into(),
            etcd_ca: "".into(),
            etcd_cert: "".into(),
            etcd_key: "".into(),
            etcd_user: "".into(),
            etcd_pass: "".into(),
            update_ttl_seconds: default_update_ttl_seconds(),
            openvpn_status_interval: default_openvpn_status_interval(),
            wireguard_status_interval: default_wireguard_status_interval(),
            supervisor_retry_interval: default_supervisor_retry_interval(),
            default_gw: None,
            mosdns_http_proxy: None,
        };
        assert_eq!(cfg.etcd_endpoints(), vec!["https://a:2379"]);
    }

    #[test]
    fn defaults_match_spec() {
        assert_eq!(default_update_ttl_seconds(), 60);
        assert_eq!(default_openvpn_status_interval(), 10);
        assert_eq!(default_wireguard_status_interval(), 10);
        assert_eq!(default_supervisor_retry_interval(), 30);
    }

    #[test]
    fn base_env_has_all_required_keys() {
        let keys: Vec<&str> = base_env().iter().map(|(k, _)| *k).collect();
        for required in [
            "NODE_ID",
            "ETCD_ENDPOINTS",
            "ETCD_CA",
            "ETCD_CERT",
            "ETCD_KEY",
            "ETCD_USER",
            "ETCD_PASS",
        ] {
            assert!(keys.contains(&required));
        }
    }
}
