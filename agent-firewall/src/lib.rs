use std::path::PathBuf;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Fixed intercept parameters (spec §4.6).
pub const TPROXY_PORT: u16 = 7893;
pub const MARK: &str = "0x1";
pub const TABLE: u32 = 100;

const HELPER_PATH: &str = "/usr/local/bin/tproxy.sh";

/// The full argument set a proxy-intercept application needs (spec
/// §4.6). Cached by the programmer so the integrity loop can re-apply
/// without a KV round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TproxyArgs {
    pub proxy_cidrs: Vec<String>,
    pub exclude_src_cidrs: Vec<String>,
    pub exclude_ifaces: Vec<String>,
    pub exclude_ports: Vec<u16>,
    pub proxy_ipset_name: String,
}

/// Interface to the external shell helper that programs kernel
/// packet-filter rules (spec §4.6). Grounded on
/// `original_source/watcher.py`'s `tproxy_apply`/`tproxy_remove`
/// (`EXCLUDE_CIDRS`/`TPROXY_PORT`/`MARK`/`TABLE` env-var invocation of
/// `/usr/local/bin/tproxy.sh`), widened to the full argument set named
/// by the specification: `EXCLUDE_SRC_CIDRS`, `EXCLUDE_IFACES`,
/// `EXCLUDE_PORTS`, `PROXY_IPSET_NAME` are additions beyond the
/// original's `EXCLUDE_CIDRS`/`TPROXY_PORT`/`MARK`/`TABLE`.
pub struct FirewallProgrammer {
    helper_path: PathBuf,
    last_applied: Mutex<Option<TproxyArgs>>,
}

impl FirewallProgrammer {
    pub fn new() -> Self {
        Self {
            helper_path: PathBuf::from(HELPER_PATH),
            last_applied: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_helper(helper_path: impl Into<PathBuf>) -> Self {
        Self {
            helper_path: helper_path.into(),
            last_applied: Mutex::new(None),
        }
    }

    pub async fn apply(&self, args: TproxyArgs) -> anyhow::Result<()> {
        self.run_helper("apply", &args).await?;
        *self.last_applied.lock().await = Some(args);
        Ok(())
    }

    pub async fn remove(&self) -> anyhow::Result<()> {
        let out = Command::new(&self.helper_path)
            .arg("remove")
            .env("TPROXY_PORT", TPROXY_PORT.to_string())
            .env("MARK", MARK)
            .env("TABLE", TABLE.to_string())
            .output()
            .await?;
        if !out.status.success() {
            anyhow::bail!("{HELPER_PATH} remove failed: {}", String::from_utf8_lossy(&out.stderr));
        }
        *self.last_applied.lock().await = None;
        Ok(())
    }

    /// Re-apply the last-cached argument set, a no-op if nothing has
    /// ever been applied (spec §4.6 integrity loop).
    pub async fn reapply_from_cache(&self) -> anyhow::Result<()> {
        let cached = self.last_applied.lock().await.clone();
        match cached {
            Some(args) => self.apply(args).await,
            None => Ok(()),
        }
    }

    async fn run_helper(&self, subcommand: &str, args: &TproxyArgs) -> anyhow::Result<()> {
        let out = Command::new(&self.helper_path)
            .arg(subcommand)
            .env("PROXY_CIDRS", args.proxy_cidrs.join(" "))
            .env("EXCLUDE_SRC_CIDRS", args.exclude_src_cidrs.join(" "))
            .env("EXCLUDE_IFACES", args.exclude_ifaces.join(" "))
            .env(
                "EXCLUDE_PORTS",
                args.exclude_ports.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "),
            )
            .env("PROXY_IPSET_NAME", &args.proxy_ipset_name)
            .env("TPROXY_PORT", TPROXY_PORT.to_string())
            .env("MARK", MARK)
            .env("TABLE", TABLE.to_string())
            .output()
            .await?;
        if !out.status.success() {
            anyhow::bail!("{HELPER_PATH} {subcommand} failed: {}", String::from_utf8_lossy(&out.stderr));
        }
        Ok(())
    }
}

impl Default for FirewallProgrammer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_args() -> TproxyArgs {
        TproxyArgs {
            proxy_cidrs: vec!["0.0.0.0/0".to_string()],
            exclude_src_cidrs: vec!["10.0.0.1/32".to_string()],
            exclude_ifaces: vec!["wg0".to_string()],
            exclude_ports: vec![655, 1194],
            proxy_ipset_name: "proxy-exclude".to_string(),
        }
    }

    #[tokio::test]
    async fn apply_caches_args_for_reapply() {
        let programmer = FirewallProgrammer::with_helper("true");
        programmer.apply(sample_args()).await.unwrap();
        assert_eq!(*programmer.last_applied.lock().await, Some(sample_args()));
        programmer.reapply_from_cache().await.unwrap();
    }

    #[tokio::test]
    async fn reapply_is_noop_before_first_apply() {
        let programmer = FirewallProgrammer::with_helper("true");
        programmer.reapply_from_cache().await.unwrap();
        assert!(programmer.last_applied.lock().await.is_none());
    }

    #[tokio::test]
    async fn remove_clears_cache() {
        let programmer = FirewallProgrammer::with_helper("true");
        programmer.apply(sample_args()).await.unwrap();
        programmer.remove().await.unwrap();
        assert!(programmer.last_applied.lock().await.is_none());
    }

    #[tokio::test]
    async fn apply_propagates_helper_failure() {
        let programmer = FirewallProgrammer::with_helper("false");
        let res = programmer.apply(sample_args()).await;
        assert!(res.is_err());
    }
}
