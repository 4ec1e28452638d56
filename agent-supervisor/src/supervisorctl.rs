use crate::Supervisor;
use agent_core::types::UnitState;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;

/// Shells out to `supervisorctl`/the `supervisord` config directory,
/// the subprocess-invocation idiom `original_source/watcher.py` uses
/// for every external tool it drives (`subprocess.run`/`Popen`).
/// Dynamic units are declared by writing a `[program:<name>]` fragment
/// under `conf_dir` and relying on `rescan()` to pick it up.
pub struct SupervisorctlAdapter {
    binary: String,
    conf_dir: PathBuf,
}

impl SupervisorctlAdapter {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: "supervisorctl".to_string(),
            conf_dir: conf_dir.into(),
        }
    }

    #[cfg(test)]
    fn with_binary(binary: impl Into<String>, conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            conf_dir: conf_dir.into(),
        }
    }

    fn fragment_path(&self, name: &str) -> PathBuf {
        self.conf_dir.join(format!("{name}.conf"))
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        let output = Command::new(&self.binary).args(args).output().await?;
        Ok(output)
    }
}

/// Parse one line of `supervisorctl status` output into `(name, state)`.
/// Format: `<name>  <STATE>  <free-form detail...>`.
fn parse_status_line(line: &str) -> Option<(String, UnitState)> {
    let mut parts = line.split_whitespace();
    let name = parts.next()?.to_string();
    let state_word = parts.next()?;
    let state = match state_word {
        "RUNNING" => UnitState::Running,
        "STOPPED" | "EXITED" | "STOPPING" => UnitState::Stopped,
        "FATAL" | "BACKOFF" => UnitState::Fatal,
        _ => return None,
    };
    Some((name, state))
}

#[async_trait]
impl Supervisor for SupervisorctlAdapter {
    async fn start(&self, name: &str) -> anyhow::Result<()> {
        let out = self.run(&["start", name]).await?;
        if !out.status.success() {
            anyhow::bail!("supervisorctl start {name} failed: {}", String::from_utf8_lossy(&out.stderr));
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> anyhow::Result<()> {
        let out = self.run(&["stop", name]).await?;
        if !out.status.success() {
            anyhow::bail!("supervisorctl stop {name} failed: {}", String::from_utf8_lossy(&out.stderr));
        }
        Ok(())
    }

    async fn restart(&self, name: &str) -> anyhow::Result<()> {
        let out = self.run(&["restart", name]).await?;
        if !out.status.success() {
            anyhow::bail!("supervisorctl restart {name} failed: {}", String::from_utf8_lossy(&out.stderr));
        }
        Ok(())
    }

    async fn signal(&self, name: &str, signal: &str) -> anyhow::Result<()> {
        let out = self.run(&["signal", signal, name]).await?;
        if !out.status.success() {
            anyhow::bail!(
                "supervisorctl signal {signal} {name} failed: {}",
                String::from_utf8_lossy(&out.stderr)
            );
        }
        Ok(())
    }

    async fn status(&self, name: &str) -> anyhow::Result<UnitState> {
        let out = self.run(&["status", name]).await?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        match stdout.lines().next().and_then(parse_status_line) {
            Some((_, state)) => Ok(state),
            None => Ok(UnitState::Absent),
        }
    }

    async fn status_all(&self) -> anyhow::Result<BTreeMap<String, UnitState>> {
        let out = self.run(&["status"]).await?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(stdout.lines().filter_map(parse_status_line).collect())
    }

    async fn declare_dynamic_unit(&self, name: &str, command: &str) -> anyhow::Result<()> {
        let fragment = format!(
            "[program:{name}]\ncommand={command}\nautostart=true\nautorestart=true\nstartsecs=2\nstopsignal=TERM\n"
        );
        tokio::fs::write(self.fragment_path(name), fragment).await?;
        Ok(())
    }

    async fn undeclare_dynamic_unit(&self, name: &str) -> anyhow::Result<()> {
        let path = self.fragment_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn rescan(&self) -> anyhow::Result<()> {
        let reread = self.run(&["reread"]).await?;
        if !reread.status.success() {
            anyhow::bail!("supervisorctl reread failed: {}", String::from_utf8_lossy(&reread.stderr));
        }
        let update = self.run(&["update"]).await?;
        if !update.status.success() {
            anyhow::bail!("supervisorctl update failed: {}", String::from_utf8_lossy(&update.stderr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_line_maps_known_states() {
        assert_eq!(
            parse_status_line("easytier                         RUNNING   pid 123, uptime 0:01:00"),
            Some(("easytier".to_string(), UnitState::Running))
        );
        assert_eq!(
            parse_status_line("openvpn-wan0                     FATAL     Exited too quickly"),
            Some(("openvpn-wan0".to_string(), UnitState::Fatal))
        );
        assert_eq!(
            parse_status_line("clash                            STOPPED   Not started"),
            Some(("clash".to_string(), UnitState::Stopped))
        );
    }

    #[test]
    fn parse_status_line_ignores_garbage() {
        assert_eq!(parse_status_line(""), None);
        assert_eq!(parse_status_line("just-one-token"), None);
    }

    #[tokio::test]
    async fn declare_writes_program_fragment() {
        let dir = std::env::temp_dir().join(format!("agent-supervisor-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let adapter = SupervisorctlAdapter::with_binary("true", &dir);
        adapter.declare_dynamic_unit("wg0", "/usr/bin/wg-quick up wg0").await.unwrap();
        let text = tokio::fs::read_to_string(dir.join("wg0.conf")).await.unwrap();
        assert!(text.contains("[program:wg0]"));
        assert!(text.contains("command=/usr/bin/wg-quick up wg0"));
        adapter.undeclare_dynamic_unit("wg0").await.unwrap();
        assert!(!dir.join("wg0.conf").exists());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn signal_invokes_supervisorctl_signal() {
        let adapter = SupervisorctlAdapter::with_binary("true", "/tmp");
        adapter.signal("mosdns", "HUP").await.unwrap();
    }
}
