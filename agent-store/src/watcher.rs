use etcd_client::{Client, WatchOptions};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Watches the single `/commit` edge-trigger key and forwards a signal
/// for every watch message received, with no payload interpretation
/// (spec §3: "a single commit marker key carries no payload").
///
/// Narrowed from `ando-store`'s `ConfigWatcher`, which watches a whole
/// resource-type prefix and dispatches per key; this agent only needs
/// the watch *fact*, since the reconciler re-reads the full tree itself
/// on every trigger.
pub struct CommitWatcher {
    commit_key: String,
}

impl CommitWatcher {
    pub fn new(commit_key: String) -> Self {
        Self { commit_key }
    }

    /// Watch forever, sending `()` on `tx` for each received message.
    /// Returns only on an unrecoverable stream error; callers are
    /// expected to re-invoke after a backoff sleep (spec §4.1, §5).
    pub async fn watch(&self, mut client: Client, tx: mpsc::Sender<()>) -> anyhow::Result<()> {
        info!(key = %self.commit_key, "starting commit watcher");
        let (_watcher, mut stream) = client
            .watch(self.commit_key.as_bytes(), Some(WatchOptions::new()))
            .await?;

        while let Some(resp) = stream.message().await? {
            if resp.events().is_empty() {
                continue;
            }
            if tx.send(()).await.is_err() {
                warn!("commit watcher channel closed, stopping");
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_is_scoped_to_a_single_key() {
        let w = CommitWatcher::new("/commit".to_string());
        assert_eq!(w.commit_key, "/commit");
    }
}
