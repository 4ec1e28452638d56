use crate::agent::Agent;
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Two-key liveness pattern: a persistent "last applied" timestamp and a
/// leased "online" marker (spec §4.8). Grounded on
/// `original_source/watcher.py`'s `ensure_online_lease`/`publish_update`/
/// `keepalive_loop`, with the epoch timestamp replaced by
/// `iso8601_utc_now()` per spec §4.8's literal wording.
pub struct LivenessPublisher;

impl LivenessPublisher {
    /// Writes both keys. On a lease-related failure the cached lease is
    /// dropped so the next call re-acquires one (spec §4.8, §7 "Lease
    /// loss").
    pub async fn publish(agent: &Agent, reason: &str) {
        match Self::publish_inner(agent).await {
            Ok(ts) => info!(reason, last = %ts, ttl = agent.config.update_ttl_seconds, "published liveness"),
            Err(e) => {
                warn!(error = %e, "liveness publish failed, dropping cached lease");
                *agent.lease.lock().await = None;
            }
        }
    }

    async fn publish_inner(agent: &Agent) -> anyhow::Result<String> {
        let ts = Utc::now().to_rfc3339();
        agent.kv.put(&agent.schema.updated_last_key(), &ts).await?;
        let lease_id = Self::ensure_lease(agent).await?;
        agent
            .kv
            .put_leased(&agent.schema.updated_online_key(), "1", lease_id)
            .await?;
        Ok(ts)
    }

    async fn ensure_lease(agent: &Agent) -> anyhow::Result<i64> {
        let mut guard = agent.lease.lock().await;
        if let Some(lease) = *guard {
            return Ok(lease.id);
        }
        let ttl = agent.config.update_ttl_seconds as i64;
        let id = agent.kv.lease_grant(ttl).await?;
        *guard = Some(agent_core::Lease { id, ttl_seconds: ttl });
        Ok(id)
    }

    /// Refreshes (or silently lets lapse for re-acquisition) the cached
    /// lease at `max(5, TTL/3)` intervals (spec §4.8).
    pub async fn keepalive_loop(agent: &Agent) {
        let interval = Duration::from_secs((agent.config.update_ttl_seconds / 3).max(5));
        loop {
            tokio::time::sleep(interval).await;
            let lease_id = { *agent.lease.lock().await };
            let Some(lease) = lease_id else { continue };
            if let Err(e) = agent.kv.lease_keep_alive(lease.id).await {
                error!(error = %e, "lease keepalive failed, dropping cached lease");
                *agent.lease.lock().await = None;
            }
        }
    }
}
