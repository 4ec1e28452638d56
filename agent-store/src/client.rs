use agent_core::AgentError;
use etcd_client::{Client, ConnectOptions, GetOptions, PutOptions, TlsOptions};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Connection parameters needed to (re)build an etcd client, kept around
/// so [`KvClient`] can reconnect after an auth failure without the caller
/// having to remember them (spec §4.1's retry-once-on-unauthenticated
/// contract).
#[derive(Debug, Clone)]
pub struct KvEndpoint {
    pub endpoints: Vec<String>,
    pub ca_path: String,
    pub cert_path: String,
    pub key_path: String,
    pub username: String,
    pub password: String,
}

/// Authenticated, retrying access to the remote KV store: prefix-read,
/// single-key read/write, lease create/refresh (spec §4.1).
///
/// Grounded on `ando-store`'s `EtcdStore`, widened with the
/// rebuild-on-unauthenticated-retry-once contract the teacher didn't
/// need (its admin API holds a long-lived unauthenticated connection).
pub struct KvClient {
    endpoint: KvEndpoint,
    client: Mutex<Client>,
}

impl KvClient {
    pub async fn connect(endpoint: KvEndpoint) -> anyhow::Result<Self> {
        let client = Self::build_client(&endpoint).await?;
        Ok(Self {
            endpoint,
            client: Mutex::new(client),
        })
    }

    async fn build_client(endpoint: &KvEndpoint) -> anyhow::Result<Client> {
        let tls = TlsOptions::new()
            .ca_cert_pem(&tokio::fs::read_to_string(&endpoint.ca_path).await?)
            .identity_pem(
                &tokio::fs::read_to_string(&endpoint.cert_path).await?,
                &tokio::fs::read_to_string(&endpoint.key_path).await?,
            );
        let options = ConnectOptions::new()
            .with_tls(tls)
            .with_user(endpoint.username.clone(), endpoint.password.clone());
        let client = Client::connect(&endpoint.endpoints, Some(options)).await?;
        info!(endpoints = ?endpoint.endpoints, "connected to etcd");
        Ok(client)
    }

    /// Run `op` against the current client; on an `Unauthenticated` gRPC
    /// status, rebuild the connection once and retry, surfacing
    /// [`AgentError::Auth`] if the retry also fails.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, AgentError>
    where
        F: Fn(Client) -> Fut,
        Fut: std::future::Future<Output = Result<T, etcd_client::Error>>,
    {
        let mut guard = self.client.lock().await;
        match op(guard.clone()).await {
            Ok(v) => Ok(v),
            Err(e) if is_unauthenticated(&e) => {
                warn!("etcd session unauthenticated, rebuilding connection");
                let fresh = Self::build_client(&self.endpoint)
                    .await
                    .map_err(|e| AgentError::Auth(e.to_string()))?;
                *guard = fresh.clone();
                op(fresh)
                    .await
                    .map_err(|e| AgentError::Auth(e.to_string()))
            }
            Err(e) => Err(AgentError::Transient(e.to_string())),
        }
    }

    /// Read an entire key prefix as an ordered map, newest value per key.
    pub async fn get_prefix(&self, prefix: &str) -> Result<BTreeMap<String, String>, AgentError> {
        let prefix = prefix.to_string();
        let resp = self
            .with_retry(move |mut c| {
                let prefix = prefix.clone();
                async move { c.get(prefix.as_bytes(), Some(GetOptions::new().with_prefix())).await }
            })
            .await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    String::from_utf8_lossy(kv.value()).into_owned(),
                )
            })
            .collect())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, AgentError> {
        let key = key.to_string();
        let resp = self
            .with_retry(move |mut c| {
                let key = key.clone();
                async move { c.get(key.as_bytes(), None).await }
            })
            .await?;
        Ok(resp
            .kvs()
            .first()
            .map(|kv| String::from_utf8_lossy(kv.value()).into_owned()))
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<(), AgentError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_retry(move |mut c| {
            let key = key.clone();
            let value = value.clone();
            async move { c.put(key.as_bytes(), value.as_bytes(), None).await.map(|_| ()) }
        })
        .await
    }

    pub async fn put_leased(&self, key: &str, value: &str, lease_id: i64) -> Result<(), AgentError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_retry(move |mut c| {
            let key = key.clone();
            let value = value.clone();
            async move {
                c.put(
                    key.as_bytes(),
                    value.as_bytes(),
                    Some(PutOptions::new().with_lease(lease_id)),
                )
                .await
                .map(|_| ())
            }
        })
        .await
    }

    /// Grant a lease with the given TTL, returning its id.
    pub async fn lease_grant(&self, ttl_seconds: i64) -> Result<i64, AgentError> {
        self.with_retry(move |mut c| async move {
            c.lease_grant(ttl_seconds, None)
                .await
                .map(|r| r.id())
        })
        .await
    }

    /// Refresh a lease's TTL with a single keep-alive round trip.
    pub async fn lease_keep_alive(&self, lease_id: i64) -> Result<(), AgentError> {
        self.with_retry(move |mut c| async move {
            let (mut keeper, mut stream) = c.lease_keep_alive(lease_id).await?;
            keeper.keep_alive().await?;
            stream.message().await?;
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), AgentError> {
        let key = key.to_string();
        self.with_retry(move |mut c| {
            let key = key.clone();
            async move { c.delete(key.as_bytes(), None).await.map(|_| ()) }
        })
        .await
    }

    /// Clone the underlying `etcd_client::Client` handle for use by a
    /// long-lived watch stream (spec §4.1's watch-stream capability).
    pub async fn raw(&self) -> Client {
        self.client.lock().await.clone()
    }
}

fn is_unauthenticated(e: &etcd_client::Error) -> bool {
    let msg = e.to_string();
    msg.contains("Unauthenticated") || msg.contains("authentication required")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_all_connection_parameters() {
        let ep = KvEndpoint {
            endpoints: vec!["https://etcd:2379".into()],
            ca_path: "/ca.pem".into(),
            cert_path: "/cert.pem".into(),
            key_path: "/key.pem".into(),
            username: "agent".into(),
            password: "pw".into(),
        };
        assert_eq!(ep.endpoints.len(), 1);
        assert_eq!(ep.username, "agent");
    }
}
