/// etcd key layout for node-agent (spec §3 Keyspace).
///
/// Every method returns a fully qualified key or prefix; callers never
/// hand-build a path with `format!` elsewhere.
pub struct Schema {
    node_id: String,
}

impl Schema {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
        }
    }

    /// `/nodes/<node_id>/` — this node's subsystem settings.
    pub fn node_prefix(&self) -> String {
        format!("/nodes/{}/", self.node_id)
    }

    /// `/nodes/<node_id>/<subsystem>/` — one subsystem's slice of this
    /// node's settings.
    pub fn node_subsystem_prefix(&self, subsystem: &str) -> String {
        format!("/nodes/{}/{}/", self.node_id, subsystem)
    }

    /// `/global/` — fleet-wide settings.
    pub fn global_prefix(&self) -> String {
        "/global/".to_string()
    }

    /// `/global/<subsystem>/` — one subsystem's slice of global settings.
    pub fn global_subsystem_prefix(&self, subsystem: &str) -> String {
        format!("/global/{}/", subsystem)
    }

    /// `/nodes/` — every node's settings, read only by handlers that need
    /// fleet-wide visibility (e.g. switched-mesh host files).
    pub fn all_nodes_prefix(&self) -> String {
        "/nodes/".to_string()
    }

    /// `/dns/hosts/` — the third top-level keyspace region (spec §3),
    /// disjoint from both `/nodes/` and `/global/`.
    pub fn dns_hosts_prefix(&self) -> String {
        "/dns/hosts/".to_string()
    }

    /// `/commit` — the edge-trigger marker key.
    pub fn commit_key(&self) -> String {
        "/commit".to_string()
    }

    /// `/updated/<node_id>/last` — persistent timestamp of last apply.
    pub fn updated_last_key(&self) -> String {
        format!("/updated/{}/last", self.node_id)
    }

    /// `/updated/<node_id>/online` — leased liveness marker.
    pub fn updated_online_key(&self) -> String {
        format!("/updated/{}/online", self.node_id)
    }

    /// `/updated/<node_id>/<tunnel_kind>/<name>/status` — per-tunnel
    /// status string.
    pub fn updated_tunnel_status_key(&self, tunnel_kind: &str, name: &str) -> String {
        format!("/updated/{}/{}/{}/status", self.node_id, tunnel_kind, name)
    }

    /// `/updated/<node_id>/mosdns/rules_refreshed` — timestamp of the
    /// last successful rule-file download (spec §4.5.5).
    pub fn updated_mosdns_rules_key(&self) -> String {
        format!("/updated/{}/mosdns/rules_refreshed", self.node_id)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_subsystem_prefix_is_namespaced_by_node() {
        let s = Schema::new("n1");
        assert_eq!(s.node_subsystem_prefix("easytier"), "/nodes/n1/easytier/");
    }

    #[test]
    fn global_subsystem_prefix_ignores_node_id() {
        let s = Schema::new("n1");
        assert_eq!(s.global_subsystem_prefix("clash"), "/global/clash/");
    }

    #[test]
    fn updated_keys_match_spec_layout() {
        let s = Schema::new("n1");
        assert_eq!(s.updated_last_key(), "/updated/n1/last");
        assert_eq!(s.updated_online_key(), "/updated/n1/online");
        assert_eq!(
            s.updated_tunnel_status_key("wireguard", "wg0"),
            "/updated/n1/wireguard/wg0/status"
        );
    }

    #[test]
    fn commit_key_has_no_node_component() {
        let s = Schema::new("n1");
        assert_eq!(s.commit_key(), "/commit");
    }

    #[test]
    fn mosdns_rules_key_is_namespaced_by_node() {
        let s = Schema::new("n1");
        assert_eq!(s.updated_mosdns_rules_key(), "/updated/n1/mosdns/rules_refreshed");
    }
}
