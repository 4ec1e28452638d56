use agent_core::hash::stable_hash;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

/// Subsystem-name → last-applied content digest, the memoized-hash
/// change-detection gate every handler checks before rendering (spec §3
/// Memoized Hash, §4.7 `changed()`).
///
/// Generalized from `ando-store`'s `ConfigCache`, which keeps typed
/// resource maps per entity kind; this agent only needs "did this
/// subsystem's slice change since last apply", so one digest per
/// subsystem name suffices.
#[derive(Clone, Default)]
pub struct HashMemo {
    digests: Arc<DashMap<String, String>>,
}

impl HashMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute `value`'s digest and compare it against the stored one
    /// for `subsystem`. Returns `true` (and updates the memo) if the
    /// digest differs or `force` is set; returns `false` without
    /// mutating state otherwise.
    pub fn changed<T: Serialize>(
        &self,
        subsystem: &str,
        value: &T,
        force: bool,
    ) -> anyhow::Result<bool> {
        let digest = stable_hash(value)?;
        if !force {
            if let Some(existing) = self.digests.get(subsystem) {
                if *existing == digest {
                    return Ok(false);
                }
            }
        }
        self.digests.insert(subsystem.to_string(), digest);
        Ok(true)
    }

    /// Drop a subsystem's memoized digest, forcing the next `changed()`
    /// call to report a change regardless of content.
    pub fn forget(&self, subsystem: &str) {
        self.digests.remove(subsystem);
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_observation_is_always_a_change() {
        let memo = HashMemo::new();
        assert!(memo.changed("easytier", &json!({"a": 1}), false).unwrap());
    }

    #[test]
    fn identical_content_is_not_a_change() {
        let memo = HashMemo::new();
        let v = json!({"a": 1, "b": 2});
        assert!(memo.changed("easytier", &v, false).unwrap());
        assert!(!memo.changed("easytier", &v, false).unwrap());
    }

    #[test]
    fn different_content_is_a_change() {
        let memo = HashMemo::new();
        memo.changed("easytier", &json!({"a": 1}), false).unwrap();
        assert!(memo.changed("easytier", &json!({"a": 2}), false).unwrap());
    }

    #[test]
    fn force_bypasses_memoization() {
        let memo = HashMemo::new();
        let v = json!({"a": 1});
        memo.changed("easytier", &v, false).unwrap();
        assert!(memo.changed("easytier", &v, true).unwrap());
    }

    #[test]
    fn forget_clears_the_digest() {
        let memo = HashMemo::new();
        let v = json!({"a": 1});
        memo.changed("easytier", &v, false).unwrap();
        memo.forget("easytier");
        assert!(memo.changed("easytier", &v, false).unwrap());
    }
}
