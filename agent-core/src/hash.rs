use serde::Serialize;
use sha2::{Digest, Sha256};

/// Content-hash a serializable value deterministically, for the
/// memoized-change-detection check each handler runs before rendering
/// (spec §3 Memoized Hash). `serde_json::to_vec` sorts map keys only
/// when the value was built via `serde_json::Value`'s internal
/// `BTreeMap`/preserve-order features are off, so callers should route
/// data through [`crate::types::OrderedTree`] or an already-sorted
/// `serde_json::Value` to get a stable digest across process restarts.
///
/// Replaces `original_source/watcher.py`'s `sha(repr(obj))`.
pub fn stable_hash<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn same_content_hashes_equal() {
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), 1);
        a.insert("y".to_string(), 2);

        let mut b = BTreeMap::new();
        b.insert("y".to_string(), 2);
        b.insert("x".to_string(), 1);

        assert_eq!(stable_hash(&a).unwrap(), stable_hash(&b).unwrap());
    }

    #[test]
    fn different_content_hashes_differ() {
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), 1);

        let mut b = BTreeMap::new();
        b.insert("x".to_string(), 2);

        assert_ne!(stable_hash(&a).unwrap(), stable_hash(&b).unwrap());
    }

    #[test]
    fn hash_is_hex_sha256_length() {
        let digest = stable_hash(&"hello").unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
