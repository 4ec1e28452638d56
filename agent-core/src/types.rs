use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A subsystem's slice of the committed configuration tree, as handed to
/// a renderer. Kept as a generic JSON value tree (spec §3 Entities) since
/// each subsystem owns its own shape; renderers are responsible for
/// interpreting their own slice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slice {
    pub subsystem: String,
    pub data: serde_json::Value,
}

/// One rendered file, ready to be written to disk by the Artifact Writer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactFile {
    pub path: String,
    pub content: Vec<u8>,
    /// Unix mode bits to apply after writing (e.g. 0o600 for key material).
    pub mode: Option<u32>,
}

/// The full set of files a renderer produces for one reconcile pass of
/// its subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ArtifactBundle {
    pub files: Vec<ArtifactFile>,
}

/// A process unit this agent supervises (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupervisedUnit {
    pub name: String,
    pub state: UnitState,
}

/// Observed state of a supervised unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Running,
    Stopped,
    Fatal,
    Absent,
}

/// A held etcd lease, tracked so the liveness publisher can detect loss
/// and request a fresh one (spec §4.8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
    pub id: i64,
    pub ttl_seconds: i64,
}

/// Summary of how an artifact bundle compares to what is already on disk,
/// driving the hot-reload vs restart decision (spec §4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChangeSummary {
    pub created: usize,
    pub changed: usize,
    pub removed: usize,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.changed == 0 && self.removed == 0
    }
}

/// Deterministically ordered key/value view over a subsystem's etcd
/// prefix, used as the input to [`crate::hash::stable_hash`].
pub type OrderedTree = BTreeMap<String, serde_json::Value>;
