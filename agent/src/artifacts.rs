use agent_core::types::{ArtifactBundle, ChangeSummary};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Atomic "write-if-changed" plus directory materialisation (spec §4.2).
/// Pure filesystem logic, with no dependency beyond `std::fs`/`fs-err` —
/// grounded on `ando-admin::persist`'s tmp-file-then-rename pattern,
/// widened from "always write" to "write only if content differs" and
/// from a single file to a whole managed directory.
pub struct ArtifactWriter;

impl ArtifactWriter {
    /// Writes `content` to `path` iff it differs from what's already
    /// there (or the file doesn't exist). Returns `true` iff a write
    /// happened. Filesystem errors are fatal to the current pass (spec
    /// §4.2), so this returns `anyhow::Result`.
    pub fn write_if_changed(path: &Path, content: &[u8], mode: Option<u32>) -> anyhow::Result<bool> {
        if let Ok(existing) = fs_err::read(path) {
            if existing == content {
                return Ok(false);
            }
        }
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("new")
        ));
        fs_err::write(&tmp, content)?;
        Self::apply_mode(&tmp, mode)?;
        fs_err::rename(&tmp, path)?;
        Ok(true)
    }

    #[cfg(unix)]
    fn apply_mode(path: &Path, mode: Option<u32>) -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = mode {
            fs_err::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_mode(_path: &Path, _mode: Option<u32>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Writes every file in `bundle`, then removes any file under
    /// `managed_dirs` that existed before but isn't named by the bundle
    /// (spec §4.2: stale peer host-files, stale per-tunnel supervisor
    /// fragments). `managed_dirs` are walked non-recursively — one level
    /// is all the subsystems named by spec §4.5 ever need.
    pub fn materialise(bundle: &ArtifactBundle, managed_dirs: &[PathBuf]) -> anyhow::Result<ChangeSummary> {
        let mut summary = ChangeSummary::default();
        let mut kept: BTreeSet<PathBuf> = BTreeSet::new();

        for file in &bundle.files {
            let path = PathBuf::from(&file.path);
            let existed = path.exists();
            if Self::write_if_changed(&path, &file.content, file.mode)? {
                if existed {
                    summary.changed += 1;
                } else {
                    summary.created += 1;
                }
            }
            kept.insert(path);
        }

        for dir in managed_dirs {
            let Ok(entries) = fs_err::read_dir(dir) else {
                continue;
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.is_file() && !kept.contains(&path) {
                    fs_err::remove_file(&path)?;
                    summary.removed += 1;
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::types::ArtifactFile;

    #[test]
    fn write_if_changed_skips_identical_content() {
        let dir = tempfile_dir();
        let path = dir.join("a.conf");
        assert!(ArtifactWriter::write_if_changed(&path, b"hello", None).unwrap());
        assert!(!ArtifactWriter::write_if_changed(&path, b"hello", None).unwrap());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn write_if_changed_creates_parent_dirs() {
        let dir = tempfile_dir();
        let path = dir.join("nested/deep/a.conf");
        assert!(ArtifactWriter::write_if_changed(&path, b"x", None).unwrap());
        assert!(path.exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn materialise_removes_stale_managed_files() {
        let dir = tempfile_dir();
        std::fs::write(dir.join("stale.conf"), b"old").unwrap();
        let bundle = ArtifactBundle {
            files: vec![ArtifactFile {
                path: dir.join("kept.conf").to_string_lossy().into_owned(),
                content: b"new".to_vec(),
                mode: None,
            }],
        };
        let summary = ArtifactWriter::materialise(&bundle, &[dir.clone()]).unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.removed, 1);
        assert!(!dir.join("stale.conf").exists());
        assert!(dir.join("kept.conf").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "agent-artifacts-test-{}-{}",
            std::process::id(),
            rand_suffix()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }
}
