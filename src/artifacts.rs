//! On-disk layout of one recreation run.
//!
//! ```text
//! <output_dir>/<run_id>/
//!     target.png
//!     iteration-01/markup.html
//!     iteration-01/candidate.png
//!     diffs/<timestamp>-<8 hex>-iteration-01-diff.png
//!     final.html
//!     summary.json
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{Error, Result};

/// Artifact namespace of a single run. Runs never share a directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: &Path, run_id: &str) -> Self {
        Self {
            root: output_dir.join(run_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn diff_dir(&self) -> PathBuf {
        self.root.join("diffs")
    }

    pub fn iteration_dir(&self, number: u32) -> PathBuf {
        self.root.join(iteration_slug(number))
    }

    pub fn write_target(&self, png: &[u8]) -> Result<PathBuf> {
        self.write(self.root.join("target.png"), png)
    }

    pub fn write_markup(&self, number: u32, markup: &str) -> Result<PathBuf> {
        self.write(self.iteration_dir(number).join("markup.html"), markup.as_bytes())
    }

    pub fn write_candidate(&self, number: u32, png: &[u8]) -> Result<PathBuf> {
        self.write(self.iteration_dir(number).join("candidate.png"), png)
    }

    pub fn write_final(&self, markup: &str) -> Result<PathBuf> {
        self.write(self.root.join("final.html"), markup.as_bytes())
    }

    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf> {
        let path = self.root.join("summary.json");
        let json = serde_json::to_vec_pretty(summary).map_err(|e| Error::persistence(&path, e))?;
        self.write(path, &json)
    }

    fn write(&self, path: PathBuf, data: &[u8]) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
        }
        std::fs::write(&path, data).map_err(|e| Error::persistence(&path, e))?;
        Ok(path)
    }
}

/// `iteration-01`, `iteration-02`, ...
pub fn iteration_slug(number: u32) -> String {
    format!("iteration-{:02}", number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_namespaced_by_run() {
        let dir = tempfile::tempdir().unwrap();
        let a = ArtifactStore::new(dir.path(), "run-a");
        let b = ArtifactStore::new(dir.path(), "run-b");

        let pa = a.write_markup(1, "<p>a</p>").unwrap();
        let pb = b.write_markup(1, "<p>b</p>").unwrap();
        assert_ne!(pa, pb);
        assert_eq!(pa, dir.path().join("run-a/iteration-01/markup.html"));
        assert_eq!(std::fs::read_to_string(pb).unwrap(), "<p>b</p>");
    }

    #[test]
    fn summary_is_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "run");
        let path = store
            .write_summary(&serde_json::json!({"stop_reason": "success"}))
            .unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\n  \"stop_reason\": \"success\""));
    }

    #[test]
    fn unwritable_root_is_a_persistence_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let store = ArtifactStore::new(&blocker, "run");
        let err = store.write_final("<html></html>").unwrap_err();
        assert!(matches!(err, Error::PersistenceFailure { .. }));
    }
}
