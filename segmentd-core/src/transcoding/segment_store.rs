//! Store of produced segment artifacts
//!
//! Presence in the store is the single source of truth for "this segment has
//! been produced". Entries map a segment index to the artifact name the
//! producer wrote under the output directory.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::guarded::Guarded;

/// Outcome of evicting every produced segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Entries dropped from the store
    pub evicted: usize,
    /// Artifacts deleted from disk
    pub files_removed: usize,
    /// Artifacts that could not be deleted
    pub failures: Vec<(usize, String)>,
}

/// Index to artifact map guarded by its own read/write lock
#[derive(Debug)]
pub struct SegmentStore {
    output_dir: PathBuf,
    entries: Guarded<BTreeMap<usize, String>>,
}

impl SegmentStore {
    /// Creates an empty store whose artifacts live under `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            entries: Guarded::new(BTreeMap::new()),
        }
    }

    /// Records `artifact` as the produced output for `index`, replacing any previous entry.
    pub fn add(&self, index: usize, artifact: impl Into<String>) {
        let artifact = artifact.into();
        debug!("Segment {} stored as {}", index, artifact);
        self.entries.write_with(|entries| entries.insert(index, artifact));
    }

    /// Artifact name for `index`, if produced.
    pub fn get(&self, index: usize) -> Option<String> {
        self.entries.read_with(|entries| entries.get(&index).cloned())
    }

    /// True iff `index` has a non-empty artifact entry.
    pub fn is_produced(&self, index: usize) -> bool {
        self.entries.read_with(|entries| {
            entries
                .get(&index)
                .is_some_and(|artifact| !artifact.is_empty())
        })
    }

    /// Full path of an artifact name.
    pub fn path_for(&self, artifact: &str) -> PathBuf {
        self.output_dir.join(artifact)
    }

    pub fn len(&self) -> usize {
        self.entries.read_with(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts every entry and deletes its artifact from disk.
    ///
    /// The map is emptied under the write lock; file deletion happens after the
    /// lock is released. Deletion is best-effort: a failure is logged and
    /// reported, and the remaining artifacts are still removed. Artifacts that
    /// are already gone count as neither removed nor failed.
    pub async fn clear_all(&self) -> ClearReport {
        let drained = self.entries.write_with(std::mem::take);

        let mut report = ClearReport {
            evicted: drained.len(),
            ..ClearReport::default()
        };

        for (index, artifact) in drained {
            if artifact.is_empty() {
                continue;
            }

            let path = self.path_for(&artifact);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => report.files_removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Segment {} artifact already gone: {}", index, path.display());
                }
                Err(e) => {
                    warn!(
                        "Failed to remove segment {} artifact {}: {}",
                        index,
                        path.display(),
                        e
                    );
                    report.failures.push((index, e.to_string()));
                }
            }
        }

        debug!(
            "Cleared {} segments ({} files removed, {} failures)",
            report.evicted,
            report.files_removed,
            report.failures.len()
        );

        report
    }
}
