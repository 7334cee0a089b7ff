use std::fmt;
use std::path::{Path, PathBuf};

use depot_util::errors::{DepotError, DepotResult};

/// Which repository policy a metadata document falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nature {
    Release,
    Snapshot,
    ReleaseOrSnapshot,
}

impl Nature {
    pub fn includes_release(self) -> bool {
        matches!(self, Nature::Release | Nature::ReleaseOrSnapshot)
    }

    pub fn includes_snapshot(self) -> bool {
        matches!(self, Nature::Snapshot | Nature::ReleaseOrSnapshot)
    }
}

/// A repository metadata document: a version index, snapshot timestamp
/// record, or similar. Any of `group_id`, `artifact_id`, `version` may be
/// empty, narrowing the level the document lives at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub kind: String,
    pub nature: Nature,
    pub file: Option<PathBuf>,
}

impl Metadata {
    pub fn new(group_id: &str, artifact_id: &str, version: &str, kind: &str, nature: Nature) -> Self {
        Self {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            nature,
            file: None,
        }
    }

    pub fn with_file(&self, file: PathBuf) -> Self {
        let mut copy = self.clone();
        copy.file = Some(file);
        copy
    }

    /// Identity used for lock and cache keys: `(group, artifact, version, kind)`.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.group_id, self.artifact_id, self.version, self.kind
        )
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Metadata that participates in install and deploy.
///
/// Mergeable metadata must be combined with the current copy (local on
/// install, remote on deploy) before being written; plain metadata simply
/// copies its attached file. This flattens what would otherwise be a
/// subtype relationship into one trait with a capability probe.
pub trait MergeableMetadata: Send {
    fn metadata(&self) -> &Metadata;

    fn metadata_mut(&mut self) -> &mut Metadata;

    /// Whether this document requires merging with the existing copy.
    fn is_mergeable(&self) -> bool {
        true
    }

    /// Combine `current` (if it exists) with this document's content and
    /// write the result to `into`. Sets the merged flag.
    fn merge(&mut self, current: Option<&Path>, into: &Path) -> DepotResult<()>;

    /// Whether `merge` has produced a combined file.
    fn is_merged(&self) -> bool;
}

/// Plain metadata that installs or deploys by copying its attached file.
#[derive(Debug, Clone)]
pub struct StaticMetadata {
    metadata: Metadata,
    merged: bool,
}

impl StaticMetadata {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            merged: false,
        }
    }
}

impl MergeableMetadata for StaticMetadata {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn is_mergeable(&self) -> bool {
        false
    }

    fn merge(&mut self, _current: Option<&Path>, into: &Path) -> DepotResult<()> {
        let source = self.metadata.file.clone().ok_or_else(|| DepotError::Invalid {
            message: format!("metadata {} has no file to install", self.metadata.key()),
        })?;
        if source != into {
            depot_util::fs::copy_preserving_mtime(&source, into)?;
        }
        self.metadata.file = Some(into.to_path_buf());
        self.merged = true;
        Ok(())
    }

    fn is_merged(&self) -> bool {
        self.merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn nature_policy_selection() {
        assert!(Nature::Release.includes_release());
        assert!(!Nature::Release.includes_snapshot());
        assert!(Nature::Snapshot.includes_snapshot());
        assert!(!Nature::Snapshot.includes_release());
        assert!(Nature::ReleaseOrSnapshot.includes_release());
        assert!(Nature::ReleaseOrSnapshot.includes_snapshot());
    }

    #[test]
    fn key_renders_all_levels() {
        let m = Metadata::new("g", "a", "1.0", "maven-metadata.xml", Nature::Release);
        assert_eq!(m.key(), "g:a:1.0:maven-metadata.xml");

        let group_level = Metadata::new("g", "", "", "plugins.xml", Nature::Release);
        assert_eq!(group_level.key(), "g:::plugins.xml");
    }

    #[test]
    fn static_metadata_copies_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("maven-metadata.xml");
        std::fs::write(&src, b"<metadata/>").unwrap();

        let meta = Metadata::new("g", "a", "", "maven-metadata.xml", Nature::Release)
            .with_file(src.clone());
        let mut entry = StaticMetadata::new(meta);
        assert!(!entry.is_mergeable());
        assert!(!entry.is_merged());

        let dst = tmp.path().join("out").join("maven-metadata.xml");
        entry.merge(None, &dst).unwrap();
        assert!(entry.is_merged());
        assert_eq!(std::fs::read(&dst).unwrap(), b"<metadata/>");
        assert_eq!(entry.metadata().file.as_deref(), Some(dst.as_path()));
    }

    #[test]
    fn static_metadata_without_file_fails() {
        let meta = Metadata::new("g", "a", "", "maven-metadata.xml", Nature::Release);
        let mut entry = StaticMetadata::new(meta);
        let err = entry
            .merge(None, Path::new("/tmp/nowhere.xml"))
            .unwrap_err();
        assert!(err.to_string().contains("no file"));
    }
}
