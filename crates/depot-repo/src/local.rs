//! The enhanced local repository manager.
//!
//! Beyond plain layout-addressed storage, every artifact directory carries a
//! sidecar properties file recording which remote repositories the file has
//! been obtained from. An entry with an empty repository name marks a locally
//! installed artifact. Availability of a cached file is judged against those
//! origins, so two builds with disjoint repository lists do not silently
//! share downloads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use depot_core::artifact::Artifact;
use depot_core::config::SessionConfig;
use depot_core::metadata::Metadata;
use depot_core::repository::{LocalRepository, RemoteRepository};
use depot_core::session::Session;
use depot_util::errors::DepotResult;

use crate::layout::{repository_key, Maven2Layout, RepositoryLayout};
use crate::tracking::TrackingFileManager;

/// Origin name recorded for locally installed artifacts.
pub const LOCAL_ORIGIN: &str = "";

/// Repository key used for locally installed metadata.
pub const LOCAL_METADATA_KEY: &str = "local";

/// A query against the local repository.
pub struct LocalArtifactRequest<'a> {
    pub artifact: &'a Artifact,
    pub repositories: &'a [RemoteRepository],
    pub context: &'a str,
}

/// The answer: the cached file if any, and whether it may be used for the
/// requesting repository set. An unavailable file is still returned so the
/// resolver can reuse it as a download destination.
#[derive(Debug, Clone, Default)]
pub struct LocalArtifactResult {
    pub file: Option<PathBuf>,
    pub available: bool,
    /// Id of the requested repository the file was matched against, if any.
    pub repository: Option<String>,
}

/// Layout-aware, origin-tracking view over one local repository directory.
pub struct EnhancedLocalRepositoryManager {
    base_dir: PathBuf,
    tracking_filename: String,
    layout: Maven2Layout,
    tracker: Arc<TrackingFileManager>,
}

impl EnhancedLocalRepositoryManager {
    pub fn new(session: &Session) -> DepotResult<Self> {
        Self::with_repository(&session.local_repository, &session.config)
    }

    pub fn with_repository(local: &LocalRepository, config: &SessionConfig) -> DepotResult<Self> {
        config.validate()?;
        Ok(Self {
            base_dir: local.base_dir.clone(),
            tracking_filename: config.tracking_filename.clone(),
            layout: Maven2Layout,
            tracker: Arc::new(TrackingFileManager::new()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute path of an artifact. `remote` selects the filename a remote
    /// download is stored under (timestamped for snapshots).
    pub fn artifact_path(&self, artifact: &Artifact, remote: bool) -> PathBuf {
        self.base_dir.join(self.layout.artifact_path(artifact, remote))
    }

    /// Absolute cache path of locally installed metadata.
    pub fn metadata_path_local(&self, metadata: &Metadata) -> PathBuf {
        self.base_dir
            .join(self.layout.metadata_cache_path(metadata, LOCAL_METADATA_KEY))
    }

    /// Absolute cache path of metadata fetched from a remote repository.
    pub fn metadata_path_remote(
        &self,
        metadata: &Metadata,
        repository: &RemoteRepository,
        context: &str,
    ) -> PathBuf {
        let key = repository_key(repository, context);
        self.base_dir.join(self.layout.metadata_cache_path(metadata, &key))
    }

    /// Look up an artifact and judge its availability for the request.
    pub fn find_artifact(&self, request: &LocalArtifactRequest<'_>) -> LocalArtifactResult {
        let path = self.artifact_path(request.artifact, true);
        if !path.is_file() {
            return LocalArtifactResult::default();
        }

        let mut result = LocalArtifactResult {
            file: Some(path.clone()),
            available: false,
            repository: None,
        };

        let filename = match path.file_name().map(|n| n.to_string_lossy().to_string()) {
            Some(name) => name,
            None => return result,
        };
        let origins = match self.tracker.read(&self.tracking_file(&path)) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("failed to read tracking file for {}: {e}", path.display());
                BTreeMap::new()
            }
        };

        let prefix = format!("{filename}>");
        let entries: Vec<&String> = origins.keys().filter(|k| k.starts_with(&prefix)).collect();

        if entries.is_empty() {
            // Legacy cache without tracking entries: treat as locally
            // installed so pre-existing caches are not re-downloaded.
            result.available = true;
            return result;
        }
        if origins.contains_key(&tracking_key(&filename, LOCAL_ORIGIN)) {
            result.available = true;
            return result;
        }
        for repository in request.repositories {
            let key = tracking_key(&filename, &repository_key(repository, request.context));
            if origins.contains_key(&key) {
                result.available = true;
                result.repository = Some(repository.id.clone());
                return result;
            }
        }
        result
    }

    /// Record an artifact's presence. A `None` repository marks a local
    /// install; otherwise one origin entry is written per context.
    pub fn add_artifact(
        &self,
        artifact: &Artifact,
        repository: Option<&RemoteRepository>,
        contexts: &[&str],
    ) -> DepotResult<()> {
        let path = self.artifact_path(artifact, repository.is_some());
        let filename = match path.file_name().map(|n| n.to_string_lossy().to_string()) {
            Some(name) => name,
            None => return Ok(()),
        };

        let mut updates = BTreeMap::new();
        match repository {
            None => {
                updates.insert(tracking_key(&filename, LOCAL_ORIGIN), Some(String::new()));
            }
            Some(repository) => {
                let contexts: &[&str] = if contexts.is_empty() { &[""] } else { contexts };
                for context in contexts {
                    let origin = repository_key(repository, context);
                    updates.insert(tracking_key(&filename, &origin), Some(String::new()));
                }
            }
        }
        self.tracker
            .update(&self.tracking_file(&path), &updates, None)?;
        Ok(())
    }

    /// Look up metadata. Without a repository only the locally installed copy
    /// is consulted.
    pub fn find_metadata(
        &self,
        metadata: &Metadata,
        repository: Option<&RemoteRepository>,
        context: &str,
    ) -> Option<PathBuf> {
        let path = match repository {
            None => self.metadata_path_local(metadata),
            Some(repository) => self.metadata_path_remote(metadata, repository, context),
        };
        path.is_file().then_some(path)
    }

    fn tracking_file(&self, artifact_path: &Path) -> PathBuf {
        let dir = artifact_path.parent().unwrap_or(Path::new(""));
        dir.join(&self.tracking_filename)
    }
}

fn tracking_key(filename: &str, origin: &str) -> String {
    format!("{filename}>{origin}")
}
