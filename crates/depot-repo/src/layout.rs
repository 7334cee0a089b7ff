//! Maven-2 layout path arithmetic.
//!
//! `org.example:lib:jar:1.0` lives at `org/example/lib/1.0/lib-1.0.jar`.
//! Snapshot artifacts are stored under their base-version directory; the
//! local filename uses the base version while the remote filename keeps the
//! timestamped version.

use std::path::PathBuf;
use std::sync::Arc;

use depot_core::artifact::Artifact;
use depot_core::config::SessionConfig;
use depot_core::metadata::Metadata;
use depot_core::registry::PrioritizedComponents;
use depot_core::repository::RemoteRepository;
use depot_core::session::Session;
use depot_util::errors::{DepotError, DepotResult};

/// Maps coordinates to relative paths within a repository tree.
pub trait RepositoryLayout: Send + Sync + std::fmt::Debug {
    /// Path of an artifact. `remote` selects the remote (timestamped)
    /// filename over the local (base-version) one.
    fn artifact_path(&self, artifact: &Artifact, remote: bool) -> PathBuf;

    /// Path of a metadata document as stored inside a repository.
    fn metadata_path(&self, metadata: &Metadata) -> PathBuf;

    /// Path of a metadata document inside the local cache, disambiguated by
    /// the repository key it was fetched under (`local` for installs).
    fn metadata_cache_path(&self, metadata: &Metadata, repository_key: &str) -> PathBuf;

    /// Checksum sidecar extensions in trust order; the first is authoritative.
    fn checksum_extensions(&self) -> &[&str] {
        &["sha256", "sha1", "md5"]
    }
}

/// The standard maven-2 layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct Maven2Layout;

impl Maven2Layout {
    fn artifact_filename(artifact: &Artifact, version: &str) -> String {
        let mut name = format!("{}-{}", artifact.artifact_id(), version);
        if !artifact.classifier().is_empty() {
            name.push('-');
            name.push_str(artifact.classifier());
        }
        if !artifact.extension().is_empty() {
            name.push('.');
            name.push_str(artifact.extension());
        }
        name
    }

    fn metadata_dir(metadata: &Metadata) -> PathBuf {
        let mut dir = PathBuf::new();
        if !metadata.group_id.is_empty() {
            dir.push(metadata.group_id.replace('.', "/"));
            if !metadata.artifact_id.is_empty() {
                dir.push(&metadata.artifact_id);
                if !metadata.version.is_empty() {
                    dir.push(&metadata.version);
                }
            }
        }
        dir
    }
}

impl RepositoryLayout for Maven2Layout {
    fn artifact_path(&self, artifact: &Artifact, remote: bool) -> PathBuf {
        let base_version = artifact.base_version();
        let version = if remote {
            artifact.version().to_string()
        } else {
            base_version.clone()
        };
        let mut path = PathBuf::from(artifact.group_id().replace('.', "/"));
        path.push(artifact.artifact_id());
        path.push(&base_version);
        path.push(Self::artifact_filename(artifact, &version));
        path
    }

    fn metadata_path(&self, metadata: &Metadata) -> PathBuf {
        let mut dir = Self::metadata_dir(metadata);
        dir.push(&metadata.kind);
        dir
    }

    fn metadata_cache_path(&self, metadata: &Metadata, repository_key: &str) -> PathBuf {
        let mut dir = Self::metadata_dir(metadata);
        dir.push(insert_repository_key(&metadata.kind, repository_key));
        dir
    }
}

/// `maven-metadata.xml` + `central` becomes `maven-metadata-central.xml`.
fn insert_repository_key(kind: &str, repository_key: &str) -> String {
    match kind.find('.') {
        Some(idx) => format!("{}-{}{}", &kind[..idx], repository_key, &kind[idx..]),
        None => format!("{kind}-{repository_key}"),
    }
}

/// The key a repository's metadata is cached under.
///
/// Plain repositories use their id. A repository manager serves changing
/// aggregate content, so its key also fingerprints `(context, mirrored ids)`.
pub fn repository_key(repository: &RemoteRepository, context: &str) -> String {
    if !repository.repository_manager || repository.mirrored.is_empty() {
        return repository.id.clone();
    }
    let mut ids: Vec<&str> = repository.mirrored.iter().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    let mut buffer = String::from(context);
    for id in ids {
        buffer.push(',');
        buffer.push_str(id);
    }
    let digest = depot_util::hash::sha1_hex(buffer.as_bytes());
    format!("{}-{}", repository.id, digest)
}

/// Creates layouts for repositories it understands.
pub trait LayoutFactory: Send + Sync {
    fn priority(&self) -> f32;

    fn new_layout(
        &self,
        session: &Session,
        repository_content_type: &str,
    ) -> Option<Arc<dyn RepositoryLayout>>;
}

/// Factory for the maven-2 layout, registered for the `default` content type.
#[derive(Debug, Default)]
pub struct Maven2LayoutFactory;

impl LayoutFactory for Maven2LayoutFactory {
    fn priority(&self) -> f32 {
        0.0
    }

    fn new_layout(
        &self,
        _session: &Session,
        repository_content_type: &str,
    ) -> Option<Arc<dyn RepositoryLayout>> {
        if repository_content_type.is_empty() || repository_content_type == "default" {
            Some(Arc::new(Maven2Layout))
        } else {
            None
        }
    }
}

/// Priority-ordered registry of layout factories.
pub struct LayoutProvider {
    factories: PrioritizedComponents<dyn LayoutFactory>,
}

impl LayoutProvider {
    /// A provider with the standard maven-2 factory registered.
    pub fn new(config: &SessionConfig) -> Self {
        let mut provider = Self {
            factories: PrioritizedComponents::new(),
        };
        provider.register(Arc::new(Maven2LayoutFactory), "Maven2LayoutFactory", config);
        provider
    }

    pub fn register(
        &mut self,
        factory: Arc<dyn LayoutFactory>,
        type_name: &str,
        config: &SessionConfig,
    ) {
        let priority = factory.priority();
        self.factories.insert(factory, type_name, priority, config);
    }

    pub fn layout(
        &self,
        session: &Session,
        repository: &RemoteRepository,
    ) -> DepotResult<Arc<dyn RepositoryLayout>> {
        for factory in self.factories.enabled() {
            if let Some(layout) = factory.new_layout(session, &repository.content_type) {
                return Ok(layout);
            }
        }
        Err(DepotError::NoLayout {
            repository: repository.id.clone(),
            content_type: repository.content_type.clone(),
        })
    }
}
