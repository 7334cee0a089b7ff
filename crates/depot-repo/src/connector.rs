//! The repository connector seam and its file-system implementation.
//!
//! A connector moves batches of artifacts and metadata between the local
//! cache and one remote repository. Transfer outcomes land in per-item error
//! slots rather than short-circuiting the batch. The built-in connector
//! serves `file:` repositories through the maven-2 layout with checksum
//! sidecar validation, which is all the engine itself needs; network
//! transports plug in through [`ConnectorFactory`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use depot_core::artifact::Artifact;
use depot_core::config::SessionConfig;
use depot_core::metadata::Metadata;
use depot_core::registry::PrioritizedComponents;
use depot_core::repository::RemoteRepository;
use depot_core::session::Session;
use depot_util::errors::{DepotError, DepotResult};

use crate::checksum::{new_checksum_policy, ChecksumPolicy, ChecksumPolicyKind};
use crate::layout::{LayoutProvider, RepositoryLayout};

/// A pending artifact fetch into the local cache.
#[derive(Debug)]
pub struct ArtifactDownload {
    pub artifact: Artifact,
    /// Destination in the local cache.
    pub file: PathBuf,
    /// Only probe the remote for existence; the destination already holds a
    /// usable (if stale) file that must not be clobbered.
    pub existence_check: bool,
    pub checksum_policy: String,
    pub context: String,
    /// The repositories aggregated behind the connector's repository, for
    /// event reporting and origin tracking.
    pub repositories: Vec<RemoteRepository>,
    /// Contexts the serving repository vouches for, filled by the connector.
    pub supported_contexts: Vec<String>,
    pub error: Option<DepotError>,
}

impl ArtifactDownload {
    pub fn new(artifact: Artifact, file: PathBuf, context: &str) -> Self {
        Self {
            artifact,
            file,
            existence_check: false,
            checksum_policy: String::new(),
            context: context.to_string(),
            repositories: Vec::new(),
            supported_contexts: Vec::new(),
            error: None,
        }
    }
}

/// A pending metadata fetch into the local cache.
#[derive(Debug)]
pub struct MetadataDownload {
    pub metadata: Metadata,
    pub file: PathBuf,
    pub checksum_policy: String,
    pub context: String,
    pub repositories: Vec<RemoteRepository>,
    pub error: Option<DepotError>,
}

impl MetadataDownload {
    pub fn new(metadata: Metadata, file: PathBuf, context: &str) -> Self {
        Self {
            metadata,
            file,
            checksum_policy: String::new(),
            context: context.to_string(),
            repositories: Vec::new(),
            error: None,
        }
    }
}

/// A pending artifact upload.
#[derive(Debug)]
pub struct ArtifactUpload {
    pub artifact: Artifact,
    pub file: PathBuf,
    pub error: Option<DepotError>,
}

/// A pending metadata upload.
#[derive(Debug)]
pub struct MetadataUpload {
    pub metadata: Metadata,
    pub file: PathBuf,
    pub error: Option<DepotError>,
}

/// Moves batches of files between the local cache and one remote repository.
pub trait RepositoryConnector: Send + std::fmt::Debug {
    fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]);

    fn put(&self, artifacts: &mut [ArtifactUpload], metadata: &mut [MetadataUpload]);
}

/// Creates connectors for repositories it understands.
pub trait ConnectorFactory: Send + Sync {
    fn priority(&self) -> f32;

    fn new_connector(
        &self,
        session: &Session,
        repository: &RemoteRepository,
    ) -> DepotResult<Box<dyn RepositoryConnector>>;
}

/// Priority-ordered registry of connector factories.
pub struct ConnectorProvider {
    factories: PrioritizedComponents<dyn ConnectorFactory>,
}

impl ConnectorProvider {
    /// A provider with the built-in file-system factory registered.
    pub fn new(config: &SessionConfig) -> Self {
        let mut provider = Self {
            factories: PrioritizedComponents::new(),
        };
        provider.register(Arc::new(FileConnectorFactory), "FileConnectorFactory", config);
        provider
    }

    pub fn register(
        &mut self,
        factory: Arc<dyn ConnectorFactory>,
        type_name: &str,
        config: &SessionConfig,
    ) {
        let priority = factory.priority();
        self.factories.insert(factory, type_name, priority, config);
    }

    /// The connector from the highest-priority factory accepting the
    /// repository.
    pub fn new_connector(
        &self,
        session: &Session,
        repository: &RemoteRepository,
    ) -> DepotResult<Box<dyn RepositoryConnector>> {
        for factory in self.factories.enabled() {
            match factory.new_connector(session, repository) {
                Ok(connector) => return Ok(connector),
                Err(e) => {
                    tracing::debug!("connector factory declined {}: {e}", repository.id);
                }
            }
        }
        Err(DepotError::NoConnector {
            repository: repository.id.clone(),
            url: repository.url.clone(),
        })
    }
}

/// Factory for [`FileConnector`], accepting `file:` URLs and plain paths.
#[derive(Debug, Default)]
pub struct FileConnectorFactory;

impl ConnectorFactory for FileConnectorFactory {
    fn priority(&self) -> f32 {
        0.0
    }

    fn new_connector(
        &self,
        session: &Session,
        repository: &RemoteRepository,
    ) -> DepotResult<Box<dyn RepositoryConnector>> {
        let root = match file_root(&repository.url) {
            Some(root) => root,
            None => {
                return Err(DepotError::NoConnector {
                    repository: repository.id.clone(),
                    url: repository.url.clone(),
                })
            }
        };
        let layout = LayoutProvider::new(&session.config).layout(session, repository)?;
        Ok(Box::new(FileConnector {
            root,
            repository: repository.clone(),
            layout,
        }))
    }
}

/// `file:///var/repo` and `/var/repo` both root at `/var/repo`.
fn file_root(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if let Some(rest) = url.strip_prefix("file:") {
        return Some(PathBuf::from(rest));
    }
    if url.starts_with('/') {
        return Some(PathBuf::from(url));
    }
    None
}

/// Connector serving a directory laid out like a remote repository.
#[derive(Debug)]
pub struct FileConnector {
    root: PathBuf,
    repository: RemoteRepository,
    layout: Arc<dyn RepositoryLayout>,
}

impl FileConnector {
    fn fetch(
        &self,
        source: &Path,
        destination: &Path,
        checksum_policy: &str,
        existence_check: bool,
    ) -> DepotResult<()> {
        if !source.is_file() {
            return Err(DepotError::Io {
                message: format!("{} does not exist", source.display()),
            });
        }
        if existence_check {
            return Ok(());
        }
        depot_util::fs::copy_preserving_mtime(source, destination)?;

        let kind = ChecksumPolicyKind::parse(checksum_policy);
        let resource = source.to_string_lossy().to_string();
        if let Some(mut policy) = new_checksum_policy(kind, &resource) {
            if let Err(error) = self.validate(source, destination, policy.as_mut()) {
                if policy.on_transfer_checksum_failure(&error) {
                    let _ = std::fs::remove_file(destination);
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Run the destination file against the source's checksum sidecars.
    fn validate(
        &self,
        source: &Path,
        destination: &Path,
        policy: &mut dyn ChecksumPolicy,
    ) -> DepotResult<()> {
        for extension in self.layout.checksum_extensions() {
            let sidecar = sidecar_path(source, extension);
            if !sidecar.is_file() {
                continue;
            }
            let algorithm = match *extension {
                "sha256" => "SHA-256",
                "sha1" => "SHA-1",
                "md5" => "MD5",
                other => other,
            };
            let expected = match std::fs::read_to_string(&sidecar) {
                Ok(content) => depot_util::hash::extract_digest(&content),
                Err(e) => {
                    policy.on_checksum_error(algorithm, 0, &DepotError::io(e));
                    continue;
                }
            };
            let actual = match compute_digest(destination, extension) {
                Ok(digest) => digest,
                Err(e) => {
                    policy.on_checksum_error(algorithm, 0, &DepotError::io(e));
                    continue;
                }
            };
            if actual.eq_ignore_ascii_case(&expected) {
                policy.on_checksum_match(algorithm, 0);
                return Ok(());
            }
            policy.on_checksum_mismatch(
                algorithm,
                0,
                DepotError::ChecksumFailure {
                    file: destination.to_string_lossy().to_string(),
                    message: format!("{algorithm} expected {expected}, got {actual}"),
                },
            )?;
        }
        policy.on_no_more_checksums()
    }

    fn store(&self, source: &Path, destination: &Path) -> DepotResult<()> {
        depot_util::fs::copy_preserving_mtime(source, destination)?;
        // Published files carry their own sidecars so consumers can verify.
        for extension in self.layout.checksum_extensions() {
            let digest = compute_digest(destination, extension).map_err(DepotError::io)?;
            std::fs::write(sidecar_path(destination, extension), digest)
                .map_err(DepotError::io)?;
        }
        Ok(())
    }
}

fn sidecar_path(file: &Path, extension: &str) -> PathBuf {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    file.with_file_name(format!("{name}.{extension}"))
}

fn compute_digest(file: &Path, extension: &str) -> std::io::Result<String> {
    match extension {
        "sha256" => depot_util::hash::sha256_file(file),
        "md5" => depot_util::hash::md5_file(file),
        _ => depot_util::hash::sha1_file(file),
    }
}

impl RepositoryConnector for FileConnector {
    fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]) {
        for download in artifacts.iter_mut() {
            let source = self.root.join(self.layout.artifact_path(&download.artifact, true));
            match self.fetch(
                &source,
                &download.file,
                &download.checksum_policy,
                download.existence_check,
            ) {
                Ok(()) => {
                    let context = if download.context.is_empty() {
                        "default".to_string()
                    } else {
                        download.context.clone()
                    };
                    download.supported_contexts = vec![context];
                    download.error = None;
                }
                Err(DepotError::Io { .. }) if !source.is_file() => {
                    download.error = Some(DepotError::ArtifactNotFound {
                        coordinate: download.artifact.to_string(),
                        location: self.repository.id.clone(),
                    });
                }
                Err(error) => {
                    download.error = Some(error);
                }
            }
        }
        for download in metadata.iter_mut() {
            let source = self.root.join(self.layout.metadata_path(&download.metadata));
            match self.fetch(&source, &download.file, &download.checksum_policy, false) {
                Ok(()) => download.error = None,
                Err(DepotError::Io { .. }) if !source.is_file() => {
                    download.error = Some(DepotError::MetadataNotFound {
                        key: download.metadata.key(),
                        location: self.repository.id.clone(),
                    });
                }
                Err(error) => download.error = Some(error),
            }
        }
    }

    fn put(&self, artifacts: &mut [ArtifactUpload], metadata: &mut [MetadataUpload]) {
        for upload in artifacts.iter_mut() {
            let destination = self.root.join(self.layout.artifact_path(&upload.artifact, true));
            upload.error = match self.store(&upload.file, &destination) {
                Ok(()) => None,
                Err(error) => Some(DepotError::ArtifactTransfer {
                    coordinate: upload.artifact.to_string(),
                    repository: self.repository.id.clone(),
                    message: error.to_string(),
                }),
            };
        }
        for upload in metadata.iter_mut() {
            let destination = self.root.join(self.layout.metadata_path(&upload.metadata));
            upload.error = match self.store(&upload.file, &destination) {
                Ok(()) => None,
                Err(error) => Some(DepotError::MetadataTransfer {
                    key: upload.metadata.key(),
                    repository: self.repository.id.clone(),
                    message: error.to_string(),
                }),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Maven2Layout;
    use depot_core::metadata::Nature;
    use depot_core::repository::LocalRepository;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        session: Session,
        repository: RemoteRepository,
        remote_root: PathBuf,
        cache_root: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let remote_root = tmp.path().join("remote");
        let cache_root = tmp.path().join("cache");
        std::fs::create_dir_all(&remote_root).unwrap();
        let session = Session::new(LocalRepository::new(&cache_root));
        let repository = RemoteRepository::new(
            "fileserve",
            &format!("file://{}", remote_root.display()),
        );
        Fixture {
            _tmp: tmp,
            session,
            repository,
            remote_root,
            cache_root,
        }
    }

    fn host_artifact(fixture: &Fixture, artifact: &Artifact, bytes: &[u8], with_sha1: bool) {
        let layout = Maven2Layout;
        let path = fixture.remote_root.join(layout.artifact_path(artifact, true));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        if with_sha1 {
            std::fs::write(
                sidecar_path(&path, "sha1"),
                depot_util::hash::sha1_hex(bytes),
            )
            .unwrap();
        }
    }

    fn connector(fixture: &Fixture) -> Box<dyn RepositoryConnector> {
        ConnectorProvider::new(&fixture.session.config)
            .new_connector(&fixture.session, &fixture.repository)
            .unwrap()
    }

    #[test]
    fn provider_rejects_unknown_scheme() {
        let f = fixture();
        let https = RemoteRepository::new("web", "https://repo.example");
        let err = ConnectorProvider::new(&f.session.config)
            .new_connector(&f.session, &https)
            .unwrap_err();
        assert!(matches!(err, DepotError::NoConnector { .. }));
    }

    #[test]
    fn download_copies_and_validates() {
        let f = fixture();
        let artifact = Artifact::new("org.example", "lib", "jar", "1.0");
        host_artifact(&f, &artifact, b"jar bytes", true);

        let dest = f.cache_root.join("org/example/lib/1.0/lib-1.0.jar");
        let mut download = ArtifactDownload::new(artifact, dest.clone(), "default");
        download.checksum_policy = "fail".to_string();

        connector(&f).get(std::slice::from_mut(&mut download), &mut []);
        assert!(download.error.is_none(), "{:?}", download.error);
        assert_eq!(std::fs::read(&dest).unwrap(), b"jar bytes");
        assert_eq!(download.supported_contexts, vec!["default".to_string()]);
    }

    #[test]
    fn download_missing_artifact_reports_not_found() {
        let f = fixture();
        let artifact = Artifact::new("g", "missing", "jar", "1.0");
        let mut download = ArtifactDownload::new(
            artifact,
            f.cache_root.join("g/missing/1.0/missing-1.0.jar"),
            "default",
        );
        connector(&f).get(std::slice::from_mut(&mut download), &mut []);
        assert!(download.error.as_ref().unwrap().is_not_found());
    }

    #[test]
    fn corrupt_download_fails_and_is_discarded_under_fail_policy() {
        let f = fixture();
        let artifact = Artifact::new("g", "a", "jar", "1.0");
        host_artifact(&f, &artifact, b"real bytes", false);
        // Sidecar disagreeing with content.
        let layout = Maven2Layout;
        let remote = f.remote_root.join(layout.artifact_path(&artifact, true));
        std::fs::write(
            sidecar_path(&remote, "sha1"),
            depot_util::hash::sha1_hex(b"other bytes"),
        )
        .unwrap();

        let dest = f.cache_root.join("g/a/1.0/a-1.0.jar");
        let mut download = ArtifactDownload::new(artifact, dest.clone(), "default");
        download.checksum_policy = "fail".to_string();
        connector(&f).get(std::slice::from_mut(&mut download), &mut []);

        let error = download.error.expect("checksum failure");
        assert!(matches!(error, DepotError::ChecksumFailure { .. }));
        assert!(!dest.exists(), "corrupt file must not stay in the cache");
    }

    #[test]
    fn corrupt_download_survives_under_warn_policy() {
        let f = fixture();
        let artifact = Artifact::new("g", "a", "jar", "1.0");
        host_artifact(&f, &artifact, b"real bytes", false);
        let layout = Maven2Layout;
        let remote = f.remote_root.join(layout.artifact_path(&artifact, true));
        std::fs::write(
            sidecar_path(&remote, "sha1"),
            depot_util::hash::sha1_hex(b"other bytes"),
        )
        .unwrap();

        let dest = f.cache_root.join("g/a/1.0/a-1.0.jar");
        let mut download = ArtifactDownload::new(artifact, dest.clone(), "default");
        download.checksum_policy = "warn".to_string();
        connector(&f).get(std::slice::from_mut(&mut download), &mut []);
        assert!(download.error.is_none());
        assert!(dest.is_file());
    }

    #[test]
    fn existence_check_skips_transfer() {
        let f = fixture();
        let artifact = Artifact::new("g", "a", "jar", "1.0");
        host_artifact(&f, &artifact, b"remote", true);

        let dest = f.cache_root.join("g/a/1.0/a-1.0.jar");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"stale local copy").unwrap();

        let mut download = ArtifactDownload::new(artifact, dest.clone(), "default");
        download.existence_check = true;
        connector(&f).get(std::slice::from_mut(&mut download), &mut []);
        assert!(download.error.is_none());
        // The stale local copy stays untouched.
        assert_eq!(std::fs::read(&dest).unwrap(), b"stale local copy");
    }

    #[test]
    fn metadata_download_and_miss() {
        let f = fixture();
        let meta = Metadata::new("g", "a", "", "maven-metadata.xml", Nature::Release);

        let dest = f.cache_root.join("g/a/maven-metadata-fileserve.xml");
        let mut download = MetadataDownload::new(meta.clone(), dest.clone(), "default");
        connector(&f).get(&mut [], std::slice::from_mut(&mut download));
        assert!(download.error.as_ref().unwrap().is_not_found());

        let remote = f.remote_root.join("g/a/maven-metadata.xml");
        std::fs::create_dir_all(remote.parent().unwrap()).unwrap();
        std::fs::write(&remote, b"<metadata/>").unwrap();

        let mut retry = MetadataDownload::new(meta, dest.clone(), "default");
        connector(&f).get(&mut [], std::slice::from_mut(&mut retry));
        assert!(retry.error.is_none());
        assert_eq!(std::fs::read(&dest).unwrap(), b"<metadata/>");
    }

    #[test]
    fn upload_places_file_with_sidecars() {
        let f = fixture();
        let artifact = Artifact::new("g", "a", "jar", "1.0");
        let staged = f.cache_root.join("staged.jar");
        std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
        std::fs::write(&staged, b"published").unwrap();

        let mut upload = ArtifactUpload {
            artifact,
            file: staged,
            error: None,
        };
        connector(&f).put(std::slice::from_mut(&mut upload), &mut []);
        assert!(upload.error.is_none());

        let remote = f.remote_root.join("g/a/1.0/a-1.0.jar");
        assert_eq!(std::fs::read(&remote).unwrap(), b"published");
        let sha256 = std::fs::read_to_string(sidecar_path(&remote, "sha256")).unwrap();
        assert_eq!(sha256, depot_util::hash::sha256_hex(b"published"));
        let sha1 = std::fs::read_to_string(sidecar_path(&remote, "sha1")).unwrap();
        assert_eq!(sha1, depot_util::hash::sha1_hex(b"published"));
        assert!(sidecar_path(&remote, "md5").is_file());
    }

    #[test]
    fn sha256_sidecar_is_consulted_first() {
        let f = fixture();
        let artifact = Artifact::new("g", "a", "jar", "1.0");
        host_artifact(&f, &artifact, b"real bytes", false);
        let layout = Maven2Layout;
        let remote = f.remote_root.join(layout.artifact_path(&artifact, true));
        // A correct SHA-256 sidecar settles validation before the bogus
        // SHA-1 is ever looked at.
        std::fs::write(
            sidecar_path(&remote, "sha256"),
            depot_util::hash::sha256_hex(b"real bytes"),
        )
        .unwrap();
        std::fs::write(
            sidecar_path(&remote, "sha1"),
            depot_util::hash::sha1_hex(b"other bytes"),
        )
        .unwrap();

        let dest = f.cache_root.join("g/a/1.0/a-1.0.jar");
        let mut download = ArtifactDownload::new(artifact, dest.clone(), "default");
        download.checksum_policy = "fail".to_string();
        connector(&f).get(std::slice::from_mut(&mut download), &mut []);
        assert!(download.error.is_none(), "{:?}", download.error);
        assert!(dest.is_file());
    }
}
