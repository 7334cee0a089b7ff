//! Shared fixtures for the resolver integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use depot_core::artifact::Artifact;
use depot_core::repository::{LocalRepository, RemoteRepository};
use depot_core::session::Session;
use depot_resolver::descriptor::{ArtifactDescriptor, DescriptorReader, DescriptorRequest};
use depot_util::errors::{DepotError, DepotResult};
use tempfile::TempDir;

/// Descriptor reader backed by an in-memory table.
///
/// Unknown coordinates synthesize an empty descriptor, so leaf artifacts do
/// not need explicit registration; `strict` turns unknowns into errors.
#[derive(Default)]
pub struct MapDescriptorReader {
    descriptors: Mutex<HashMap<String, ArtifactDescriptor>>,
    reads: AtomicUsize,
    pub strict: bool,
}

impl MapDescriptorReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn add(&self, descriptor: ArtifactDescriptor) {
        let key = descriptor
            .artifact
            .as_ref()
            .expect("descriptor carries its artifact")
            .id();
        self.descriptors.lock().unwrap().insert(key, descriptor);
    }

    /// Register a descriptor under a coordinate other than its own, the way
    /// a relocated artifact answers for its former coordinates.
    pub fn add_under(&self, requested: &Artifact, descriptor: ArtifactDescriptor) {
        self.descriptors
            .lock()
            .unwrap()
            .insert(requested.id(), descriptor);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl DescriptorReader for MapDescriptorReader {
    fn read_descriptor(
        &self,
        _session: &Session,
        request: &DescriptorRequest,
    ) -> DepotResult<ArtifactDescriptor> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(descriptor) = self.descriptors.lock().unwrap().get(&request.artifact.id()) {
            return Ok(descriptor.clone());
        }
        if self.strict {
            return Err(DepotError::Descriptor {
                coordinate: request.artifact.to_string(),
                message: "no descriptor registered".to_string(),
            });
        }
        Ok(ArtifactDescriptor::lacking(request.artifact.clone()))
    }
}

/// A scratch remote repository laid out maven-2 on disk, plus a session with
/// an empty local repository.
pub struct RepoFixture {
    pub tmp: TempDir,
    pub session: Session,
    pub repository: RemoteRepository,
    pub remote_root: PathBuf,
}

impl RepoFixture {
    pub fn new() -> Self {
        Self::with_id("fileserve")
    }

    pub fn with_id(id: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let remote_root = tmp.path().join(format!("remote-{id}"));
        std::fs::create_dir_all(&remote_root).unwrap();
        let session = Session::new(LocalRepository::new(&tmp.path().join("cache")));
        let repository = RemoteRepository::new(id, &format!("file://{}", remote_root.display()));
        Self {
            tmp,
            session,
            repository,
            remote_root,
        }
    }

    /// Another remote served from the same scratch dir.
    pub fn extra_repository(&self, id: &str) -> (RemoteRepository, PathBuf) {
        let root = self.tmp.path().join(format!("remote-{id}"));
        std::fs::create_dir_all(&root).unwrap();
        (
            RemoteRepository::new(id, &format!("file://{}", root.display())),
            root,
        )
    }

    /// Place an artifact with a SHA-1 sidecar into a remote root.
    pub fn host_artifact(root: &Path, artifact: &Artifact, bytes: &[u8]) -> PathBuf {
        let mut path = root.join(artifact.group_id().replace('.', "/"));
        path.push(artifact.artifact_id());
        path.push(artifact.base_version());
        let mut name = format!("{}-{}", artifact.artifact_id(), artifact.version());
        if !artifact.classifier().is_empty() {
            name.push('-');
            name.push_str(artifact.classifier());
        }
        name.push('.');
        name.push_str(artifact.extension());
        path.push(name);

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        let sidecar = path.with_file_name(format!(
            "{}.sha1",
            path.file_name().unwrap().to_string_lossy()
        ));
        std::fs::write(sidecar, depot_util::hash::sha1_hex(bytes)).unwrap();
        path
    }

    pub fn host_file(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}
