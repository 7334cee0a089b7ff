//! Installation of artifacts and metadata into the local repository.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use depot_core::artifact::Artifact;
use depot_core::config::SessionConfig;
use depot_core::events::{EventKind, RepositoryEvent};
use depot_core::metadata::{MergeableMetadata, Metadata};
use depot_core::session::Session;
use depot_core::sync::{NamedLockSyncContext, SyncContext};
use depot_util::errors::{DepotError, DepotResult};

use crate::generator::MetadataGeneratorRegistry;
use crate::local::EnhancedLocalRepositoryManager;

/// Artifacts and metadata to place into the local repository.
pub struct InstallRequest {
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Box<dyn MergeableMetadata>>,
    pub context: String,
}

impl InstallRequest {
    pub fn new(artifacts: Vec<Artifact>) -> Self {
        Self {
            artifacts,
            metadata: Vec::new(),
            context: String::new(),
        }
    }
}

/// What ended up in the local repository.
#[derive(Debug)]
pub struct InstallResult {
    /// The installed artifacts, files pointing at their local paths.
    pub artifacts: Vec<Artifact>,
    /// Local paths of every installed metadata document.
    pub metadata: Vec<PathBuf>,
}

/// Installation aborted; the local repository may hold earlier items of the
/// request.
#[derive(Debug, Error, Diagnostic)]
#[error("installation failed: {source}")]
pub struct InstallError {
    #[source]
    pub source: DepotError,
}

impl From<DepotError> for InstallError {
    fn from(source: DepotError) -> Self {
        Self { source }
    }
}

/// Places artifacts into the local repository and regenerates metadata.
pub struct Installer {
    generators: MetadataGeneratorRegistry,
}

impl Installer {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            generators: MetadataGeneratorRegistry::new(config),
        }
    }

    pub fn with_registry(generators: MetadataGeneratorRegistry) -> Self {
        Self { generators }
    }

    pub fn install(
        &self,
        session: &Session,
        request: InstallRequest,
    ) -> Result<InstallResult, InstallError> {
        session.validate()?;
        let manager = EnhancedLocalRepositoryManager::new(session)?;
        let mut generators = self.generators.generators(session);

        let InstallRequest {
            artifacts,
            metadata: request_metadata,
            context,
        } = request;

        let mut prepared = Vec::new();
        for generator in &mut generators {
            prepared.extend(generator.prepare(&artifacts));
        }
        let mut artifacts = artifacts;
        for generator in &mut generators {
            artifacts = artifacts
                .into_iter()
                .map(|artifact| generator.transform_artifact(artifact))
                .collect();
        }

        let mut sync = NamedLockSyncContext::new(session.lock_manager.clone(), false);
        let infos: Vec<Metadata> = prepared
            .iter()
            .chain(request_metadata.iter())
            .map(|m| m.metadata().clone())
            .collect();
        sync.acquire(&artifacts, &infos)?;

        let mut result = InstallResult {
            artifacts: Vec::new(),
            metadata: Vec::new(),
        };

        for mut metadata in prepared {
            result
                .metadata
                .push(install_metadata(session, &manager, metadata.as_mut(), &context)?);
        }

        for artifact in &artifacts {
            result
                .artifacts
                .push(install_artifact(session, &manager, artifact, &context)?);
        }

        let mut post = request_metadata;
        for generator in &mut generators {
            post.extend(generator.finish(&artifacts));
        }
        let infos: Vec<Metadata> = post.iter().map(|m| m.metadata().clone()).collect();
        sync.acquire(&[], &infos)?;
        for mut metadata in post {
            result
                .metadata
                .push(install_metadata(session, &manager, metadata.as_mut(), &context)?);
        }

        Ok(result)
    }
}

fn install_artifact(
    session: &Session,
    manager: &EnhancedLocalRepositoryManager,
    artifact: &Artifact,
    context: &str,
) -> DepotResult<Artifact> {
    session.emit(RepositoryEvent::artifact(
        EventKind::ArtifactInstalling,
        artifact,
        context,
    ));

    let outcome: DepotResult<Artifact> = (|| {
        let source = artifact.file().ok_or_else(|| DepotError::Invalid {
            message: format!("artifact {artifact} has no file to install"),
        })?;
        let destination = manager.artifact_path(artifact, false);
        // POM content can change without its length or mtime moving, so
        // descriptors always overwrite.
        if artifact.extension() == "pom"
            || !depot_util::fs::same_len_and_mtime(source, &destination)
        {
            depot_util::fs::copy_preserving_mtime(source, &destination)?;
        }
        manager.add_artifact(artifact, None, &[])?;
        Ok(artifact.with_file(destination))
    })();

    match outcome {
        Ok(installed) => {
            session.emit(RepositoryEvent::artifact(
                EventKind::ArtifactInstalled,
                &installed,
                context,
            ));
            Ok(installed)
        }
        Err(error) => {
            session.emit(
                RepositoryEvent::artifact(EventKind::ArtifactInstalled, artifact, context)
                    .with_error(error.clone()),
            );
            Err(error)
        }
    }
}

fn install_metadata(
    session: &Session,
    manager: &EnhancedLocalRepositoryManager,
    metadata: &mut dyn MergeableMetadata,
    context: &str,
) -> DepotResult<PathBuf> {
    session.emit(RepositoryEvent::metadata(
        EventKind::MetadataInstalling,
        metadata.metadata(),
        context,
    ));

    let destination = manager.metadata_path_local(metadata.metadata());
    let current = destination.is_file().then(|| destination.clone());
    let outcome = metadata.merge(current.as_deref(), &destination);

    match outcome {
        Ok(()) => {
            session.emit(
                RepositoryEvent::metadata(EventKind::MetadataInstalled, metadata.metadata(), context)
                    .with_file(destination.clone()),
            );
            Ok(destination)
        }
        Err(error) => {
            session.emit(
                RepositoryEvent::metadata(EventKind::MetadataInstalled, metadata.metadata(), context)
                    .with_error(error.clone()),
            );
            Err(error)
        }
    }
}
