//! Deployment of artifacts and metadata to a remote repository.

use miette::Diagnostic;
use thiserror::Error;

use depot_core::artifact::Artifact;
use depot_core::config::SessionConfig;
use depot_core::events::{EventKind, RepositoryEvent};
use depot_core::metadata::{MergeableMetadata, Metadata};
use depot_core::repository::RemoteRepository;
use depot_core::session::Session;
use depot_core::sync::{NamedLockSyncContext, SyncContext};
use depot_util::errors::{DepotError, DepotResult};

use crate::connector::{
    ArtifactUpload, ConnectorProvider, MetadataDownload, MetadataUpload, RepositoryConnector,
};
use crate::generator::MetadataGeneratorRegistry;
use crate::local::EnhancedLocalRepositoryManager;
use crate::offline;

/// Artifacts and metadata to publish to one remote repository.
pub struct DeployRequest {
    pub repository: RemoteRepository,
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Box<dyn MergeableMetadata>>,
    pub context: String,
}

impl DeployRequest {
    pub fn new(repository: RemoteRepository, artifacts: Vec<Artifact>) -> Self {
        Self {
            repository,
            artifacts,
            metadata: Vec::new(),
            context: String::new(),
        }
    }
}

/// What was uploaded.
#[derive(Debug)]
pub struct DeployResult {
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Metadata>,
}

/// Deployment aborted; the remote repository may hold earlier items of the
/// request.
#[derive(Debug, Error, Diagnostic)]
#[error("deployment failed: {source}")]
pub struct DeployError {
    #[source]
    pub source: DepotError,
}

impl From<DepotError> for DeployError {
    fn from(source: DepotError) -> Self {
        Self { source }
    }
}

/// Uploads artifacts and merged metadata through a repository connector.
pub struct Deployer {
    connectors: ConnectorProvider,
    generators: MetadataGeneratorRegistry,
}

impl Deployer {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            connectors: ConnectorProvider::new(config),
            generators: MetadataGeneratorRegistry::new(config),
        }
    }

    pub fn with_components(
        connectors: ConnectorProvider,
        generators: MetadataGeneratorRegistry,
    ) -> Self {
        Self {
            connectors,
            generators,
        }
    }

    pub fn deploy(
        &self,
        session: &Session,
        request: DeployRequest,
    ) -> Result<DeployResult, DeployError> {
        session.validate()?;
        offline::assert_online(session, &request.repository)?;

        let manager = EnhancedLocalRepositoryManager::new(session)?;
        let mut generators = self.generators.generators(session);

        let DeployRequest {
            repository,
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

        let connector = self.connectors.new_connector(session, &repository)?;
        let catapult = EventCatapult {
            session,
            repository: &repository,
            context: &context,
        };

        let mut result = DeployResult {
            artifacts: Vec::new(),
            metadata: Vec::new(),
        };

        for mut metadata in prepared {
            upload_metadata(
                session,
                &manager,
                connector.as_ref(),
                &repository,
                metadata.as_mut(),
                &catapult,
            )?;
            result.metadata.push(metadata.metadata().clone());
        }

        // Artifacts go up before derived metadata so a failed upload never
        // leaves an index pointing at files that are not there.
        let mut uploads: Vec<ArtifactUpload> = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            let file = artifact
                .file()
                .ok_or_else(|| DepotError::Invalid {
                    message: format!("artifact {artifact} has no file to deploy"),
                })?
                .to_path_buf();
            catapult.artifact(EventKind::ArtifactDeploying, artifact, None);
            uploads.push(ArtifactUpload {
                artifact: artifact.clone(),
                file,
                error: None,
            });
        }
        connector.put(&mut uploads, &mut []);
        for upload in &mut uploads {
            if let Some(error) = upload.error.take() {
                catapult.artifact(EventKind::ArtifactDeployed, &upload.artifact, Some(&error));
                return Err(error.into());
            }
            catapult.artifact(EventKind::ArtifactDeployed, &upload.artifact, None);
            result.artifacts.push(upload.artifact.clone());
        }

        let mut post = request_metadata;
        for generator in &mut generators {
            post.extend(generator.finish(&artifacts));
        }
        let infos: Vec<Metadata> = post.iter().map(|m| m.metadata().clone()).collect();
        sync.acquire(&[], &infos)?;
        for mut metadata in post {
            upload_metadata(
                session,
                &manager,
                connector.as_ref(),
                &repository,
                metadata.as_mut(),
                &catapult,
            )?;
            result.metadata.push(metadata.metadata().clone());
        }

        Ok(result)
    }
}

/// Upload one metadata document, merging with the remote copy first when the
/// document calls for it.
fn upload_metadata(
    session: &Session,
    manager: &EnhancedLocalRepositoryManager,
    connector: &dyn RepositoryConnector,
    repository: &RemoteRepository,
    metadata: &mut dyn MergeableMetadata,
    catapult: &EventCatapult<'_>,
) -> DepotResult<()> {
    let file = if metadata.is_mergeable() {
        let destination =
            manager.metadata_path_remote(metadata.metadata(), repository, &catapult.context_str());

        session.emit(
            RepositoryEvent::metadata(
                EventKind::MetadataResolving,
                metadata.metadata(),
                &catapult.context_str(),
            )
            .with_repository(&repository.id),
        );
        let mut download = MetadataDownload::new(
            metadata.metadata().clone(),
            destination.clone(),
            &catapult.context_str(),
        );
        download.checksum_policy = crate::remote::effective_policy(session, repository, true, true)
            .checksum_policy;
        connector.get(&mut [], std::slice::from_mut(&mut download));
        let mut resolved = RepositoryEvent::metadata(
            EventKind::MetadataResolved,
            metadata.metadata(),
            &catapult.context_str(),
        )
        .with_repository(&repository.id);
        match download.error {
            None => {}
            Some(error) if error.is_not_found() => {
                // The remote has no copy yet; stale local state must not
                // leak into the merge.
                if destination.exists() {
                    std::fs::remove_file(&destination).map_err(DepotError::io)?;
                }
                resolved = resolved.with_error(error);
            }
            Some(error) => {
                session.emit(resolved.with_error(error.clone()));
                return Err(error);
            }
        }
        session.emit(resolved);

        let current = destination.is_file().then(|| destination.clone());
        metadata.merge(current.as_deref(), &destination)?;
        destination
    } else {
        match &metadata.metadata().file {
            Some(file) => file.clone(),
            None => {
                return Err(DepotError::Invalid {
                    message: format!("metadata {} has no file to deploy", metadata.metadata().key()),
                })
            }
        }
    };

    catapult.metadata(EventKind::MetadataDeploying, metadata.metadata(), None);
    let mut upload = MetadataUpload {
        metadata: metadata.metadata().clone(),
        file,
        error: None,
    };
    connector.put(&mut [], std::slice::from_mut(&mut upload));
    if let Some(error) = upload.error.take() {
        catapult.metadata(EventKind::MetadataDeployed, metadata.metadata(), Some(&error));
        return Err(error);
    }
    catapult.metadata(EventKind::MetadataDeployed, metadata.metadata(), None);
    Ok(())
}

/// Fires deploy lifecycle events with the repository attached.
struct EventCatapult<'a> {
    session: &'a Session,
    repository: &'a RemoteRepository,
    context: &'a str,
}

impl EventCatapult<'_> {
    fn context_str(&self) -> String {
        self.context.to_string()
    }

    fn artifact(&self, kind: EventKind, artifact: &Artifact, error: Option<&DepotError>) {
        let mut event =
            RepositoryEvent::artifact(kind, artifact, self.context).with_repository(&self.repository.id);
        if let Some(error) = error {
            event = event.with_error(error.clone());
        }
        self.session.emit(event);
    }

    fn metadata(&self, kind: EventKind, metadata: &Metadata, error: Option<&DepotError>) {
        let mut event = RepositoryEvent::metadata(kind, metadata, self.context)
            .with_repository(&self.repository.id);
        if let Some(error) = error {
            event = event.with_error(error.clone());
        }
        self.session.emit(event);
    }
}
