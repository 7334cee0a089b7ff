//! The assembled repository system.
//!
//! Wires the default component graph (connector provider, update checks,
//! metadata resolver, version resolvers, collector, artifact resolver,
//! installer, deployer) together and offers the combined
//! collect-then-download operation. The descriptor reader is the one piece
//! the embedding application must bring.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use depot_core::config::SessionConfig;
use depot_core::session::Session;
use depot_repo::connector::ConnectorProvider;
use depot_repo::deploy::{DeployError, DeployRequest, DeployResult, Deployer};
use depot_repo::install::{InstallError, InstallRequest, InstallResult, Installer};
use depot_repo::update::UpdateCheckManager;
use depot_util::errors::DepotError;

use crate::artifact::{ArtifactRequest, ArtifactResolutionError, ArtifactResolver, ArtifactResult};
use crate::collector::{CollectError, CollectRequest, CollectResult, DependencyCollector};
use crate::descriptor::DescriptorReader;
use crate::metadata::{MetadataRequest, MetadataResolver, MetadataResult};
use crate::version::MetadataVersionResolver;

/// Resolve a dependency graph and every artifact in it.
pub struct DependencyRequest {
    pub collect: CollectRequest,
}

impl DependencyRequest {
    pub fn new(collect: CollectRequest) -> Self {
        Self { collect }
    }
}

/// The collected graph with every node's artifact driven to a local file.
pub struct DependencyResult {
    pub collect: CollectResult,
    pub artifacts: Vec<ArtifactResult>,
}

/// Failure of the combined collect-and-resolve operation.
#[derive(Debug, Error, Diagnostic)]
pub enum DependencyResolutionError {
    #[error(transparent)]
    Invalid(#[from] DepotError),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Resolve(#[from] ArtifactResolutionError),
}

/// The default wiring of the resolution engine.
pub struct RepositorySystem {
    collector: DependencyCollector,
    artifact_resolver: ArtifactResolver,
    metadata_resolver: Arc<MetadataResolver>,
    installer: Installer,
    deployer: Deployer,
}

impl RepositorySystem {
    pub fn new(config: &SessionConfig, reader: Arc<dyn DescriptorReader>) -> Self {
        let connectors = Arc::new(ConnectorProvider::new(config));
        let checks = Arc::new(UpdateCheckManager::new());
        let metadata = Arc::new(MetadataResolver::new(connectors.clone(), checks.clone()));
        let versions = Arc::new(MetadataVersionResolver::new(metadata.clone()));
        Self {
            collector: DependencyCollector::new(reader, versions.clone()),
            artifact_resolver: ArtifactResolver::new(connectors, versions, checks),
            metadata_resolver: metadata,
            installer: Installer::new(config),
            deployer: Deployer::new(config),
        }
    }

    /// Build the transitive dependency graph.
    pub fn collect_dependencies(
        &self,
        session: &Session,
        request: CollectRequest,
    ) -> Result<CollectResult, CollectError> {
        self.collector.collect(session, request)
    }

    /// Resolve a set of artifacts to local files.
    pub fn resolve_artifacts(
        &self,
        session: &Session,
        requests: Vec<ArtifactRequest>,
    ) -> Result<Vec<ArtifactResult>, ArtifactResolutionError> {
        self.artifact_resolver.resolve(session, requests)
    }

    /// Resolve repository metadata.
    pub fn resolve_metadata(
        &self,
        session: &Session,
        requests: Vec<MetadataRequest>,
    ) -> Result<Vec<MetadataResult>, DepotError> {
        self.metadata_resolver.resolve(session, requests)
    }

    /// Collect the graph, then drive every collected artifact to a file.
    pub fn resolve_dependencies(
        &self,
        session: &Session,
        request: DependencyRequest,
    ) -> Result<DependencyResult, DependencyResolutionError> {
        session.validate().map_err(DependencyResolutionError::Invalid)?;

        let context = request.collect.context.clone();
        let mut collect = self.collector.collect(session, request.collect)?;

        let flattened = collect.graph.flatten();
        let requests: Vec<ArtifactRequest> = flattened
            .iter()
            .map(|flat| {
                ArtifactRequest::new(flat.artifact.clone(), flat.repositories.clone(), &context)
            })
            .collect();
        let artifacts = self.artifact_resolver.resolve(session, requests)?;

        // Fold the resolved files back into the graph nodes.
        for (flat, result) in flattened.iter().zip(&artifacts) {
            collect.graph.node_mut(flat.node).artifact = result.artifact.clone();
        }

        Ok(DependencyResult {
            collect,
            artifacts,
        })
    }

    /// Place artifacts and metadata into the local repository.
    pub fn install(
        &self,
        session: &Session,
        request: InstallRequest,
    ) -> Result<InstallResult, InstallError> {
        self.installer.install(session, request)
    }

    /// Publish artifacts and metadata to a remote repository.
    pub fn deploy(
        &self,
        session: &Session,
        request: DeployRequest,
    ) -> Result<DeployResult, DeployError> {
        self.deployer.deploy(session, request)
    }
}
