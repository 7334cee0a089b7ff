//! Artifact descriptors and the reader seam.
//!
//! A descriptor is the parsed component model of one artifact: its
//! dependencies, dependency management, contributed repositories, and
//! relocations. Parsing the underlying document format is not the engine's
//! business; callers plug a reader in.

use std::collections::BTreeMap;

use depot_core::artifact::Artifact;
use depot_core::dependency::Dependency;
use depot_core::repository::RemoteRepository;
use depot_core::session::Session;
use depot_util::errors::DepotResult;

/// Request to read one artifact's descriptor.
#[derive(Debug, Clone)]
pub struct DescriptorRequest {
    pub artifact: Artifact,
    pub repositories: Vec<RemoteRepository>,
    pub context: String,
}

/// The component model of one artifact.
#[derive(Debug, Clone, Default)]
pub struct ArtifactDescriptor {
    /// The described artifact; differs from the requested one after a
    /// relocation.
    pub artifact: Option<Artifact>,
    pub dependencies: Vec<Dependency>,
    pub managed_dependencies: Vec<Dependency>,
    /// Repositories the descriptor contributes for its own dependencies.
    pub repositories: Vec<RemoteRepository>,
    /// Former coordinates when the descriptor declares a relocation; empty
    /// otherwise.
    pub relocations: Vec<Artifact>,
    pub properties: BTreeMap<String, String>,
    /// No descriptor exists for this artifact; an empty model was
    /// synthesized (unhosted artifacts).
    pub lacking_descriptor: bool,
}

impl ArtifactDescriptor {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            artifact: Some(artifact),
            ..Default::default()
        }
    }

    /// Empty model for an artifact that has no hosted descriptor.
    pub fn lacking(artifact: Artifact) -> Self {
        Self {
            artifact: Some(artifact),
            lacking_descriptor: true,
            ..Default::default()
        }
    }
}

/// Reads artifact descriptors; supplied by the embedding application.
pub trait DescriptorReader: Send + Sync {
    fn read_descriptor(
        &self,
        session: &Session,
        request: &DescriptorRequest,
    ) -> DepotResult<ArtifactDescriptor>;
}
