//! The event surface dispatched by the engine.
//!
//! Consumers (progress bars, build logs) register a listener on the session;
//! listener failures are logged and never propagate back into resolution.

use std::path::PathBuf;

use depot_util::errors::DepotError;

use crate::artifact::Artifact;
use crate::metadata::Metadata;

/// Named lifecycle points of artifacts and metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ArtifactResolving,
    ArtifactResolved,
    ArtifactDownloading,
    ArtifactDownloaded,
    ArtifactInstalling,
    ArtifactInstalled,
    ArtifactDeploying,
    ArtifactDeployed,
    ArtifactDescriptorMissing,
    ArtifactDescriptorInvalid,
    MetadataResolving,
    MetadataResolved,
    MetadataDownloading,
    MetadataDownloaded,
    MetadataInstalling,
    MetadataInstalled,
    MetadataDeploying,
    MetadataDeployed,
    MetadataInvalid,
}

/// One engine event with whatever subjects apply.
#[derive(Debug, Clone)]
pub struct RepositoryEvent {
    pub kind: EventKind,
    pub artifact: Option<Artifact>,
    pub metadata: Option<Metadata>,
    /// Id of the repository involved, when any.
    pub repository: Option<String>,
    pub file: Option<PathBuf>,
    pub errors: Vec<DepotError>,
    /// The request context the operation ran under.
    pub context: String,
}

impl RepositoryEvent {
    pub fn artifact(kind: EventKind, artifact: &Artifact, context: &str) -> Self {
        Self {
            kind,
            artifact: Some(artifact.clone()),
            metadata: None,
            repository: None,
            file: artifact.file().map(|p| p.to_path_buf()),
            errors: Vec::new(),
            context: context.to_string(),
        }
    }

    pub fn metadata(kind: EventKind, metadata: &Metadata, context: &str) -> Self {
        Self {
            kind,
            artifact: None,
            metadata: Some(metadata.clone()),
            repository: None,
            file: metadata.file.clone(),
            errors: Vec::new(),
            context: context.to_string(),
        }
    }

    pub fn with_repository(mut self, id: &str) -> Self {
        self.repository = Some(id.to_string());
        self
    }

    pub fn with_error(mut self, error: DepotError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_file(mut self, file: PathBuf) -> Self {
        self.file = Some(file);
        self
    }
}

/// Receives engine events. Implementations must tolerate concurrent calls.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &RepositoryEvent) -> Result<(), Box<dyn std::error::Error>>;
}

/// Deliver an event to a listener, logging and swallowing listener failures.
pub fn dispatch(listener: Option<&dyn EventListener>, event: RepositoryEvent) {
    if let Some(listener) = listener {
        if let Err(e) = listener.on_event(&event) {
            tracing::warn!(kind = ?event.kind, "event listener failed: {e}");
        }
    }
}
