use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for all Depot operations.
///
/// Variants carry owned strings rather than source errors so that cached
/// outcomes (e.g. a transfer failure remembered by the update-check manager)
/// can be cloned back onto later requests.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum DepotError {
    /// An artifact does not exist in any of the consulted locations.
    #[error("Artifact {coordinate} not found in {location}")]
    ArtifactNotFound {
        coordinate: String,
        location: String,
    },

    /// Transferring an artifact to or from a remote repository failed.
    #[error("Could not transfer artifact {coordinate} from {repository}: {message}")]
    ArtifactTransfer {
        coordinate: String,
        repository: String,
        message: String,
    },

    /// A metadata document does not exist in the consulted location.
    #[error("Metadata {key} not found in {location}")]
    MetadataNotFound { key: String, location: String },

    /// Transferring metadata to or from a remote repository failed.
    #[error("Could not transfer metadata {key} from {repository}: {message}")]
    MetadataTransfer {
        key: String,
        repository: String,
        message: String,
    },

    /// A meta-version (RELEASE, LATEST, SNAPSHOT) could not be resolved.
    #[error("Failed to resolve version for {coordinate}: {message}")]
    VersionResolution { coordinate: String, message: String },

    /// A version range matched no available version.
    #[error("No versions available for {coordinate} within range {range}")]
    VersionRangeResolution { coordinate: String, range: String },

    /// Reading an artifact descriptor failed.
    #[error("Failed to read descriptor for {coordinate}: {message}")]
    Descriptor { coordinate: String, message: String },

    /// No connector factory accepted the repository.
    #[error("No connector available for repository {repository} ({url})")]
    #[diagnostic(help("Check the repository content type against the registered connector factories"))]
    NoConnector { repository: String, url: String },

    /// No layout factory accepted the repository.
    #[error("No layout available for repository {repository} of type {content_type}")]
    NoLayout {
        repository: String,
        content_type: String,
    },

    /// Remote access was attempted while the session is offline.
    #[error("Cannot access {repository} ({url}) in offline mode")]
    #[diagnostic(help("Leave offline mode or add the repository host to the offline exemptions"))]
    RepositoryOffline { repository: String, url: String },

    /// A downloaded file did not match its declared checksum.
    #[error("Checksum validation failed for {file}: {message}")]
    ChecksumFailure { file: String, message: String },

    /// The transport reported a cancelled transfer.
    #[error("Transfer of {resource} was cancelled")]
    TransferCancelled { resource: String },

    /// Programmer error: an ill-formed request or session.
    #[error("Invalid request: {message}")]
    Invalid { message: String },

    /// I/O operation failed.
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl DepotError {
    /// Wrap an I/O error, keeping only its rendering.
    pub fn io(err: std::io::Error) -> Self {
        DepotError::Io {
            message: err.to_string(),
        }
    }

    /// Whether this error represents a plain "does not exist" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DepotError::ArtifactNotFound { .. } | DepotError::MetadataNotFound { .. }
        )
    }
}

impl From<std::io::Error> for DepotError {
    fn from(err: std::io::Error) -> Self {
        DepotError::io(err)
    }
}

/// Convenience alias for fallible Depot operations.
pub type DepotResult<T> = Result<T, DepotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        let e = DepotError::ArtifactNotFound {
            coordinate: "g:a:jar:1.0".into(),
            location: "central".into(),
        };
        assert!(e.is_not_found());

        let e = DepotError::ArtifactTransfer {
            coordinate: "g:a:jar:1.0".into(),
            repository: "central".into(),
            message: "connection reset".into(),
        };
        assert!(!e.is_not_found());
    }

    #[test]
    fn cached_errors_clone() {
        let e = DepotError::MetadataTransfer {
            key: "g:a/maven-metadata.xml".into(),
            repository: "central".into(),
            message: "timeout".into(),
        };
        let copy = e.clone();
        assert_eq!(e.to_string(), copy.to_string());
    }

    #[test]
    fn io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e = DepotError::from(io);
        assert!(e.to_string().contains("denied"));
    }
}
