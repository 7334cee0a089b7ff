//! Version and version-range resolution over repository metadata.
//!
//! Symbolic versions (`RELEASE`, `LATEST`), snapshot base versions, and
//! range expressions all resolve by consulting the version-index and
//! snapshot metadata of the candidate repositories through the metadata
//! resolver; plain versions pass through untouched.

use std::collections::HashMap;
use std::sync::Arc;

use depot_core::artifact::Artifact;
use depot_core::metadata::{Metadata, Nature};
use depot_core::repository::RemoteRepository;
use depot_core::session::Session;
use depot_core::version::{Version, VersionConstraint};
use depot_repo::versions::{parse_snapshot, parse_versions, VERSIONS_METADATA_KIND};
use depot_util::errors::{DepotError, DepotResult};

use crate::metadata::{MetadataRequest, MetadataResolver};

/// Symbolic version resolving to the newest release.
pub const VERSION_RELEASE: &str = "RELEASE";
/// Symbolic version resolving to the newest version of any nature.
pub const VERSION_LATEST: &str = "LATEST";

/// Where a resolved version was discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSource {
    Remote(RemoteRepository),
    Local,
}

/// Request to pin one artifact's version.
#[derive(Debug, Clone)]
pub struct VersionRequest {
    pub artifact: Artifact,
    pub repositories: Vec<RemoteRepository>,
    pub context: String,
}

/// The pinned version and, when a lookup happened, its origin.
#[derive(Debug, Clone)]
pub struct VersionResult {
    pub version: String,
    pub source: Option<VersionSource>,
}

/// Request for all versions matching a constraint.
#[derive(Debug, Clone)]
pub struct VersionRangeRequest {
    pub artifact: Artifact,
    pub repositories: Vec<RemoteRepository>,
    pub context: String,
}

/// Matching versions in ascending order with per-version origins.
#[derive(Debug, Clone)]
pub struct VersionRangeResult {
    pub constraint: VersionConstraint,
    pub versions: Vec<Version>,
    pub sources: HashMap<String, VersionSource>,
}

/// Pins symbolic and snapshot versions.
pub trait VersionResolver: Send + Sync {
    fn resolve_version(&self, session: &Session, request: &VersionRequest)
        -> DepotResult<VersionResult>;
}

/// Enumerates versions matching a range.
pub trait VersionRangeResolver: Send + Sync {
    fn resolve_range(
        &self,
        session: &Session,
        request: &VersionRangeRequest,
    ) -> DepotResult<VersionRangeResult>;
}

/// Metadata-driven implementation of both resolvers.
pub struct MetadataVersionResolver {
    metadata: Arc<MetadataResolver>,
}

impl MetadataVersionResolver {
    pub fn new(metadata: Arc<MetadataResolver>) -> Self {
        Self { metadata }
    }

    /// Fetch one metadata document per repository plus the local copy.
    fn fetch(
        &self,
        session: &Session,
        template: &Metadata,
        repositories: &[RemoteRepository],
        context: &str,
    ) -> DepotResult<Vec<(Option<RemoteRepository>, std::path::PathBuf)>> {
        let mut requests = vec![MetadataRequest::new(template.clone(), None, context)];
        for repository in repositories {
            requests.push(MetadataRequest::new(
                template.clone(),
                Some(repository.clone()),
                context,
            ));
        }
        let results = self.metadata.resolve(session, requests)?;

        let mut found = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            if let Some(file) = result.metadata.file {
                let source = if index == 0 {
                    None
                } else {
                    Some(repositories[index - 1].clone())
                };
                found.push((source, file));
            }
        }
        Ok(found)
    }
}

impl VersionResolver for MetadataVersionResolver {
    fn resolve_version(
        &self,
        session: &Session,
        request: &VersionRequest,
    ) -> DepotResult<VersionResult> {
        let artifact = &request.artifact;
        let version = artifact.version();

        if version == VERSION_RELEASE || version == VERSION_LATEST {
            let nature = if version == VERSION_RELEASE {
                Nature::Release
            } else {
                Nature::ReleaseOrSnapshot
            };
            let template = Metadata::new(
                artifact.group_id(),
                artifact.artifact_id(),
                "",
                VERSIONS_METADATA_KIND,
                nature,
            );
            let documents =
                self.fetch(session, &template, &request.repositories, &request.context)?;

            let mut best: Option<(Version, Option<VersionSource>)> = None;
            for (source, file) in documents {
                let xml = std::fs::read_to_string(&file).map_err(DepotError::io)?;
                let doc = match parse_versions(&xml) {
                    Ok(doc) => doc,
                    Err(e) => {
                        tracing::warn!("ignoring malformed version index {}: {e}", file.display());
                        continue;
                    }
                };
                let candidate = if version == VERSION_RELEASE {
                    doc.release.clone().or_else(|| {
                        doc.versions
                            .iter()
                            .filter(|v| !depot_core::artifact::is_snapshot_version(v))
                            .max_by_key(|v| Version::parse(v))
                            .cloned()
                    })
                } else {
                    doc.latest
                        .clone()
                        .or_else(|| doc.versions.iter().max_by_key(|v| Version::parse(v)).cloned())
                };
                if let Some(candidate) = candidate {
                    let candidate = Version::parse(&candidate);
                    let better = match &best {
                        None => true,
                        Some((current, _)) => candidate > *current,
                    };
                    if better {
                        let source = source.map(VersionSource::Remote).or(Some(VersionSource::Local));
                        best = Some((candidate, source));
                    }
                }
            }
            return match best {
                Some((resolved, source)) => Ok(VersionResult {
                    version: resolved.as_str().to_string(),
                    source,
                }),
                None => Err(DepotError::VersionResolution {
                    coordinate: artifact.to_string(),
                    message: format!("no {version} version available"),
                }),
            };
        }

        if version.ends_with("-SNAPSHOT") {
            let template = Metadata::new(
                artifact.group_id(),
                artifact.artifact_id(),
                version,
                VERSIONS_METADATA_KIND,
                Nature::Snapshot,
            );
            let documents =
                self.fetch(session, &template, &request.repositories, &request.context)?;

            let mut best: Option<(String, String, Option<VersionSource>)> = None;
            for (source, file) in documents {
                let xml = std::fs::read_to_string(&file).map_err(DepotError::io)?;
                let doc = match parse_snapshot(&xml) {
                    Ok(doc) => doc,
                    Err(e) => {
                        tracing::warn!("ignoring malformed snapshot record {}: {e}", file.display());
                        continue;
                    }
                };
                let mut doc = doc;
                if doc.version.is_none() {
                    doc.version = Some(version.to_string());
                }
                let timestamped = match doc.timestamped_version() {
                    Some(timestamped) => timestamped,
                    None => continue,
                };
                let stamp = doc
                    .last_updated
                    .or(doc.timestamp)
                    .unwrap_or_default();
                let newer = match &best {
                    None => true,
                    Some((_, current, _)) => stamp > *current,
                };
                if newer {
                    let source = source.map(VersionSource::Remote).or(Some(VersionSource::Local));
                    best = Some((timestamped, stamp, source));
                }
            }
            return Ok(match best {
                Some((timestamped, _, source)) => VersionResult {
                    version: timestamped,
                    source,
                },
                // No snapshot record: the base version resolves to itself,
                // e.g. a locally installed snapshot.
                None => VersionResult {
                    version: version.to_string(),
                    source: None,
                },
            });
        }

        Ok(VersionResult {
            version: version.to_string(),
            source: None,
        })
    }
}

impl VersionRangeResolver for MetadataVersionResolver {
    fn resolve_range(
        &self,
        session: &Session,
        request: &VersionRangeRequest,
    ) -> DepotResult<VersionRangeResult> {
        let constraint = VersionConstraint::parse(request.artifact.version());
        let range = match &constraint {
            VersionConstraint::Soft(version) => {
                return Ok(VersionRangeResult {
                    versions: vec![version.clone()],
                    constraint,
                    sources: HashMap::new(),
                });
            }
            VersionConstraint::Range(range) => range.clone(),
        };

        let template = Metadata::new(
            request.artifact.group_id(),
            request.artifact.artifact_id(),
            "",
            VERSIONS_METADATA_KIND,
            Nature::ReleaseOrSnapshot,
        );
        let documents = self.fetch(session, &template, &request.repositories, &request.context)?;

        let mut versions: Vec<Version> = Vec::new();
        let mut sources = HashMap::new();
        for (source, file) in documents {
            let xml = std::fs::read_to_string(&file).map_err(DepotError::io)?;
            let doc = match parse_versions(&xml) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!("ignoring malformed version index {}: {e}", file.display());
                    continue;
                }
            };
            for raw in doc.versions {
                let version = Version::parse(&raw);
                if !range.contains(&version) {
                    continue;
                }
                if !versions.contains(&version) {
                    sources.insert(
                        version.as_str().to_string(),
                        source
                            .clone()
                            .map(VersionSource::Remote)
                            .unwrap_or(VersionSource::Local),
                    );
                    versions.push(version);
                }
            }
        }
        versions.sort();

        Ok(VersionRangeResult {
            versions,
            constraint,
            sources,
        })
    }
}
