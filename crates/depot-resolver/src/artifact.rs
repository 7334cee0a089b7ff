//! Artifact resolution: coordinates to local files.
//!
//! Order of precedence is fixed: a caller-supplied (unhosted) file, then the
//! workspace, then the local repository, then the remotes. Remote work is
//! batched into resolution groups so each distinct repository sees exactly
//! one connector; a shared resolved flag lets later groups skip artifacts an
//! earlier group already fetched.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use miette::Diagnostic;

use depot_core::artifact::Artifact;
use depot_core::events::{EventKind, RepositoryEvent};
use depot_core::repository::RemoteRepository;
use depot_core::session::Session;
use depot_core::sync::{NamedLockSyncContext, SyncContext};
use depot_repo::connector::{ArtifactDownload, ConnectorProvider};
use depot_repo::local::{EnhancedLocalRepositoryManager, LocalArtifactRequest};
use depot_repo::offline;
use depot_repo::remote::effective_policy;
use depot_repo::update::{UpdateCheck, UpdateCheckManager};
use depot_util::errors::DepotError;

use crate::version::{VersionRequest, VersionResolver, VersionSource};

/// Request to materialize one artifact as a local file.
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub artifact: Artifact,
    pub repositories: Vec<RemoteRepository>,
    pub context: String,
}

impl ArtifactRequest {
    pub fn new(artifact: Artifact, repositories: Vec<RemoteRepository>, context: &str) -> Self {
        Self {
            artifact,
            repositories,
            context: context.to_string(),
        }
    }
}

/// Outcome for one request: a resolved artifact carries a file, a failed one
/// carries at least one error.
#[derive(Debug, Clone)]
pub struct ArtifactResult {
    pub artifact: Artifact,
    /// Id of the repository the file came from, when remote.
    pub repository: Option<String>,
    pub errors: Vec<DepotError>,
}

impl ArtifactResult {
    pub fn is_resolved(&self) -> bool {
        self.artifact.file().is_some()
    }
}

/// One or more artifacts could not be resolved; every per-request outcome is
/// carried along.
#[derive(Debug)]
pub struct ArtifactResolutionError {
    pub results: Vec<ArtifactResult>,
}

impl ArtifactResolutionError {
    fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_resolved()).count()
    }
}

impl fmt::Display for ArtifactResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to resolve {} of {} artifact(s)",
            self.failed(),
            self.results.len()
        )
    }
}

impl std::error::Error for ArtifactResolutionError {}

impl Diagnostic for ArtifactResolutionError {}

struct GroupItem {
    index: usize,
    artifact: Artifact,
    /// Stale cached file usable as an existence-check candidate.
    local_file: Option<PathBuf>,
}

struct ResolutionGroup {
    repository: RemoteRepository,
    items: Vec<GroupItem>,
}

fn group_key(repository: &RemoteRepository) -> (String, String, bool) {
    (
        repository.url.clone(),
        repository.content_type.clone(),
        repository.repository_manager,
    )
}

/// Drives artifact requests to local files.
pub struct ArtifactResolver {
    connectors: Arc<ConnectorProvider>,
    versions: Arc<dyn VersionResolver>,
    checks: Arc<UpdateCheckManager>,
}

impl ArtifactResolver {
    pub fn new(
        connectors: Arc<ConnectorProvider>,
        versions: Arc<dyn VersionResolver>,
        checks: Arc<UpdateCheckManager>,
    ) -> Self {
        Self {
            connectors,
            versions,
            checks,
        }
    }

    pub fn resolve(
        &self,
        session: &Session,
        requests: Vec<ArtifactRequest>,
    ) -> Result<Vec<ArtifactResult>, ArtifactResolutionError> {
        let mut results: Vec<ArtifactResult> = requests
            .iter()
            .map(|request| ArtifactResult {
                artifact: request.artifact.clone(),
                repository: None,
                errors: Vec::new(),
            })
            .collect();
        let resolved: Vec<Arc<AtomicBool>> = requests
            .iter()
            .map(|_| Arc::new(AtomicBool::new(false)))
            .collect();

        let manager = match session
            .validate()
            .and_then(|_| EnhancedLocalRepositoryManager::new(session))
        {
            Ok(manager) => manager,
            Err(error) => {
                for result in &mut results {
                    result.errors.push(error.clone());
                }
                return Err(ArtifactResolutionError { results });
            }
        };

        let mut sync = NamedLockSyncContext::new(session.lock_manager.clone(), true);
        let artifacts: Vec<Artifact> = requests.iter().map(|r| r.artifact.clone()).collect();
        if let Err(error) = sync.acquire(&artifacts, &[]) {
            for result in &mut results {
                result.errors.push(error.clone());
            }
            return Err(ArtifactResolutionError { results });
        }

        let mut groups: Vec<ResolutionGroup> = Vec::new();

        // Phase A: classify every request.
        for (index, request) in requests.iter().enumerate() {
            session.emit(RepositoryEvent::artifact(
                EventKind::ArtifactResolving,
                &request.artifact,
                &request.context,
            ));

            let artifact = request.artifact.clone();

            if artifact.is_unhosted() {
                let path = PathBuf::from(artifact.local_path().unwrap_or_default());
                if path.is_file() {
                    resolved[index].store(true, Ordering::SeqCst);
                    results[index].artifact = artifact.with_file(path);
                } else {
                    results[index].errors.push(DepotError::ArtifactNotFound {
                        coordinate: artifact.to_string(),
                        location: path.display().to_string(),
                    });
                }
                continue;
            }

            let version_result = match self.versions.resolve_version(
                session,
                &VersionRequest {
                    artifact: artifact.clone(),
                    repositories: request.repositories.clone(),
                    context: request.context.clone(),
                },
            ) {
                Ok(result) => result,
                Err(error) => {
                    results[index].errors.push(error);
                    continue;
                }
            };
            let artifact = artifact.with_version(&version_result.version);
            results[index].artifact = artifact.clone();

            let mut repositories = request.repositories.clone();
            match &version_result.source {
                Some(VersionSource::Remote(repository)) => {
                    repositories = vec![repository.clone()];
                }
                Some(VersionSource::Local) => repositories = Vec::new(),
                None => {}
            }

            if let Some(workspace) = &session.workspace {
                if let Some(file) = workspace.find_artifact(&artifact) {
                    resolved[index].store(true, Ordering::SeqCst);
                    results[index].artifact = artifact.with_file(file);
                    continue;
                }
            }

            let local = manager.find_artifact(&LocalArtifactRequest {
                artifact: &artifact,
                repositories: &repositories,
                context: &request.context,
            });
            let local_source = matches!(version_result.source, Some(VersionSource::Local));
            let adopt_local = local.file.is_some()
                && (local.available
                    || local_source
                    || (version_result.source.is_none() && repositories.is_empty()));
            if adopt_local {
                if !local.available {
                    // Make the adoption durable: later lookups must see an
                    // installed entry.
                    if let Err(error) = manager.add_artifact(&artifact, None, &[]) {
                        tracing::warn!("failed to register local artifact {artifact}: {error}");
                    }
                }
                resolved[index].store(true, Ordering::SeqCst);
                results[index].repository = local.repository.clone();
                results[index].artifact = artifact.with_file(local.file.unwrap());
                continue;
            }

            let online: Vec<RemoteRepository> = repositories
                .iter()
                .filter(|repository| offline::assert_online(session, repository).is_ok())
                .cloned()
                .collect();
            if online.is_empty() {
                results[index].errors.push(DepotError::ArtifactNotFound {
                    coordinate: artifact.to_string(),
                    location: if session.offline {
                        "the local repository (session is offline)".to_string()
                    } else {
                        "any configured repository".to_string()
                    },
                });
                continue;
            }

            for repository in &online {
                let key = group_key(repository);
                let group = match groups.iter_mut().find(|g| group_key(&g.repository) == key) {
                    Some(group) => group,
                    None => {
                        groups.push(ResolutionGroup {
                            repository: repository.clone(),
                            items: Vec::new(),
                        });
                        groups.last_mut().expect("just appended")
                    }
                };
                group.items.push(GroupItem {
                    index,
                    artifact: artifact.clone(),
                    local_file: local.file.clone(),
                });
            }
        }

        // Phase B: one connector per group, in insertion order.
        for group in &groups {
            self.resolve_group(
                session, &manager, &requests, &mut results, &resolved, group,
            );
        }

        // Final sweep: every unresolved result must explain itself.
        let mut any_failed = false;
        for (index, result) in results.iter_mut().enumerate() {
            if !result.is_resolved() && result.errors.is_empty() {
                result.errors.push(DepotError::ArtifactNotFound {
                    coordinate: result.artifact.to_string(),
                    location: "any configured repository".to_string(),
                });
            }
            any_failed |= !result.is_resolved();

            let mut event = RepositoryEvent::artifact(
                EventKind::ArtifactResolved,
                &result.artifact,
                &requests[index].context,
            );
            if let Some(repository) = &result.repository {
                event = event.with_repository(repository);
            }
            for error in &result.errors {
                event = event.with_error(error.clone());
            }
            session.emit(event);
        }

        if any_failed {
            Err(ArtifactResolutionError { results })
        } else {
            Ok(results)
        }
    }

    fn resolve_group(
        &self,
        session: &Session,
        manager: &EnhancedLocalRepositoryManager,
        requests: &[ArtifactRequest],
        results: &mut [ArtifactResult],
        resolved: &[Arc<AtomicBool>],
        group: &ResolutionGroup,
    ) {
        let mut pending: Vec<(usize, UpdateCheck<Artifact>)> = Vec::new();
        let mut batch: Vec<ArtifactDownload> = Vec::new();

        for item in &group.items {
            if resolved[item.index].load(Ordering::SeqCst) {
                continue;
            }
            let context = &requests[item.index].context;
            let destination = manager.artifact_path(&item.artifact, true);
            let snapshot = item.artifact.is_snapshot();
            let policy = effective_policy(session, &group.repository, !snapshot, snapshot);

            let mut check = UpdateCheck::new(
                item.artifact.clone(),
                destination.clone(),
                group.repository.clone(),
                &policy.update_policy,
                context,
            );
            self.checks.check_artifact(session, &mut check);
            if !check.required {
                if let Some(error) = check.error.take() {
                    results[item.index].errors.push(error);
                    continue;
                }
                if destination.is_file() {
                    // Cache is current under this repository's policy.
                    self.adopt_download(
                        session, manager, results, resolved, item,
                        &group.repository, &destination,
                        &[context.as_str()],
                    );
                    continue;
                }
                // A past attempt left neither file nor error: fetch anyway.
            }

            let mut download =
                ArtifactDownload::new(item.artifact.clone(), destination.clone(), context);
            download.existence_check = item.local_file.is_some();
            download.checksum_policy = policy.checksum_policy.clone();
            download.repositories = group.repository.mirrored.clone();

            session.emit(
                RepositoryEvent::artifact(EventKind::ArtifactDownloading, &item.artifact, context)
                    .with_repository(&group.repository.id),
            );
            pending.push((item.index, check));
            batch.push(download);
        }

        if batch.is_empty() {
            return;
        }

        match self.connectors.new_connector(session, &group.repository) {
            Ok(connector) => connector.get(&mut batch, &mut []),
            Err(cause) => {
                for download in &mut batch {
                    download.error = Some(DepotError::ArtifactTransfer {
                        coordinate: download.artifact.to_string(),
                        repository: group.repository.id.clone(),
                        message: cause.to_string(),
                    });
                }
            }
        }

        for ((index, mut check), download) in pending.into_iter().zip(batch) {
            check.error = download.error.clone();
            if let Err(touch_error) = self.checks.touch_artifact(session, &check) {
                tracing::warn!("failed to record update check: {touch_error}");
            }

            let context = &requests[index].context;
            let mut downloaded = RepositoryEvent::artifact(
                EventKind::ArtifactDownloaded,
                &download.artifact,
                context,
            )
            .with_repository(&group.repository.id)
            .with_file(download.file.clone());

            match download.error {
                None => {
                    session.emit(downloaded);
                    let contexts: Vec<&str> = if download.supported_contexts.is_empty() {
                        vec![context.as_str()]
                    } else {
                        download.supported_contexts.iter().map(String::as_str).collect()
                    };
                    let item = GroupItem {
                        index,
                        artifact: download.artifact.clone(),
                        local_file: None,
                    };
                    self.adopt_download(
                        session, manager, results, resolved, &item,
                        &group.repository, &download.file, &contexts,
                    );
                }
                Some(error) => {
                    downloaded = downloaded.with_error(error.clone());
                    session.emit(downloaded);
                    results[index].errors.push(error);
                }
            }
        }
    }

    /// Success bookkeeping: mark resolved, track the origin, normalize
    /// snapshot filenames, and attach the file.
    #[allow(clippy::too_many_arguments)]
    fn adopt_download(
        &self,
        session: &Session,
        manager: &EnhancedLocalRepositoryManager,
        results: &mut [ArtifactResult],
        resolved: &[Arc<AtomicBool>],
        item: &GroupItem,
        repository: &RemoteRepository,
        file: &PathBuf,
        contexts: &[&str],
    ) {
        resolved[item.index].store(true, Ordering::SeqCst);
        if let Err(error) = manager.add_artifact(&item.artifact, Some(repository), contexts) {
            tracing::warn!("failed to track origin of {}: {error}", item.artifact);
        }

        let mut resolved_file = file.clone();
        if session.config.snapshot_normalization
            && item.artifact.is_snapshot()
            && item.artifact.version() != item.artifact.base_version()
        {
            let base_file = manager.artifact_path(&item.artifact, false);
            if base_file != *file {
                if !depot_util::fs::same_len_and_mtime(file, &base_file) {
                    if let Err(error) = depot_util::fs::copy_preserving_mtime(file, &base_file) {
                        tracing::warn!("snapshot normalization failed for {}: {error}", item.artifact);
                    }
                }
                if base_file.is_file() {
                    resolved_file = base_file;
                }
            }
        }

        results[item.index].repository = Some(repository.id.clone());
        results[item.index].artifact = item.artifact.with_file(resolved_file);
    }
}
