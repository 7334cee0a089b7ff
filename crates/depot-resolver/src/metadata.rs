//! Concurrent metadata resolution.
//!
//! Each request resolves one metadata document against at most one remote
//! repository (repository managers fan out into their mirrored set for
//! update checking, but share a single download). Downloads run on a bounded
//! worker pool; every worker's outcome feeds update-check persistence before
//! the first hard failure is re-raised to the caller.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use depot_core::events::{EventKind, RepositoryEvent};
use depot_core::metadata::Metadata;
use depot_core::repository::RemoteRepository;
use depot_core::session::Session;
use depot_core::sync::{NamedLockSyncContext, SyncContext};
use depot_repo::connector::{ConnectorProvider, MetadataDownload};
use depot_repo::local::EnhancedLocalRepositoryManager;
use depot_repo::offline;
use depot_repo::remote::effective_policy;
use depot_repo::update::{UpdateCheck, UpdateCheckManager};
use depot_util::errors::{DepotError, DepotResult};

/// Request for one metadata document.
#[derive(Debug, Clone)]
pub struct MetadataRequest {
    pub metadata: Metadata,
    /// The remote to consult; `None` restricts the lookup to the local
    /// repository.
    pub repository: Option<RemoteRepository>,
    pub context: String,
    /// Use a locally installed copy when one exists, skipping the remote.
    pub favor_local: bool,
    /// Drop the cached copy when the remote reports the document gone.
    pub delete_local_copy_if_missing: bool,
}

impl MetadataRequest {
    pub fn new(metadata: Metadata, repository: Option<RemoteRepository>, context: &str) -> Self {
        Self {
            metadata,
            repository,
            context: context.to_string(),
            favor_local: false,
            delete_local_copy_if_missing: false,
        }
    }
}

/// Outcome for one request; the file is attached when any usable copy exists.
#[derive(Debug, Clone)]
pub struct MetadataResult {
    pub metadata: Metadata,
    pub repository: Option<String>,
    pub error: Option<DepotError>,
    /// A download attempt ran and produced a usable file.
    pub updated: bool,
}

struct ResolveTask {
    index: usize,
    metadata: Metadata,
    repository: RemoteRepository,
    destination: PathBuf,
    checksum_policy: String,
    context: String,
    delete_local_copy_if_missing: bool,
    checks: Vec<UpdateCheck<Metadata>>,
}

/// Resolves metadata through local lookup, update checks, and pooled
/// downloads.
pub struct MetadataResolver {
    connectors: Arc<ConnectorProvider>,
    checks: Arc<UpdateCheckManager>,
}

impl MetadataResolver {
    pub fn new(connectors: Arc<ConnectorProvider>, checks: Arc<UpdateCheckManager>) -> Self {
        Self { connectors, checks }
    }

    pub fn resolve(
        &self,
        session: &Session,
        requests: Vec<MetadataRequest>,
    ) -> DepotResult<Vec<MetadataResult>> {
        session.validate()?;
        let manager = EnhancedLocalRepositoryManager::new(session)?;

        let mut sync = NamedLockSyncContext::new(session.lock_manager.clone(), true);
        let infos: Vec<Metadata> = requests.iter().map(|r| r.metadata.clone()).collect();
        sync.acquire(&[], &infos)?;

        let mut results: Vec<MetadataResult> = requests
            .iter()
            .map(|request| MetadataResult {
                metadata: request.metadata.clone(),
                repository: request.repository.as_ref().map(|r| r.id.clone()),
                error: None,
                updated: false,
            })
            .collect();

        let mut tasks: Vec<ResolveTask> = Vec::new();
        // The final local re-lookup path per request.
        let mut lookups: Vec<Option<PathBuf>> = vec![None; requests.len()];

        for (index, request) in requests.iter().enumerate() {
            session.emit(event(EventKind::MetadataResolving, request, None));

            let repository = match &request.repository {
                None => {
                    match manager.find_metadata(&request.metadata, None, &request.context) {
                        Some(file) => lookups[index] = Some(file),
                        None => {
                            results[index].error = Some(DepotError::MetadataNotFound {
                                key: request.metadata.key(),
                                location: "local repository".to_string(),
                            });
                        }
                    }
                    continue;
                }
                Some(repository) => repository,
            };

            if request.favor_local {
                if let Some(file) = manager.find_metadata(&request.metadata, None, &request.context)
                {
                    lookups[index] = Some(file);
                    continue;
                }
            }

            let destination =
                manager.metadata_path_remote(&request.metadata, repository, &request.context);
            lookups[index] = Some(destination.clone());

            let authoritative = enabled_source_repositories(repository, &request.metadata);
            if authoritative.is_empty() {
                continue;
            }

            if let Err(offline_error) = offline::assert_online(session, repository) {
                if !destination.is_file() {
                    results[index].error = Some(offline_error);
                }
                continue;
            }

            let nature = request.metadata.nature;
            let mut checks = Vec::new();
            for source in &authoritative {
                let policy = effective_policy(
                    session,
                    source,
                    nature.includes_release(),
                    nature.includes_snapshot(),
                );
                let mut check = UpdateCheck::new(
                    request.metadata.clone(),
                    destination.clone(),
                    source.clone(),
                    &policy.update_policy,
                    &request.context,
                );
                self.checks.check_metadata(session, &mut check);
                if check.required {
                    checks.push(check);
                } else if let Some(error) = check.error.take() {
                    results[index].error = Some(error);
                }
            }
            if checks.is_empty() {
                continue;
            }

            let policy = effective_policy(
                session,
                repository,
                nature.includes_release(),
                nature.includes_snapshot(),
            );
            tasks.push(ResolveTask {
                index,
                metadata: request.metadata.clone(),
                repository: repository.clone(),
                destination,
                checksum_policy: policy.checksum_policy,
                context: request.context.clone(),
                delete_local_copy_if_missing: request.delete_local_copy_if_missing,
                checks,
            });
        }

        let outcomes = self.run_tasks(session, tasks)?;
        for (index, error) in outcomes {
            results[index].updated = true;
            if let Some(error) = error {
                results[index].error = Some(error);
            }
        }

        for (index, result) in results.iter_mut().enumerate() {
            if let Some(path) = &lookups[index] {
                if path.is_file() {
                    result.metadata.file = Some(path.clone());
                } else if result.error.is_none() {
                    result.error = Some(DepotError::MetadataNotFound {
                        key: result.metadata.key(),
                        location: result
                            .repository
                            .clone()
                            .unwrap_or_else(|| "local repository".to_string()),
                    });
                }
            }
            result.updated = result.updated && result.metadata.file.is_some();
            session.emit(event_result(EventKind::MetadataResolved, result));
        }

        Ok(results)
    }

    /// Run download tasks on a pool of `min(tasks, configured threads)`
    /// workers; a single task or single thread runs inline. Returns
    /// per-request download outcomes; the first infrastructure failure is
    /// raised after every worker has finished.
    fn run_tasks(
        &self,
        session: &Session,
        tasks: Vec<ResolveTask>,
    ) -> DepotResult<Vec<(usize, Option<DepotError>)>> {
        let outcomes = Mutex::new(Vec::new());
        let fatal: Mutex<Option<DepotError>> = Mutex::new(None);

        let threads = session.config.metadata_threads.max(1).min(tasks.len().max(1));
        if threads <= 1 {
            for task in tasks {
                self.run_task(session, task, &outcomes, &fatal);
            }
        } else {
            let queue: Mutex<VecDeque<ResolveTask>> = Mutex::new(tasks.into());
            std::thread::scope(|scope| {
                for _ in 0..threads {
                    scope.spawn(|| loop {
                        let task = match queue.lock().pop_front() {
                            Some(task) => task,
                            None => break,
                        };
                        self.run_task(session, task, &outcomes, &fatal);
                    });
                }
            });
        }

        if let Some(error) = fatal.into_inner() {
            return Err(error);
        }
        Ok(outcomes.into_inner())
    }

    fn run_task(
        &self,
        session: &Session,
        mut task: ResolveTask,
        outcomes: &Mutex<Vec<(usize, Option<DepotError>)>>,
        fatal: &Mutex<Option<DepotError>>,
    ) {
        let error = match self.connectors.new_connector(session, &task.repository) {
            Err(error) => Some(DepotError::MetadataTransfer {
                key: task.metadata.key(),
                repository: task.repository.id.clone(),
                message: error.to_string(),
            }),
            Ok(connector) => {
                session.emit(
                    RepositoryEvent::metadata(
                        EventKind::MetadataDownloading,
                        &task.metadata,
                        &task.context,
                    )
                    .with_repository(&task.repository.id),
                );
                let mut download = MetadataDownload::new(
                    task.metadata.clone(),
                    task.destination.clone(),
                    &task.context,
                );
                download.checksum_policy = task.checksum_policy.clone();
                download.repositories = task.checks.iter().map(|c| c.repository.clone()).collect();
                connector.get(&mut [], std::slice::from_mut(&mut download));

                if task.delete_local_copy_if_missing
                    && download.error.as_ref().is_some_and(|e| e.is_not_found())
                    && task.destination.exists()
                {
                    let _ = std::fs::remove_file(&task.destination);
                }

                let mut downloaded = RepositoryEvent::metadata(
                    EventKind::MetadataDownloaded,
                    &task.metadata,
                    &task.context,
                )
                .with_repository(&task.repository.id)
                .with_file(task.destination.clone());
                if let Some(error) = &download.error {
                    downloaded = downloaded.with_error(error.clone());
                }
                session.emit(downloaded);
                download.error
            }
        };

        for check in &mut task.checks {
            check.error = error.clone();
            if let Err(touch_error) = self.checks.touch_metadata(session, check) {
                let mut fatal = fatal.lock();
                if fatal.is_none() {
                    *fatal = Some(touch_error);
                }
            }
        }
        outcomes.lock().push((task.index, error));
    }
}

/// The repositories a metadata document may authoritatively come from: the
/// repository itself, or for a repository manager its mirrored set, filtered
/// by the document's nature.
fn enabled_source_repositories(
    repository: &RemoteRepository,
    metadata: &Metadata,
) -> Vec<RemoteRepository> {
    let candidates: Vec<RemoteRepository> =
        if repository.repository_manager && !repository.mirrored.is_empty() {
            repository.mirrored.clone()
        } else {
            vec![repository.clone()]
        };
    candidates
        .into_iter()
        .filter(|candidate| {
            (metadata.nature.includes_release() && candidate.release_policy.enabled)
                || (metadata.nature.includes_snapshot() && candidate.snapshot_policy.enabled)
        })
        .collect()
}

fn event(kind: EventKind, request: &MetadataRequest, file: Option<PathBuf>) -> RepositoryEvent {
    let mut event = RepositoryEvent::metadata(kind, &request.metadata, &request.context);
    if let Some(repository) = &request.repository {
        event = event.with_repository(&repository.id);
    }
    if let Some(file) = file {
        event = event.with_file(file);
    }
    event
}

fn event_result(kind: EventKind, result: &MetadataResult) -> RepositoryEvent {
    let mut event = RepositoryEvent::metadata(kind, &result.metadata, "");
    if let Some(repository) = &result.repository {
        event = event.with_repository(repository);
    }
    if let Some(error) = &result.error {
        event = event.with_error(error.clone());
    }
    event
}
