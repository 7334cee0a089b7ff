//! The session: per-invocation settings, pluggable selectors, and the shared
//! request-scoped cache that resolution state attaches to.

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use depot_util::errors::{DepotError, DepotResult};

use crate::artifact::Artifact;
use crate::config::SessionConfig;
use crate::events::{dispatch, EventListener, RepositoryEvent};
use crate::repository::{Authentication, LocalRepository, Proxy, RemoteRepository};
use crate::sync::LockManager;

/// Chooses a mirror for a remote repository, if one is configured.
pub trait MirrorSelector: Send + Sync {
    fn mirror(&self, repository: &RemoteRepository) -> Option<RemoteRepository>;
}

/// Supplies credentials for a remote repository.
pub trait AuthenticationSelector: Send + Sync {
    fn authentication(&self, repository: &RemoteRepository) -> Option<Authentication>;
}

/// Supplies a proxy for a remote repository.
pub trait ProxySelector: Send + Sync {
    fn proxy(&self, repository: &RemoteRepository) -> Option<Proxy>;
}

/// Serves artifacts straight out of an in-progress build workspace,
/// bypassing both caches and remotes.
pub trait WorkspaceReader: Send + Sync {
    fn find_artifact(&self, artifact: &Artifact) -> Option<PathBuf>;
}

/// Mirror selector backed by an explicit source-id table.
///
/// The selected mirror is a copy of the configured template with the
/// original repository recorded in its mirrored set.
#[derive(Default)]
pub struct StaticMirrorSelector {
    mirrors: Vec<(Vec<String>, RemoteRepository)>,
}

impl StaticMirrorSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mirror_of: &[&str], mirror: RemoteRepository) {
        self.mirrors.push((
            mirror_of.iter().map(|s| s.to_string()).collect(),
            mirror,
        ));
    }
}

impl MirrorSelector for StaticMirrorSelector {
    fn mirror(&self, repository: &RemoteRepository) -> Option<RemoteRepository> {
        for (sources, template) in &self.mirrors {
            if sources.iter().any(|id| id == &repository.id) {
                let mut mirror = template.clone();
                mirror.mirrored = vec![repository.clone()];
                return Some(mirror);
            }
        }
        None
    }
}

/// Authentication selector backed by a repository-id table.
#[derive(Default)]
pub struct StaticAuthenticationSelector {
    by_id: HashMap<String, Authentication>,
}

impl StaticAuthenticationSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, repository_id: &str, auth: Authentication) {
        self.by_id.insert(repository_id.to_string(), auth);
    }
}

impl AuthenticationSelector for StaticAuthenticationSelector {
    fn authentication(&self, repository: &RemoteRepository) -> Option<Authentication> {
        self.by_id.get(&repository.id).cloned()
    }
}

/// Proxy selector backed by a repository-id table.
#[derive(Default)]
pub struct StaticProxySelector {
    by_id: HashMap<String, Proxy>,
}

impl StaticProxySelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, repository_id: &str, proxy: Proxy) {
        self.by_id.insert(repository_id.to_string(), proxy);
    }
}

impl ProxySelector for StaticProxySelector {
    fn proxy(&self, repository: &RemoteRepository) -> Option<Proxy> {
        self.by_id.get(&repository.id).cloned()
    }
}

/// Controls whether failed resolution outcomes recorded by the update-check
/// manager are replayed to later requests without touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionErrorPolicy {
    pub cache_not_found: bool,
    pub cache_transfer_errors: bool,
}

impl Default for ResolutionErrorPolicy {
    fn default() -> Self {
        Self {
            cache_not_found: true,
            cache_transfer_errors: false,
        }
    }
}

impl ResolutionErrorPolicy {
    /// Whether a cached error of this shape applies to a new request.
    pub fn applies(&self, error: &DepotError) -> bool {
        if error.is_not_found() {
            self.cache_not_found
        } else {
            self.cache_transfer_errors
        }
    }
}

/// A string-keyed store of values shared across requests on one session.
///
/// Resolution state (intern pools, descriptor caches) keeps itself here so
/// that sessions sharing a cache also share that state.
#[derive(Default)]
pub struct RepositoryCache {
    map: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl RepositoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.map.lock().get(key).cloned()
    }

    pub fn put(&self, key: &str, value: Arc<dyn Any + Send + Sync>) {
        self.map.lock().insert(key.to_string(), value);
    }

    /// Fetch the value under `key`, inserting the result of `init` first when
    /// absent. The returned value is always the stored one.
    pub fn get_or_insert_with(
        &self,
        key: &str,
        init: impl FnOnce() -> Arc<dyn Any + Send + Sync>,
    ) -> Arc<dyn Any + Send + Sync> {
        self.map
            .lock()
            .entry(key.to_string())
            .or_insert_with(init)
            .clone()
    }
}

/// Everything one engine invocation needs: flags, configuration, the local
/// repository, pluggable selectors, the shared cache, and the listener.
#[derive(Clone)]
pub struct Session {
    pub offline: bool,
    /// Skip repositories contributed by artifact descriptors.
    pub ignore_descriptor_repositories: bool,
    /// Session-wide checksum policy overriding per-repository settings.
    pub checksum_policy_override: Option<String>,
    /// Session-wide update policy overriding per-repository settings.
    pub update_policy_override: Option<String>,
    pub error_policy: ResolutionErrorPolicy,
    pub config: SessionConfig,
    pub local_repository: LocalRepository,
    pub mirror_selector: Option<Arc<dyn MirrorSelector>>,
    pub auth_selector: Option<Arc<dyn AuthenticationSelector>>,
    pub proxy_selector: Option<Arc<dyn ProxySelector>>,
    pub workspace: Option<Arc<dyn WorkspaceReader>>,
    pub cache: Arc<RepositoryCache>,
    pub lock_manager: Arc<LockManager>,
    pub listener: Option<Arc<dyn EventListener>>,
}

impl Session {
    pub fn new(local_repository: LocalRepository) -> Self {
        Self {
            offline: false,
            ignore_descriptor_repositories: false,
            checksum_policy_override: None,
            update_policy_override: None,
            error_policy: ResolutionErrorPolicy::default(),
            config: SessionConfig::default(),
            local_repository,
            mirror_selector: None,
            auth_selector: None,
            proxy_selector: None,
            workspace: None,
            cache: Arc::new(RepositoryCache::new()),
            lock_manager: Arc::new(LockManager::new()),
            listener: None,
        }
    }

    /// Check the session for values that would corrupt repository state.
    pub fn validate(&self) -> DepotResult<()> {
        self.config.validate()
    }

    /// Deliver an event to the registered listener, swallowing its failures.
    pub fn emit(&self, event: RepositoryEvent) {
        dispatch(self.listener.as_deref(), event);
    }
}
