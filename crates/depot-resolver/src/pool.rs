//! Interning pools shared across requests on one session.
//!
//! The collector allocates enormous numbers of equal artifacts and
//! dependencies while walking a graph; the pools collapse them to shared
//! representatives and cache descriptor and version-range lookups keyed by
//! coordinate + repository set. The whole store rides on the session's
//! [`RepositoryCache`](depot_core::session::RepositoryCache), so sessions
//! sharing a cache share the savings.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use depot_core::artifact::Artifact;
use depot_core::dependency::Dependency;
use depot_core::repository::RemoteRepository;
use depot_core::session::Session;
use depot_core::version::Version;

use crate::descriptor::ArtifactDescriptor;

/// A thread-safe intern pool: equal values share one representative.
pub struct ObjectPool<T: Eq + Hash> {
    values: Mutex<HashSet<Arc<T>>>,
}

impl<T: Eq + Hash> ObjectPool<T> {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashSet::new()),
        }
    }

    /// The canonical representative for `value`. Interning an equal value
    /// returns the same `Arc`.
    pub fn intern(&self, value: T) -> Arc<T> {
        let mut values = self.values.lock();
        if let Some(existing) = values.get(&value) {
            return existing.clone();
        }
        let representative = Arc::new(value);
        values.insert(representative.clone());
        representative
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Eq + Hash> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cached descriptor lookup outcome; the bad sentinel short-circuits repeat
/// failures without re-reading.
#[derive(Clone)]
pub enum DescriptorEntry {
    Good(Arc<ArtifactDescriptor>),
    Bad,
}

/// Cached version-range resolution.
#[derive(Debug, Clone)]
pub struct CachedRange {
    pub versions: Vec<Version>,
    /// Repository id each version was discovered in, when remote.
    pub origins: HashMap<String, String>,
}

/// The session-attached store composing the pools and lookup caches.
#[derive(Default)]
pub struct DataPool {
    artifacts: ObjectPool<Artifact>,
    dependencies: ObjectPool<Dependency>,
    descriptors: Mutex<HashMap<String, DescriptorEntry>>,
    ranges: Mutex<HashMap<String, Arc<CachedRange>>>,
}

const SESSION_CACHE_KEY: &str = "depot.resolver.dataPool";

impl DataPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool attached to the session's cache, created on first use.
    pub fn from_session(session: &Session) -> Arc<DataPool> {
        let any = session
            .cache
            .get_or_insert_with(SESSION_CACHE_KEY, || Arc::new(DataPool::new()));
        match any.downcast::<DataPool>() {
            Ok(pool) => pool,
            // Someone parked an unrelated value under our key; run detached.
            Err(_) => Arc::new(DataPool::new()),
        }
    }

    pub fn intern_artifact(&self, artifact: Artifact) -> Arc<Artifact> {
        self.artifacts.intern(artifact)
    }

    pub fn intern_dependency(&self, dependency: Dependency) -> Arc<Dependency> {
        self.dependencies.intern(dependency)
    }

    pub fn artifact_pool_size(&self) -> usize {
        self.artifacts.len()
    }

    pub fn descriptor(&self, artifact: &Artifact) -> Option<DescriptorEntry> {
        self.descriptors.lock().get(&artifact.id()).cloned()
    }

    pub fn put_descriptor(&self, artifact: &Artifact, entry: DescriptorEntry) {
        self.descriptors.lock().insert(artifact.id(), entry);
    }

    pub fn range(&self, artifact: &Artifact, repositories: &[RemoteRepository]) -> Option<Arc<CachedRange>> {
        let key = range_key(artifact, repositories);
        self.ranges.lock().get(&key).cloned()
    }

    pub fn put_range(
        &self,
        artifact: &Artifact,
        repositories: &[RemoteRepository],
        range: Arc<CachedRange>,
    ) {
        let key = range_key(artifact, repositories);
        self.ranges.lock().insert(key, range);
    }
}

fn range_key(artifact: &Artifact, repositories: &[RemoteRepository]) -> String {
    format!("{}@{}", artifact.id(), repositories_key(repositories))
}

/// A canonical fingerprint of a repository set.
///
/// Two sets are equivalent when they agree per entry on id and manager flag,
/// plus the mirrored set (recursively) for managers or `(url, enabled bits)`
/// for plain repositories.
pub fn repositories_key(repositories: &[RemoteRepository]) -> String {
    let mut key = String::new();
    for repository in repositories {
        key.push('[');
        key.push_str(&repository.id);
        key.push('|');
        if repository.repository_manager {
            key.push('m');
            key.push_str(&repositories_key(&repository.mirrored));
        } else {
            key.push_str(&repository.url);
            key.push('|');
            key.push(if repository.release_policy.enabled { 'r' } else { '-' });
            key.push(if repository.snapshot_policy.enabled { 's' } else { '-' });
        }
        key.push(']');
    }
    key
}
