//! Update policies and the update-check manager.
//!
//! Update policies decide whether a cached item is considered current.
//! The manager persists the outcome of every remote check in a
//! `<file>.lastUpdated` sidecar so later sessions can honor `daily` and
//! `interval` policies and replay cached failures without network traffic.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use depot_core::artifact::Artifact;
use depot_core::metadata::Metadata;
use depot_core::repository::{
    RemoteRepository, UPDATE_POLICY_ALWAYS, UPDATE_POLICY_DAILY, UPDATE_POLICY_INTERVAL,
    UPDATE_POLICY_NEVER,
};
use depot_core::session::Session;
use depot_util::errors::{DepotError, DepotResult};

use crate::tracking::TrackingFileManager;

const TOUCH_FILE_SUFFIX: &str = ".lastUpdated";
const TOUCH_FILE_HEADER: &str =
    " NOTE: This is a Depot internal implementation file, its format can be changed without prior notice.";

static UNKNOWN_POLICY_LOGGED: AtomicBool = AtomicBool::new(false);

/// How many minutes may pass before a policy wants a re-check.
///
/// `always` is 0, `daily` 1440, `interval:<m>` is `m`, `never` and unknown
/// strings never expire.
pub fn ordinal(policy: &str) -> u64 {
    match policy {
        UPDATE_POLICY_ALWAYS => 0,
        UPDATE_POLICY_DAILY => 1440,
        UPDATE_POLICY_NEVER => u64::MAX,
        other => match parse_interval(other) {
            Some(minutes) => minutes,
            None => {
                log_unknown_policy(other);
                u64::MAX
            }
        },
    }
}

/// The more frequent of two policies: the one with the smaller ordinal.
pub fn effective_update_policy(a: &str, b: &str) -> String {
    if ordinal(a) <= ordinal(b) {
        a.to_string()
    } else {
        b.to_string()
    }
}

/// Whether an item last touched at `last_modified` is due for a re-check.
pub fn is_update_required(
    last_modified: Option<SystemTime>,
    policy: &str,
    now: SystemTime,
) -> bool {
    let last_modified = match last_modified {
        Some(t) => t,
        None => return true,
    };
    match policy {
        UPDATE_POLICY_ALWAYS => true,
        UPDATE_POLICY_DAILY => last_modified < midnight(now),
        UPDATE_POLICY_NEVER => false,
        other => match parse_interval(other) {
            Some(minutes) => match now.checked_sub(Duration::from_secs(minutes * 60)) {
                Some(cutoff) => last_modified < cutoff,
                None => false,
            },
            None => {
                log_unknown_policy(other);
                false
            }
        },
    }
}

fn parse_interval(policy: &str) -> Option<u64> {
    let rest = policy.strip_prefix(UPDATE_POLICY_INTERVAL)?;
    let minutes = rest.strip_prefix(':')?;
    match minutes.parse::<u64>() {
        Ok(m) if m > 0 => Some(m),
        _ => None,
    }
}

fn log_unknown_policy(policy: &str) {
    if !UNKNOWN_POLICY_LOGGED.swap(true, Ordering::Relaxed) {
        tracing::warn!("unknown update policy {policy:?}, assuming {UPDATE_POLICY_NEVER:?}");
    }
}

/// Start of the current UTC day.
fn midnight(now: SystemTime) -> SystemTime {
    let secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    UNIX_EPOCH + Duration::from_secs(secs - secs % 86_400)
}

/// One pending decision: should `file` be refreshed from `repository`?
#[derive(Debug, Clone)]
pub struct UpdateCheck<T> {
    pub item: T,
    pub file: PathBuf,
    /// The authoritative repository the check is keyed under.
    pub repository: RemoteRepository,
    pub policy: String,
    pub context: String,
    /// Outcome of `check_*`: whether a remote attempt is needed.
    pub required: bool,
    /// A cached or fresh failure attached to this check.
    pub error: Option<DepotError>,
}

impl<T> UpdateCheck<T> {
    pub fn new(item: T, file: PathBuf, repository: RemoteRepository, policy: &str, context: &str) -> Self {
        Self {
            item,
            file,
            repository,
            policy: policy.to_string(),
            context: context.to_string(),
            required: false,
            error: None,
        }
    }
}

enum CachedFailure {
    NotFound,
    Transfer(String),
}

/// Persists and consults per-file update state.
pub struct UpdateCheckManager {
    tracker: Arc<TrackingFileManager>,
}

impl Default for UpdateCheckManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateCheckManager {
    pub fn new() -> Self {
        Self {
            tracker: Arc::new(TrackingFileManager::new()),
        }
    }

    pub fn check_artifact(&self, session: &Session, check: &mut UpdateCheck<Artifact>) {
        let coordinate = check.item.to_string();
        let outcome = self.check(session, &check.file, &check.repository, &check.policy, &check.context);
        check.required = outcome.0;
        check.error = outcome.1.map(|failure| match failure {
            CachedFailure::NotFound => DepotError::ArtifactNotFound {
                coordinate: coordinate.clone(),
                location: check.repository.id.clone(),
            },
            CachedFailure::Transfer(message) => DepotError::ArtifactTransfer {
                coordinate: coordinate.clone(),
                repository: check.repository.id.clone(),
                message,
            },
        });
    }

    pub fn check_metadata(&self, session: &Session, check: &mut UpdateCheck<Metadata>) {
        let key = check.item.key();
        let outcome = self.check(session, &check.file, &check.repository, &check.policy, &check.context);
        check.required = outcome.0;
        check.error = outcome.1.map(|failure| match failure {
            CachedFailure::NotFound => DepotError::MetadataNotFound {
                key: key.clone(),
                location: check.repository.id.clone(),
            },
            CachedFailure::Transfer(message) => DepotError::MetadataTransfer {
                key: key.clone(),
                repository: check.repository.id.clone(),
                message,
            },
        });
    }

    pub fn touch_artifact(
        &self,
        session: &Session,
        check: &UpdateCheck<Artifact>,
    ) -> DepotResult<()> {
        self.touch(session, &check.file, &check.repository, &check.context, check.error.as_ref())
    }

    pub fn touch_metadata(
        &self,
        session: &Session,
        check: &UpdateCheck<Metadata>,
    ) -> DepotResult<()> {
        self.touch(session, &check.file, &check.repository, &check.context, check.error.as_ref())
    }

    fn check(
        &self,
        session: &Session,
        file: &Path,
        repository: &RemoteRepository,
        policy: &str,
        context: &str,
    ) -> (bool, Option<CachedFailure>) {
        let now = SystemTime::now();
        if file.is_file() {
            let required = is_update_required(depot_util::fs::mtime(file), policy, now);
            return (required, None);
        }

        // No local file: the decision runs off the recorded last attempt.
        let props = match self.tracker.read(&touch_file(file)) {
            Ok(props) => props,
            Err(e) => {
                tracing::warn!("failed to read update records for {}: {e}", file.display());
                Default::default()
            }
        };
        let key = data_key(repository, context);
        let last_attempt = props
            .get(&format!("{key}{TOUCH_FILE_SUFFIX}"))
            .and_then(|v| v.parse::<u64>().ok())
            .map(|millis| UNIX_EPOCH + Duration::from_millis(millis));

        let last_attempt = match last_attempt {
            None => return (true, None),
            Some(t) => t,
        };
        if is_update_required(Some(last_attempt), policy, now) {
            return (true, None);
        }

        match props.get(&format!("{key}.error")) {
            Some(message) => {
                let failure = if message.is_empty() {
                    CachedFailure::NotFound
                } else {
                    CachedFailure::Transfer(message.clone())
                };
                let representative = match &failure {
                    CachedFailure::NotFound => DepotError::ArtifactNotFound {
                        coordinate: String::new(),
                        location: String::new(),
                    },
                    CachedFailure::Transfer(m) => DepotError::ArtifactTransfer {
                        coordinate: String::new(),
                        repository: String::new(),
                        message: m.clone(),
                    },
                };
                if session.error_policy.applies(&representative) {
                    (false, Some(failure))
                } else {
                    (true, None)
                }
            }
            // A past attempt succeeded yet the file is gone; re-fetch.
            None => (true, None),
        }
    }

    fn touch(
        &self,
        _session: &Session,
        file: &Path,
        repository: &RemoteRepository,
        context: &str,
        error: Option<&DepotError>,
    ) -> DepotResult<()> {
        let now_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let key = data_key(repository, context);

        let mut updates = std::collections::BTreeMap::new();
        updates.insert(format!("{key}{TOUCH_FILE_SUFFIX}"), Some(now_millis.to_string()));
        let error_value = match error {
            None => None,
            Some(e) if e.is_not_found() => Some(String::new()),
            Some(e) => Some(e.to_string()),
        };
        updates.insert(format!("{key}.error"), error_value);

        self.tracker
            .update(&touch_file(file), &updates, Some(TOUCH_FILE_HEADER))?;
        Ok(())
    }
}

/// `a-1.0.jar` records into `a-1.0.jar.lastUpdated` next to it.
fn touch_file(file: &Path) -> PathBuf {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    file.with_file_name(format!("{name}{TOUCH_FILE_SUFFIX}"))
}

fn data_key(repository: &RemoteRepository, context: &str) -> String {
    if context.is_empty() {
        repository.id.clone()
    } else {
        format!("{}:{}", repository.id, context)
    }
}
