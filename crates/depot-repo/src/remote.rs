//! Remote repository arithmetic: mirror substitution, aggregation of
//! dominant and recessive repository lists, mirror-set merging, and
//! effective-policy derivation.

use depot_core::repository::{RemoteRepository, RepositoryPolicy};
use depot_core::session::Session;

use crate::checksum::stricter_policy_str;
use crate::update::effective_update_policy;

/// Fold a recessive repository list into a dominant one.
///
/// Raw recessive entries (straight from a descriptor or request) first go
/// through the session's mirror selector and, when newly admitted, get
/// authentication and proxy attached from the session selectors. Duplicate
/// ids resolve in favor of the dominant entry, except that two repository
/// managers with non-trivial mirror sets merge.
pub fn aggregate_repositories(
    session: &Session,
    dominant: Vec<RemoteRepository>,
    recessive: Vec<RemoteRepository>,
    recessive_is_raw: bool,
) -> Vec<RemoteRepository> {
    let mut result = dominant;
    for repository in recessive {
        let repository = if recessive_is_raw {
            match session.mirror_selector.as_ref().and_then(|s| s.mirror(&repository)) {
                Some(mirror) => mirror,
                None => repository,
            }
        } else {
            repository
        };

        match result.iter().position(|r| r.id == repository.id) {
            Some(index) => {
                if !result[index].mirrored.is_empty() && !repository.mirrored.is_empty() {
                    result[index] = merge_mirrors(&result[index], &repository);
                }
                // Otherwise the dominant entry wins outright.
            }
            None => {
                let mut admitted = repository;
                if recessive_is_raw {
                    if admitted.auth.is_none() {
                        if let Some(selector) = &session.auth_selector {
                            admitted.auth = selector.authentication(&admitted);
                        }
                    }
                    if admitted.proxy.is_none() {
                        if let Some(selector) = &session.proxy_selector {
                            admitted.proxy = selector.proxy(&admitted);
                        }
                    }
                }
                result.push(admitted);
            }
        }
    }
    result
}

/// Merge two views of the same mirror: sub-repositories seen only on the
/// recessive side join the dominant's mirror set, folding their policies in.
fn merge_mirrors(dominant: &RemoteRepository, recessive: &RemoteRepository) -> RemoteRepository {
    let mut merged = dominant.clone();
    for sub in &recessive.mirrored {
        if merged.mirrored.iter().any(|r| r.id == sub.id) {
            continue;
        }
        merged.release_policy = merge_policy(&merged.release_policy, &sub.release_policy);
        merged.snapshot_policy = merge_policy(&merged.snapshot_policy, &sub.snapshot_policy);
        merged.mirrored.push(sub.clone());
    }
    merged
}

/// Merge two policies: with both enabled, take the stricter checksum policy
/// and the more frequent update policy; with one enabled, take it; with
/// neither, keep the dominant.
fn merge_policy(dominant: &RepositoryPolicy, recessive: &RepositoryPolicy) -> RepositoryPolicy {
    match (dominant.enabled, recessive.enabled) {
        (true, true) => RepositoryPolicy {
            enabled: true,
            update_policy: effective_update_policy(
                &dominant.update_policy,
                &recessive.update_policy,
            ),
            checksum_policy: stricter_policy_str(
                &dominant.checksum_policy,
                &recessive.checksum_policy,
            ),
        },
        (true, false) => dominant.clone(),
        (false, true) => recessive.clone(),
        (false, false) => dominant.clone(),
    }
}

/// The policy in effect for a repository, covering the requested natures and
/// overlaid with any session-wide overrides.
pub fn effective_policy(
    session: &Session,
    repository: &RemoteRepository,
    releases: bool,
    snapshots: bool,
) -> RepositoryPolicy {
    let mut policy = match (releases, snapshots) {
        (true, true) => {
            let releases = &repository.release_policy;
            let snapshots = &repository.snapshot_policy;
            match (releases.enabled, snapshots.enabled) {
                (true, false) => releases.clone(),
                (false, true) => snapshots.clone(),
                _ => RepositoryPolicy {
                    enabled: releases.enabled || snapshots.enabled,
                    update_policy: effective_update_policy(
                        &releases.update_policy,
                        &snapshots.update_policy,
                    ),
                    checksum_policy: stricter_policy_str(
                        &releases.checksum_policy,
                        &snapshots.checksum_policy,
                    ),
                },
            }
        }
        (false, true) => repository.snapshot_policy.clone(),
        _ => repository.release_policy.clone(),
    };

    if let Some(update) = &session.update_policy_override {
        if !update.is_empty() {
            policy.update_policy = update.clone();
        }
    }
    if let Some(checksum) = &session.checksum_policy_override {
        if !checksum.is_empty() {
            policy.checksum_policy = checksum.clone();
        }
    }
    policy
}
