//! Remote and local repository descriptions and their policies.

use std::fmt;
use std::path::{Path, PathBuf};

/// Update-policy string: never check for newer versions.
pub const UPDATE_POLICY_NEVER: &str = "never";
/// Update-policy string: check on every resolution.
pub const UPDATE_POLICY_ALWAYS: &str = "always";
/// Update-policy string: check once per calendar day.
pub const UPDATE_POLICY_DAILY: &str = "daily";
/// Update-policy prefix: check when older than `interval:<minutes>`.
pub const UPDATE_POLICY_INTERVAL: &str = "interval";

/// Checksum-policy string: abort the transfer on mismatch.
pub const CHECKSUM_POLICY_FAIL: &str = "fail";
/// Checksum-policy string: log and continue on mismatch.
pub const CHECKSUM_POLICY_WARN: &str = "warn";
/// Checksum-policy string: skip validation entirely.
pub const CHECKSUM_POLICY_IGNORE: &str = "ignore";

/// Per-repository transfer policy for one artifact nature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPolicy {
    pub enabled: bool,
    pub update_policy: String,
    pub checksum_policy: String,
}

impl RepositoryPolicy {
    pub fn new(enabled: bool, update_policy: &str, checksum_policy: &str) -> Self {
        Self {
            enabled,
            update_policy: update_policy.to_string(),
            checksum_policy: checksum_policy.to_string(),
        }
    }
}

impl Default for RepositoryPolicy {
    fn default() -> Self {
        Self::new(true, UPDATE_POLICY_DAILY, CHECKSUM_POLICY_WARN)
    }
}

/// Credentials for a remote repository or proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Authentication {
    pub fn basic(username: &str, password: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
        }
    }
}

/// A proxy server to route repository traffic through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub auth: Option<Authentication>,
}

/// A remote repository: identity, location, per-nature policies, transport
/// attachments, and the set of repositories it mirrors when acting as a
/// repository manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    pub id: String,
    pub url: String,
    pub content_type: String,
    pub release_policy: RepositoryPolicy,
    pub snapshot_policy: RepositoryPolicy,
    pub auth: Option<Authentication>,
    pub proxy: Option<Proxy>,
    pub mirrored: Vec<RemoteRepository>,
    pub repository_manager: bool,
}

impl RemoteRepository {
    pub fn new(id: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            url: url.trim_end_matches('/').to_string(),
            content_type: "default".to_string(),
            release_policy: RepositoryPolicy::default(),
            snapshot_policy: RepositoryPolicy::default(),
            auth: None,
            proxy: None,
            mirrored: Vec::new(),
            repository_manager: false,
        }
    }

    pub fn with_policies(mut self, releases: RepositoryPolicy, snapshots: RepositoryPolicy) -> Self {
        self.release_policy = releases;
        self.snapshot_policy = snapshots;
        self
    }

    pub fn with_auth(mut self, auth: Authentication) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn as_manager_of(mut self, mirrored: Vec<RemoteRepository>) -> Self {
        self.repository_manager = true;
        self.mirrored = mirrored;
        self
    }

    /// The policy that applies to the given artifact nature.
    pub fn policy(&self, snapshot: bool) -> &RepositoryPolicy {
        if snapshot {
            &self.snapshot_policy
        } else {
            &self.release_policy
        }
    }

    /// The URL scheme, lowercased, or empty when the URL is opaque.
    pub fn protocol(&self) -> String {
        match self.url.split_once(':') {
            Some((scheme, _)) => scheme.to_ascii_lowercase(),
            None => String::new(),
        }
    }

    /// The host component of the URL, or empty when absent.
    pub fn host(&self) -> String {
        let rest = match self.url.split_once("://") {
            Some((_, rest)) => rest,
            None => return String::new(),
        };
        let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
        let after_user = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
        after_user
            .rsplit_once(':')
            .map(|(h, _)| h)
            .unwrap_or(after_user)
            .to_string()
    }
}

impl fmt::Display for RemoteRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.id, self.url)?;
        if self.repository_manager {
            write!(f, ", managed")?;
        }
        write!(f, ")")
    }
}

/// The local repository: a directory tree addressed through a layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRepository {
    pub base_dir: PathBuf,
    pub content_type: String,
}

impl LocalRepository {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            content_type: "default".to_string(),
        }
    }
}
