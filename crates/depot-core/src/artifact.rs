use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Property marking an artifact whose file is supplied directly by the caller.
///
/// Unhosted artifacts are never downloaded and never registered in the local
/// cache under a remote origin; the property value is the supplied path.
pub const LOCAL_PATH_PROPERTY: &str = "depot.localPath";

/// An immutable, coordinate-addressed file in a repository.
///
/// Identity is `(group_id, artifact_id, extension, classifier, version)`;
/// equality and hashing cover exactly those fields. The attached file and the
/// property map are payload, not identity. All setters return copies.
#[derive(Debug, Clone)]
pub struct Artifact {
    group_id: String,
    artifact_id: String,
    version: String,
    classifier: String,
    extension: String,
    properties: BTreeMap<String, String>,
    file: Option<PathBuf>,
}

impl Artifact {
    pub fn new(group_id: &str, artifact_id: &str, extension: &str, version: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            version: version.to_string(),
            classifier: String::new(),
            extension: extension.to_string(),
            properties: BTreeMap::new(),
            file: None,
        }
    }

    /// Parse `group:artifact[:extension[:classifier]]:version` coordinates.
    pub fn parse(coords: &str) -> Option<Self> {
        let parts: Vec<&str> = coords.split(':').collect();
        match parts.len() {
            3 => Some(Self::new(parts[0], parts[1], "jar", parts[2])),
            4 => Some(Self::new(parts[0], parts[1], parts[2], parts[3])),
            5 => Some(Self::new(parts[0], parts[1], parts[2], parts[4]).with_classifier(parts[3])),
            _ => None,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn classifier(&self) -> &str {
        &self.classifier
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// The version with any timestamp-build suffix restored to its source
    /// form: `1.0-20240101.101010-7` becomes `1.0-SNAPSHOT`.
    pub fn base_version(&self) -> String {
        to_base_version(&self.version)
    }

    /// Whether this artifact refers to a snapshot, timestamped or not.
    pub fn is_snapshot(&self) -> bool {
        is_snapshot_version(&self.version)
    }

    /// Whether the file for this artifact is supplied by the caller rather
    /// than hosted in any repository.
    pub fn is_unhosted(&self) -> bool {
        self.properties.contains_key(LOCAL_PATH_PROPERTY)
    }

    /// The caller-supplied path of an unhosted artifact, if any.
    pub fn local_path(&self) -> Option<&str> {
        self.properties.get(LOCAL_PATH_PROPERTY).map(String::as_str)
    }

    pub fn with_version(&self, version: &str) -> Self {
        if version == self.version {
            return self.clone();
        }
        let mut copy = self.clone();
        copy.version = version.to_string();
        copy
    }

    pub fn with_classifier(mut self, classifier: &str) -> Self {
        self.classifier = classifier.to_string();
        self
    }

    pub fn with_file(&self, file: PathBuf) -> Self {
        let mut copy = self.clone();
        copy.file = Some(file);
        copy
    }

    pub fn without_file(&self) -> Self {
        let mut copy = self.clone();
        copy.file = None;
        copy
    }

    pub fn with_property(&self, key: &str, value: &str) -> Self {
        let mut copy = self.clone();
        copy.properties.insert(key.to_string(), value.to_string());
        copy
    }

    pub fn with_properties(&self, properties: BTreeMap<String, String>) -> Self {
        let mut copy = self.clone();
        copy.properties = properties;
        copy
    }

    pub fn with_local_path(&self, path: &Path) -> Self {
        self.with_property(LOCAL_PATH_PROPERTY, &path.to_string_lossy())
    }

    /// Full identity rendering, used as a cache and lock key.
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.group_id, self.artifact_id, self.extension, self.classifier, self.version
        )
    }

    /// `group:artifact:extension[:classifier]` without the version, the key
    /// under which dependency management and conflict grouping happen.
    pub fn versionless_id(&self) -> String {
        if self.classifier.is_empty() {
            format!("{}:{}:{}", self.group_id, self.artifact_id, self.extension)
        } else {
            format!(
                "{}:{}:{}:{}",
                self.group_id, self.artifact_id, self.extension, self.classifier
            )
        }
    }

    /// Whether two artifacts name the same coordinate ignoring the version.
    pub fn same_versionless(&self, other: &Artifact) -> bool {
        self.group_id == other.group_id
            && self.artifact_id == other.artifact_id
            && self.extension == other.extension
            && self.classifier == other.classifier
    }
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.group_id == other.group_id
            && self.artifact_id == other.artifact_id
            && self.version == other.version
            && self.classifier == other.classifier
            && self.extension == other.extension
    }
}

impl Eq for Artifact {}

impl Hash for Artifact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group_id.hash(state);
        self.artifact_id.hash(state);
        self.version.hash(state);
        self.classifier.hash(state);
        self.extension.hash(state);
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.classifier.is_empty() {
            write!(
                f,
                "{}:{}:{}:{}",
                self.group_id, self.artifact_id, self.extension, self.version
            )
        } else {
            write!(
                f,
                "{}:{}:{}:{}:{}",
                self.group_id, self.artifact_id, self.extension, self.classifier, self.version
            )
        }
    }
}

/// Strip a timestamp-build suffix back to its `-SNAPSHOT` source form.
pub fn to_base_version(version: &str) -> String {
    match timestamped_prefix(version) {
        Some(prefix) => format!("{prefix}-SNAPSHOT"),
        None => version.to_string(),
    }
}

/// Whether a version names a snapshot, timestamped or symbolic.
pub fn is_snapshot_version(version: &str) -> bool {
    version.ends_with("-SNAPSHOT") || timestamped_prefix(version).is_some()
}

/// For `X-YYYYMMDD.HHMMSS-N` returns `X`; otherwise `None`.
fn timestamped_prefix(version: &str) -> Option<&str> {
    // Scan from the right: -<digits> then -<8 digits>.<6 digits>
    let (rest, build) = version.rsplit_once('-')?;
    if build.is_empty() || !build.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (prefix, stamp) = rest.rsplit_once('-')?;
    let (date, time) = stamp.split_once('.')?;
    if date.len() == 8
        && time.len() == 6
        && date.bytes().all(|b| b.is_ascii_digit())
        && time.bytes().all(|b| b.is_ascii_digit())
        && !prefix.is_empty()
    {
        Some(prefix)
    } else {
        None
    }
}
