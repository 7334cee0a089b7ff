use std::fmt;

use crate::artifact::Artifact;

/// A dependency of one artifact on another, with scope, optionality, and
/// transitive exclusions. Immutable; setters return copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    artifact: Artifact,
    scope: String,
    optional: bool,
    exclusions: Vec<Exclusion>,
}

impl Dependency {
    pub fn new(artifact: Artifact, scope: &str) -> Self {
        Self {
            artifact,
            scope: scope.to_string(),
            optional: false,
            exclusions: Vec::new(),
        }
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn exclusions(&self) -> &[Exclusion] {
        &self.exclusions
    }

    pub fn with_artifact(&self, artifact: Artifact) -> Self {
        let mut copy = self.clone();
        copy.artifact = artifact;
        copy
    }

    pub fn with_scope(&self, scope: &str) -> Self {
        let mut copy = self.clone();
        copy.scope = scope.to_string();
        copy
    }

    pub fn with_optional(&self, optional: bool) -> Self {
        let mut copy = self.clone();
        copy.optional = optional;
        copy
    }

    pub fn with_exclusions(&self, exclusions: Vec<Exclusion>) -> Self {
        let mut copy = self.clone();
        copy.exclusions = exclusions;
        copy
    }

    /// Whether a coordinate is excluded from this dependency's subtree.
    pub fn excludes(&self, artifact: &Artifact) -> bool {
        self.exclusions.iter().any(|e| e.matches(artifact))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.artifact, self.scope)?;
        if self.optional {
            write!(f, " (optional)")?;
        }
        Ok(())
    }
}

/// A transitive dependency to exclude, matched by `(group_id, artifact_id)`
/// where either side may be the `*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Exclusion {
    pub group_id: String,
    pub artifact_id: String,
}

impl Exclusion {
    pub fn new(group_id: &str, artifact_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
        }
    }

    pub fn matches(&self, artifact: &Artifact) -> bool {
        (self.group_id == "*" || self.group_id == artifact.group_id())
            && (self.artifact_id == "*" || self.artifact_id == artifact.artifact_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(g: &str, a: &str) -> Artifact {
        Artifact::new(g, a, "jar", "1.0")
    }

    #[test]
    fn exclusion_exact_match() {
        let e = Exclusion::new("org.example", "lib");
        assert!(e.matches(&artifact("org.example", "lib")));
        assert!(!e.matches(&artifact("org.example", "other")));
        assert!(!e.matches(&artifact("org.other", "lib")));
    }

    #[test]
    fn exclusion_wildcards() {
        assert!(Exclusion::new("*", "lib").matches(&artifact("anything", "lib")));
        assert!(Exclusion::new("org.example", "*").matches(&artifact("org.example", "x")));
        assert!(Exclusion::new("*", "*").matches(&artifact("a", "b")));
    }

    #[test]
    fn dependency_excludes() {
        let dep = Dependency::new(artifact("g", "a"), "compile")
            .with_exclusions(vec![Exclusion::new("org.banned", "*")]);
        assert!(dep.excludes(&artifact("org.banned", "anything")));
        assert!(!dep.excludes(&artifact("org.fine", "lib")));
    }

    #[test]
    fn setters_are_copies() {
        let dep = Dependency::new(artifact("g", "a"), "compile");
        let test = dep.with_scope("test").with_optional(true);
        assert_eq!(dep.scope(), "compile");
        assert!(!dep.is_optional());
        assert_eq!(test.scope(), "test");
        assert!(test.is_optional());
    }
}
