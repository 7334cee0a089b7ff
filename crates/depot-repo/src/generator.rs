//! Metadata generators.
//!
//! Install and deploy run every registered generator twice: `prepare` before
//! any artifact is placed (e.g. to allocate a snapshot build number) and
//! `finish` afterwards (e.g. to regenerate the version index). Generators may
//! also rewrite artifacts on the way through, which is how timestamped
//! snapshot filenames come about.

use std::sync::Arc;

use depot_core::artifact::Artifact;
use depot_core::config::SessionConfig;
use depot_core::metadata::MergeableMetadata;
use depot_core::registry::PrioritizedComponents;
use depot_core::session::Session;

/// Hook producing derived metadata around artifact placement.
pub trait MetadataGenerator {
    /// Metadata that must exist before artifacts are placed.
    fn prepare(&mut self, _artifacts: &[Artifact]) -> Vec<Box<dyn MergeableMetadata>> {
        Vec::new()
    }

    /// Rewrite an artifact before placement.
    fn transform_artifact(&mut self, artifact: Artifact) -> Artifact {
        artifact
    }

    /// Metadata derived from the placed artifacts.
    fn finish(&mut self, _artifacts: &[Artifact]) -> Vec<Box<dyn MergeableMetadata>> {
        Vec::new()
    }
}

/// Creates generators per operation; a factory may decline.
pub trait MetadataGeneratorFactory: Send + Sync {
    fn priority(&self) -> f32;

    fn new_generator(&self, session: &Session) -> Option<Box<dyn MetadataGenerator>>;
}

/// Factory for the version-index generator.
#[derive(Debug, Default)]
pub struct VersionsMetadataGeneratorFactory;

impl MetadataGeneratorFactory for VersionsMetadataGeneratorFactory {
    fn priority(&self) -> f32 {
        5.0
    }

    fn new_generator(&self, _session: &Session) -> Option<Box<dyn MetadataGenerator>> {
        Some(Box::new(crate::versions::VersionsMetadataGenerator))
    }
}

/// Priority-ordered registry of generator factories.
pub struct MetadataGeneratorRegistry {
    factories: PrioritizedComponents<dyn MetadataGeneratorFactory>,
}

impl MetadataGeneratorRegistry {
    /// A registry with the version-index factory registered.
    pub fn new(config: &SessionConfig) -> Self {
        let mut registry = Self {
            factories: PrioritizedComponents::new(),
        };
        registry.register(
            Arc::new(VersionsMetadataGeneratorFactory),
            "VersionsMetadataGeneratorFactory",
            config,
        );
        registry
    }

    /// A registry with no factories; callers register their own.
    pub fn empty() -> Self {
        Self {
            factories: PrioritizedComponents::new(),
        }
    }

    pub fn register(
        &mut self,
        factory: Arc<dyn MetadataGeneratorFactory>,
        type_name: &str,
        config: &SessionConfig,
    ) {
        let priority = factory.priority();
        self.factories.insert(factory, type_name, priority, config);
    }

    /// Generators for one operation, in priority order.
    pub fn generators(&self, session: &Session) -> Vec<Box<dyn MetadataGenerator>> {
        self.factories
            .enabled()
            .filter_map(|factory| factory.new_generator(session))
            .collect()
    }
}
