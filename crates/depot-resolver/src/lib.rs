//! Resolution engine of the Depot artifact repository system.
//!
//! The entry points are [`collector::DependencyCollector`], which builds the
//! transitive dependency graph, [`artifact::ArtifactResolver`], which turns
//! artifact coordinates into local files, and [`system::RepositorySystem`],
//! which wires both together for the collect-then-download flow.

pub mod artifact;
pub mod collector;
pub mod descriptor;
pub mod graph;
pub mod metadata;
pub mod pool;
pub mod system;
pub mod version;
