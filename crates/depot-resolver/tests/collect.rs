//! Dependency collection against an in-memory descriptor table.

mod common;

use std::sync::Arc;

use common::MapDescriptorReader;
use depot_core::artifact::Artifact;
use depot_core::dependency::{Dependency, Exclusion};
use depot_core::repository::{LocalRepository, RemoteRepository};
use depot_core::session::Session;
use depot_core::version::Version;
use depot_resolver::collector::{CollectRequest, DependencyCollector};
use depot_resolver::descriptor::ArtifactDescriptor;
use depot_resolver::version::{
    VersionRangeRequest, VersionRangeResolver, VersionRangeResult, VersionSource,
};
use depot_core::version::VersionConstraint;
use depot_util::errors::DepotResult;
use tempfile::TempDir;

/// Range resolver answering from a fixed version list.
struct StubRangeResolver {
    available: Vec<&'static str>,
}

impl VersionRangeResolver for StubRangeResolver {
    fn resolve_range(
        &self,
        _session: &Session,
        request: &VersionRangeRequest,
    ) -> DepotResult<VersionRangeResult> {
        let constraint = VersionConstraint::parse(request.artifact.version());
        let versions: Vec<Version> = self
            .available
            .iter()
            .map(|v| Version::parse(v))
            .filter(|v| constraint.contains(v))
            .collect();
        let mut versions = versions;
        versions.sort();
        Ok(VersionRangeResult {
            versions,
            constraint,
            sources: [("1.5".to_string(), VersionSource::Local)].into_iter().collect(),
        })
    }
}

fn artifact(name: &str, version: &str) -> Artifact {
    Artifact::new("org.test", name, "jar", version)
}

fn dep(name: &str, version: &str) -> Dependency {
    Dependency::new(artifact(name, version), "compile")
}

fn descriptor(name: &str, version: &str, dependencies: Vec<Dependency>) -> ArtifactDescriptor {
    let mut d = ArtifactDescriptor::new(artifact(name, version));
    d.dependencies = dependencies;
    d
}

struct Setup {
    _tmp: TempDir,
    session: Session,
    reader: Arc<MapDescriptorReader>,
    collector: DependencyCollector,
    repositories: Vec<RemoteRepository>,
}

fn setup(available: Vec<&'static str>) -> Setup {
    let tmp = TempDir::new().unwrap();
    let session = Session::new(LocalRepository::new(tmp.path()));
    let reader = Arc::new(MapDescriptorReader::new());
    let collector = DependencyCollector::new(
        reader.clone(),
        Arc::new(StubRangeResolver { available }),
    );
    Setup {
        _tmp: tmp,
        session,
        reader,
        collector,
        repositories: vec![RemoteRepository::new("central", "https://central.example")],
    }
}

#[test]
fn collects_transitive_graph_in_order() {
    let s = setup(vec![]);
    s.reader.add(descriptor("root", "1", vec![dep("a", "1"), dep("b", "1")]));
    s.reader.add(descriptor("a", "1", vec![dep("leaf", "1")]));

    let result = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("root", "1"), s.repositories.clone()),
        )
        .unwrap();

    let flat = result.graph.flatten();
    let names: Vec<&str> = flat.iter().map(|f| f.artifact.artifact_id()).collect();
    assert_eq!(names, vec!["a", "leaf", "b"]);
    assert!(result.cycles.is_empty());
}

#[test]
fn cycle_becomes_back_edge_and_is_reported() {
    let s = setup(vec![]);
    s.reader.add(descriptor("x", "1", vec![dep("y", "1")]));
    s.reader.add(descriptor("y", "1", vec![dep("x", "1")]));

    let result = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("x", "1"), s.repositories.clone()),
        )
        .unwrap();

    // Root x -> y -> back to the same x node.
    let root = result.graph.root.unwrap();
    let children = result.graph.dependencies_of(root);
    assert_eq!(children.len(), 1);
    let y = children[0].0;
    assert_eq!(result.graph.node(y).artifact.artifact_id(), "y");
    let back = result.graph.dependencies_of(y);
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].0, root, "cycle closes on the existing node");

    assert_eq!(result.cycles.len(), 1);
    let cycle = &result.cycles[0];
    let last = cycle.cycle.last().unwrap();
    assert_eq!(last.artifact().artifact_id(), "x");

    // Traversal terminates.
    let flat = result.graph.flatten();
    assert_eq!(flat.len(), 1);
}

#[test]
fn self_cycle_terminates() {
    let s = setup(vec![]);
    s.reader.add(descriptor("selfish", "1", vec![dep("selfish", "1")]));

    let result = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("selfish", "1"), s.repositories.clone()),
        )
        .unwrap();
    assert_eq!(result.cycles.len(), 1);
    assert!(result.graph.flatten().is_empty());
}

#[test]
fn repeated_collection_reuses_cached_descriptors() {
    let s = setup(vec![]);
    s.reader.add(descriptor("root", "1", vec![dep("a", "1"), dep("b", "1")]));
    s.reader.add(descriptor("a", "1", vec![dep("shared", "1")]));
    s.reader.add(descriptor("b", "1", vec![dep("shared", "1")]));

    let first = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("root", "1"), s.repositories.clone()),
        )
        .unwrap();
    let reads_after_first = s.reader.reads();

    let second = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("root", "1"), s.repositories.clone()),
        )
        .unwrap();

    // Same structure, and no descriptor re-read thanks to the session pool.
    assert_eq!(
        first.graph.flatten().len(),
        second.graph.flatten().len()
    );
    assert_eq!(s.reader.reads(), reads_after_first);
}

#[test]
fn shared_subtree_is_a_single_node() {
    let s = setup(vec![]);
    s.reader.add(descriptor("root", "1", vec![dep("a", "1"), dep("b", "1")]));
    s.reader.add(descriptor("a", "1", vec![dep("shared", "1")]));
    s.reader.add(descriptor("b", "1", vec![dep("shared", "1")]));
    s.reader.add(descriptor("shared", "1", vec![dep("deep", "1")]));

    let result = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("root", "1"), s.repositories.clone()),
        )
        .unwrap();

    // shared and deep appear once each despite two paths.
    assert_eq!(result.graph.flatten().len(), 4);
    // Nodes: root, a, b, shared, deep.
    assert_eq!(result.graph.node_count(), 5);
}

#[test]
fn version_range_picks_all_candidates_and_root_picks_highest() {
    let s = setup(vec!["1.0", "1.5", "2.0"]);
    s.reader.add(descriptor("root", "1.5", vec![]));

    let result = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("root", "[1.0,2.0)"), s.repositories.clone()),
        )
        .unwrap();
    // Highest in-range version wins for the root.
    let root = result.graph.root.unwrap();
    assert_eq!(result.graph.node(root).artifact.version(), "1.5");
}

#[test]
fn empty_range_is_an_error_with_partial_result() {
    let s = setup(vec!["1.0"]);
    s.reader.add(descriptor("root", "1", vec![dep("gone", "[2.0,3.0)")]));

    let error = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("root", "1"), s.repositories.clone()),
        )
        .unwrap_err();
    assert_eq!(error.result.errors.len(), 1);
    // The graph still carries the root.
    assert!(error.result.graph.root.is_some());
}

#[test]
fn managed_version_applies_to_grandchildren_and_records_premanaged_state() {
    let s = setup(vec![]);
    s.reader.add(descriptor("root", "1", vec![dep("child", "1")]));
    s.reader.add(descriptor("child", "1", vec![dep("grand", "1.0")]));
    s.reader.add(descriptor("grand", "2.0", vec![]));

    let mut request = CollectRequest::for_dependency(dep("root", "1"), s.repositories.clone());
    request.managed_dependencies = vec![dep("grand", "2.0")];

    let result = s.collector.collect(&s.session, request).unwrap();
    let flat = result.graph.flatten();
    let grand = flat
        .iter()
        .find(|f| f.artifact.artifact_id() == "grand")
        .unwrap();
    assert_eq!(grand.artifact.version(), "2.0");

    // The pre-managed version is remembered on the incoming edge.
    let child_node = flat
        .iter()
        .find(|f| f.artifact.artifact_id() == "child")
        .unwrap()
        .node;
    let edges = result.graph.dependencies_of(child_node);
    assert_eq!(edges[0].1.premanaged_version.as_deref(), Some("1.0"));
}

#[test]
fn relocation_rewrites_coordinates() {
    let s = setup(vec![]);
    s.reader.add(descriptor("root", "1", vec![dep("old", "1")]));
    // Reading old:1 yields a descriptor naming new:1.
    let mut moved = ArtifactDescriptor::new(artifact("new", "1"));
    moved.relocations = vec![artifact("old", "1")];
    s.reader.add_under(&artifact("old", "1"), moved);
    s.reader.add(descriptor("new", "1", vec![]));

    let result = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("root", "1"), s.repositories.clone()),
        )
        .unwrap();
    let flat = result.graph.flatten();
    let names: Vec<&str> = flat.iter().map(|f| f.artifact.artifact_id()).collect();
    assert_eq!(names, vec!["new"]);

    let root = result.graph.root.unwrap();
    let edges = result.graph.dependencies_of(root);
    assert!(!edges[0].1.relocations.is_empty());
}

#[test]
fn exclusions_prune_subtrees() {
    let s = setup(vec![]);
    s.reader.add(descriptor(
        "root",
        "1",
        vec![dep("a", "1").with_exclusions(vec![Exclusion::new("org.test", "banned")])],
    ));
    s.reader.add(descriptor("a", "1", vec![dep("banned", "1"), dep("fine", "1")]));

    let result = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("root", "1"), s.repositories.clone()),
        )
        .unwrap();
    let names: Vec<String> = result
        .graph
        .flatten()
        .iter()
        .map(|f| f.artifact.artifact_id().to_string())
        .collect();
    assert!(names.contains(&"fine".to_string()));
    assert!(!names.contains(&"banned".to_string()));
}

#[test]
fn optional_and_test_dependencies_do_not_propagate() {
    let s = setup(vec![]);
    s.reader.add(descriptor("root", "1", vec![dep("a", "1")]));
    s.reader.add(descriptor(
        "a",
        "1",
        vec![
            dep("optional-lib", "1").with_optional(true),
            dep("test-lib", "1").with_scope("test"),
            dep("runtime-lib", "1").with_scope("runtime"),
        ],
    ));

    let result = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("root", "1"), s.repositories.clone()),
        )
        .unwrap();
    let names: Vec<String> = result
        .graph
        .flatten()
        .iter()
        .map(|f| f.artifact.artifact_id().to_string())
        .collect();
    assert_eq!(names, vec!["a", "runtime-lib"]);
}

#[test]
fn root_artifact_with_explicit_dependencies() {
    let s = setup(vec![]);
    s.reader.add(descriptor("a", "1", vec![]));

    let result = s
        .collector
        .collect(
            &s.session,
            CollectRequest::for_artifact(
                artifact("app", "0.1"),
                vec![dep("a", "1")],
                s.repositories.clone(),
            ),
        )
        .unwrap();
    let flattened = result.graph.flatten();
    let names: Vec<&str> = flattened
        .iter()
        .map(|f| f.artifact.artifact_id())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a"]);
}

#[test]
fn bad_descriptor_is_recorded_and_cached() {
    let s = setup(vec![]);
    // A strict reader turns unknown coordinates into errors.
    let strict_reader = Arc::new(MapDescriptorReader::strict());
    strict_reader.add(descriptor(
        "root",
        "1",
        vec![dep("broken", "1"), dep("broken", "1")],
    ));
    let collector = DependencyCollector::new(
        strict_reader.clone(),
        Arc::new(StubRangeResolver { available: vec![] }),
    );

    let error = collector
        .collect(
            &s.session,
            CollectRequest::for_dependency(dep("root", "1"), s.repositories.clone()),
        )
        .unwrap_err();
    // One recorded error; the second occurrence hit the bad-descriptor
    // sentinel instead of re-reading.
    assert_eq!(error.result.errors.len(), 1);
    assert_eq!(strict_reader.reads(), 2);
}
