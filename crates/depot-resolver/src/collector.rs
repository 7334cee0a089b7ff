//! Transitive dependency collection.
//!
//! The collector walks descriptors depth-first, applying three pluggable
//! strategies at every level: a selector decides whether a dependency enters
//! the graph at all, a manager rewrites version/scope/exclusions from
//! dependency management, and a traverser decides whether to descend into a
//! dependency's own dependencies. Subtrees proven equivalent are shared
//! (fan-in), cycles become back-edges, and every artifact and dependency is
//! interned through the session data pool.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use depot_core::artifact::Artifact;
use depot_core::dependency::{Dependency, Exclusion};
use depot_core::events::{EventKind, RepositoryEvent};
use depot_core::repository::RemoteRepository;
use depot_core::session::Session;
use depot_core::version::{Version, VersionConstraint};
use depot_repo::remote::aggregate_repositories;
use depot_util::errors::{DepotError, DepotResult};

use crate::descriptor::{ArtifactDescriptor, DescriptorReader, DescriptorRequest};
use crate::graph::{DependencyCycle, DependencyGraph, GraphEdge, GraphNode};
use crate::pool::{repositories_key, CachedRange, DataPool, DescriptorEntry};
use crate::version::{VersionRangeRequest, VersionRangeResolver};

/// Results are capped at this many recorded errors; the rest are counted and
/// summarized in the log.
const MAX_ERRORS: usize = 100;

/// Context handed to strategies when deriving their child instance for one
/// node's dependencies.
pub struct CollectionContext<'a> {
    pub session: &'a Session,
    /// The dependency whose subtree is about to be processed.
    pub dependency: Option<&'a Dependency>,
    /// Dependency management contributed by the node's descriptor.
    pub managed_dependencies: &'a [Dependency],
}

/// Decides whether a dependency enters the graph.
pub trait DependencySelector: Send + Sync {
    fn select(&self, dependency: &Dependency) -> bool;

    fn derive_child(&self, context: &CollectionContext<'_>) -> Arc<dyn DependencySelector>;
}

/// Overrides a manager applies to one dependency.
#[derive(Debug, Clone, Default)]
pub struct DependencyManagement {
    pub version: Option<String>,
    pub scope: Option<String>,
    pub optional: Option<bool>,
    pub exclusions: Option<Vec<Exclusion>>,
}

/// Applies dependency management to transitively reached dependencies.
pub trait DependencyManager: Send + Sync {
    fn manage(&self, dependency: &Dependency) -> Option<DependencyManagement>;

    fn derive_child(&self, context: &CollectionContext<'_>) -> Arc<dyn DependencyManager>;
}

/// Decides whether to descend into a dependency's own dependencies.
pub trait DependencyTraverser: Send + Sync {
    fn traverse(&self, dependency: &Dependency) -> bool;

    fn derive_child(&self, context: &CollectionContext<'_>) -> Arc<dyn DependencyTraverser>;
}

/// Rewrites the collected graph (conflict resolution, scope selection).
pub trait GraphTransformer: Send + Sync {
    fn transform(&self, graph: &mut DependencyGraph) -> DepotResult<()>;
}

/// Drops dependencies of the named scopes, except for direct dependencies.
pub struct ScopeDependencySelector {
    excluded: Vec<String>,
    depth: u32,
}

impl ScopeDependencySelector {
    pub fn new(excluded: &[&str]) -> Self {
        Self {
            excluded: excluded.iter().map(|s| s.to_string()).collect(),
            depth: 0,
        }
    }

    /// The conventional exclusion set: test and provided dependencies do not
    /// propagate.
    pub fn transitive() -> Self {
        Self::new(&["test", "provided"])
    }
}

impl DependencySelector for ScopeDependencySelector {
    fn select(&self, dependency: &Dependency) -> bool {
        self.depth < 2 || !self.excluded.iter().any(|s| s == dependency.scope())
    }

    fn derive_child(&self, _context: &CollectionContext<'_>) -> Arc<dyn DependencySelector> {
        Arc::new(Self {
            excluded: self.excluded.clone(),
            depth: self.depth + 1,
        })
    }
}

/// Drops optional dependencies, except for direct dependencies.
pub struct OptionalDependencySelector {
    depth: u32,
}

impl OptionalDependencySelector {
    pub fn new() -> Self {
        Self { depth: 0 }
    }
}

impl Default for OptionalDependencySelector {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencySelector for OptionalDependencySelector {
    fn select(&self, dependency: &Dependency) -> bool {
        self.depth < 2 || !dependency.is_optional()
    }

    fn derive_child(&self, _context: &CollectionContext<'_>) -> Arc<dyn DependencySelector> {
        Arc::new(Self {
            depth: self.depth + 1,
        })
    }
}

/// Honors the exclusion sets declared on the dependency path.
pub struct ExclusionDependencySelector {
    exclusions: Vec<Exclusion>,
}

impl ExclusionDependencySelector {
    pub fn new(exclusions: Vec<Exclusion>) -> Self {
        Self { exclusions }
    }
}

impl DependencySelector for ExclusionDependencySelector {
    fn select(&self, dependency: &Dependency) -> bool {
        !self
            .exclusions
            .iter()
            .any(|e| e.matches(dependency.artifact()))
    }

    fn derive_child(&self, context: &CollectionContext<'_>) -> Arc<dyn DependencySelector> {
        let mut exclusions = self.exclusions.clone();
        if let Some(dependency) = context.dependency {
            for exclusion in dependency.exclusions() {
                if !exclusions.contains(exclusion) {
                    exclusions.push(exclusion.clone());
                }
            }
        }
        Arc::new(Self { exclusions })
    }
}

/// Conjunction of selectors: a dependency must pass every one.
pub struct AndDependencySelector {
    selectors: Vec<Arc<dyn DependencySelector>>,
}

impl AndDependencySelector {
    pub fn new(selectors: Vec<Arc<dyn DependencySelector>>) -> Self {
        Self { selectors }
    }
}

impl DependencySelector for AndDependencySelector {
    fn select(&self, dependency: &Dependency) -> bool {
        self.selectors.iter().all(|s| s.select(dependency))
    }

    fn derive_child(&self, context: &CollectionContext<'_>) -> Arc<dyn DependencySelector> {
        Arc::new(Self {
            selectors: self
                .selectors
                .iter()
                .map(|s| s.derive_child(context))
                .collect(),
        })
    }
}

#[derive(Clone)]
struct ManagedInfo {
    version: Option<String>,
    scope: Option<String>,
    exclusions: Vec<Exclusion>,
}

/// Management gathered on the path from the root, applied from depth two
/// down: a node's own declared dependencies keep their versions, its
/// grandchildren onward get overridden.
pub struct TransitiveDependencyManager {
    depth: u32,
    managed: HashMap<String, ManagedInfo>,
}

impl TransitiveDependencyManager {
    pub fn new() -> Self {
        Self {
            depth: 0,
            managed: HashMap::new(),
        }
    }
}

impl Default for TransitiveDependencyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyManager for TransitiveDependencyManager {
    fn manage(&self, dependency: &Dependency) -> Option<DependencyManagement> {
        if self.depth < 2 {
            return None;
        }
        let info = self.managed.get(&dependency.artifact().versionless_id())?;
        let mut management = DependencyManagement::default();
        if let Some(version) = &info.version {
            if version != dependency.artifact().version() {
                management.version = Some(version.clone());
            }
        }
        if let Some(scope) = &info.scope {
            if scope != dependency.scope() {
                management.scope = Some(scope.clone());
            }
        }
        if !info.exclusions.is_empty() {
            let mut exclusions = dependency.exclusions().to_vec();
            for exclusion in &info.exclusions {
                if !exclusions.contains(exclusion) {
                    exclusions.push(exclusion.clone());
                }
            }
            management.exclusions = Some(exclusions);
        }
        if management.version.is_none()
            && management.scope.is_none()
            && management.exclusions.is_none()
        {
            None
        } else {
            Some(management)
        }
    }

    fn derive_child(&self, context: &CollectionContext<'_>) -> Arc<dyn DependencyManager> {
        let mut managed = self.managed.clone();
        for declaration in context.managed_dependencies {
            let key = declaration.artifact().versionless_id();
            // Management closer to the root wins.
            managed.entry(key).or_insert_with(|| ManagedInfo {
                version: Some(declaration.artifact().version().to_string())
                    .filter(|v| !v.is_empty()),
                scope: Some(declaration.scope().to_string()).filter(|s| !s.is_empty()),
                exclusions: declaration.exclusions().to_vec(),
            });
        }
        Arc::new(Self {
            depth: self.depth + 1,
            managed,
        })
    }
}

/// Descends everywhere except into unhosted (caller-supplied) artifacts.
pub struct FatArtifactTraverser;

impl DependencyTraverser for FatArtifactTraverser {
    fn traverse(&self, dependency: &Dependency) -> bool {
        !dependency.artifact().is_unhosted()
    }

    fn derive_child(&self, _context: &CollectionContext<'_>) -> Arc<dyn DependencyTraverser> {
        Arc::new(FatArtifactTraverser)
    }
}

/// What to collect: a root dependency, or a root artifact with explicit
/// dependencies.
pub struct CollectRequest {
    pub root: Option<Dependency>,
    pub root_artifact: Option<Artifact>,
    pub dependencies: Vec<Dependency>,
    pub managed_dependencies: Vec<Dependency>,
    pub repositories: Vec<RemoteRepository>,
    pub context: String,
    pub selector: Option<Arc<dyn DependencySelector>>,
    pub manager: Option<Arc<dyn DependencyManager>>,
    pub traverser: Option<Arc<dyn DependencyTraverser>>,
    pub transformer: Option<Arc<dyn GraphTransformer>>,
}

impl CollectRequest {
    pub fn for_dependency(root: Dependency, repositories: Vec<RemoteRepository>) -> Self {
        Self {
            root: Some(root),
            root_artifact: None,
            dependencies: Vec::new(),
            managed_dependencies: Vec::new(),
            repositories,
            context: "default".to_string(),
            selector: None,
            manager: None,
            traverser: None,
            transformer: None,
        }
    }

    pub fn for_artifact(
        root_artifact: Artifact,
        dependencies: Vec<Dependency>,
        repositories: Vec<RemoteRepository>,
    ) -> Self {
        Self {
            root: None,
            root_artifact: Some(root_artifact),
            dependencies,
            managed_dependencies: Vec::new(),
            repositories,
            context: "default".to_string(),
            selector: None,
            manager: None,
            traverser: None,
            transformer: None,
        }
    }
}

/// The collected graph plus everything non-fatal that went wrong.
#[derive(Debug, Default)]
pub struct CollectResult {
    pub graph: DependencyGraph,
    pub cycles: Vec<DependencyCycle>,
    pub errors: Vec<DepotError>,
}

/// Collection recorded errors; the partial graph is still available.
#[derive(Debug, Error, Diagnostic)]
#[error("dependency collection failed with {} error(s)", .result.errors.len())]
pub struct CollectError {
    pub result: CollectResult,
}

struct StackEntry {
    node: petgraph::graph::NodeIndex,
    dependency: Option<Dependency>,
}

struct Args<'a> {
    session: &'a Session,
    pool: Arc<DataPool>,
    context: String,
    graph: DependencyGraph,
    cycles: Vec<DependencyCycle>,
    errors: Vec<DepotError>,
    suppressed: usize,
    edge_stack: Vec<StackEntry>,
    node_cache: HashMap<String, petgraph::graph::NodeIndex>,
}

impl Args<'_> {
    fn record(&mut self, error: DepotError) {
        if self.errors.len() < MAX_ERRORS {
            self.errors.push(error);
        } else {
            self.suppressed += 1;
        }
    }
}

/// Builds the transitive dependency graph.
pub struct DependencyCollector {
    reader: Arc<dyn DescriptorReader>,
    ranges: Arc<dyn VersionRangeResolver>,
}

impl DependencyCollector {
    pub fn new(reader: Arc<dyn DescriptorReader>, ranges: Arc<dyn VersionRangeResolver>) -> Self {
        Self { reader, ranges }
    }

    pub fn collect(
        &self,
        session: &Session,
        request: CollectRequest,
    ) -> Result<CollectResult, CollectError> {
        let mut args = Args {
            session,
            pool: DataPool::from_session(session),
            context: request.context.clone(),
            graph: DependencyGraph::new(),
            cycles: Vec::new(),
            errors: Vec::new(),
            suppressed: 0,
            edge_stack: Vec::new(),
            node_cache: HashMap::new(),
        };

        if let Err(error) = session.validate() {
            args.record(error);
            return Err(CollectError {
                result: finish(args),
            });
        }

        let selector = request.selector.clone().unwrap_or_else(|| {
            Arc::new(AndDependencySelector::new(vec![
                Arc::new(ScopeDependencySelector::transitive()),
                Arc::new(OptionalDependencySelector::new()),
                Arc::new(ExclusionDependencySelector::new(Vec::new())),
            ]))
        });
        let manager = request
            .manager
            .clone()
            .unwrap_or_else(|| Arc::new(TransitiveDependencyManager::new()));
        let traverser = request
            .traverser
            .clone()
            .unwrap_or_else(|| Arc::new(FatArtifactTraverser));

        // Resolve the root and its descriptor.
        let (root_artifact, root_dependency) = match (&request.root, &request.root_artifact) {
            (Some(root), _) => {
                let artifact = root.artifact().clone();
                let constraint = VersionConstraint::parse(artifact.version());
                if constraint.is_range() {
                    match self.resolve_versions(&mut args, &artifact, &request.repositories) {
                        Ok((versions, _)) => match versions.last() {
                            // The highest matching version wins for the root.
                            Some(highest) => {
                                let artifact = artifact.with_version(highest.as_str());
                                (artifact.clone(), Some(root.with_artifact(artifact)))
                            }
                            None => {
                                args.record(DepotError::VersionRangeResolution {
                                    coordinate: artifact.to_string(),
                                    range: constraint.to_string(),
                                });
                                return Err(CollectError {
                                    result: finish(args),
                                });
                            }
                        },
                        Err(error) => {
                            args.record(error);
                            return Err(CollectError {
                                result: finish(args),
                            });
                        }
                    }
                } else {
                    (artifact, Some(root.clone()))
                }
            }
            (None, Some(artifact)) => (artifact.clone(), None),
            (None, None) => {
                args.record(DepotError::Invalid {
                    message: "collect request has neither root dependency nor root artifact"
                        .to_string(),
                });
                return Err(CollectError {
                    result: finish(args),
                });
            }
        };

        let descriptor = self
            .read_descriptor(&mut args, &root_artifact, &request.repositories)
            .unwrap_or_else(|| Arc::new(ArtifactDescriptor::lacking(root_artifact.clone())));
        let root_artifact = descriptor
            .artifact
            .clone()
            .unwrap_or_else(|| root_artifact.clone());
        let root_dependency = root_dependency.map(|d| d.with_artifact(root_artifact.clone()));

        let repositories = if session.ignore_descriptor_repositories
            || descriptor.repositories.is_empty()
        {
            request.repositories.clone()
        } else {
            aggregate_repositories(
                session,
                request.repositories.clone(),
                descriptor.repositories.clone(),
                true,
            )
        };
        let dependencies = merge_dependencies(&request.dependencies, &descriptor.dependencies);
        let managed =
            merge_dependencies(&request.managed_dependencies, &descriptor.managed_dependencies);

        let root_node = args
            .graph
            .add_node(GraphNode::new(root_artifact.clone(), repositories.clone()));
        args.graph.set_root(root_node);

        let traverse = root_dependency
            .as_ref()
            .map(|d| traverser.traverse(d))
            .unwrap_or(true);
        if traverse && !dependencies.is_empty() {
            let context = CollectionContext {
                session,
                dependency: root_dependency.as_ref(),
                managed_dependencies: &managed,
            };
            let child_selector = selector.derive_child(&context);
            let child_manager = manager.derive_child(&context);
            let child_traverser = traverser.derive_child(&context);
            args.edge_stack.push(StackEntry {
                node: root_node,
                dependency: root_dependency.clone(),
            });
            self.process(
                &mut args,
                &dependencies,
                &repositories,
                child_selector,
                child_manager,
                child_traverser,
            );
            args.edge_stack.pop();
        }

        if let Some(transformer) = &request.transformer {
            if let Err(error) = transformer.transform(&mut args.graph) {
                args.record(error);
            }
        }

        let result = finish(args);
        if result.errors.is_empty() {
            Ok(result)
        } else {
            Err(CollectError { result })
        }
    }

    fn process(
        &self,
        args: &mut Args<'_>,
        dependencies: &[Dependency],
        repositories: &[RemoteRepository],
        selector: Arc<dyn DependencySelector>,
        manager: Arc<dyn DependencyManager>,
        traverser: Arc<dyn DependencyTraverser>,
    ) {
        'dependencies: for declared in dependencies {
            if !selector.select(declared) {
                continue;
            }

            let mut this_dependency = declared.clone();
            let mut disable_version_management = false;
            let mut relocations: Vec<Artifact> = Vec::new();

            'this_dependency: loop {
                // Dependency management, remembering the pre-managed state.
                let mut premanaged_version = None;
                let mut premanaged_scope = None;
                let mut dependency = this_dependency.clone();
                if let Some(management) = manager.manage(&dependency) {
                    if let Some(version) = management.version {
                        if !disable_version_management {
                            premanaged_version =
                                Some(dependency.artifact().version().to_string());
                            dependency = dependency
                                .with_artifact(dependency.artifact().with_version(&version));
                        }
                    }
                    if let Some(scope) = management.scope {
                        premanaged_scope = Some(dependency.scope().to_string());
                        dependency = dependency.with_scope(&scope);
                    }
                    if let Some(optional) = management.optional {
                        dependency = dependency.with_optional(optional);
                    }
                    if let Some(exclusions) = management.exclusions {
                        dependency = dependency.with_exclusions(exclusions);
                    }
                }

                let (versions, constraint) =
                    match self.resolve_versions(args, dependency.artifact(), repositories) {
                        Ok(resolved) => resolved,
                        Err(error) => {
                            args.record(error);
                            continue 'dependencies;
                        }
                    };
                if versions.is_empty() {
                    args.record(DepotError::VersionRangeResolution {
                        coordinate: dependency.artifact().to_string(),
                        range: constraint.to_string(),
                    });
                    continue 'dependencies;
                }

                for version in &versions {
                    let artifact = dependency.artifact().with_version(version.as_str());

                    let descriptor = match self.read_descriptor(args, &artifact, repositories) {
                        Some(descriptor) => descriptor,
                        None => continue,
                    };
                    let described = descriptor
                        .artifact
                        .clone()
                        .unwrap_or_else(|| artifact.clone());

                    if !descriptor.relocations.is_empty() {
                        // Version management is suppressed after a relocation
                        // that kept the coordinate's group and artifact id.
                        disable_version_management = described.group_id() == artifact.group_id()
                            && described.artifact_id() == artifact.artifact_id();
                        relocations = descriptor.relocations.clone();
                        this_dependency = this_dependency.with_artifact(described);
                        continue 'this_dependency;
                    }
                    let candidate = dependency.with_artifact(described);

                    // An ancestor with the same coordinate closes a cycle.
                    let cycle_entry = {
                        let graph = &args.graph;
                        args.edge_stack.iter().position(|entry| {
                            same_cycle_key(&graph.node(entry.node).artifact, candidate.artifact())
                        })
                    };
                    if let Some(position) = cycle_entry {
                        let target = args.edge_stack[position].node;
                        let parent = args
                            .edge_stack
                            .last()
                            .expect("processing below the root")
                            .node;
                        args.graph.add_edge(
                            parent,
                            target,
                            GraphEdge {
                                dependency: Some(candidate.clone()),
                                context: args.context.clone(),
                                premanaged_scope: premanaged_scope.clone(),
                                premanaged_version: premanaged_version.clone(),
                                relocations: relocations.clone(),
                                constraint: Some(constraint.clone()),
                                selected_version: Some(version.clone()),
                                data: BTreeMap::new(),
                            },
                        );
                        let prefix: Vec<Dependency> = args.edge_stack[..position]
                            .iter()
                            .filter_map(|e| e.dependency.clone())
                            .collect();
                        let mut cycle: Vec<Dependency> = args.edge_stack[position..]
                            .iter()
                            .filter_map(|e| e.dependency.clone())
                            .collect();
                        cycle.push(candidate.clone());
                        args.cycles.push(DependencyCycle { prefix, cycle });
                        continue;
                    }

                    let interned_artifact =
                        (*args.pool.intern_artifact(candidate.artifact().clone())).clone();
                    let candidate = (*args
                        .pool
                        .intern_dependency(candidate.with_artifact(interned_artifact)))
                    .clone();

                    let child_repositories = if args.session.ignore_descriptor_repositories
                        || descriptor.repositories.is_empty()
                    {
                        repositories.to_vec()
                    } else {
                        aggregate_repositories(
                            args.session,
                            repositories.to_vec(),
                            descriptor.repositories.clone(),
                            true,
                        )
                    };
                    let recurse =
                        traverser.traverse(&candidate) && !descriptor.dependencies.is_empty();
                    let node_repositories: &[RemoteRepository] = if recurse {
                        &child_repositories
                    } else {
                        repositories
                    };

                    let edge = GraphEdge {
                        dependency: Some(candidate.clone()),
                        context: args.context.clone(),
                        premanaged_scope: premanaged_scope.clone(),
                        premanaged_version: premanaged_version.clone(),
                        relocations: relocations.clone(),
                        constraint: Some(constraint.clone()),
                        selected_version: Some(version.clone()),
                        data: BTreeMap::new(),
                    };
                    let parent = args
                        .edge_stack
                        .last()
                        .expect("processing below the root")
                        .node;

                    let key = node_key(&candidate, node_repositories, recurse);
                    if let Some(&shared) = args.node_cache.get(&key) {
                        // Reuse the already-built subtree; narrow its
                        // repository set when ours is the smaller one.
                        let node = args.graph.node_mut(shared);
                        if node.repositories.len() > node_repositories.len()
                            && contains_all(&node.repositories, node_repositories)
                        {
                            node.repositories = node_repositories.to_vec();
                        }
                        args.graph.add_edge(parent, shared, edge);
                        continue;
                    }

                    let child = args.graph.add_node(GraphNode::new(
                        candidate.artifact().clone(),
                        node_repositories.to_vec(),
                    ));
                    args.graph.add_edge(parent, child, edge);
                    args.node_cache.insert(key, child);

                    if recurse {
                        let context = CollectionContext {
                            session: args.session,
                            dependency: Some(&candidate),
                            managed_dependencies: &descriptor.managed_dependencies,
                        };
                        let child_selector = selector.derive_child(&context);
                        let child_manager = manager.derive_child(&context);
                        let child_traverser = traverser.derive_child(&context);
                        args.edge_stack.push(StackEntry {
                            node: child,
                            dependency: Some(candidate.clone()),
                        });
                        self.process(
                            args,
                            &descriptor.dependencies,
                            &child_repositories,
                            child_selector,
                            child_manager,
                            child_traverser,
                        );
                        args.edge_stack.pop();
                    }
                }

                break 'this_dependency;
            }
        }
    }

    /// Resolve candidate versions for a (possibly ranged) dependency,
    /// caching range lookups by `(artifact, repositories)`.
    fn resolve_versions(
        &self,
        args: &mut Args<'_>,
        artifact: &Artifact,
        repositories: &[RemoteRepository],
    ) -> DepotResult<(Vec<Version>, VersionConstraint)> {
        let constraint = VersionConstraint::parse(artifact.version());
        if !constraint.is_range() {
            return Ok((vec![Version::parse(artifact.version())], constraint));
        }
        if let Some(cached) = args.pool.range(artifact, repositories) {
            return Ok((cached.versions.clone(), constraint));
        }
        let request = VersionRangeRequest {
            artifact: artifact.clone(),
            repositories: repositories.to_vec(),
            context: args.context.clone(),
        };
        let result = self.ranges.resolve_range(args.session, &request)?;
        let origins = result
            .sources
            .iter()
            .filter_map(|(version, source)| match source {
                crate::version::VersionSource::Remote(repository) => {
                    Some((version.clone(), repository.id.clone()))
                }
                crate::version::VersionSource::Local => None,
            })
            .collect();
        args.pool.put_range(
            artifact,
            repositories,
            Arc::new(CachedRange {
                versions: result.versions.clone(),
                origins,
            }),
        );
        Ok((result.versions, result.constraint))
    }

    /// Descriptor lookup through the pool, with the bad-descriptor sentinel
    /// short-circuiting known failures.
    fn read_descriptor(
        &self,
        args: &mut Args<'_>,
        artifact: &Artifact,
        repositories: &[RemoteRepository],
    ) -> Option<Arc<ArtifactDescriptor>> {
        if artifact.is_unhosted() {
            return Some(Arc::new(ArtifactDescriptor::lacking(artifact.clone())));
        }
        match args.pool.descriptor(artifact) {
            Some(DescriptorEntry::Good(descriptor)) => Some(descriptor),
            Some(DescriptorEntry::Bad) => None,
            None => {
                let request = DescriptorRequest {
                    artifact: artifact.clone(),
                    repositories: repositories.to_vec(),
                    context: args.context.clone(),
                };
                match self.reader.read_descriptor(args.session, &request) {
                    Ok(mut descriptor) => {
                        if descriptor.artifact.is_none() {
                            descriptor.artifact = Some(artifact.clone());
                        }
                        let descriptor = Arc::new(descriptor);
                        args.pool
                            .put_descriptor(artifact, DescriptorEntry::Good(descriptor.clone()));
                        Some(descriptor)
                    }
                    Err(error) => {
                        let kind = if error.is_not_found() {
                            EventKind::ArtifactDescriptorMissing
                        } else {
                            EventKind::ArtifactDescriptorInvalid
                        };
                        args.session.emit(
                            RepositoryEvent::artifact(kind, artifact, &args.context)
                                .with_error(error.clone()),
                        );
                        args.record(error);
                        args.pool.put_descriptor(artifact, DescriptorEntry::Bad);
                        None
                    }
                }
            }
        }
    }
}

fn finish(args: Args<'_>) -> CollectResult {
    if args.suppressed > 0 {
        tracing::warn!(
            "suppressed {} further collection error(s) beyond the cap of {MAX_ERRORS}",
            args.suppressed
        );
    }
    CollectResult {
        graph: args.graph,
        cycles: args.cycles,
        errors: args.errors,
    }
}

/// Cycle identity: `(group, artifact, base version, extension, classifier)`.
fn same_cycle_key(a: &Artifact, b: &Artifact) -> bool {
    a.same_versionless(b) && a.base_version() == b.base_version()
}

/// Graph-sharing key: subtrees are reused only for the same coordinate,
/// repository set, exclusion context, and traversal decision.
fn node_key(dependency: &Dependency, repositories: &[RemoteRepository], recurse: bool) -> String {
    let mut exclusions: Vec<String> = dependency
        .exclusions()
        .iter()
        .map(|e| format!("{}:{}", e.group_id, e.artifact_id))
        .collect();
    exclusions.sort();
    format!(
        "{}|{}|{}|{}",
        dependency.artifact().id(),
        repositories_key(repositories),
        recurse,
        exclusions.join(",")
    )
}

fn contains_all(outer: &[RemoteRepository], inner: &[RemoteRepository]) -> bool {
    inner
        .iter()
        .all(|repository| outer.iter().any(|other| other.id == repository.id))
}

/// Merge dependency lists, dominant first, deduplicated by versionless
/// coordinate.
fn merge_dependencies(dominant: &[Dependency], recessive: &[Dependency]) -> Vec<Dependency> {
    let mut merged = dominant.to_vec();
    for dependency in recessive {
        let key = dependency.artifact().versionless_id();
        if !merged
            .iter()
            .any(|existing| existing.artifact().versionless_id() == key)
        {
            merged.push(dependency.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str, version: &str) -> Artifact {
        Artifact::new("org.test", name, "jar", version)
    }

    fn dep(name: &str, version: &str) -> Dependency {
        Dependency::new(artifact(name, version), "compile")
    }

    #[test]
    fn scope_selector_spares_direct_dependencies() {
        let session_dir = tempfile::TempDir::new().unwrap();
        let session = Session::new(depot_core::repository::LocalRepository::new(session_dir.path()));
        let selector = ScopeDependencySelector::transitive();
        let test_dep = dep("a", "1").with_scope("test");

        // Depth 0 and 1: everything passes.
        assert!(selector.select(&test_dep));
        let context = CollectionContext {
            session: &session,
            dependency: None,
            managed_dependencies: &[],
        };
        let direct = selector.derive_child(&context);
        assert!(direct.select(&test_dep));
        // Depth 2: test scope is dropped.
        let transitive = direct.derive_child(&context);
        assert!(!transitive.select(&test_dep));
        assert!(transitive.select(&dep("a", "1")));
    }

    #[test]
    fn optional_selector_drops_transitive_optionals() {
        let session_dir = tempfile::TempDir::new().unwrap();
        let session = Session::new(depot_core::repository::LocalRepository::new(session_dir.path()));
        let context = CollectionContext {
            session: &session,
            dependency: None,
            managed_dependencies: &[],
        };
        let optional = dep("a", "1").with_optional(true);
        let selector = OptionalDependencySelector::new();
        let transitive = selector.derive_child(&context).derive_child(&context);
        assert!(selector.select(&optional));
        assert!(!transitive.select(&optional));
    }

    #[test]
    fn exclusion_selector_accumulates_path_exclusions() {
        let session_dir = tempfile::TempDir::new().unwrap();
        let session = Session::new(depot_core::repository::LocalRepository::new(session_dir.path()));
        let selector = ExclusionDependencySelector::new(Vec::new());
        let parent = dep("parent", "1").with_exclusions(vec![Exclusion::new("org.test", "banned")]);
        let context = CollectionContext {
            session: &session,
            dependency: Some(&parent),
            managed_dependencies: &[],
        };
        let child = selector.derive_child(&context);
        assert!(!child.select(&dep("banned", "1")));
        assert!(child.select(&dep("fine", "1")));
    }

    #[test]
    fn manager_applies_from_depth_two() {
        let session_dir = tempfile::TempDir::new().unwrap();
        let session = Session::new(depot_core::repository::LocalRepository::new(session_dir.path()));
        let managed_declarations = vec![dep("a", "9.9")];
        let context = CollectionContext {
            session: &session,
            dependency: None,
            managed_dependencies: &managed_declarations,
        };
        let manager = TransitiveDependencyManager::new();
        let level1 = manager.derive_child(&context);
        let no_more = vec![];
        let context2 = CollectionContext {
            session: &session,
            dependency: None,
            managed_dependencies: &no_more,
        };
        let level2 = level1.derive_child(&context2);

        let target = dep("a", "1.0");
        assert!(level1.manage(&target).is_none());
        let management = level2.manage(&target).unwrap();
        assert_eq!(management.version.as_deref(), Some("9.9"));
    }

    #[test]
    fn merge_dependencies_is_dominant_first() {
        let dominant = vec![dep("a", "1.0")];
        let recessive = vec![dep("a", "2.0"), dep("b", "1.0")];
        let merged = merge_dependencies(&dominant, &recessive);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].artifact().version(), "1.0");
        assert_eq!(merged[1].artifact().artifact_id(), "b");
    }

    #[test]
    fn cycle_key_uses_base_version() {
        let a = artifact("a", "1.0-20240101.101010-7");
        let b = artifact("a", "1.0-SNAPSHOT");
        assert!(same_cycle_key(&a, &b));
        let c = artifact("a", "2.0");
        assert!(!same_cycle_key(&a, &c));
    }

    #[test]
    fn fat_traverser_skips_unhosted() {
        let traverser = FatArtifactTraverser;
        assert!(traverser.traverse(&dep("a", "1")));
        let unhosted = Dependency::new(
            artifact("a", "1").with_local_path(std::path::Path::new("/tmp/a.jar")),
            "compile",
        );
        assert!(!traverser.traverse(&unhosted));
    }
}
