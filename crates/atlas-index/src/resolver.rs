//! Second-pass relationship resolution.
//!
//! Runs only once every file node of a scan is known: edges reference
//! targets that may be extracted after their referrers. Each step is
//! independent and re-runnable; the full output replaces the stored
//! relationship set wholesale. Imports that should resolve but do not are
//! kept as flagged edges to placeholder targets instead of being dropped.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use atlas_config::ResolutionConfig;

use crate::embeddings::cosine_similarity;
use crate::graph::{
    external_id, pattern_id, unresolved_id, FileKind, FileNode, ImportKind, Relationship,
    RelationshipType,
};
use crate::patterns::{PatternDetector, INTERFACE_IMPLEMENTATION, SINGLETON};

/// One chunk vector handed to similarity resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkVector {
    pub path: String,
    pub chunk_hash: String,
    pub provider: String,
    pub vector: Vec<f32>,
}

/// A class reference that matched no declaration in the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedType {
    pub path: String,
    pub name: String,
}

/// Output of one resolution pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub relationships: Vec<Relationship>,
    /// Extends/implements names with no matching declaration; recorded
    /// but not edged.
    pub unresolved_types: Vec<UnresolvedType>,
}

/// Package manifests that configure the files around them.
const MANIFEST_FILES: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "go.mod",
    "tsconfig.json",
];

/// Extensions probed when resolving an extension-less import specifier.
const PROBE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "rs", "go"];

/// Index barrels probed when a specifier names a directory.
const INDEX_FILES: &[&str] = &["index.ts", "index.tsx", "index.js", "index.jsx", "mod.rs", "__init__.py"];

/// Computes the full relationship set from the scan's node set.
pub struct Resolver {
    config: ResolutionConfig,
    detector: PatternDetector,
}

/// Lookup tables shared by the resolution steps.
struct NodeIndex<'n> {
    nodes: &'n [FileNode],
    paths: HashSet<&'n str>,
    /// Function or method name -> declaring file paths.
    functions: HashMap<&'n str, Vec<&'n str>>,
    /// Class name -> (declaring file path, is_interface).
    classes: HashMap<&'n str, Vec<(&'n str, bool)>>,
    /// File stem (name without extension) -> paths.
    stems: HashMap<String, Vec<&'n str>>,
}

impl<'n> NodeIndex<'n> {
    fn build(nodes: &'n [FileNode]) -> Self {
        let mut index = Self {
            nodes,
            paths: HashSet::new(),
            functions: HashMap::new(),
            classes: HashMap::new(),
            stems: HashMap::new(),
        };

        for node in nodes {
            index.paths.insert(node.path.as_str());
            for name in node.declared_function_names() {
                let paths = index.functions.entry(name).or_default();
                if !paths.contains(&node.path.as_str()) {
                    paths.push(node.path.as_str());
                }
            }
            for class in &node.classes {
                index
                    .classes
                    .entry(class.name.as_str())
                    .or_default()
                    .push((node.path.as_str(), class.is_interface));
            }
            index
                .stems
                .entry(stem_of(&node.path))
                .or_default()
                .push(node.path.as_str());
        }

        index
    }

    fn node(&self, path: &str) -> Option<&'n FileNode> {
        self.nodes.iter().find(|n| n.path == path)
    }
}

impl Resolver {
    pub fn new(config: ResolutionConfig) -> Self {
        let detector = PatternDetector::new(&config);
        Self { config, detector }
    }

    /// Run every resolution step over the complete node set and return
    /// the deduplicated, deterministically ordered relationship set.
    pub fn resolve(&self, nodes: &[FileNode], vectors: &[ChunkVector]) -> ResolutionReport {
        let index = NodeIndex::build(nodes);
        let mut report = ResolutionReport::default();
        let mut edges = Vec::new();

        edges.extend(self.resolve_imports(nodes, &index));
        edges.extend(self.resolve_configuration(nodes));
        edges.extend(self.resolve_structure(nodes, &index, &mut report.unresolved_types));
        edges.extend(self.resolve_calls(nodes, &index));
        edges.extend(self.resolve_tests(nodes, &index));
        edges.extend(self.resolve_patterns(nodes, &index));
        edges.extend(self.resolve_documentation(nodes, &index));
        edges.extend(self.resolve_similarity(vectors));

        // Scanning the same project twice must yield an identical edge
        // set: dedup on the stable key, then order deterministically.
        let mut unique: BTreeMap<(String, String, &'static str, String), Relationship> =
            BTreeMap::new();
        for edge in edges {
            unique.entry(edge.dedup_key()).or_insert(edge);
        }
        report.relationships = unique.into_values().collect();

        debug!(
            "Resolved {} relationships over {} nodes",
            report.relationships.len(),
            nodes.len()
        );
        report
    }

    // -----------------------------------------------------------------
    // Imports
    // -----------------------------------------------------------------

    fn resolve_imports(&self, nodes: &[FileNode], index: &NodeIndex) -> Vec<Relationship> {
        let mut edges = Vec::new();

        for node in nodes {
            for import in &node.imports {
                let specifier = self.apply_aliases(&import.specifier);

                let target = match resolve_specifier(&specifier, node, index) {
                    SpecifierTarget::Project(path) => path,
                    SpecifierTarget::External(package) => {
                        edges.push(
                            Relationship::new(&node.path, external_id(&package), RelationshipType::DependsOn)
                                .with_property("external", true)
                                .with_property("specifier", import.specifier.clone()),
                        );
                        continue;
                    }
                    SpecifierTarget::Unresolved => {
                        edges.push(
                            Relationship::new(
                                &node.path,
                                unresolved_id(&specifier),
                                RelationshipType::DependsOn,
                            )
                            .with_property("specifier", import.specifier.clone())
                            .flagged_unresolved(),
                        );
                        continue;
                    }
                };

                let mut edge =
                    Relationship::new(&node.path, &target, RelationshipType::DependsOn)
                        .with_property("line", import.line as u64);
                if !import.symbols.is_empty() {
                    edge = edge.with_property("symbols", import.symbols.clone());
                }
                if import.kind == ImportKind::Reference {
                    edge = edge.with_property("heuristic", true);
                }
                edges.push(edge);

                // Imported symbols that name a class in the target are a
                // type usage on top of the file dependency.
                if let Some(target_node) = index.node(&target) {
                    for symbol in &import.symbols {
                        if target_node.classes.iter().any(|c| &c.name == symbol) {
                            edges.push(
                                Relationship::new(&node.path, &target, RelationshipType::Uses)
                                    .with_property("symbol", symbol.clone()),
                            );
                        }
                    }
                }
            }
        }

        edges
    }

    fn apply_aliases(&self, specifier: &str) -> String {
        for (prefix, replacement) in &self.config.alias_prefixes {
            if let Some(rest) = specifier.strip_prefix(prefix.as_str()) {
                return format!("{replacement}{rest}");
            }
        }
        specifier.to_string()
    }

    // -----------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------

    /// The nearest package manifest above a file configures it.
    fn resolve_configuration(&self, nodes: &[FileNode]) -> Vec<Relationship> {
        let manifests: Vec<&FileNode> = nodes
            .iter()
            .filter(|n| {
                n.kind == FileKind::Config
                    && MANIFEST_FILES
                        .iter()
                        .any(|m| n.path.rsplit('/').next() == Some(*m))
            })
            .collect();
        if manifests.is_empty() {
            return Vec::new();
        }

        let mut edges = Vec::new();
        for node in nodes {
            if node.kind == FileKind::Config {
                continue;
            }
            // Longest manifest directory prefix wins.
            let best = manifests
                .iter()
                .filter(|m| {
                    let dir = dirname(&m.path);
                    dir.is_empty() || node.path.starts_with(&format!("{dir}/"))
                })
                .max_by_key(|m| dirname(&m.path).len());

            if let Some(manifest) = best {
                edges.push(Relationship::new(
                    &manifest.path,
                    &node.path,
                    RelationshipType::Configures,
                ));
                edges.push(Relationship::new(
                    &node.path,
                    &manifest.path,
                    RelationshipType::ConfiguredBy,
                ));
            }
        }
        edges
    }

    // -----------------------------------------------------------------
    // Structure (extends / implements / overrides)
    // -----------------------------------------------------------------

    fn resolve_structure(
        &self,
        nodes: &[FileNode],
        index: &NodeIndex,
        unresolved: &mut Vec<UnresolvedType>,
    ) -> Vec<Relationship> {
        let mut edges = Vec::new();

        for node in nodes {
            for class in &node.classes {
                if let Some(parent) = &class.extends {
                    self.edge_type_reference(
                        node,
                        &class.name,
                        parent,
                        RelationshipType::Extends,
                        index,
                        unresolved,
                        &mut edges,
                    );

                    // Methods redefined from the parent class.
                    for (parent_path, _) in
                        index.classes.get(parent.as_str()).into_iter().flatten()
                    {
                        if *parent_path == node.path {
                            continue;
                        }
                        if let Some(parent_node) = index.node(parent_path) {
                            if let Some(parent_class) =
                                parent_node.classes.iter().find(|c| &c.name == parent)
                            {
                                for method in &class.methods {
                                    if parent_class.methods.iter().any(|m| m.name == method.name)
                                    {
                                        edges.push(
                                            Relationship::new(
                                                &node.path,
                                                *parent_path,
                                                RelationshipType::Overrides,
                                            )
                                            .with_property("method", method.name.clone()),
                                        );
                                    }
                                }
                            }
                        }
                    }
                }

                for interface in &class.implements {
                    self.edge_type_reference(
                        node,
                        &class.name,
                        interface,
                        RelationshipType::Implements,
                        index,
                        unresolved,
                        &mut edges,
                    );
                }
            }
        }

        edges
    }

    #[allow(clippy::too_many_arguments)]
    fn edge_type_reference(
        &self,
        node: &FileNode,
        class_name: &str,
        referenced: &str,
        kind: RelationshipType,
        index: &NodeIndex,
        unresolved: &mut Vec<UnresolvedType>,
        edges: &mut Vec<Relationship>,
    ) {
        let candidates: Vec<&str> = index
            .classes
            .get(referenced)
            .map(|c| c.iter().map(|(p, _)| *p).collect())
            .unwrap_or_default();

        if candidates.is_empty() {
            // No declaration in the project: recorded, not edged.
            unresolved.push(UnresolvedType {
                path: node.path.clone(),
                name: referenced.to_string(),
            });
            return;
        }

        let ambiguous = candidates.len() > 1;
        for target in candidates {
            if target == node.path {
                continue;
            }
            let confidence = if ambiguous {
                self.config.ambiguous_call_confidence
            } else {
                self.config.call_confidence
            };
            edges.push(
                Relationship::new(&node.path, target, kind)
                    .with_property("class", class_name.to_string())
                    .with_property("target_class", referenced.to_string())
                    .with_property("confidence", confidence),
            );
        }
    }

    // -----------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------

    fn resolve_calls(&self, nodes: &[FileNode], index: &NodeIndex) -> Vec<Relationship> {
        let mut edges = Vec::new();

        for node in nodes {
            let mut seen: HashSet<&str> = HashSet::new();
            for name in node.referenced_call_names() {
                if !seen.insert(name) {
                    continue;
                }

                // Constructor calls become INSTANTIATES edges.
                if let Some(class_decls) = index.classes.get(name) {
                    let candidates: Vec<&str> = class_decls
                        .iter()
                        .map(|(p, _)| *p)
                        .filter(|p| *p != node.path)
                        .collect();
                    let ambiguous = class_decls.len() > 1;
                    for target in candidates {
                        edges.push(
                            Relationship::new(&node.path, target, RelationshipType::Instantiates)
                                .with_property("symbol", name.to_string())
                                .with_property(
                                    "confidence",
                                    self.call_edge_confidence(ambiguous),
                                ),
                        );
                    }
                    continue;
                }

                let Some(declaring) = index.functions.get(name) else {
                    continue;
                };

                // Every candidate gets an edge; an ambiguous match lowers
                // the confidence instead of guessing one target.
                let ambiguous = declaring.len() > 1;
                for target in declaring {
                    if *target == node.path {
                        continue;
                    }
                    edges.push(
                        Relationship::new(&node.path, *target, RelationshipType::Calls)
                            .with_property("symbol", name.to_string())
                            .with_property("confidence", self.call_edge_confidence(ambiguous))
                            .with_property("candidates", declaring.len() as u64),
                    );
                }
            }
        }

        edges
    }

    fn call_edge_confidence(&self, ambiguous: bool) -> f64 {
        if ambiguous {
            self.config.ambiguous_call_confidence
        } else {
            self.config.call_confidence
        }
    }

    // -----------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------

    fn resolve_tests(&self, nodes: &[FileNode], index: &NodeIndex) -> Vec<Relationship> {
        let mut edges = Vec::new();

        for node in nodes {
            if node.kind != FileKind::Test {
                continue;
            }
            let Some(base) = test_base_name(&node.path) else {
                continue;
            };

            let candidates: Vec<&str> = index
                .stems
                .get(&base)
                .into_iter()
                .flatten()
                .copied()
                .filter(|p| *p != node.path)
                .filter(|p| {
                    index
                        .node(p)
                        .map(|n| n.kind != FileKind::Test)
                        .unwrap_or(false)
                })
                .collect();
            if candidates.is_empty() {
                continue;
            }

            // Same directory beats any other location.
            let test_dir = dirname(&node.path);
            let same_dir: Vec<&str> = candidates
                .iter()
                .copied()
                .filter(|p| dirname(p) == test_dir)
                .collect();
            let chosen = if same_dir.is_empty() { candidates } else { same_dir };

            for target in chosen {
                edges.push(Relationship::new(
                    &node.path,
                    target,
                    RelationshipType::Tests,
                ));
                edges.push(Relationship::new(
                    target,
                    &node.path,
                    RelationshipType::TestedBy,
                ));
            }
        }

        edges
    }

    // -----------------------------------------------------------------
    // Patterns
    // -----------------------------------------------------------------

    fn resolve_patterns(&self, nodes: &[FileNode], index: &NodeIndex) -> Vec<Relationship> {
        let mut edges = Vec::new();

        // Group detected instances per pattern name; the first file in
        // path order defines the pattern, the rest follow it.
        let mut by_pattern: BTreeMap<&str, Vec<(&str, f32)>> = BTreeMap::new();
        for node in nodes {
            for pattern in &node.patterns {
                by_pattern
                    .entry(pattern.name.as_str())
                    .or_default()
                    .push((node.path.as_str(), pattern.confidence));
            }
        }

        for (name, mut members) in by_pattern {
            members.sort_by(|a, b| a.0.cmp(b.0));
            for (i, (path, confidence)) in members.iter().enumerate() {
                let kind = if i == 0 {
                    RelationshipType::DefinesPattern
                } else {
                    RelationshipType::FollowsPattern
                };
                edges.push(
                    Relationship::new(*path, pattern_id(name), kind)
                        .with_property("confidence", *confidence as f64),
                );
            }
        }

        // Interface + implementation pairing across files.
        let mut interface_files: Vec<&str> = Vec::new();
        let mut implementing_files: Vec<&str> = Vec::new();
        for node in nodes {
            for class in &node.classes {
                if class.is_interface
                    && nodes.iter().any(|other| {
                        other.path != node.path
                            && other
                                .classes
                                .iter()
                                .any(|c| c.implements.contains(&class.name))
                    })
                {
                    interface_files.push(node.path.as_str());
                }
                for interface in &class.implements {
                    if let Some(decls) = index.classes.get(interface.as_str()) {
                        if decls.iter().any(|(p, is_iface)| *is_iface && *p != node.path) {
                            implementing_files.push(node.path.as_str());
                        }
                    }
                }
            }
        }
        let pairing_confidence = self.detector.confidence(INTERFACE_IMPLEMENTATION) as f64;
        for path in interface_files {
            edges.push(
                Relationship::new(
                    path,
                    pattern_id(INTERFACE_IMPLEMENTATION),
                    RelationshipType::DefinesPattern,
                )
                .with_property("confidence", pairing_confidence),
            );
        }
        for path in implementing_files {
            edges.push(
                Relationship::new(
                    path,
                    pattern_id(INTERFACE_IMPLEMENTATION),
                    RelationshipType::FollowsPattern,
                )
                .with_property("confidence", pairing_confidence),
            );
        }

        // Direct construction of a singleton class from another file
        // bypasses the accessor.
        let mut singleton_classes: HashMap<&str, &str> = HashMap::new();
        for node in nodes {
            for class_name in self.detector.singleton_classes(node) {
                singleton_classes.insert(class_name, node.path.as_str());
            }
        }
        if !singleton_classes.is_empty() {
            let violation_confidence = self.detector.confidence(SINGLETON) as f64;
            for node in nodes {
                let mut seen: HashSet<&str> = HashSet::new();
                for name in node.referenced_call_names() {
                    if !seen.insert(name) {
                        continue;
                    }
                    if let Some(declared_in) = singleton_classes.get(name) {
                        if *declared_in != node.path {
                            edges.push(
                                Relationship::new(
                                    &node.path,
                                    pattern_id(SINGLETON),
                                    RelationshipType::ViolatesPattern,
                                )
                                .with_property("class", name.to_string())
                                .with_property("confidence", violation_confidence),
                            );
                        }
                    }
                }
            }
        }

        edges
    }

    // -----------------------------------------------------------------
    // Documentation
    // -----------------------------------------------------------------

    fn resolve_documentation(&self, nodes: &[FileNode], index: &NodeIndex) -> Vec<Relationship> {
        let mut edges = Vec::new();

        for node in nodes {
            if node.kind != FileKind::Documentation {
                continue;
            }
            let stem = stem_of(&node.path);

            if stem.eq_ignore_ascii_case("readme") {
                // A README documents the module barrel beside it.
                let dir = dirname(&node.path);
                for barrel in INDEX_FILES {
                    let candidate = if dir.is_empty() {
                        (*barrel).to_string()
                    } else {
                        format!("{dir}/{barrel}")
                    };
                    if index.paths.contains(candidate.as_str()) {
                        edges.push(Relationship::new(
                            &node.path,
                            &candidate,
                            RelationshipType::Documents,
                        ));
                        edges.push(Relationship::new(
                            &candidate,
                            &node.path,
                            RelationshipType::DocumentedBy,
                        ));
                    }
                }
                continue;
            }

            for target in index.stems.get(&stem).into_iter().flatten() {
                if *target == node.path {
                    continue;
                }
                let is_doc = index
                    .node(target)
                    .map(|n| n.kind == FileKind::Documentation)
                    .unwrap_or(true);
                if is_doc {
                    continue;
                }
                edges.push(Relationship::new(
                    &node.path,
                    *target,
                    RelationshipType::Documents,
                ));
                edges.push(Relationship::new(
                    *target,
                    &node.path,
                    RelationshipType::DocumentedBy,
                ));
            }
        }

        edges
    }

    // -----------------------------------------------------------------
    // Semantic similarity
    // -----------------------------------------------------------------

    fn resolve_similarity(&self, vectors: &[ChunkVector]) -> Vec<Relationship> {
        // Vectors from different providers live in different spaces and
        // are never compared.
        let mut by_provider: HashMap<&str, Vec<&ChunkVector>> = HashMap::new();
        for vector in vectors {
            by_provider.entry(vector.provider.as_str()).or_default().push(vector);
        }

        // Best similarity per unordered file pair.
        let mut best: HashMap<(String, String), f32> = HashMap::new();
        for group in by_provider.values() {
            for (i, a) in group.iter().enumerate() {
                for b in group.iter().skip(i + 1) {
                    if a.path == b.path {
                        continue;
                    }
                    let similarity = cosine_similarity(&a.vector, &b.vector);
                    if similarity < self.config.similarity_threshold {
                        continue;
                    }
                    let key = if a.path <= b.path {
                        (a.path.clone(), b.path.clone())
                    } else {
                        (b.path.clone(), a.path.clone())
                    };
                    let entry = best.entry(key).or_insert(similarity);
                    if similarity > *entry {
                        *entry = similarity;
                    }
                }
            }
        }

        // Cap edges per file, strongest pairs first.
        let mut pairs: Vec<((String, String), f32)> = best.into_iter().collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0)));

        let mut per_file: HashMap<String, usize> = HashMap::new();
        let mut edges = Vec::new();
        for ((a, b), similarity) in pairs {
            let count_a = per_file.get(&a).copied().unwrap_or(0);
            let count_b = per_file.get(&b).copied().unwrap_or(0);
            if count_a >= self.config.similarity_top_k || count_b >= self.config.similarity_top_k {
                continue;
            }
            *per_file.entry(a.clone()).or_insert(0) += 1;
            *per_file.entry(b.clone()).or_insert(0) += 1;
            edges.push(
                Relationship::new(&a, &b, RelationshipType::SimilarTo)
                    .with_property("similarity", similarity as f64),
            );
        }

        edges
    }
}

/// Where an import specifier points.
enum SpecifierTarget {
    Project(String),
    External(String),
    Unresolved,
}

/// Resolve a specifier against the project's module rules: relative
/// paths, rust module paths, python dotted paths, otherwise an external
/// package.
fn resolve_specifier(specifier: &str, node: &FileNode, index: &NodeIndex) -> SpecifierTarget {
    if specifier.is_empty() {
        return SpecifierTarget::Unresolved;
    }

    // Rust module paths.
    if specifier.contains("::") {
        return resolve_rust_path(specifier, node, index);
    }

    // Relative filesystem specifiers (js/ts).
    if specifier.starts_with("./") || specifier.starts_with("../") {
        let joined = normalize_path(&format!("{}/{}", dirname(&node.path), specifier));
        return match probe_file(&joined, index) {
            Some(path) => SpecifierTarget::Project(path),
            None => SpecifierTarget::Unresolved,
        };
    }

    // Python relative (".utils", "..pkg.mod") and absolute dotted paths.
    if node.language == "python" {
        return resolve_python_path(specifier, node, index);
    }

    // Root-relative path with slashes (configured aliases rewrite to
    // this form).
    if specifier.contains('/') && !specifier.starts_with('@') {
        if let Some(path) = probe_file(&normalize_path(specifier), index) {
            return SpecifierTarget::Project(path);
        }
    }

    SpecifierTarget::External(base_package(specifier))
}

fn resolve_rust_path(specifier: &str, node: &FileNode, index: &NodeIndex) -> SpecifierTarget {
    let segments: Vec<&str> = specifier.split("::").filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return SpecifierTarget::Unresolved;
    }

    match segments[0] {
        "std" | "core" | "alloc" => SpecifierTarget::External(segments[0].to_string()),
        "crate" => {
            let root = crate_source_root(&node.path);
            match probe_rust_module(&root, &segments[1..], index) {
                Some(path) => SpecifierTarget::Project(path),
                None => SpecifierTarget::Unresolved,
            }
        }
        "super" => {
            let mut dir = dirname(&node.path);
            let mut rest = &segments[1..];
            while rest.first() == Some(&"super") {
                dir = dirname(&dir);
                rest = &rest[1..];
            }
            let parent = dirname(&dir);
            match probe_rust_module(&parent, rest, index)
                .or_else(|| probe_rust_module(&dir, rest, index))
            {
                Some(path) => SpecifierTarget::Project(path),
                None => SpecifierTarget::Unresolved,
            }
        }
        "self" => {
            let dir = dirname(&node.path);
            match probe_rust_module(&dir, &segments[1..], index) {
                Some(path) => SpecifierTarget::Project(path),
                None => SpecifierTarget::Unresolved,
            }
        }
        other => {
            // `use foo::Bar` may name a sibling module of the crate root.
            let root = crate_source_root(&node.path);
            if let Some(path) = probe_rust_module(&root, &segments, index) {
                return SpecifierTarget::Project(path);
            }
            SpecifierTarget::External(other.to_string())
        }
    }
}

/// Probe module path segments under a base directory, dropping trailing
/// item names until a file matches (`crate::db::open` matches `db.rs`).
fn probe_rust_module(base: &str, segments: &[&str], index: &NodeIndex) -> Option<String> {
    if segments.is_empty() {
        for root in ["lib.rs", "main.rs", "mod.rs"] {
            let candidate = join_path(base, root);
            if index.paths.contains(candidate.as_str()) {
                return Some(candidate);
            }
        }
        return None;
    }

    for take in (1..=segments.len()).rev() {
        let module_path = segments[..take].join("/");
        let file = join_path(base, &format!("{module_path}.rs"));
        if index.paths.contains(file.as_str()) {
            return Some(file);
        }
        let barrel = join_path(base, &format!("{module_path}/mod.rs"));
        if index.paths.contains(barrel.as_str()) {
            return Some(barrel);
        }
    }

    // Only item names were given (`crate::Config`): the crate root.
    probe_rust_module(base, &[], index)
}

/// Source root of the crate a file belongs to: the path up to and
/// including its `src` segment, or the project root.
fn crate_source_root(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    match segments.iter().position(|s| *s == "src") {
        Some(i) => segments[..=i].join("/"),
        None => String::new(),
    }
}

fn resolve_python_path(specifier: &str, node: &FileNode, index: &NodeIndex) -> SpecifierTarget {
    let dots = specifier.chars().take_while(|c| *c == '.').count();
    let rest = &specifier[dots..];
    let rel: String = rest.replace('.', "/");

    if dots > 0 {
        // One dot is the current package, each further dot one level up.
        let mut dir = dirname(&node.path);
        for _ in 1..dots {
            dir = dirname(&dir);
        }
        let base = join_path(&dir, &rel);
        return match probe_file(&normalize_path(&base), index) {
            Some(path) => SpecifierTarget::Project(path),
            None => SpecifierTarget::Unresolved,
        };
    }

    match probe_file(&rel, index) {
        Some(path) => SpecifierTarget::Project(path),
        None => SpecifierTarget::External(base_package(specifier)),
    }
}

/// Probe a normalized, extension-less path against known files: exact,
/// with each probe extension, then as a directory with an index barrel.
fn probe_file(candidate: &str, index: &NodeIndex) -> Option<String> {
    if candidate.is_empty() {
        return None;
    }
    if index.paths.contains(candidate) {
        return Some(candidate.to_string());
    }
    for ext in PROBE_EXTENSIONS {
        let with_ext = format!("{candidate}.{ext}");
        if index.paths.contains(with_ext.as_str()) {
            return Some(with_ext);
        }
    }
    for barrel in INDEX_FILES {
        let nested = format!("{candidate}/{barrel}");
        if index.paths.contains(nested.as_str()) {
            return Some(nested);
        }
    }
    None
}

/// First path segment of a package specifier; scoped npm packages keep
/// both segments.
fn base_package(specifier: &str) -> String {
    let mut parts = specifier.split('/');
    let first = parts.next().unwrap_or(specifier);
    if first.starts_with('@') {
        match parts.next() {
            Some(second) => format!("{first}/{second}"),
            None => first.to_string(),
        }
    } else {
        first.split('.').next().unwrap_or(first).to_string()
    }
}

fn dirname(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

fn join_path(base: &str, rest: &str) -> String {
    if base.is_empty() {
        rest.to_string()
    } else {
        format!("{base}/{rest}")
    }
}

/// Collapse `.` and `..` segments.
fn normalize_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

/// File stem without extension.
fn stem_of(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name).to_string()
}

/// Base name a test file exercises: `auth.test.ts` -> `auth`,
/// `test_page.py` -> `page`, `cache_test.go` -> `cache`.
fn test_base_name(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let stem = name.split('.').next()?;

    if let Some(base) = stem.strip_prefix("test_") {
        return Some(base.to_string());
    }
    if let Some(base) = stem.strip_suffix("_test") {
        return Some(base.to_string());
    }
    // `auth.test.ts` / `auth.spec.ts`: the stem is already `auth`; check
    // the second extension segment.
    let mut parts = name.split('.');
    let first = parts.next()?;
    if matches!(parts.next(), Some("test" | "spec")) {
        return Some(first.to_string());
    }
    Some(stem.to_string())
}
