//! Code graph data model: file nodes, typed relationships, and indexes.
//!
//! The graph is built in two phases. File nodes are produced per file by
//! the extractor; relationships are computed afterwards by the resolver,
//! once every node of the scan is known. Edges whose target is not a
//! project file point at a tracked placeholder id instead of being
//! dropped, so later scans can re-resolve them.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by graph mutations.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),
}

/// Classification of an indexed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Module,
    Config,
    Test,
    Documentation,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Module => "module",
            FileKind::Config => "config",
            FileKind::Test => "test",
            FileKind::Documentation => "documentation",
        }
    }
}

/// How an import statement pulls in its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Import,
    Require,
    Include,
    /// Heuristic fallback when no parser is available for the language.
    Reference,
}

/// Scope of a variable declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    Global,
    Class,
    Function,
    Block,
}

/// Category of a detected pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Architectural,
    Design,
    Coding,
}

/// An import statement owned by a file node, prior to resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRelation {
    /// The specifier as written in source (e.g. "./auth", "crate::db").
    pub specifier: String,
    pub kind: ImportKind,
    /// Symbols named by the import, if any.
    pub symbols: Vec<String>,
    /// 1-indexed source line.
    pub line: usize,
}

/// A function or method declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub line_start: usize,
    pub line_end: usize,
    /// Parameter names.
    pub params: Vec<String>,
    /// Declared return type, when the language states one.
    pub return_type: Option<String>,
    /// Cyclomatic complexity: 1 plus one per branching construct.
    pub complexity: u32,
    /// Callee names referenced in the body.
    pub calls: Vec<String>,
}

/// A class, struct, trait, or interface declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub line_start: usize,
    pub line_end: usize,
    /// Superclass name, if the declaration extends one.
    pub extends: Option<String>,
    /// Implemented interface or trait names.
    pub implements: Vec<String>,
    /// Whether this declaration is itself an interface/trait.
    pub is_interface: bool,
    pub methods: Vec<FunctionInfo>,
    /// Field or property names.
    pub properties: Vec<String>,
}

/// A variable declaration with a best-effort scope tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub line: usize,
    pub scope: VariableScope,
}

/// A detected architectural, design, or coding pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternInfo {
    pub kind: PatternKind,
    pub name: String,
    pub description: String,
    pub category: String,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
}

/// A file in the index, keyed by its project-relative path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    /// Project-relative path; the unique node key.
    pub path: String,
    /// Logical name (file stem).
    pub name: String,
    pub kind: FileKind,
    pub language: String,
    pub size_bytes: u64,
    /// Sha256 of the file content, for change detection.
    pub content_hash: String,
    /// Unix seconds when the node was last indexed.
    pub indexed_at: u64,

    pub exports: Vec<String>,
    pub imports: Vec<ImportRelation>,
    pub classes: Vec<ClassInfo>,
    pub functions: Vec<FunctionInfo>,
    pub variables: Vec<VariableInfo>,
    pub patterns: Vec<PatternInfo>,
    /// Callee names referenced at the file's top level, outside any
    /// declared function.
    pub top_level_calls: Vec<String>,

    /// Extraction failure note. When set, the structural fields above are
    /// empty and the file is still indexed for content.
    pub extraction_error: Option<String>,
}

impl FileNode {
    /// Create a node with empty structural fields.
    pub fn new(path: impl Into<String>, kind: FileKind, language: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .rsplit('/')
            .next()
            .map(|f| f.split('.').next().unwrap_or(f).to_string())
            .unwrap_or_else(|| path.clone());
        Self {
            path,
            name,
            kind,
            language: language.into(),
            size_bytes: 0,
            content_hash: String::new(),
            indexed_at: 0,
            exports: Vec::new(),
            imports: Vec::new(),
            classes: Vec::new(),
            functions: Vec::new(),
            variables: Vec::new(),
            patterns: Vec::new(),
            top_level_calls: Vec::new(),
            extraction_error: None,
        }
    }

    /// Set content size and hash.
    pub fn with_content(mut self, size_bytes: u64, content_hash: impl Into<String>) -> Self {
        self.size_bytes = size_bytes;
        self.content_hash = content_hash.into();
        self
    }

    /// All function names declared in this file, including methods.
    pub fn declared_function_names(&self) -> impl Iterator<Item = &str> {
        self.functions
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.classes.iter().flat_map(|c| {
                c.methods.iter().map(|m| m.name.as_str())
            }))
    }

    /// All callee names referenced anywhere in this file.
    pub fn referenced_call_names(&self) -> impl Iterator<Item = &str> {
        self.top_level_calls
            .iter()
            .map(String::as_str)
            .chain(self.functions.iter().flat_map(|f| {
                f.calls.iter().map(String::as_str)
            }))
            .chain(self.classes.iter().flat_map(|c| {
                c.methods.iter().flat_map(|m| m.calls.iter().map(String::as_str))
            }))
    }
}

/// Typed, directed relationship between two nodes.
///
/// Closed enumeration; serialized names match the stored edge labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    // Structural
    DependsOn,
    Implements,
    Extends,
    Uses,
    Calls,
    Instantiates,
    // Configuration
    Configures,
    ConfiguredBy,
    // Pattern
    FollowsPattern,
    ViolatesPattern,
    DefinesPattern,
    Overrides,
    // Documentation / test
    Documents,
    DocumentedBy,
    Tests,
    TestedBy,
    // Semantic
    SimilarTo,
    RelatedTo,
    Supersedes,
    References,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::DependsOn => "DEPENDS_ON",
            RelationshipType::Implements => "IMPLEMENTS",
            RelationshipType::Extends => "EXTENDS",
            RelationshipType::Uses => "USES",
            RelationshipType::Calls => "CALLS",
            RelationshipType::Instantiates => "INSTANTIATES",
            RelationshipType::Configures => "CONFIGURES",
            RelationshipType::ConfiguredBy => "CONFIGURED_BY",
            RelationshipType::FollowsPattern => "FOLLOWS_PATTERN",
            RelationshipType::ViolatesPattern => "VIOLATES_PATTERN",
            RelationshipType::DefinesPattern => "DEFINES_PATTERN",
            RelationshipType::Overrides => "OVERRIDES",
            RelationshipType::Documents => "DOCUMENTS",
            RelationshipType::DocumentedBy => "DOCUMENTED_BY",
            RelationshipType::Tests => "TESTS",
            RelationshipType::TestedBy => "TESTED_BY",
            RelationshipType::SimilarTo => "SIMILAR_TO",
            RelationshipType::RelatedTo => "RELATED_TO",
            RelationshipType::Supersedes => "SUPERSEDES",
            RelationshipType::References => "REFERENCES",
        }
    }
}

/// Placeholder node id for an import resolved to an external package.
pub fn external_id(package: &str) -> String {
    format!("external:{package}")
}

/// Placeholder node id for an import that should have resolved but did not.
pub fn unresolved_id(specifier: &str) -> String {
    format!("unresolved:{specifier}")
}

/// Placeholder node id for a pattern in the catalogue.
pub fn pattern_id(name: &str) -> String {
    format!("pattern:{name}")
}

/// Whether a node id names a tracked placeholder rather than a file.
pub fn is_placeholder(id: &str) -> bool {
    id.starts_with("external:") || id.starts_with("unresolved:") || id.starts_with("pattern:")
}

/// A directed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    pub kind: RelationshipType,
    /// Optional properties: confidence, symbol, line, similarity.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Value>,
    /// Set when the target could not be resolved to a project file. The
    /// edge is kept for re-resolution on a later scan.
    #[serde(default)]
    pub unresolved: bool,
}

impl Relationship {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: RelationshipType,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            properties: HashMap::new(),
            unresolved: false,
        }
    }

    /// Attach a property.
    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Mark the target as unresolved.
    pub fn flagged_unresolved(mut self) -> Self {
        self.unresolved = true;
        self
    }

    /// Confidence property, if present.
    pub fn confidence(&self) -> Option<f64> {
        self.properties.get("confidence").and_then(Value::as_f64)
    }

    /// Stable key used for deduplication and deterministic ordering.
    pub fn dedup_key(&self) -> (String, String, &'static str, String) {
        let symbol = self
            .properties
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        (self.from.clone(), self.to.clone(), self.kind.as_str(), symbol)
    }
}

/// A node visited by a bounded traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedNode {
    pub path: String,
    /// Hops from the start node.
    pub distance: usize,
    /// Node ids along the path from the start, inclusive.
    pub via: Vec<String>,
    /// Whether the id is a placeholder rather than a file.
    pub placeholder: bool,
}

/// Result of a bounded-depth traversal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<RelatedNode>,
    pub relationships: Vec<Relationship>,
}

/// In-memory code graph: file nodes plus typed relationships, with name
/// indexes used by the resolver and bounded traversal for queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeGraph {
    /// All file nodes, keyed by project-relative path.
    pub nodes: HashMap<String, FileNode>,
    /// All relationships.
    pub relationships: Vec<Relationship>,

    /// Function name -> declaring file paths.
    #[serde(skip)]
    function_index: HashMap<String, Vec<String>>,
    /// Class name -> declaring file paths.
    #[serde(skip)]
    class_index: HashMap<String, Vec<String>>,
    /// Node id -> indexes into `relationships` for outgoing edges.
    #[serde(skip)]
    outgoing: HashMap<String, Vec<usize>>,
}

impl CodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Rebuild the derived indexes. Called after deserialization and after
    /// bulk mutation.
    pub fn rebuild_indexes(&mut self) {
        self.function_index.clear();
        self.class_index.clear();
        for node in self.nodes.values() {
            Self::index_node(&mut self.function_index, &mut self.class_index, node);
        }
        self.rebuild_adjacency();
    }

    fn rebuild_adjacency(&mut self) {
        self.outgoing.clear();
        for (i, rel) in self.relationships.iter().enumerate() {
            self.outgoing.entry(rel.from.clone()).or_default().push(i);
        }
    }

    fn index_node(
        function_index: &mut HashMap<String, Vec<String>>,
        class_index: &mut HashMap<String, Vec<String>>,
        node: &FileNode,
    ) {
        for name in node.declared_function_names() {
            let paths = function_index.entry(name.to_string()).or_default();
            if !paths.contains(&node.path) {
                paths.push(node.path.clone());
            }
        }
        for class in &node.classes {
            let paths = class_index.entry(class.name.clone()).or_default();
            if !paths.contains(&node.path) {
                paths.push(node.path.clone());
            }
        }
    }

    /// Insert or replace a node. Existing relationships are untouched;
    /// the resolver recomputes them after every scan.
    pub fn upsert_node(&mut self, node: FileNode) {
        if let Some(old) = self.nodes.remove(&node.path) {
            self.unindex_node(&old);
        }
        Self::index_node(&mut self.function_index, &mut self.class_index, &node);
        self.nodes.insert(node.path.clone(), node);
    }

    fn unindex_node(&mut self, node: &FileNode) {
        for name in node.declared_function_names() {
            if let Some(paths) = self.function_index.get_mut(name) {
                paths.retain(|p| p != &node.path);
                if paths.is_empty() {
                    self.function_index.remove(name);
                }
            }
        }
        for class in &node.classes {
            if let Some(paths) = self.class_index.get_mut(&class.name) {
                paths.retain(|p| p != &node.path);
                if paths.is_empty() {
                    self.class_index.remove(&class.name);
                }
            }
        }
    }

    /// Remove a node and every relationship where it is an endpoint.
    pub fn remove_node(&mut self, path: &str) -> Result<FileNode, GraphError> {
        let node = self
            .nodes
            .remove(path)
            .ok_or_else(|| GraphError::NodeNotFound(path.to_string()))?;
        self.unindex_node(&node);
        self.relationships
            .retain(|r| r.from != path && r.to != path);
        self.rebuild_adjacency();
        Ok(node)
    }

    /// Replace the full relationship set with the resolver's output.
    pub fn set_relationships(&mut self, relationships: Vec<Relationship>) {
        self.relationships = relationships;
        self.rebuild_adjacency();
    }

    pub fn node(&self, path: &str) -> Option<&FileNode> {
        self.nodes.get(path)
    }

    /// Files declaring a function or method with the given name.
    pub fn functions_named(&self, name: &str) -> &[String] {
        self.function_index
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Files declaring a class with the given name.
    pub fn classes_named(&self, name: &str) -> &[String] {
        self.class_index
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Outgoing relationships from a node id.
    pub fn outgoing_edges(&self, id: &str) -> impl Iterator<Item = &Relationship> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.relationships.get(i))
    }

    /// Relationships with an endpoint that is neither a known node nor a
    /// tracked placeholder. An empty result is a graph invariant.
    pub fn dangling_edges(&self) -> Vec<&Relationship> {
        self.relationships
            .iter()
            .filter(|r| {
                let from_ok = self.nodes.contains_key(&r.from) || is_placeholder(&r.from);
                let to_ok = self.nodes.contains_key(&r.to) || is_placeholder(&r.to);
                !(from_ok && to_ok)
            })
            .collect()
    }

    /// Bounded-depth BFS from a node, following only the given edge kinds
    /// (or all kinds when `kinds` is empty).
    pub fn related(&self, start: &str, kinds: &[RelationshipType], depth: usize) -> Subgraph {
        let mut result = Subgraph::default();
        if !self.nodes.contains_key(start) && !is_placeholder(start) {
            return result;
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut edge_seen: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<(String, usize, Vec<String>)> = VecDeque::new();
        queue.push_back((start.to_string(), 0, vec![start.to_string()]));

        while let Some((current, distance, via)) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }

            result.nodes.push(RelatedNode {
                path: current.clone(),
                distance,
                via: via.clone(),
                placeholder: is_placeholder(&current),
            });

            if distance >= depth {
                continue;
            }

            if let Some(indexes) = self.outgoing.get(&current) {
                for &i in indexes {
                    let rel = &self.relationships[i];
                    if !kinds.is_empty() && !kinds.contains(&rel.kind) {
                        continue;
                    }
                    if edge_seen.insert(i) {
                        result.relationships.push(rel.clone());
                    }
                    if !visited.contains(&rel.to) {
                        let mut next_via = via.clone();
                        next_via.push(rel.to.clone());
                        queue.push_back((rel.to.clone(), distance + 1, next_via));
                    }
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_function(path: &str, func: &str) -> FileNode {
        let mut node = FileNode::new(path, FileKind::File, "typescript");
        node.functions.push(FunctionInfo {
            name: func.to_string(),
            line_start: 1,
            line_end: 3,
            complexity: 1,
            ..FunctionInfo::default()
        });
        node
    }

    #[test]
    fn upsert_indexes_function_names() {
        let mut graph = CodeGraph::new();
        graph.upsert_node(node_with_function("src/a.ts", "foo"));
        graph.upsert_node(node_with_function("src/b.ts", "foo"));

        let paths = graph.functions_named("foo");
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&"src/a.ts".to_string()));
    }

    #[test]
    fn reupsert_replaces_index_entries() {
        let mut graph = CodeGraph::new();
        graph.upsert_node(node_with_function("src/a.ts", "foo"));
        graph.upsert_node(node_with_function("src/a.ts", "bar"));

        assert!(graph.functions_named("foo").is_empty());
        assert_eq!(graph.functions_named("bar"), ["src/a.ts".to_string()]);
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut graph = CodeGraph::new();
        graph.upsert_node(node_with_function("src/a.ts", "foo"));
        graph.upsert_node(node_with_function("src/b.ts", "bar"));
        graph.set_relationships(vec![
            Relationship::new("src/b.ts", "src/a.ts", RelationshipType::DependsOn),
            Relationship::new("src/a.ts", "src/b.ts", RelationshipType::Calls),
        ]);

        assert_eq!(graph.outgoing_edges("src/b.ts").count(), 1);

        graph.remove_node("src/a.ts").unwrap();
        assert_eq!(graph.relationship_count(), 0);
        assert!(graph.dangling_edges().is_empty());
        assert_eq!(graph.outgoing_edges("src/b.ts").count(), 0);
    }

    #[test]
    fn placeholder_endpoints_are_not_dangling() {
        let mut graph = CodeGraph::new();
        graph.upsert_node(node_with_function("src/a.ts", "foo"));
        graph.set_relationships(vec![
            Relationship::new("src/a.ts", external_id("lodash"), RelationshipType::DependsOn),
            Relationship::new("src/a.ts", unresolved_id("./gone"), RelationshipType::DependsOn)
                .flagged_unresolved(),
        ]);

        assert!(graph.dangling_edges().is_empty());
        assert!(graph.relationships[1].unresolved);
    }

    #[test]
    fn related_respects_depth_and_kinds() {
        let mut graph = CodeGraph::new();
        for path in ["a", "b", "c", "d"] {
            graph.upsert_node(FileNode::new(path, FileKind::File, "rust"));
        }
        graph.set_relationships(vec![
            Relationship::new("a", "b", RelationshipType::DependsOn),
            Relationship::new("b", "c", RelationshipType::DependsOn),
            Relationship::new("a", "d", RelationshipType::SimilarTo),
        ]);

        let one_hop = graph.related("a", &[RelationshipType::DependsOn], 1);
        let paths: Vec<_> = one_hop.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, ["a", "b"]);

        let two_hops = graph.related("a", &[RelationshipType::DependsOn], 2);
        assert_eq!(two_hops.nodes.len(), 3);
        assert_eq!(two_hops.nodes[2].via, ["a", "b", "c"]);
    }

    #[test]
    fn relationship_type_labels_are_stable() {
        assert_eq!(RelationshipType::DependsOn.as_str(), "DEPENDS_ON");
        assert_eq!(RelationshipType::FollowsPattern.as_str(), "FOLLOWS_PATTERN");
        let json = serde_json::to_string(&RelationshipType::TestedBy).unwrap();
        assert_eq!(json, "\"TESTED_BY\"");
    }
}
